//! Callback round-trips: a receiver invoking a closure back on the
//! originating node through an opaque handle.

use crate::*;

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use dstc::transport::LocalBus;
use dstc::CallbackRef;

#[tokio::test]
async fn callback_round_trip() -> anyhow::Result<()> {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    // B doubles the value and replies through the supplied handle.
    let b_handle = b.handle();
    b.register_server::<(CallbackRef, i32), _>("server_do", move |_origin, (reply, value)| {
        b_handle.invoke_callback(reply, (value * 2,))?;
        Ok(())
    })?;
    let server_do = a.register_client::<(CallbackRef, i32)>("server_do")?;

    let got = Arc::new(AtomicI32::new(0));
    let got_in = got.clone();
    let reply = a.activate_callback::<(i32,), _>(move |_origin, (value,)| {
        got_in.store(value, Ordering::SeqCst);
        Ok(())
    });

    a.activate().await?;
    b.activate().await?;

    server_do.call((reply, 7))?;
    pump(&mut b).await; // B dispatches the call and queues the reply
    pump(&mut a).await; // A dispatches the reply

    assert_eq!(got.load(Ordering::SeqCst), 14);
    Ok(())
}

#[tokio::test]
async fn reply_origin_is_the_responding_node() -> anyhow::Result<()> {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let b_handle = b.handle();
    b.register_server::<(CallbackRef,), _>("ask", move |_origin, (reply,)| {
        b_handle.invoke_callback(reply, ())?;
        Ok(())
    })?;
    let ask = a.register_client::<(CallbackRef,)>("ask")?;

    let replier = Arc::new(AtomicU32::new(0));
    let replier_in = replier.clone();
    let reply = a.activate_callback::<(), _>(move |origin, ()| {
        replier_in.store(origin.node_id, Ordering::SeqCst);
        Ok(())
    });

    a.activate().await?;
    b.activate().await?;

    ask.call((reply,))?;
    pump(&mut b).await;
    pump(&mut a).await;

    assert_eq!(replier.load(Ordering::SeqCst), NODE_B);
    Ok(())
}

#[tokio::test]
async fn null_callback_is_a_no_op() -> anyhow::Result<()> {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let served = Arc::new(AtomicU32::new(0));
    let served_in = served.clone();
    let b_handle = b.handle();
    b.register_server::<(CallbackRef,), _>("ask", move |_origin, (reply,)| {
        served_in.fetch_add(1, Ordering::SeqCst);
        // Passing the null handle through must not emit anything.
        b_handle.invoke_callback(reply, ())?;
        Ok(())
    })?;
    let ask = a.register_client::<(CallbackRef,)>("ask")?;

    a.activate().await?;
    b.activate().await?;

    ask.call((CallbackRef::NONE,))?;
    pump(&mut b).await;
    pump(&mut a).await;

    assert_eq!(served.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn cancelled_callback_drops_the_reply() -> anyhow::Result<()> {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let b_handle = b.handle();
    b.register_server::<(CallbackRef,), _>("ask", move |_origin, (reply,)| {
        b_handle.invoke_callback(reply, (1i32,))?;
        Ok(())
    })?;
    let ask = a.register_client::<(CallbackRef,)>("ask")?;

    let got = Arc::new(AtomicU32::new(0));
    let got_in = got.clone();
    let reply = a.activate_callback::<(i32,), _>(move |_origin, (_value,)| {
        got_in.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    a.activate().await?;
    b.activate().await?;

    // Cancel before the reply can arrive: the inbound record is dropped.
    assert!(a.cancel_callback(reply));
    ask.call((reply,))?;
    pump(&mut b).await;
    pump(&mut a).await;

    assert_eq!(got.load(Ordering::SeqCst), 0);
    Ok(())
}
