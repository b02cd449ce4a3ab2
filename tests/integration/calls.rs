//! Basic call scenarios: no arguments, scalars, blobs, oversized calls.

use crate::*;

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use dstc::transport::LocalBus;
use dstc::{Blob, DstcError};

#[tokio::test]
async fn no_argument_call() {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let counter = Arc::new(AtomicU32::new(0));
    let counter_in = counter.clone();
    b.register_server::<(), _>("ping", move |_origin, ()| {
        counter_in.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();
    let ping = a.register_client::<()>("ping").unwrap();

    a.activate().await.unwrap();
    b.activate().await.unwrap();

    ping.call(()).unwrap();
    pump(&mut b).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scalar_argument_arrives_intact() {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let seen = Arc::new(AtomicI32::new(0));
    let seen_in = seen.clone();
    b.register_server::<(i32,), _>("send_int", move |_origin, (value,)| {
        seen_in.store(value, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();
    let send_int = a.register_client::<(i32,)>("send_int").unwrap();

    a.activate().await.unwrap();
    b.activate().await.unwrap();

    send_int.call((4711,)).unwrap();
    pump(&mut b).await;

    assert_eq!(seen.load(Ordering::SeqCst), 4711);
}

#[tokio::test]
async fn blob_argument_arrives_intact() -> anyhow::Result<()> {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let seen: Arc<std::sync::Mutex<Option<(usize, Vec<u8>)>>> = Arc::default();
    let seen_in = seen.clone();
    b.register_server::<(Blob,), _>("send_blob", move |_origin, (blob,)| {
        let mut slot = seen_in.lock().expect("seen lock");
        *slot = Some((blob.len(), blob.as_bytes().to_vec()));
        Ok(())
    })?;
    let send_blob = a.register_client::<(Blob,)>("send_blob")?;

    a.activate().await?;
    b.activate().await?;

    send_blob.call((Blob::new(&b"hello world"[..]),))?;
    pump(&mut b).await;

    let seen = seen.lock().expect("seen lock").take();
    let (len, data) = seen.expect("handler never ran");
    assert_eq!(len, 11);
    assert_eq!(data, b"hello world");
    Ok(())
}

#[tokio::test]
async fn origin_node_id_reaches_the_handler() {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let origin_seen = Arc::new(AtomicU32::new(0));
    let origin_in = origin_seen.clone();
    b.register_server::<(), _>("whoami", move |origin, ()| {
        origin_in.store(origin.node_id, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();
    let whoami = a.register_client::<()>("whoami").unwrap();

    a.activate().await.unwrap();
    b.activate().await.unwrap();

    whoami.call(()).unwrap();
    pump(&mut b).await;

    assert_eq!(origin_seen.load(Ordering::SeqCst), NODE_A);
}

#[tokio::test]
async fn sender_does_not_dispatch_its_own_calls() {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);

    // Same name registered on both sides of the same node.
    let counter = Arc::new(AtomicU32::new(0));
    let counter_in = counter.clone();
    a.register_server::<(), _>("echo", move |_origin, ()| {
        counter_in.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();
    let echo = a.register_client::<()>("echo").unwrap();

    a.activate().await.unwrap();
    echo.call(()).unwrap();
    pump(&mut a).await;

    // The bus loops the datagram back, the dispatcher drops it by origin.
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn oversized_call_is_rejected_before_transmission() {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let counter = Arc::new(AtomicU32::new(0));
    let counter_in = counter.clone();
    b.register_server::<(Blob,), _>("send_blob", move |_origin, (_blob,)| {
        counter_in.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();
    let send_blob = a.register_client::<(Blob,)>("send_blob").unwrap();

    a.activate().await.unwrap();
    b.activate().await.unwrap();

    let huge = Blob::new(vec![0u8; 70_000]);
    let err = send_blob.call((huge,)).unwrap_err();
    assert!(matches!(err, DstcError::EncodeOverflow { .. }));

    // Nothing was emitted: the receiver stays silent.
    pump(&mut b).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn calls_before_activation_are_rejected() {
    let bus = LocalBus::new();
    let a = node_on(&bus, NODE_A);
    let ping = a.register_client::<()>("ping").unwrap();

    assert!(matches!(ping.call(()), Err(DstcError::NotActivated)));
}

#[tokio::test]
async fn registration_after_activation_is_rejected() {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    a.activate().await.unwrap();

    assert!(matches!(
        a.register_client::<()>("late"),
        Err(DstcError::AlreadyActivated)
    ));
    assert!(a
        .register_server::<(), _>("late", |_origin, ()| Ok(()))
        .is_err());
}
