//! Buffered-mode scenarios: accumulation, flush, unbuffer, teardown flush.

use crate::*;

use std::sync::{Arc, Mutex};

use dstc::transport::LocalBus;
use dstc::BatchMode;

/// Receiver-side collector preserving arrival order.
fn collector(
    node: &dstc::DstcNode<dstc::LocalEndpoint>,
    name: &str,
) -> Arc<Mutex<Vec<i32>>> {
    let values: Arc<Mutex<Vec<i32>>> = Arc::default();
    let values_in = values.clone();
    node.register_server::<(i32,), _>(name, move |_origin, (value,)| {
        values_in.lock().expect("values lock").push(value);
        Ok(())
    })
    .expect("register collector");
    values
}

#[tokio::test]
async fn hundred_buffered_calls_arrive_in_order() {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let values = collector(&b, "send_int");
    let send_int = a.register_client::<(i32,)>("send_int").unwrap();

    a.activate().await.unwrap();
    b.activate().await.unwrap();

    a.buffer_client_calls();
    assert_eq!(a.batch_mode(), BatchMode::Buffered);
    for i in 0..100 {
        send_int.call((i,)).unwrap();
    }
    a.flush_client_calls().unwrap();
    pump(&mut b).await;

    let got = values.lock().expect("values lock").clone();
    assert_eq!(got, (0..100).collect::<Vec<i32>>());
}

#[tokio::test]
async fn buffered_calls_stay_pending_until_flush() {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let values = collector(&b, "send_int");
    let send_int = a.register_client::<(i32,)>("send_int").unwrap();

    a.activate().await.unwrap();
    b.activate().await.unwrap();

    a.buffer_client_calls();
    send_int.call((1,)).unwrap();
    send_int.call((2,)).unwrap();

    pump(&mut b).await;
    assert!(values.lock().expect("values lock").is_empty(), "nothing flushed yet");

    a.flush_client_calls().unwrap();
    pump(&mut b).await;
    assert_eq!(*values.lock().expect("values lock"), vec![1, 2]);

    // Mode survives the flush.
    assert_eq!(a.batch_mode(), BatchMode::Buffered);
}

#[tokio::test]
async fn unbuffer_flushes_and_returns_to_immediate() {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let values = collector(&b, "send_int");
    let send_int = a.register_client::<(i32,)>("send_int").unwrap();

    a.activate().await.unwrap();
    b.activate().await.unwrap();

    a.buffer_client_calls();
    send_int.call((10,)).unwrap();
    a.unbuffer_client_calls().unwrap();
    assert_eq!(a.batch_mode(), BatchMode::Immediate);

    // Immediate again: no flush needed for subsequent calls.
    send_int.call((11,)).unwrap();
    pump(&mut b).await;

    assert_eq!(*values.lock().expect("values lock"), vec![10, 11]);
}

#[tokio::test]
async fn teardown_flushes_pending_calls() {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    let values = collector(&b, "send_int");
    let send_int = a.register_client::<(i32,)>("send_int").unwrap();

    a.activate().await.unwrap();
    b.activate().await.unwrap();

    a.buffer_client_calls();
    send_int.call((99,)).unwrap();
    a.teardown().unwrap();

    pump(&mut b).await;
    assert_eq!(*values.lock().expect("values lock"), vec![99]);
}
