//! Peer discovery: announcements, availability queries, the control
//! endpoint, and new-peer fast convergence.

use crate::*;

use dstc::transport::LocalBus;
use dstc_core::wire::Announcement;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

#[tokio::test]
async fn announcements_populate_availability() -> anyhow::Result<()> {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    b.register_server::<(), _>("ping", |_origin, ()| Ok(()))?;

    assert!(!a.remote_function_available("ping"));

    a.activate().await?;
    b.activate().await?;
    pump(&mut a).await;

    assert!(a.remote_function_available("ping"));
    assert!(!a.remote_function_available("missing"));
    Ok(())
}

#[tokio::test]
async fn hearing_a_new_peer_triggers_a_reannounce() -> anyhow::Result<()> {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    a.register_server::<(), _>("served_by_a", |_origin, ()| Ok(()))?;
    b.register_server::<(), _>("served_by_b", |_origin, ()| Ok(()))?;

    // A activates (and announces) before B even exists on the bus; B's
    // own activation announcement is what A reacts to.
    a.activate().await?;
    b.activate().await?;

    pump(&mut a).await; // A hears B: new peer, immediate re-announce
    pump(&mut b).await; // B hears A's re-announce

    assert!(a.remote_function_available("served_by_b"));
    assert!(b.remote_function_available("served_by_a"));
    Ok(())
}

#[tokio::test]
async fn availability_is_per_name_not_per_peer() -> anyhow::Result<()> {
    let bus = LocalBus::new();
    let mut a = node_on(&bus, NODE_A);
    let mut b = node_on(&bus, NODE_B);

    b.register_server::<(), _>("one", |_origin, ()| Ok(()))?;
    b.register_server::<(), _>("two", |_origin, ()| Ok(()))?;

    a.activate().await?;
    b.activate().await?;
    pump(&mut a).await;

    assert!(a.remote_function_available("one"));
    assert!(a.remote_function_available("two"));
    assert!(!a.remote_function_available("three"));
    Ok(())
}

#[tokio::test]
async fn control_endpoint_serves_the_announcement() -> anyhow::Result<()> {
    let bus = LocalBus::new();
    let mut b = node_on(&bus, NODE_B);
    b.register_server::<(), _>("ping", |_origin, ()| Ok(()))?;
    b.activate().await?;

    let port = b.control_port().expect("activated node has a control port");
    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        Ok::<Vec<u8>, std::io::Error>(buf)
    });

    // The accept happens inside the node's event loop.
    let mut blob = None;
    for _ in 0..40 {
        pump(&mut b).await;
        if client.is_finished() {
            blob = Some(client.await??);
            break;
        }
    }

    let blob = blob.expect("control query never completed");
    let announcement = Announcement::parse(&blob)?;
    assert_eq!(announcement.node_id, NODE_B);
    assert_eq!(announcement.control_port, port);
    assert!(announcement.names.contains(&"ping".to_string()));
    Ok(())
}

#[tokio::test]
async fn node_ids_are_assigned_when_configured_zero() -> anyhow::Result<()> {
    let bus = LocalBus::new();
    let mut node = dstc::DstcNode::with_transport(test_config(0), bus.endpoint());

    assert_eq!(node.node_id(), None);
    node.activate().await?;
    let id = node.node_id().expect("random id assigned");
    assert_ne!(id, 0);
    Ok(())
}
