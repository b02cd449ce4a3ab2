//! DSTC integration test harness.
//!
//! Scenarios run several nodes inside one process over the `LocalBus`
//! transport — same datagrams, same dispatch paths as multicast, but
//! deterministic and with no network setup required.
//!
//! Every node gets an explicit node id so tests can assert on origins, and
//! binds its control endpoint on loopback.

mod batching;
mod callbacks;
mod calls;
mod peers;

use std::time::Duration;

use dstc::transport::{LocalBus, LocalEndpoint};
use dstc::{DstcConfig, DstcNode};

pub const NODE_A: u32 = 0xA;
pub const NODE_B: u32 = 0xB;

/// Config for a bus-backed test node: fixed id, loopback-only control.
pub fn test_config(node_id: u32) -> DstcConfig {
    DstcConfig {
        node_id,
        control_listen_iface: "127.0.0.1".into(),
        ..DstcConfig::default()
    }
}

/// A node attached to the shared bus. Register functions, then activate.
pub fn node_on(bus: &LocalBus, node_id: u32) -> DstcNode<LocalEndpoint> {
    DstcNode::with_transport(test_config(node_id), bus.endpoint())
}

/// Drive a node briefly: long enough to drain everything queued on the
/// bus, short enough to keep the suite fast.
pub async fn pump(node: &mut DstcNode<LocalEndpoint>) -> usize {
    node.process_events(Duration::from_millis(50))
        .await
        .expect("process_events failed")
}
