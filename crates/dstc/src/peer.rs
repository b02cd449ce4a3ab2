//! Peer view — tracks nearby nodes and the server functions they announce.
//!
//! Best-effort: answers "is a remote function plausibly available?", never
//! a delivery guarantee. Entries live as long as announcements keep
//! arriving and expire after the TTL otherwise.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use dstc_core::wire::Announcement;

/// Tracked state for a discovered peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Source address of the peer's last announcement.
    pub addr: SocketAddr,

    /// TCP port of the peer's control endpoint. 0 = none.
    pub control_port: u16,

    /// Server-function names the peer has announced.
    pub names: HashSet<String>,

    /// Last time any datagram arrived from this peer.
    pub last_seen: Instant,
}

/// The peer view, keyed by node id. Bounded by `max_connections`.
pub struct PeerView {
    peers: DashMap<u32, PeerEntry>,
    max_connections: usize,
}

impl PeerView {
    pub fn new(max_connections: usize) -> Self {
        Self {
            peers: DashMap::new(),
            max_connections,
        }
    }

    /// Fold an announcement into the view. Returns true when the peer was
    /// previously unknown.
    pub fn observe(&self, announcement: &Announcement, addr: SocketAddr) -> bool {
        if let Some(mut entry) = self.peers.get_mut(&announcement.node_id) {
            entry.addr = addr;
            entry.control_port = announcement.control_port;
            entry.names = announcement.names.iter().cloned().collect();
            entry.last_seen = Instant::now();
            return false;
        }

        if self.peers.len() >= self.max_connections {
            tracing::warn!(
                node_id = announcement.node_id,
                max = self.max_connections,
                "peer limit reached, ignoring announcement"
            );
            return false;
        }

        self.peers.insert(
            announcement.node_id,
            PeerEntry {
                addr,
                control_port: announcement.control_port,
                names: announcement.names.iter().cloned().collect(),
                last_seen: Instant::now(),
            },
        );
        true
    }

    /// Refresh liveness on non-announcement traffic from a known peer.
    pub fn touch(&self, node_id: u32) {
        if let Some(mut entry) = self.peers.get_mut(&node_id) {
            entry.last_seen = Instant::now();
        }
    }

    /// Drop entries not heard from within `ttl`. Returns how many went.
    pub fn expire(&self, ttl: Duration) -> usize {
        let before = self.peers.len();
        self.peers.retain(|_, entry| entry.last_seen.elapsed() < ttl);
        before - self.peers.len()
    }

    /// Has any live peer announced `name` as a server function?
    pub fn remote_function_available(&self, name: &str) -> bool {
        self.peers.iter().any(|entry| entry.names.contains(name))
    }

    pub fn get(&self, node_id: u32) -> Option<PeerEntry> {
        self.peers.get(&node_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
