//! Inbound dispatcher — splits received datagrams into call records and
//! routes each to the registered server function or callback.
//!
//! Error containment follows the wire unit: an unroutable record is logged
//! (or, for callbacks, silently dropped) and the rest of the datagram is
//! still processed; framing damage abandons the remainder of that datagram
//! only.

use std::net::SocketAddr;

use bytes::Bytes;

use dstc_core::codec::{Arg, CallbackRef, Cursor};
use dstc_core::wire::{Announcement, DatagramHeader, RecordIter, HEADER_LEN, KIND_ANNOUNCEMENT};

use crate::peer::PeerView;
use crate::registry::{CallOrigin, Registry};

pub(crate) struct DispatchOutcome {
    /// Records handed to a local function.
    pub records: usize,
    /// An announcement from a previously unknown peer arrived.
    pub new_peer: bool,
}

const NOTHING: DispatchOutcome = DispatchOutcome { records: 0, new_peer: false };

/// Process one inbound datagram against the local registries.
pub(crate) fn handle_datagram(
    local_node: u32,
    registry: &Registry,
    peers: &PeerView,
    datagram: Bytes,
    from: SocketAddr,
) -> DispatchOutcome {
    let header = match DatagramHeader::parse(&datagram) {
        Ok(header) => header,
        Err(err) => {
            tracing::warn!(%from, error = %err, "dropping malformed datagram");
            return NOTHING;
        }
    };

    let origin_node = header.node_id;
    if origin_node == local_node {
        // Our own multicast loopback.
        tracing::trace!("ignoring own datagram");
        return NOTHING;
    }

    if header.kind == KIND_ANNOUNCEMENT {
        return match Announcement::parse(&datagram) {
            Ok(announcement) => {
                tracing::debug!(
                    node_id = announcement.node_id,
                    names = announcement.names.len(),
                    "announcement received"
                );
                let new_peer = peers.observe(&announcement, from);
                DispatchOutcome { records: 0, new_peer }
            }
            Err(err) => {
                tracing::warn!(%from, error = %err, "dropping malformed announcement");
                NOTHING
            }
        };
    }

    // Call datagram. Any traffic proves the peer is alive.
    peers.touch(origin_node);
    let origin = CallOrigin { node_id: origin_node };

    let mut dispatched = 0;
    for item in RecordIter::new(datagram.slice(HEADER_LEN..)) {
        let record = match item {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    origin = origin_node,
                    error = %err,
                    "malformed record, abandoning rest of datagram"
                );
                break;
            }
        };

        if record.is_callback() {
            dispatched += dispatch_callback(registry, origin, record.payload);
        } else {
            dispatched += dispatch_call(registry, origin, &record.name, record.payload);
        }
    }

    DispatchOutcome { records: dispatched, new_peer: false }
}

fn dispatch_call(registry: &Registry, origin: CallOrigin, name: &Bytes, payload: Bytes) -> usize {
    let name = match std::str::from_utf8(name) {
        Ok(name) => name,
        Err(_) => {
            tracing::warn!(
                origin = origin.node_id,
                name = hex::encode(name),
                "record name is not UTF-8, skipping"
            );
            return 0;
        }
    };

    match registry.call_server(name, origin, payload) {
        Some(Ok(())) => 1,
        Some(Err(err)) => {
            tracing::warn!(origin = origin.node_id, name, error = %err, "server function failed");
            1
        }
        None => {
            tracing::warn!(origin = origin.node_id, name, "no server function registered, skipping");
            0
        }
    }
}

/// Callback payloads begin with the handle, then the closure's arguments.
fn dispatch_callback(registry: &Registry, origin: CallOrigin, payload: Bytes) -> usize {
    let mut cur = Cursor::new(payload.clone());
    let handle = match CallbackRef::decode(&mut cur) {
        Ok(handle) => handle,
        Err(err) => {
            tracing::warn!(origin = origin.node_id, error = %err, "callback record too short");
            return 0;
        }
    };

    let args = payload.slice(handle.wire_size()..);
    match registry.call_callback(handle, origin, args) {
        Some(Ok(())) => 1,
        Some(Err(err)) => {
            tracing::warn!(
                origin = origin.node_id,
                handle = handle.raw(),
                error = %err,
                "callback dispatch failed"
            );
            1
        }
        // A cancelled or foreign handle — most callback records on the
        // group are addressed to some other node. Drop without noise.
        None => {
            tracing::trace!(handle = handle.raw(), "unknown callback handle, dropping");
            0
        }
    }
}
