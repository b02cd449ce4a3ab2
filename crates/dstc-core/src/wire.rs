//! DSTC wire format — on-wire layout for call and announcement datagrams.
//!
//! These definitions ARE the protocol. Every constant and every field here
//! must match on all peers; changing anything is a breaking change.
//!
//! The format is host-endian by design: DSTC targets homogeneous LAN fleets,
//! and multi-byte integers travel as raw memory images. Deployments mixing
//! byte orders are unsupported.
//!
//! The datagram header is #[repr(C, packed)] for deterministic layout and
//! uses zerocopy derives for safe, allocation-free serialization. There is
//! no unsafe code in this module.

use bytes::{Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current datagram format version. A receiver seeing an unknown version
/// silently drops the whole datagram.
pub const WIRE_VERSION: u8 = 0x01;

/// Datagram discriminator: call records follow the header.
pub const KIND_CALL: u8 = 0x02;

/// Datagram discriminator: an announcement body follows the header.
pub const KIND_ANNOUNCEMENT: u8 = 0x03;

/// Reserved record "name" marking a callback invocation. User-registered
/// names are validated printable ASCII (first byte >= 0x20), so this byte
/// can never collide with one.
pub const CALLBACK_SENTINEL: u8 = 0x01;

/// Maximum record bytes per call datagram, header excluded. Keeps a full
/// datagram within what a single IP-fragmented multicast packet can carry.
pub const DATAGRAM_CAPACITY: usize = 63 * 1024;

/// Default multicast group for call and announcement traffic.
pub const DEFAULT_MULTICAST_GROUP: &str = "239.40.41.42";

/// Default multicast port.
pub const DEFAULT_MULTICAST_PORT: u16 = 4723;

/// Default announcement interval in seconds.
pub const ANNOUNCE_INTERVAL_SECS: u64 = 2;

/// Default peer TTL in seconds. Peers not heard within this window are
/// removed from the peer view.
pub const PEER_TTL_SECS: u64 = 10;

// ── Datagram header ───────────────────────────────────────────────────────────

/// Prefix of every DSTC datagram.
///
/// The first byte discriminates call datagrams from announcements — the
/// original deployment let the transport's sub-addressing carry that
/// distinction; a plain datagram transport needs it on the wire.
///
/// `node_id` is the origin. Receivers drop datagrams whose origin equals
/// their own id (multicast loopback suppression).
///
/// Wire size: 6 bytes.
#[derive(Debug, Clone, Copy, PartialEq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct DatagramHeader {
    /// KIND_CALL or KIND_ANNOUNCEMENT.
    pub kind: u8,

    /// WIRE_VERSION.
    pub version: u8,

    /// Origin node id.
    pub node_id: u32,
}

assert_eq_size!(DatagramHeader, [u8; 6]);

/// Byte length of [`DatagramHeader`] on the wire.
pub const HEADER_LEN: usize = std::mem::size_of::<DatagramHeader>();

impl DatagramHeader {
    pub fn call(node_id: u32) -> Self {
        Self { kind: KIND_CALL, version: WIRE_VERSION, node_id }
    }

    pub fn announcement(node_id: u32) -> Self {
        Self { kind: KIND_ANNOUNCEMENT, version: WIRE_VERSION, node_id }
    }

    /// Append the header's wire image to `out`.
    pub fn write_to(&self, out: &mut BytesMut) {
        out.extend_from_slice(self.as_bytes());
    }

    /// Parse and validate the header at the start of a datagram.
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        let header = Self::read_from_prefix(buf).ok_or(WireError::Truncated {
            needed: HEADER_LEN,
            available: buf.len(),
        })?;
        if header.version != WIRE_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        if header.kind != KIND_CALL && header.kind != KIND_ANNOUNCEMENT {
            return Err(WireError::UnknownKind(header.kind));
        }
        Ok(header)
    }
}

// ── Function names ────────────────────────────────────────────────────────────

/// Is `name` a valid user-registered function name?
///
/// Non-empty printable ASCII. The lower bound keeps user names disjoint
/// from [`CALLBACK_SENTINEL`] and the NUL separator.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

// ── Call records ──────────────────────────────────────────────────────────────
//
// record := name ‖ 0x00 ‖ payload_len:u16(host-endian) ‖ payload
//
// The NUL terminator doubles as the name separator, so the name length is
// implicit. payload_len lets the dispatcher skip records it cannot route.

/// Encoded size of a record with the given name and payload lengths.
pub fn record_size(name_len: usize, payload_len: usize) -> usize {
    name_len + 1 + 2 + payload_len
}

/// Append one encoded record to `out`.
///
/// `payload.len()` must fit in u16; callers enforce this via the datagram
/// capacity check, which is strictly tighter.
pub fn append_record(out: &mut BytesMut, name: &[u8], payload: &[u8]) {
    debug_assert!(payload.len() <= u16::MAX as usize);
    out.extend_from_slice(name);
    out.extend_from_slice(&[0u8]);
    out.extend_from_slice(&(payload.len() as u16).to_ne_bytes());
    out.extend_from_slice(payload);
}

/// One parsed call record. `name` excludes the NUL terminator; `payload`
/// is a zero-copy slice of the inbound datagram buffer.
#[derive(Debug, Clone)]
pub struct Record {
    pub name: Bytes,
    pub payload: Bytes,
}

impl Record {
    /// Is this a callback invocation rather than a named call?
    pub fn is_callback(&self) -> bool {
        self.name.as_ref() == [CALLBACK_SENTINEL]
    }

    /// The function name, if it is valid UTF-8.
    pub fn name_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.name).ok()
    }
}

/// Iterator over the records in a call datagram body (header stripped).
///
/// Yields `Err` once on framing damage; the remainder of the datagram is
/// unreachable after that, so callers stop there.
pub struct RecordIter {
    body: Bytes,
    pos: usize,
}

impl RecordIter {
    pub fn new(body: Bytes) -> Self {
        Self { body, pos: 0 }
    }
}

impl Iterator for RecordIter {
    type Item = Result<Record, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.body.len() {
            return None;
        }
        let rest = &self.body[self.pos..];

        let nul = match rest.iter().position(|&b| b == 0) {
            Some(n) => n,
            None => return Some(Err(WireError::UnterminatedName)),
        };
        if nul == 0 {
            return Some(Err(WireError::EmptyName));
        }

        let len_start = nul + 1;
        if rest.len() < len_start + 2 {
            return Some(Err(WireError::Truncated {
                needed: len_start + 2,
                available: rest.len(),
            }));
        }
        let payload_len =
            u16::from_ne_bytes([rest[len_start], rest[len_start + 1]]) as usize;

        let payload_start = len_start + 2;
        if rest.len() < payload_start + payload_len {
            return Some(Err(WireError::Truncated {
                needed: payload_start + payload_len,
                available: rest.len(),
            }));
        }

        let base = self.pos;
        let record = Record {
            name: self.body.slice(base..base + nul),
            payload: self.body.slice(base + payload_start..base + payload_start + payload_len),
        };
        self.pos = base + payload_start + payload_len;
        Some(Ok(record))
    }
}

// ── Announcements ─────────────────────────────────────────────────────────────

/// A node's self-description, multicast on activation and on a fixed
/// interval thereafter.
///
/// Body: control_port:u16(host-endian) ‖ (name ‖ 0x00)*
///
/// `control_port` is the TCP endpoint where the node serves this same blob
/// on demand; 0 means no control endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub node_id: u32,
    pub control_port: u16,
    pub names: Vec<String>,
}

impl Announcement {
    /// Encode as a complete datagram, header included.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(
            HEADER_LEN + 2 + self.names.iter().map(|n| n.len() + 1).sum::<usize>(),
        );
        out.extend_from_slice(DatagramHeader::announcement(self.node_id).as_bytes());
        out.extend_from_slice(&self.control_port.to_ne_bytes());
        for name in &self.names {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&[0u8]);
        }
        out.freeze()
    }

    /// Parse a complete announcement datagram, header included.
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        let header = DatagramHeader::parse(buf)?;
        if header.kind != KIND_ANNOUNCEMENT {
            return Err(WireError::UnknownKind(header.kind));
        }
        let body = &buf[HEADER_LEN..];
        if body.len() < 2 {
            return Err(WireError::Truncated { needed: 2, available: body.len() });
        }
        let control_port = u16::from_ne_bytes([body[0], body[1]]);

        let mut names = Vec::new();
        let mut rest = &body[2..];
        while !rest.is_empty() {
            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(WireError::UnterminatedName)?;
            let name = std::str::from_utf8(&rest[..nul]).map_err(|_| WireError::BadName)?;
            if !valid_name(name) {
                return Err(WireError::BadName);
            }
            names.push(name.to_owned());
            rest = &rest[nul + 1..];
        }

        Ok(Self { node_id: header.node_id, control_port, names })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown datagram kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("unknown wire version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("truncated datagram: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("record name missing NUL terminator")]
    UnterminatedName,

    #[error("record has empty name")]
    EmptyName,

    #[error("announcement carries an invalid function name")]
    BadName,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
