//! Type-directed argument codec.
//!
//! Arguments are positional: the wire carries no type tags, so caller and
//! callee must declare the same shape. A name mismatch is caught by the
//! registry; a shape mismatch is undetectable and is a programming error.
//!
//! Encoding per kind:
//!
//! | kind               | encoded form                                |
//! |--------------------|---------------------------------------------|
//! | scalar (width W)   | W bytes, host-endian memory image           |
//! | fixed array [T; N] | N·W contiguous bytes                        |
//! | dynamic blob       | u16 length L (host-endian), then L bytes    |
//! | callback reference | u64, raw bytes                              |
//!
//! Decoded blobs are zero-copy slices of the inbound datagram buffer.

use bytes::{Bytes, BytesMut};

// ── Cursor ────────────────────────────────────────────────────────────────────

/// Read position over an inbound payload. Slicing off the shared `Bytes`
/// keeps blob decoding copy-free.
pub struct Cursor {
    buf: Bytes,
    pos: usize,
}

impl Cursor {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<Bytes, CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated { needed: n, remaining: self.remaining() });
        }
        let slice = self.buf.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        if self.remaining() < N {
            return Err(CodecError::Truncated { needed: N, remaining: self.remaining() });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }
}

// ── Arg ───────────────────────────────────────────────────────────────────────

/// One encodable/decodable argument.
///
/// `wire_size` is computed before encoding so the batcher can decide
/// whether the whole record fits in the pending datagram.
pub trait Arg: Sized {
    fn wire_size(&self) -> usize;
    fn encode(&self, out: &mut BytesMut);
    fn decode(cur: &mut Cursor) -> Result<Self, CodecError>;
}

macro_rules! scalar_arg {
    ($($t:ty),* $(,)?) => {$(
        impl Arg for $t {
            fn wire_size(&self) -> usize {
                std::mem::size_of::<$t>()
            }

            fn encode(&self, out: &mut BytesMut) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn decode(cur: &mut Cursor) -> Result<Self, CodecError> {
                Ok(<$t>::from_ne_bytes(cur.take_array()?))
            }
        }
    )*};
}

scalar_arg!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl Arg for bool {
    fn wire_size(&self) -> usize {
        1
    }

    fn encode(&self, out: &mut BytesMut) {
        (*self as u8).encode(out);
    }

    fn decode(cur: &mut Cursor) -> Result<Self, CodecError> {
        Ok(u8::decode(cur)? != 0)
    }
}

/// Fixed arrays of scalars: N·W contiguous bytes, no length prefix.
impl<T: Arg + Copy + Default, const N: usize> Arg for [T; N] {
    fn wire_size(&self) -> usize {
        self.iter().map(Arg::wire_size).sum()
    }

    fn encode(&self, out: &mut BytesMut) {
        for item in self {
            item.encode(out);
        }
    }

    fn decode(cur: &mut Cursor) -> Result<Self, CodecError> {
        let mut out = [T::default(); N];
        for slot in &mut out {
            *slot = T::decode(cur)?;
        }
        Ok(out)
    }
}

// ── Blob ──────────────────────────────────────────────────────────────────────

/// Dynamic byte blob: u16 length prefix, then that many bytes.
///
/// Decoding yields a refcounted slice of the inbound datagram buffer, so a
/// handler may hold on to one without copying.
///
/// The length must fit in u16. The record-size check performed before any
/// bytes are queued is tighter than that (the datagram capacity is below
/// 64 KiB), so an oversized blob surfaces as `EncodeOverflow` at the call
/// site rather than wrapping on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob(Bytes);

impl Blob {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// A string blob. The wire length includes the terminating NUL, per the
    /// string convention.
    pub fn string(s: &str) -> Self {
        let mut data = Vec::with_capacity(s.len() + 1);
        data.extend_from_slice(s.as_bytes());
        data.push(0);
        Self(data.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The blob as UTF-8 text, stripping one trailing NUL if present.
    pub fn as_str(&self) -> Option<&str> {
        let bytes = match self.0.split_last() {
            Some((&0, head)) => head,
            _ => &self.0[..],
        };
        std::str::from_utf8(bytes).ok()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<&[u8]> for Blob {
    fn from(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }
}

impl From<Vec<u8>> for Blob {
    fn from(data: Vec<u8>) -> Self {
        Self(data.into())
    }
}

impl Arg for Blob {
    fn wire_size(&self) -> usize {
        2 + self.0.len()
    }

    fn encode(&self, out: &mut BytesMut) {
        debug_assert!(self.0.len() <= u16::MAX as usize);
        out.extend_from_slice(&(self.0.len() as u16).to_ne_bytes());
        out.extend_from_slice(&self.0);
    }

    fn decode(cur: &mut Cursor) -> Result<Self, CodecError> {
        let len = u16::decode(cur)? as usize;
        Ok(Self(cur.take(len)?))
    }
}

// ── Callback references ───────────────────────────────────────────────────────

/// Opaque handle routing a reply back to a closure on the originating node.
///
/// Handles are minted by the originator's registry and are only meaningful
/// there; receivers store them verbatim and pass them back. Equality is the
/// only valid operation on a foreign handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackRef(u64);

impl CallbackRef {
    /// The null callback: encodable as an argument, never dispatched.
    pub const NONE: CallbackRef = CallbackRef(0);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl Arg for CallbackRef {
    fn wire_size(&self) -> usize {
        8
    }

    fn encode(&self, out: &mut BytesMut) {
        self.0.encode(out);
    }

    fn decode(cur: &mut Cursor) -> Result<Self, CodecError> {
        Ok(Self(u64::decode(cur)?))
    }
}

// ── Argument lists ────────────────────────────────────────────────────────────

/// A declared argument list: a tuple of [`Arg`]s, encoded in order with no
/// separators. The tuple type at the registration site is the schema.
pub trait ArgList: Sized {
    fn wire_size(&self) -> usize;
    fn encode(&self, out: &mut BytesMut);
    fn decode(cur: &mut Cursor) -> Result<Self, CodecError>;
}

impl ArgList for () {
    fn wire_size(&self) -> usize {
        0
    }

    fn encode(&self, _out: &mut BytesMut) {}

    fn decode(_cur: &mut Cursor) -> Result<Self, CodecError> {
        Ok(())
    }
}

macro_rules! arg_list_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Arg),+> ArgList for ($($name,)+) {
            fn wire_size(&self) -> usize {
                0 $(+ self.$idx.wire_size())+
            }

            fn encode(&self, out: &mut BytesMut) {
                $(self.$idx.encode(out);)+
            }

            fn decode(cur: &mut Cursor) -> Result<Self, CodecError> {
                Ok(($($name::decode(cur)?,)+))
            }
        }
    };
}

arg_list_tuple!(A0: 0);
arg_list_tuple!(A0: 0, A1: 1);
arg_list_tuple!(A0: 0, A1: 1, A2: 2);
arg_list_tuple!(A0: 0, A1: 1, A2: 2, A3: 3);
arg_list_tuple!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
arg_list_tuple!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);
arg_list_tuple!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6);
arg_list_tuple!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7);

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
