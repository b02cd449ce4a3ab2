//! Call batcher — the output-side accumulator that packs encoded call
//! records into multicast datagrams.
//!
//! Two modes. `Immediate` (the default) wraps every record in its own
//! datagram. `Buffered` concatenates records until the capacity limit or an
//! explicit flush; batching produces larger multicast packets and is much
//! faster for call bursts.
//!
//! A record either fits in the pending datagram or forces a flush first —
//! records are never split. Callers verify the single-record capacity bound
//! before appending; a record that can never fit is an encode error at the
//! call site, not here.

use bytes::{Bytes, BytesMut};

use dstc_core::wire::{self, DatagramHeader, DATAGRAM_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Every queued call is transmitted at once.
    Immediate,
    /// Calls accumulate until capacity or an explicit flush.
    Buffered,
}

pub struct CallBatcher {
    node_id: u32,
    mode: BatchMode,
    pending: BytesMut,
    record_bytes: usize,
}

impl CallBatcher {
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            mode: BatchMode::Immediate,
            pending: BytesMut::new(),
            record_bytes: 0,
        }
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Record bytes currently pending, header excluded.
    pub fn pending_bytes(&self) -> usize {
        self.record_bytes
    }

    /// Enter buffered mode. Already-buffered calls stay pending.
    pub fn buffer(&mut self) {
        self.mode = BatchMode::Buffered;
    }

    /// Leave buffered mode. Returns the pending datagram for transmission,
    /// if any — unbuffering flushes first.
    pub fn unbuffer(&mut self) -> Option<Bytes> {
        let out = self.take();
        self.mode = BatchMode::Immediate;
        out
    }

    /// Emit the pending datagram, leaving the mode untouched.
    pub fn flush(&mut self) -> Option<Bytes> {
        self.take()
    }

    /// Append one record. Returns a datagram that must be transmitted now:
    /// in immediate mode the record's own datagram, in buffered mode the
    /// previously pending datagram when this record did not fit.
    ///
    /// In buffered mode the freshly appended record may still be pending on
    /// return — a later `append` or `flush` carries it out.
    pub fn append(&mut self, name: &[u8], payload: &[u8]) -> Option<Bytes> {
        let size = wire::record_size(name.len(), payload.len());
        debug_assert!(size <= DATAGRAM_CAPACITY, "caller must bound record size");

        match self.mode {
            BatchMode::Immediate => {
                self.push(name, payload);
                self.take()
            }
            BatchMode::Buffered => {
                let flushed = if self.record_bytes + size > DATAGRAM_CAPACITY {
                    self.take()
                } else {
                    None
                };
                self.push(name, payload);
                flushed
            }
        }
    }

    fn push(&mut self, name: &[u8], payload: &[u8]) {
        if self.record_bytes == 0 {
            DatagramHeader::call(self.node_id).write_to(&mut self.pending);
        }
        wire::append_record(&mut self.pending, name, payload);
        self.record_bytes += wire::record_size(name.len(), payload.len());
    }

    fn take(&mut self) -> Option<Bytes> {
        if self.record_bytes == 0 {
            return None;
        }
        self.record_bytes = 0;
        Some(self.pending.split().freeze())
    }
}
