//! Selective-repeat receive-side state machine.
//!
//! [`RecvWindow`] accepts any chunk whose sequence number falls in
//! `[base, base + W)`, acknowledges each one individually, and releases the
//! longest contiguous run starting at `base` to the application.
//!
//! The window is a fixed ring of `W` slots.  The slot at `head` always holds
//! sequence number `base`; sequence `base + i` lives `i` slots after it.
//! Sliding the window is a head increment, never a shift or reallocation.
//!
//! ```text
//!            head
//!             │
//!   slots: [ s+2 | s+3 | s   | s+1 ]     base = s, W = 4
//! ```
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use crate::config::WindowSize;
use crate::packet::END_OF_STREAM;

/// What happened to an inbound data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// End-of-stream marker.
    EndOfStream,
    /// New in-window chunk, now buffered.
    Stored,
    /// In-window chunk that was already buffered.
    Duplicate,
    /// Below `base`: already handed to the application.
    Delivered,
    /// At or beyond `base + W`.
    BeyondWindow,
}

/// Outcome of [`RecvWindow::on_packet`]: how the packet was classified and
/// which sequence number (if any) to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub disposition: Disposition,
    pub ack: Option<u32>,
}

/// Receive-side window for one transfer.
#[derive(Debug)]
pub struct RecvWindow {
    /// Lowest sequence number not yet delivered.
    base: u32,
    /// Ring index of the slot holding `base`.
    head: usize,
    slots: Vec<Option<Vec<u8>>>,
    delivered: u64,
    finished: bool,
}

impl RecvWindow {
    pub fn new(window: WindowSize) -> Self {
        Self {
            base: 1,
            head: 0,
            slots: vec![None; window.as_usize()],
            delivered: 0,
            finished: false,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Chunks handed to the application so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Chunks buffered out of order, waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// `true` if `seq` is in the window and its chunk is buffered.
    pub fn holds(&self, seq: u32) -> bool {
        self.slot_index(seq)
            .is_some_and(|i| self.slots[i].is_some())
    }

    /// Ring index for `seq`, or `None` outside `[base, base + W)`.
    fn slot_index(&self, seq: u32) -> Option<usize> {
        if seq < self.base {
            return None;
        }
        let offset = (seq - self.base) as usize;
        if offset >= self.slots.len() {
            return None;
        }
        Some((self.head + offset) % self.slots.len())
    }

    /// Classify one inbound data packet, buffering it if it is new.
    pub fn on_packet(&mut self, seq: u32, payload: Vec<u8>) -> Verdict {
        if seq == END_OF_STREAM {
            self.finished = true;
            return Verdict {
                disposition: Disposition::EndOfStream,
                ack: Some(END_OF_STREAM),
            };
        }

        if seq < self.base {
            return Verdict {
                disposition: Disposition::Delivered,
                ack: Some(seq),
            };
        }

        match self.slot_index(seq) {
            Some(i) => {
                let disposition = if self.slots[i].is_some() {
                    Disposition::Duplicate
                } else {
                    self.slots[i] = Some(payload);
                    Disposition::Stored
                };
                Verdict {
                    disposition,
                    ack: Some(seq),
                }
            }
            // Tell the peer how far delivery got.  Nothing is delivered while
            // base is 1, and ack 0 would read as end-of-stream.
            None => Verdict {
                disposition: Disposition::BeyondWindow,
                ack: (self.base > 1).then_some(self.base - 1),
            },
        }
    }

    /// Take the chunk at `base` if it has arrived, sliding the window by one.
    pub fn pop_ready(&mut self) -> Option<Vec<u8>> {
        let chunk = self.slots[self.head].take()?;
        self.head = (self.head + 1) % self.slots.len();
        self.base = self.base.saturating_add(1);
        self.delivered += 1;
        Some(chunk)
    }

    /// Drain the longest contiguous run of chunks starting at `base`, in
    /// sequence order.
    pub fn drain_ready(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
        std::iter::from_fn(move || self.pop_ready())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
