//! Selective-repeat send-side state machine.
//!
//! [`SendWindow`] keeps up to `W` numbered chunks outstanding.  Each chunk is
//! acknowledged individually, so a lost acknowledgment only costs the one
//! packet it covers, and `base` never moves past a packet the receiver has not
//! stored.
//!
//! # Protocol contract
//!
//! - Data sequence numbers start at 1 and increase by one per chunk; 0 is the
//!   end-of-stream marker and is not part of the window.
//! - At most `W` chunks (`base .. next_seq`) are tracked at once.
//! - An ACK for `seq` marks only `seq`; `base` then slides over the
//!   acknowledged prefix.
//! - On timeout, only chunks that are still unacknowledged are resent.  After
//!   `max_timeouts` consecutive timeouts without progress the window aborts.
//! - The end-of-stream marker goes out once the source is exhausted and every
//!   chunk is acknowledged.
//!
//! Payloads stay in the window until acknowledged so retransmission never has
//! to re-read the source.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::WindowSize;
use crate::error::{ArqError, Result};
use crate::packet::END_OF_STREAM;
use crate::state::SenderState;

// ---------------------------------------------------------------------------
// SendEntry
// ---------------------------------------------------------------------------

/// One chunk occupying a slot in the send window.
#[derive(Debug, Clone)]
pub struct SendEntry {
    pub seq: u32,
    /// Payload retained for retransmission.
    pub payload: Vec<u8>,
    /// Set when the receiver acknowledged this sequence number.
    pub acked: bool,
    /// Total number of transmissions (1 = first send).
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
}

/// Result of feeding one acknowledgment into the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The end-of-stream marker was acknowledged; the transfer is done.
    Finished { elapsed: Duration },
    /// A previously unacknowledged chunk was acknowledged; `slid` is how far
    /// `base` moved as a result (0 when a gap remains below it).
    Accepted { elapsed: Duration, slid: u32 },
    /// The chunk was already acknowledged.
    Duplicate,
    /// Below `base`, or an end-of-stream ACK before the marker was sent.
    Stale,
    /// Beyond anything sent so far.
    Unknown,
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Send-side window for one transfer.
///
/// ```text
///   base                 next_seq
///    │                      │
///  ──┼──────────────────────┼──────────────▶ seq space
///    │ <──── in flight ───▶ │ <── sendable (up to base + W) ──▶
/// ```
#[derive(Debug)]
pub struct SendWindow {
    base: u32,
    next_seq: u32,
    capacity: usize,
    /// Entries for `base .. next_seq`, front = `base`.
    entries: VecDeque<SendEntry>,
    exhausted: bool,
    /// Last send time of the end-of-stream marker, once it is out.
    sentinel: Option<Instant>,
    consecutive_timeouts: u32,
    max_timeouts: u32,
    state: SenderState,
}

impl SendWindow {
    pub fn new(window: WindowSize, max_timeouts: u32) -> Self {
        Self {
            base: 1,
            next_seq: 1,
            capacity: window.as_usize(),
            entries: VecDeque::with_capacity(window.as_usize()),
            exhausted: false,
            sentinel: None,
            consecutive_timeouts: 0,
            max_timeouts,
            state: SenderState::Filling,
        }
    }

    /// Oldest sequence number not yet acknowledged.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Sequence number the next new chunk will get.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Number of window slots in use (`next_seq - base`).
    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// `true` while there is room for another new chunk and the source may
    /// still have data.
    pub fn can_send(&self) -> bool {
        !self.exhausted && !self.state.is_terminal() && self.entries.len() < self.capacity
    }

    /// `true` when the end-of-stream marker should be sent now.
    pub fn sentinel_due(&self) -> bool {
        self.exhausted
            && self.entries.is_empty()
            && self.sentinel.is_none()
            && !self.state.is_terminal()
    }

    /// `true` when something is waiting for an acknowledgment.
    pub fn awaiting_ack(&self) -> bool {
        !self.entries.is_empty() || (self.sentinel.is_some() && self.state != SenderState::Done)
    }

    /// Number a new chunk and place it in the window.
    ///
    /// Check [`can_send`](Self::can_send) before calling.  Fails only when the
    /// sequence space would wrap.
    pub fn push(&mut self, payload: Vec<u8>) -> Result<&SendEntry> {
        debug_assert!(
            self.can_send(),
            "push called on a full send window ({} / {})",
            self.entries.len(),
            self.capacity
        );
        let seq = self.next_seq;
        self.next_seq = seq.checked_add(1).ok_or(ArqError::SequenceSpaceExhausted)?;
        self.entries.push_back(SendEntry {
            seq,
            payload,
            acked: false,
            tx_count: 1,
            sent_at: Instant::now(),
        });
        self.refresh_state();
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// The source returned EOF; no more chunks will be pushed.
    pub fn finish_stream(&mut self) {
        self.exhausted = true;
        self.refresh_state();
    }

    /// Record that the end-of-stream marker went out.
    pub fn mark_sentinel_sent(&mut self) {
        self.sentinel = Some(Instant::now());
    }

    /// Process an acknowledgment for `seq`.
    pub fn on_ack(&mut self, seq: u32) -> AckOutcome {
        if self.state.is_terminal() {
            return AckOutcome::Stale;
        }

        if seq == END_OF_STREAM {
            return match self.sentinel {
                Some(sent_at) => {
                    self.state = SenderState::Done;
                    self.consecutive_timeouts = 0;
                    AckOutcome::Finished {
                        elapsed: sent_at.elapsed(),
                    }
                }
                None => AckOutcome::Stale,
            };
        }

        if seq < self.base {
            return AckOutcome::Stale;
        }
        if seq >= self.next_seq {
            return AckOutcome::Unknown;
        }

        let entry = &mut self.entries[(seq - self.base) as usize];
        if entry.acked {
            return AckOutcome::Duplicate;
        }
        entry.acked = true;
        let elapsed = entry.sent_at.elapsed();
        self.consecutive_timeouts = 0;

        let mut slid = 0;
        while self.entries.front().is_some_and(|e| e.acked) {
            self.entries.pop_front();
            self.base += 1;
            slid += 1;
        }
        self.refresh_state();

        AckOutcome::Accepted { elapsed, slid }
    }

    /// Register a retransmission timeout.
    ///
    /// On success every unacknowledged entry (and the end-of-stream marker,
    /// if it is the outstanding message) is stamped as resent and the number
    /// of frames to resend is returned; the caller sends them by iterating
    /// [`unacked`](Self::unacked) and [`sentinel_outstanding`](Self::sentinel_outstanding),
    /// then calls [`end_retransmit`](Self::end_retransmit).
    ///
    /// Fails with [`ArqError::RetransmissionLimitExceeded`] once the limit is
    /// reached; the window is then [`SenderState::Aborted`].
    pub fn on_timeout(&mut self) -> Result<usize> {
        self.consecutive_timeouts += 1;
        if self.consecutive_timeouts >= self.max_timeouts {
            self.state = SenderState::Aborted;
            return Err(ArqError::RetransmissionLimitExceeded {
                base: self.base,
                timeouts: self.consecutive_timeouts,
            });
        }

        self.state = SenderState::Retransmitting;
        let now = Instant::now();
        let mut count = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.acked) {
            entry.tx_count += 1;
            entry.sent_at = now;
            count += 1;
        }
        if self.sentinel_outstanding() {
            self.mark_sentinel_sent();
            count += 1;
        }
        Ok(count)
    }

    /// Leave [`SenderState::Retransmitting`] after the resend burst.
    pub fn end_retransmit(&mut self) {
        self.refresh_state();
    }

    /// Entries still waiting for their acknowledgment, oldest first.
    pub fn unacked(&self) -> impl Iterator<Item = &SendEntry> {
        self.entries.iter().filter(|e| !e.acked)
    }

    /// `true` when the end-of-stream marker is out and unacknowledged.
    pub fn sentinel_outstanding(&self) -> bool {
        self.sentinel.is_some() && self.state != SenderState::Done
    }

    fn refresh_state(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = if !self.exhausted && self.entries.len() < self.capacity {
            SenderState::Filling
        } else {
            SenderState::WaitingForAck
        };
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
