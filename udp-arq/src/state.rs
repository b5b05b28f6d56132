//! Finite-state-machine types for both endpoints.
//!
//! Transitions are driven by [`crate::send_window::SendWindow`] and
//! [`crate::recv_window::RecvWindow`]; this module only names the states.

use std::fmt;

/// Lifecycle of the sending side.
///
/// ```text
///  FILLING ──window full / EOF──▶ WAITING_FOR_ACK ──ack 0──▶ DONE
///     ▲                              │      ▲
///     └────────── ack opens room ────┘      │
///                                    timeout│retransmit
///                                           ▼
///                                    RETRANSMITTING ──limit──▶ ABORTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Room in the window and more data to read.
    #[default]
    Filling,
    /// Window full, or the stream ended and acknowledgments are outstanding.
    WaitingForAck,
    /// A timeout fired and unacknowledged packets are being resent.
    Retransmitting,
    /// The end-of-stream marker was acknowledged.
    Done,
    /// The timeout limit was reached.
    Aborted,
}

impl SenderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SenderState::Done | SenderState::Aborted)
    }
}

/// Lifecycle of the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverState {
    /// No data packet seen yet; the peer is not known.
    #[default]
    Listening,
    /// Packets are arriving from a locked-in peer.
    Receiving,
    /// End-of-stream was acknowledged.
    Finished,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SenderState::Filling => "FILLING",
            SenderState::WaitingForAck => "WAITING_FOR_ACK",
            SenderState::Retransmitting => "RETRANSMITTING",
            SenderState::Done => "DONE",
            SenderState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
