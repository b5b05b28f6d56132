//! Error types shared by both endpoints.
//!
//! Only retransmission timeouts are recovered inside the library; everything
//! that reaches the caller as an [`ArqError`] ends the transfer.

use std::io;

use thiserror::Error;

use crate::packet::PacketError;

/// Errors that terminate a transfer.
#[derive(Debug, Error)]
pub enum ArqError {
    /// Invalid window size, timeout, or retry limit.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bind, send, or receive failed at the socket layer.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// Reading the outbound byte stream failed.
    #[error("failed to read from source: {0}")]
    Source(#[source] io::Error),

    /// Writing the delivered byte stream failed.
    #[error("failed to write to sink: {0}")]
    Sink(#[source] io::Error),

    /// The peer stopped acknowledging; `timeouts` consecutive retransmission
    /// rounds made no progress past `base`.
    #[error("retransmission limit exceeded: {timeouts} consecutive timeouts at base {base}")]
    RetransmissionLimitExceeded { base: u32, timeouts: u32 },

    /// A frame could not be built.
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// The stream has more chunks than the 32-bit sequence space can number.
    #[error("sequence number space exhausted")]
    SequenceSpaceExhausted,
}

pub type Result<T> = std::result::Result<T, ArqError>;
