//! Wire-format definitions for data and acknowledgment frames.
//!
//! Every datagram exchanged between peers is either a data frame (sender →
//! receiver) or an acknowledgment frame (receiver → sender).  This module is
//! responsible for:
//! - Defining the on-wire binary layout of both frames.
//! - Serialising a chunk of the stream into a fixed-size data frame.
//! - Deserialising raw datagrams, rejecting anything of the wrong size.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  Sequence number `0` is
//! reserved for end-of-stream in both directions.
//!
//! Data frame, [`Framing::LengthPrefixed`] (1006 bytes):
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Payload Length        |                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
//! |          Payload (1000 bytes, zero-padded on the right)       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Data frame, [`Framing::ZeroPadded`] (1004 bytes): the same without the
//! length field.  The decoder strips trailing zero bytes, so a chunk whose
//! real content ends in zeros comes back shorter.  Kept for compatibility
//! with peers that only speak the padded format.
//!
//! Acknowledgment frame (4 bytes): the acknowledged sequence number.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Largest payload carried by one data frame.
pub const MAX_PAYLOAD: usize = 1000;

/// Reserved sequence number marking end-of-stream.
pub const END_OF_STREAM: u32 = 0;

/// Byte length of an acknowledgment frame.
pub const ACK_LEN: usize = 4;

/// Receive buffer size; larger than any valid frame so oversized datagrams
/// are seen at their real length instead of being truncated into validity.
pub const RECV_BUF_LEN: usize = 2048;

const SEQ_LEN: usize = 4;
const LEN_FIELD: usize = 2;

// Byte offsets within a data frame.
const OFF_SEQ: usize = 0;
const OFF_LEN: usize = SEQ_LEN;

/// Errors that can arise when encoding or parsing a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Datagram length does not match the frame being decoded.
    #[error("malformed frame: expected {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },

    /// Length field claims more than [`MAX_PAYLOAD`] bytes.
    #[error("payload length field {0} exceeds {MAX_PAYLOAD}")]
    BadLength(usize),

    /// Caller tried to frame more than [`MAX_PAYLOAD`] bytes.
    #[error("payload of {0} bytes exceeds {MAX_PAYLOAD}")]
    PayloadTooLarge(usize),
}

/// How a data frame delimits the real payload inside its fixed-size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Payload length is implied by stripping trailing zero padding.
    ZeroPadded,
    /// Explicit 16-bit payload length after the sequence number.
    #[default]
    LengthPrefixed,
}

/// A decoded data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl DataPacket {
    pub fn is_end_of_stream(&self) -> bool {
        self.seq == END_OF_STREAM
    }
}

impl Framing {
    fn header_len(self) -> usize {
        match self {
            Framing::ZeroPadded => SEQ_LEN,
            Framing::LengthPrefixed => SEQ_LEN + LEN_FIELD,
        }
    }

    /// Exact byte length of every data frame in this framing.
    pub fn data_frame_len(self) -> usize {
        self.header_len() + MAX_PAYLOAD
    }

    /// Serialise one chunk into a full-size data frame.
    pub fn encode_data(self, seq: u32, payload: &[u8]) -> Result<Vec<u8>, PacketError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload.len()));
        }
        let hdr = self.header_len();
        let mut buf = vec![0u8; self.data_frame_len()];

        buf[OFF_SEQ..OFF_SEQ + SEQ_LEN].copy_from_slice(&seq.to_be_bytes());
        if self == Framing::LengthPrefixed {
            buf[OFF_LEN..OFF_LEN + LEN_FIELD]
                .copy_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        buf[hdr..hdr + payload.len()].copy_from_slice(payload);

        Ok(buf)
    }

    /// Parse a data frame.
    ///
    /// Returns [`PacketError::Malformed`] for any frame that is not exactly
    /// [`Framing::data_frame_len`] bytes.
    pub fn decode_data(self, frame: &[u8]) -> Result<DataPacket, PacketError> {
        let expected = self.data_frame_len();
        if frame.len() != expected {
            return Err(PacketError::Malformed {
                expected,
                actual: frame.len(),
            });
        }

        let seq = read_u32(&frame[OFF_SEQ..OFF_SEQ + SEQ_LEN]);
        let body = &frame[self.header_len()..];

        let len = match self {
            Framing::ZeroPadded => body.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1),
            Framing::LengthPrefixed => {
                let len = u16::from_be_bytes([frame[OFF_LEN], frame[OFF_LEN + 1]]) as usize;
                if len > MAX_PAYLOAD {
                    return Err(PacketError::BadLength(len));
                }
                len
            }
        };

        Ok(DataPacket {
            seq,
            payload: body[..len].to_vec(),
        })
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::ZeroPadded => f.write_str("padded"),
            Framing::LengthPrefixed => f.write_str("length-prefixed"),
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "padded" => Ok(Framing::ZeroPadded),
            "length-prefixed" => Ok(Framing::LengthPrefixed),
            other => Err(format!(
                "unknown framing '{other}' (expected 'padded' or 'length-prefixed')"
            )),
        }
    }
}

/// Serialise an acknowledgment for `seq`.
pub fn encode_ack(seq: u32) -> [u8; ACK_LEN] {
    seq.to_be_bytes()
}

/// Parse an acknowledgment frame.
pub fn decode_ack(frame: &[u8]) -> Result<u32, PacketError> {
    if frame.len() != ACK_LEN {
        return Err(PacketError::Malformed {
            expected: ACK_LEN,
            actual: frame.len(),
        });
    }
    Ok(read_u32(frame))
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}
