//! Transfer parameters for both endpoints.
//!
//! Everything here is validated before any socket or file is opened, so a
//! bad window size or timeout fails fast with [`ArqError::Config`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ArqError, Result};
use crate::packet::Framing;

/// Largest permitted window (outstanding packets).
pub const MAX_WINDOW: u32 = 32;

/// How long the sender waits for progress before retransmitting.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Consecutive timeouts without progress after which the sender gives up.
pub const DEFAULT_MAX_TIMEOUTS: u32 = 3;

/// Number of packets that may be outstanding at once, in `1..=32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize(u32);

impl WindowSize {
    pub fn new(size: u32) -> Result<Self> {
        if (1..=MAX_WINDOW).contains(&size) {
            Ok(Self(size))
        } else {
            Err(ArqError::Config(format!(
                "window size must be between 1 and {MAX_WINDOW}, got {size}"
            )))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WindowSize {
    type Err = ArqError;

    fn from_str(s: &str) -> Result<Self> {
        let n = s
            .trim()
            .parse::<u32>()
            .map_err(|_| ArqError::Config(format!("window size '{s}' is not an integer")))?;
        Self::new(n)
    }
}

/// Parameters for the sending side.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub window: WindowSize,
    pub framing: Framing,
    /// Wait for forward progress before retransmitting.
    pub ack_timeout: Duration,
    /// Abort once this many timeouts happen in a row.
    pub max_timeouts: u32,
}

impl SenderConfig {
    pub fn new(window: WindowSize) -> Self {
        Self {
            window,
            framing: Framing::default(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_max_timeouts(mut self, n: u32) -> Self {
        self.max_timeouts = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ack_timeout.is_zero() {
            return Err(ArqError::Config("ack timeout must be non-zero".into()));
        }
        if self.max_timeouts == 0 {
            return Err(ArqError::Config("timeout limit must be at least 1".into()));
        }
        Ok(())
    }
}

/// Parameters for the receiving side.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub window: WindowSize,
    pub framing: Framing,
    /// After the end-of-stream exchange, keep answering retransmissions for
    /// this long before releasing the socket.
    pub linger: Duration,
}

impl ReceiverConfig {
    pub fn new(window: WindowSize) -> Self {
        Self {
            window,
            framing: Framing::default(),
            linger: Duration::ZERO,
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }
}
