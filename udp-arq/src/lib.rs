//! `udp-arq`: reliable file transfer over UDP with a selective-repeat
//! sliding window.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  DATA seq=1..N, then seq=0   ┌──────────────┐
//!  │   Sender   │─────────────────────────────▶│   Receiver   │
//!  │ SendWindow │                              │  RecvWindow  │
//!  └─────┬──────┘          ACK seq             └──────┬───────┘
//!        │◀───────────────────────────────────────────┤
//!        │                                            │
//!  ┌─────▼────────────────────────────────────────────▼───────┐
//!  │                        Transport                         │
//!  │     UdpTransport (tokio UdpSocket) │ SimSocket (tests)   │
//!  └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Sequence numbers start at 1; 0 marks the end of the stream.  Each data
//! packet is acknowledged individually.  The sender keeps at most `W` packets
//! (1 to 32) unacknowledged, resends the missing ones after a second without
//! progress, and gives up after three such timeouts in a row.
//!
//! Modules:
//! - [`packet`]       wire format of data and acknowledgment frames
//! - [`config`]       window size and per-endpoint parameters
//! - [`send_window`]  sender-side window state machine
//! - [`recv_window`]  receiver-side ring buffer and acknowledgment rules
//! - [`sender`]       async sending driver
//! - [`receiver`]     async receiving driver
//! - [`state`]        finite-state-machine types
//! - [`observer`]     per-packet diagnostics
//! - [`simulator`]    lossy / reordering in-memory link for testing
//! - [`socket`]       datagram transport abstraction
//! - [`error`]        error types

pub mod config;
pub mod error;
pub mod observer;
pub mod packet;
pub mod receiver;
pub mod recv_window;
pub mod send_window;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;

pub use config::{ReceiverConfig, SenderConfig, WindowSize};
pub use error::{ArqError, Result};
pub use observer::{FileObserver, LogObserver, MemoryObserver, NullObserver, Observer};
pub use packet::Framing;
pub use receiver::{receive_stream, ReceiveReport, Receiver};
pub use sender::{send_stream, SendReport, Sender};
pub use socket::{Transport, UdpTransport};
