//! Sending side of a transfer.
//!
//! [`Sender`] owns the byte source and drives a [`SendWindow`] over a
//! [`Transport`]: it reads the source in chunks of up to [`MAX_PAYLOAD`]
//! bytes, keeps the window full, processes acknowledgments as they arrive,
//! resends unacknowledged chunks when no progress is made within the
//! acknowledgment timeout, and finishes with the end-of-stream exchange.
//!
//! ```ignore
//! let transport = UdpTransport::bind("0.0.0.0:0").await?;
//! let file = tokio::fs::File::open("input.bin").await?;
//! let config = SenderConfig::new(WindowSize::new(8)?);
//! let report = Sender::new(&transport, peer, file, config, &LogObserver)?
//!     .run()
//!     .await?;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};

use crate::config::SenderConfig;
use crate::error::{ArqError, Result};
use crate::observer::{Observer, PacketEvent, PacketStatus};
use crate::packet::{decode_ack, END_OF_STREAM, MAX_PAYLOAD, RECV_BUF_LEN};
use crate::send_window::{AckOutcome, SendWindow};
use crate::socket::{is_transient, Transport};
use crate::state::SenderState;

/// Summary of a completed send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Distinct data chunks sent.
    pub chunks: u64,
    /// Payload bytes read from the source.
    pub bytes: u64,
    /// Frames sent again after a timeout (data and end-of-stream).
    pub retransmissions: u64,
    /// Timeouts over the whole transfer, not only consecutive ones.
    pub timeouts: u64,
    pub elapsed: Duration,
}

/// Drives one outbound transfer.
pub struct Sender<'a, T, R> {
    transport: &'a T,
    peer: SocketAddr,
    source: R,
    config: SenderConfig,
    observer: &'a dyn Observer,
    window: SendWindow,
    report: SendReport,
}

impl<'a, T, R> Sender<'a, T, R>
where
    T: Transport,
    R: AsyncRead + Unpin,
{
    /// Validate `config` and set up an idle sender.  Nothing is sent yet.
    pub fn new(
        transport: &'a T,
        peer: SocketAddr,
        source: R,
        config: SenderConfig,
        observer: &'a dyn Observer,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            peer,
            source,
            window: SendWindow::new(config.window, config.max_timeouts),
            config,
            observer,
            report: SendReport::default(),
        })
    }

    pub fn state(&self) -> SenderState {
        self.window.state()
    }

    /// Run the transfer to completion.
    ///
    /// Returns once the peer acknowledged end-of-stream.  Fails with
    /// [`ArqError::RetransmissionLimitExceeded`] when the peer stops
    /// answering, or with the first transport or source error.
    pub async fn run(mut self) -> Result<SendReport> {
        let started = Instant::now();
        let transport = self.transport;
        let rto = self.config.ack_timeout;
        let mut buf = [0u8; RECV_BUF_LEN];

        log::info!(
            "[sender] → {} window={} framing={} timeout={:?}",
            self.peer,
            self.config.window,
            self.config.framing,
            rto
        );

        self.fill_window().await?;
        let mut deadline = Instant::now() + rto;

        while !self.window.state().is_terminal() {
            match timeout_at(deadline, transport.recv_from(&mut buf)).await {
                Ok(Ok((n, from))) => {
                    if self.handle_datagram(&buf[..n], from) {
                        deadline = Instant::now() + rto;
                    }
                    if self.window.state() == SenderState::Done {
                        break;
                    }
                    self.fill_window().await?;
                }
                Ok(Err(e)) if is_transient(&e) => {
                    log::debug!("[sender] ignoring transient receive error: {e}");
                }
                Ok(Err(e)) => return Err(ArqError::Transport(e)),
                Err(_elapsed) => {
                    self.handle_timeout().await?;
                    deadline = Instant::now() + rto;
                }
            }
        }

        self.report.elapsed = started.elapsed();
        log::info!(
            "[sender] done: {} chunk(s), {} byte(s), {} retransmission(s) in {:?}",
            self.report.chunks,
            self.report.bytes,
            self.report.retransmissions,
            self.report.elapsed
        );
        self.observer.on_event("transfer complete", Some(self.peer));
        Ok(self.report)
    }

    /// Send new chunks while the window has room, then the end-of-stream
    /// marker once the source is drained and everything is acknowledged.
    async fn fill_window(&mut self) -> Result<()> {
        while self.window.can_send() {
            let chunk = self.read_chunk().await?;
            if chunk.is_empty() {
                log::debug!(
                    "[sender] source exhausted after {} chunk(s)",
                    self.report.chunks
                );
                self.window.finish_stream();
                break;
            }

            let entry = self.window.push(chunk)?;
            let (seq, len) = (entry.seq, entry.payload.len());
            let frame = self.config.framing.encode_data(seq, &entry.payload)?;

            self.send_frame(&frame).await?;
            self.report.chunks += 1;
            self.report.bytes += len as u64;
            self.observer
                .on_packet(&PacketEvent::new(seq, len, PacketStatus::Sent).peer(self.peer));
            log::debug!(
                "[sender] → DATA seq={seq} len={len} in_flight={}",
                self.window.in_flight()
            );
        }

        if self.window.sentinel_due() {
            let frame = self.config.framing.encode_data(END_OF_STREAM, &[])?;
            self.send_frame(&frame).await?;
            self.window.mark_sentinel_sent();
            self.observer.on_packet(
                &PacketEvent::new(END_OF_STREAM, 0, PacketStatus::Sent)
                    .peer(self.peer)
                    .note("end of stream"),
            );
            log::debug!("[sender] → END");
        }
        Ok(())
    }

    /// Process one inbound datagram.  Returns `true` on forward progress.
    fn handle_datagram(&mut self, frame: &[u8], from: SocketAddr) -> bool {
        if from != self.peer {
            log::debug!("[sender] ignoring datagram from {from}");
            self.observer.on_packet(
                &PacketEvent::new(0, frame.len(), PacketStatus::Dropped)
                    .peer(from)
                    .note("unknown peer"),
            );
            return false;
        }

        let seq = match decode_ack(frame) {
            Ok(seq) => seq,
            Err(e) => {
                log::debug!("[sender] dropping bad ACK: {e}");
                self.observer.on_packet(
                    &PacketEvent::new(0, frame.len(), PacketStatus::Dropped)
                        .peer(from)
                        .note("malformed"),
                );
                return false;
            }
        };

        self.handle_ack(seq)
    }

    /// Apply an acknowledgment to the window.  Returns `true` on forward
    /// progress.
    fn handle_ack(&mut self, seq: u32) -> bool {
        let event = PacketEvent::new(seq, 0, PacketStatus::AckReceived).peer(self.peer);

        match self.window.on_ack(seq) {
            AckOutcome::Finished { elapsed } => {
                log::debug!("[sender] ← ACK END");
                self.observer.on_packet(&event.elapsed(elapsed));
                true
            }
            AckOutcome::Accepted { elapsed, slid } => {
                log::debug!(
                    "[sender] ← ACK {seq} (slid {slid}, base={})",
                    self.window.base()
                );
                self.observer.on_packet(&event.elapsed(elapsed));
                true
            }
            AckOutcome::Duplicate => {
                self.observer.on_packet(&event.note("duplicate"));
                false
            }
            AckOutcome::Stale => {
                self.observer.on_packet(&event.note("stale"));
                false
            }
            AckOutcome::Unknown => {
                log::debug!("[sender] ← ACK {seq} for unsent data; ignored");
                self.observer.on_packet(&event.note("never sent"));
                false
            }
        }
    }

    /// No progress within the timeout: resend what is unacknowledged, or
    /// give up at the limit.
    async fn handle_timeout(&mut self) -> Result<()> {
        self.report.timeouts += 1;
        let base = self.window.base();

        if let Err(e) = self.window.on_timeout() {
            log::warn!("[sender] giving up: {e}");
            self.observer
                .on_event("retransmission limit reached", Some(self.peer));
            return Err(e);
        }

        log::warn!(
            "[sender] timeout #{} at base={base}; retransmitting",
            self.window.consecutive_timeouts()
        );
        self.observer.on_event("timeout", Some(self.peer));

        let resend = self
            .window
            .unacked()
            .map(|e| -> Result<_> {
                let frame = self.config.framing.encode_data(e.seq, &e.payload)?;
                Ok((e.seq, e.payload.len(), frame))
            })
            .collect::<Result<Vec<_>>>()?;

        for (seq, len, frame) in resend {
            self.send_frame(&frame).await?;
            self.report.retransmissions += 1;
            self.observer.on_packet(
                &PacketEvent::new(seq, len, PacketStatus::Retransmitted).peer(self.peer),
            );
            log::debug!("[sender] ⟳ DATA seq={seq}");
        }

        if self.window.sentinel_outstanding() {
            let frame = self.config.framing.encode_data(END_OF_STREAM, &[])?;
            self.send_frame(&frame).await?;
            self.report.retransmissions += 1;
            self.observer.on_packet(
                &PacketEvent::new(END_OF_STREAM, 0, PacketStatus::Retransmitted)
                    .peer(self.peer)
                    .note("end of stream"),
            );
            log::debug!("[sender] ⟳ END");
        }

        self.window.end_retransmit();
        Ok(())
    }

    /// Read up to [`MAX_PAYLOAD`] bytes, retrying short reads until the chunk
    /// is full or the source hits EOF.  An empty chunk means EOF.
    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; MAX_PAYLOAD];
        let mut filled = 0;
        while filled < MAX_PAYLOAD {
            let n = self
                .source
                .read(&mut chunk[filled..])
                .await
                .map_err(ArqError::Source)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        chunk.truncate(filled);
        Ok(chunk)
    }

    async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        self.transport
            .send_to(frame, self.peer)
            .await
            .map_err(ArqError::Transport)
    }
}

/// Send everything `source` yields to `peer`.
///
/// Shorthand for [`Sender::new`] followed by [`Sender::run`].
pub async fn send_stream<T, R>(
    transport: &T,
    peer: SocketAddr,
    source: R,
    config: SenderConfig,
    observer: &dyn Observer,
) -> Result<SendReport>
where
    T: Transport,
    R: AsyncRead + Unpin,
{
    Sender::new(transport, peer, source, config, observer)?
        .run()
        .await
}
