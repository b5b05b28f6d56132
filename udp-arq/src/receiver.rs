//! Receiving side of a transfer.
//!
//! [`Receiver`] answers every data packet from its peer with the
//! acknowledgment chosen by [`RecvWindow`], writes chunks to the sink in
//! sequence order as soon as the gap below them closes, and finishes when
//! the end-of-stream marker arrives.
//!
//! The first well-formed data packet fixes the peer.  Datagrams from any
//! other address are dropped for the rest of the transfer.
//!
//! The receiver never times out on its own: it waits for the sender for as
//! long as it takes.  With a non-zero [`ReceiverConfig::linger`] it keeps the
//! socket open after end-of-stream and re-acknowledges retransmissions, so a
//! lost final ACK does not leave the sender retrying into silence.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

use crate::config::ReceiverConfig;
use crate::error::{ArqError, Result};
use crate::observer::{Observer, PacketEvent, PacketStatus};
use crate::packet::{encode_ack, RECV_BUF_LEN};
use crate::recv_window::{Disposition, RecvWindow};
use crate::socket::{is_transient, Transport};
use crate::state::ReceiverState;

/// Summary of a completed receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Chunks written to the sink.
    pub chunks: u64,
    /// Bytes written to the sink.
    pub bytes: u64,
    /// Data packets that had already been stored or delivered.
    pub duplicates: u64,
    /// The sender, once known.
    pub peer: Option<SocketAddr>,
    /// From the first data packet to end-of-stream.
    pub elapsed: Duration,
}

/// Drives one inbound transfer.
pub struct Receiver<'a, T, W> {
    transport: &'a T,
    sink: W,
    config: ReceiverConfig,
    observer: &'a dyn Observer,
    window: RecvWindow,
    peer: Option<SocketAddr>,
    state: ReceiverState,
    started: Option<Instant>,
    report: ReceiveReport,
}

impl<'a, T, W> Receiver<'a, T, W>
where
    T: Transport,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        transport: &'a T,
        sink: W,
        config: ReceiverConfig,
        observer: &'a dyn Observer,
    ) -> Self {
        Self {
            transport,
            sink,
            window: RecvWindow::new(config.window),
            config,
            observer,
            peer: None,
            state: ReceiverState::default(),
            started: None,
            report: ReceiveReport::default(),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Receive until end-of-stream, then linger if configured.
    ///
    /// The sink is flushed before the end-of-stream acknowledgment goes out.
    pub async fn run(mut self) -> Result<ReceiveReport> {
        let transport = self.transport;
        let mut buf = [0u8; RECV_BUF_LEN];

        log::info!(
            "[receiver] listening on {} window={} framing={}",
            transport.local_addr().map_err(ArqError::Transport)?,
            self.config.window,
            self.config.framing
        );

        while self.state != ReceiverState::Finished {
            match transport.recv_from(&mut buf).await {
                Ok((n, from)) => self.handle_datagram(&buf[..n], from).await?,
                Err(e) if is_transient(&e) => {
                    log::debug!("[receiver] ignoring transient receive error: {e}");
                }
                Err(e) => return Err(ArqError::Transport(e)),
            }
        }

        self.report.elapsed = self.started.map(|t| t.elapsed()).unwrap_or_default();
        self.report.peer = self.peer;
        log::info!(
            "[receiver] done: {} chunk(s), {} byte(s), {} duplicate(s) in {:?}",
            self.report.chunks,
            self.report.bytes,
            self.report.duplicates,
            self.report.elapsed
        );
        self.observer.on_event("transfer complete", self.peer);

        if !self.config.linger.is_zero() {
            self.linger(&mut buf).await?;
        }
        Ok(self.report)
    }

    /// Keep answering the peer for `linger` after end-of-stream.
    async fn linger(&mut self, buf: &mut [u8]) -> Result<()> {
        let transport = self.transport;
        let deadline = Instant::now() + self.config.linger;
        log::debug!("[receiver] lingering for {:?}", self.config.linger);

        loop {
            match timeout_at(deadline, transport.recv_from(buf)).await {
                Ok(Ok((n, from))) => self.handle_datagram(&buf[..n], from).await?,
                Ok(Err(e)) if is_transient(&e) => {}
                Ok(Err(e)) => return Err(ArqError::Transport(e)),
                Err(_elapsed) => return Ok(()),
            }
        }
    }

    async fn handle_datagram(&mut self, frame: &[u8], from: SocketAddr) -> Result<()> {
        if self.peer.is_some_and(|peer| peer != from) {
            log::debug!("[receiver] ignoring datagram from {from}");
            self.observer.on_packet(
                &PacketEvent::new(0, frame.len(), PacketStatus::Dropped)
                    .peer(from)
                    .note("unknown peer"),
            );
            return Ok(());
        }

        let packet = match self.config.framing.decode_data(frame) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("[receiver] dropping bad frame from {from}: {e}");
                self.observer.on_packet(
                    &PacketEvent::new(0, frame.len(), PacketStatus::Dropped)
                        .peer(from)
                        .note("malformed"),
                );
                return Ok(());
            }
        };

        if self.peer.is_none() {
            log::info!("[receiver] ← first packet from {from}");
            self.peer = Some(from);
            self.state = ReceiverState::Receiving;
            self.started = Some(Instant::now());
            self.observer.on_event("peer locked", Some(from));
        }

        let seq = packet.seq;
        let mut received =
            PacketEvent::new(seq, packet.payload.len(), PacketStatus::Received).peer(from);
        if packet.is_end_of_stream() {
            received = received.note("end of stream");
        }
        self.observer.on_packet(&received);

        let verdict = self.window.on_packet(seq, packet.payload);
        match verdict.disposition {
            Disposition::Stored => {
                log::debug!(
                    "[receiver] ← DATA seq={seq} base={} buffered={}",
                    self.window.base(),
                    self.window.buffered()
                );
                self.flush_ready().await?;
            }
            Disposition::EndOfStream => {
                log::debug!("[receiver] ← END");
                self.sink.flush().await.map_err(ArqError::Sink)?;
            }
            Disposition::Duplicate | Disposition::Delivered => {
                log::debug!("[receiver] ← DATA seq={seq} (duplicate)");
                self.report.duplicates += 1;
            }
            Disposition::BeyondWindow => {
                log::debug!(
                    "[receiver] ← DATA seq={seq} beyond window (base={})",
                    self.window.base()
                );
            }
        }

        if let Some(ack) = verdict.ack {
            self.transport
                .send_to(&encode_ack(ack), from)
                .await
                .map_err(ArqError::Transport)?;
            let status = match verdict.disposition {
                Disposition::Stored | Disposition::EndOfStream => PacketStatus::AckSent,
                _ => PacketStatus::AckResent,
            };
            self.observer
                .on_packet(&PacketEvent::new(ack, 0, status).peer(from));
            log::debug!("[receiver] → ACK {ack}");
        }

        if verdict.disposition == Disposition::EndOfStream {
            self.state = ReceiverState::Finished;
        }
        Ok(())
    }

    /// Write every chunk that is now contiguous with what was already
    /// delivered.
    async fn flush_ready(&mut self) -> Result<()> {
        let mut wrote = false;
        while let Some(chunk) = self.window.pop_ready() {
            self.sink.write_all(&chunk).await.map_err(ArqError::Sink)?;
            self.report.chunks += 1;
            self.report.bytes += chunk.len() as u64;
            wrote = true;
        }
        if wrote {
            self.sink.flush().await.map_err(ArqError::Sink)?;
        }
        Ok(())
    }
}

/// Receive one stream into `sink`.
///
/// Shorthand for [`Receiver::new`] followed by [`Receiver::run`].
pub async fn receive_stream<T, W>(
    transport: &T,
    sink: W,
    config: ReceiverConfig,
    observer: &dyn Observer,
) -> Result<ReceiveReport>
where
    T: Transport,
    W: AsyncWrite + Unpin,
{
    Receiver::new(transport, sink, config, observer).run().await
}
