//! Per-packet diagnostics.
//!
//! Both drivers report every send, receive, acknowledgment, retransmission
//! and drop to an [`Observer`] passed in by the caller.  Observers are
//! fire-and-forget: they return nothing, must not block, and a failing
//! observer never changes what goes on the wire.
//!
//! Implementations:
//! - [`NullObserver`] discards everything.
//! - [`LogObserver`] forwards to the `log` facade under target
//!   `udp_arq::packet`.
//! - [`FileObserver`] appends one line per event to a file from a
//!   background task; call [`FileObserver::close`] after the transfer.
//! - [`MemoryObserver`] keeps events in memory for inspection.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What happened to a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    Sent,
    Retransmitted,
    Received,
    AckSent,
    /// An acknowledgment repeated for a packet that was already handled.
    AckResent,
    AckReceived,
    /// Malformed, foreign, or otherwise discarded datagram.
    Dropped,
}

impl fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PacketStatus::Sent => "Sent",
            PacketStatus::Retransmitted => "Retransmitted",
            PacketStatus::Received => "Received",
            PacketStatus::AckSent => "ACK Sent",
            PacketStatus::AckResent => "ACK Resent",
            PacketStatus::AckReceived => "ACK Received",
            PacketStatus::Dropped => "Dropped",
        };
        f.write_str(label)
    }
}

/// One diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketEvent {
    pub seq: u32,
    /// Payload bytes (0 for acknowledgments).
    pub size: usize,
    pub status: PacketStatus,
    /// Time since the packet was (last) sent, when known.
    pub elapsed: Option<Duration>,
    pub peer: Option<SocketAddr>,
    pub note: Option<&'static str>,
}

impl PacketEvent {
    pub fn new(seq: u32, size: usize, status: PacketStatus) -> Self {
        Self {
            seq,
            size,
            status,
            elapsed: None,
            peer: None,
            note: None,
        }
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }
}

impl fmt::Display for PacketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "packet {}: size={} bytes, time=", self.seq, self.size)?;
        match self.elapsed {
            Some(d) => write!(f, "{:.4}s", d.as_secs_f64())?,
            None => f.write_str("unavailable")?,
        }
        write!(f, ", status={}", self.status)?;
        if let Some(peer) = self.peer {
            write!(f, ", peer={peer}")?;
        }
        if let Some(note) = self.note {
            write!(f, ", event={note}")?;
        }
        Ok(())
    }
}

/// Diagnostics sink for a transfer.
pub trait Observer {
    fn on_packet(&self, event: &PacketEvent);

    /// A notable event not tied to one packet (timeouts, completion).
    fn on_event(&self, _message: &str, _peer: Option<SocketAddr>) {}
}

/// Drops all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_packet(&self, _event: &PacketEvent) {}
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_packet(&self, event: &PacketEvent) {
        log::debug!(target: "udp_arq::packet", "{event}");
    }

    fn on_event(&self, message: &str, peer: Option<SocketAddr>) {
        match peer {
            Some(peer) => log::info!(target: "udp_arq::packet", "event: {message}, peer={peer}"),
            None => log::info!(target: "udp_arq::packet", "event: {message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// FileObserver
// ---------------------------------------------------------------------------

/// Writes timestamped event lines to a file.
///
/// Formatting happens on the caller's task; the write happens on a
/// background task fed by an unbounded channel, so observing never waits on
/// the disk.  If the writer fails, later events are silently discarded and
/// the error is reported by [`close`](Self::close).
pub struct FileObserver {
    tx: mpsc::UnboundedSender<String>,
    writer: JoinHandle<io::Result<()>>,
}

impl FileObserver {
    /// Create (or truncate) `path` and start the writer task.
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_lines(file, rx));
        Ok(Self { tx, writer })
    }

    /// Flush pending lines and wait for the writer to finish.
    pub async fn close(self) -> io::Result<()> {
        drop(self.tx);
        self.writer.await.map_err(io::Error::other)?
    }

    fn push(&self, body: fmt::Arguments<'_>) {
        let _ = self.tx.send(format!("{} - {body}", timestamp()));
    }
}

impl Observer for FileObserver {
    fn on_packet(&self, event: &PacketEvent) {
        self.push(format_args!("{event}"));
    }

    fn on_event(&self, message: &str, peer: Option<SocketAddr>) {
        match peer {
            Some(peer) => self.push(format_args!("event: {message}, peer={peer}")),
            None => self.push(format_args!("event: {message}")),
        }
    }
}

async fn write_lines(
    file: tokio::fs::File,
    mut rx: mpsc::UnboundedReceiver<String>,
) -> io::Result<()> {
    let mut out = BufWriter::new(file);
    while let Some(line) = rx.recv().await {
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
    }
    out.flush().await
}

/// Seconds since the Unix epoch with millisecond precision.
fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

// ---------------------------------------------------------------------------
// MemoryObserver
// ---------------------------------------------------------------------------

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<PacketEvent>>,
    messages: Mutex<Vec<String>>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all packet events so far.
    pub fn events(&self) -> Vec<PacketEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of all general event messages so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sequence numbers of events with the given status, in order.
    pub fn seqs_with(&self, status: PacketStatus) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter(|e| e.status == status)
            .map(|e| e.seq)
            .collect()
    }
}

impl Observer for MemoryObserver {
    fn on_packet(&self, event: &PacketEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }

    fn on_event(&self, message: &str, _peer: Option<SocketAddr>) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_display_matches_log_format() {
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let e = PacketEvent::new(7, 1000, PacketStatus::Sent)
            .elapsed(Duration::from_millis(1500))
            .peer(peer)
            .note("retry");
        assert_eq!(
            e.to_string(),
            "packet 7: size=1000 bytes, time=1.5000s, status=Sent, peer=127.0.0.1:9000, event=retry"
        );
    }

    #[test]
    fn event_without_timing_says_unavailable() {
        let e = PacketEvent::new(0, 0, PacketStatus::AckSent);
        assert_eq!(
            e.to_string(),
            "packet 0: size=0 bytes, time=unavailable, status=ACK Sent"
        );
    }

    #[test]
    fn memory_observer_filters_by_status() {
        let obs = MemoryObserver::new();
        obs.on_packet(&PacketEvent::new(1, 10, PacketStatus::Sent));
        obs.on_packet(&PacketEvent::new(1, 0, PacketStatus::AckReceived));
        obs.on_packet(&PacketEvent::new(2, 10, PacketStatus::Sent));
        obs.on_event("done", None);
        assert_eq!(obs.seqs_with(PacketStatus::Sent), vec![1, 2]);
        assert_eq!(obs.messages(), vec!["done".to_string()]);
    }

    #[tokio::test]
    async fn file_observer_writes_one_line_per_event() {
        let path = std::env::temp_dir().join(format!(
            "udp-arq-observer-{}.log",
            std::process::id()
        ));
        let obs = FileObserver::create(&path).await.unwrap();
        obs.on_packet(&PacketEvent::new(1, 1000, PacketStatus::Sent));
        obs.on_event("transfer complete", None);
        obs.close().await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("packet 1: size=1000 bytes, time=unavailable, status=Sent"));
        assert!(lines[1].ends_with("event: transfer complete"));
        let _ = tokio::fs::remove_file(&path).await;
    }
}
