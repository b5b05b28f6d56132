//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate datagrams.  To exercise the
//! reliability machinery without depending on actual network conditions,
//! [`pair`] returns two connected [`SimSocket`]s that implement
//! [`Transport`] and apply a fault model to everything they send:
//!
//! | Fault        | Description                                             |
//! |--------------|---------------------------------------------------------|
//! | Loss         | Drop a datagram with probability `loss_rate`.           |
//! | Duplication  | Deliver a datagram twice with `duplicate_rate`.         |
//! | Reordering   | Hold a datagram back with `reorder_rate` and release it |
//! |              | right after the next one, so the later one overtakes.  |
//! | Scripted     | Drop datagrams matching a [`DropRule`].                 |
//!
//! Corruption is deliberately not modelled; the protocol assumes datagrams
//! arrive intact or not at all.
//!
//! Randomness comes from a seeded `StdRng`, so a failing test replays the
//! same fault sequence for the same seed.

use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::socket::Transport;

type Datagram = (Vec<u8>, SocketAddr);

/// Predicate deciding whether an outbound datagram is dropped.
pub type DropRule = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Fault model for one direction of a simulated link.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
                Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    /// A perfect link.
    pub fn perfect() -> Self {
        Self::default()
    }

    /// A link with the given fault rates and seed.
    pub fn lossy(loss_rate: f64, duplicate_rate: f64, reorder_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            duplicate_rate,
            reorder_rate,
            seed,
        }
    }
}

/// Counters for one outbound link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Datagrams handed to `send_to`.
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

struct Link {
    config: SimulatorConfig,
    rng: StdRng,
    held: Option<Vec<u8>>,
    rule: Option<DropRule>,
    stats: LinkStats,
}

impl Link {
    fn new(config: SimulatorConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            held: None,
            rule: None,
            stats: LinkStats::default(),
        }
    }

    fn roll(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.random::<f64>() < p
    }

    /// Decide which datagrams actually go out for one `send_to` call.
    fn plan(&mut self, frame: &[u8]) -> Vec<Vec<u8>> {
        self.stats.sent += 1;

        if self.rule.as_mut().is_some_and(|rule| rule(frame)) {
            self.stats.dropped += 1;
            return Vec::new();
        }
        if self.roll(self.config.loss_rate) {
            self.stats.dropped += 1;
            return Vec::new();
        }
        if self.held.is_none() && self.roll(self.config.reorder_rate) {
            self.stats.reordered += 1;
            self.held = Some(frame.to_vec());
            return Vec::new();
        }

        let mut out = vec![frame.to_vec()];
        if self.roll(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            out.push(frame.to_vec());
        }
        if let Some(held) = self.held.take() {
            out.push(held);
        }
        out
    }
}

/// One end of a simulated link.
pub struct SimSocket {
    addr: SocketAddr,
    peer: SocketAddr,
    to_peer: mpsc::UnboundedSender<Datagram>,
    to_self: mpsc::UnboundedSender<Datagram>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
    link: Mutex<Link>,
}

/// Build two connected sockets.
///
/// `a_to_b` applies to datagrams sent by the first socket, `b_to_a` to those
/// sent by the second.
pub fn pair(a_to_b: SimulatorConfig, b_to_a: SimulatorConfig) -> (SimSocket, SimSocket) {
    let a_addr: SocketAddr = ([10, 0, 0, 1], 4000).into();
    let b_addr: SocketAddr = ([10, 0, 0, 2], 5000).into();
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    let a = SimSocket {
        addr: a_addr,
        peer: b_addr,
        to_peer: b_tx.clone(),
        to_self: a_tx.clone(),
        inbox: tokio::sync::Mutex::new(a_rx),
        link: Mutex::new(Link::new(a_to_b)),
    };
    let b = SimSocket {
        addr: b_addr,
        peer: a_addr,
        to_peer: a_tx,
        to_self: b_tx,
        inbox: tokio::sync::Mutex::new(b_rx),
        link: Mutex::new(Link::new(b_to_a)),
    };
    (a, b)
}

impl SimSocket {
    /// Install a scripted drop rule for datagrams this socket sends.
    pub fn set_drop_rule(&self, rule: impl FnMut(&[u8]) -> bool + Send + 'static) {
        self.lock_link().rule = Some(Box::new(rule));
    }

    /// Remove any scripted drop rule.
    pub fn clear_drop_rule(&self) {
        self.lock_link().rule = None;
    }

    /// Deliver `frame` to this socket as if it came from `from`.
    pub fn inject(&self, frame: &[u8], from: SocketAddr) {
        let _ = self.to_self.send((frame.to_vec(), from));
    }

    /// Fault counters for datagrams sent by this socket.
    pub fn stats(&self) -> LinkStats {
        self.lock_link().stats
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for SimSocket {
    async fn send_to(&self, frame: &[u8], dest: SocketAddr) -> io::Result<()> {
        if dest != self.peer {
            // Nobody listens there; the datagram vanishes.
            return Ok(());
        }
        let deliveries = self.lock_link().plan(frame);
        for datagram in deliveries {
            // A closed peer behaves like a lost datagram.
            let _ = self.to_peer.send((datagram, self.addr));
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some((data, from)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, from))
            }
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "simulated link closed",
            )),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}
