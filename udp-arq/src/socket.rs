//! Datagram transport abstraction.
//!
//! The drivers in [`crate::sender`] and [`crate::receiver`] talk to the
//! network only through [`Transport`]: unreliable, unordered datagrams that
//! are never corrupted.  [`UdpTransport`] is the production implementation,
//! a thin wrapper around `tokio::net::UdpSocket`;
//! [`crate::simulator::SimSocket`] is the in-memory one used by tests.
//!
//! Receive timeouts are applied by the caller with `tokio::time`, not here.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::{ToSocketAddrs, UdpSocket};

/// Raw datagram I/O.
pub trait Transport {
    /// Send one datagram to `dest`.  Delivery is not guaranteed.
    fn send_to(&self, frame: &[u8], dest: SocketAddr)
        -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next datagram, copying it into `buf`.
    ///
    /// Returns `(length, sender_address)`.
    fn recv_from(&self, buf: &mut [u8])
        -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    /// Address this transport is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// `true` for receive errors that only echo an ICMP unreachable for an
/// earlier datagram; the drivers treat these like a lost datagram.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

/// A [`Transport`] over a real UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    inner: UdpSocket,
}

impl UdpTransport {
    /// Bind a new socket to `addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let inner = UdpSocket::bind(addr).await?;
        Ok(Self { inner })
    }
}

impl From<UdpSocket> for UdpTransport {
    fn from(inner: UdpSocket) -> Self {
        Self { inner }
    }
}

impl Transport for UdpTransport {
    async fn send_to(&self, frame: &[u8], dest: SocketAddr) -> io::Result<()> {
        let n = self.inner.send_to(frame, dest).await?;
        if n != frame.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram write: {n} of {} bytes", frame.len()),
            ));
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_datagram_roundtrip() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send_to(b"ping", b_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }
}
