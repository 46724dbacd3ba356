//! Datagram transport abstraction
//!
//! The engine is payload-agnostic and talks to the network through this
//! trait. `UdpTransport` is the real thing; `ChannelTransport` is an
//! in-process pair used by tests to script a peer.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

/// Transport failure
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Non-blocking datagram send/receive primitive
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transmit one datagram to `dest`
    async fn send(&self, payload: &[u8], dest: SocketAddr) -> TransportResult<()>;

    /// Receive one datagram and its source address
    async fn recv(&self) -> TransportResult<(Bytes, SocketAddr)>;

    /// Local address the transport is bound to
    fn local_addr(&self) -> SocketAddr;
}

/// UDP transport bound to the configured local GTP-C address
pub struct UdpTransport {
    socket: UdpSocket,
    local: SocketAddr,
}

impl UdpTransport {
    /// Bind a UDP socket at `local`
    pub async fn bind(local: SocketAddr) -> TransportResult<Self> {
        let socket = UdpSocket::bind(local).await?;
        let local = socket.local_addr()?;
        log::info!("GTP-C transport listening on {local}");
        Ok(Self { socket, local })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, payload: &[u8], dest: SocketAddr) -> TransportResult<()> {
        self.socket.send_to(payload, dest).await?;
        Ok(())
    }

    async fn recv(&self) -> TransportResult<(Bytes, SocketAddr)> {
        let mut buf = vec![0u8; 2048];
        let (n, src) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((Bytes::from(buf), src))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

/// In-process transport endpoint; datagrams sent on one end arrive on the
/// other regardless of the destination address.
pub struct ChannelTransport {
    local: SocketAddr,
    tx: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
    rx: Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
}

impl ChannelTransport {
    /// Create a connected pair of endpoints
    pub fn pair() -> (Arc<ChannelTransport>, Arc<ChannelTransport>) {
        let a_addr = SocketAddr::from(([127, 0, 0, 1], 2123));
        let b_addr = SocketAddr::from(([127, 0, 0, 2], 2123));
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = Arc::new(ChannelTransport {
            local: a_addr,
            tx: a_tx,
            rx: Mutex::new(a_rx),
        });
        let b = Arc::new(ChannelTransport {
            local: b_addr,
            tx: b_tx,
            rx: Mutex::new(b_rx),
        });
        (a, b)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, payload: &[u8], _dest: SocketAddr) -> TransportResult<()> {
        self.tx
            .send((Bytes::copy_from_slice(payload), self.local))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> TransportResult<(Bytes, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_pair_delivers_both_ways() {
        let (a, b) = ChannelTransport::pair();

        a.send(b"ping", b.local_addr()).await.unwrap();
        let (data, src) = b.recv().await.unwrap();
        assert_eq!(&data[..], b"ping");
        assert_eq!(src, a.local_addr());

        b.send(b"pong", a.local_addr()).await.unwrap();
        let (data, _) = a.recv().await.unwrap();
        assert_eq!(&data[..], b"pong");
    }

    #[tokio::test]
    async fn test_channel_closed_on_peer_drop() {
        let (a, b) = ChannelTransport::pair();
        drop(b);
        assert!(matches!(
            a.recv().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_udp_loopback() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        a.send(b"hello", b.local_addr()).await.unwrap();
        let (data, src) = b.recv().await.unwrap();
        assert_eq!(&data[..], b"hello");
        assert_eq!(src, a.local_addr());
    }
}
