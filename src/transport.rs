//! Transport collaborator contract.
//!
//! Framing, connection management, and durable retry belong to the
//! transport; the coordinator only ever hands it finished frames. The
//! production implementation is a UDP socket (one datagram per message); an
//! in-memory channel implementation stands in for the network in tests.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::warn;

/// Outbound half of the messaging transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a response (or an unsolicited notification push) to a client
    /// address. Best-effort; the coordinator never retries.
    async fn send_response(&self, addr: SocketAddr, buf: Vec<u8>);
}

/// Datagram transport over a shared UDP socket.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_response(&self, addr: SocketAddr, buf: Vec<u8>) {
        if let Err(err) = self.socket.send_to(&buf, addr).await {
            warn!(%addr, error = %err, "failed to send response");
        }
    }
}

/// In-memory transport recording every outbound frame. Test double.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
}

impl ChannelTransport {
    /// Create the transport plus the receiving end for assertions.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_response(&self, addr: SocketAddr, buf: Vec<u8>) {
        // A closed receiver just means the test stopped listening.
        let _ = self.tx.send((addr, buf));
    }
}
