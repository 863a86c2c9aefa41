//! Thin wrappers over `tokio::net` sockets, sized to the fragment framing.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::{TcpStream, UdpSocket};

use crate::error::{StreamError, StreamResult};
use crate::protocol::wire::FRAGMENT_HEADER_LEN;

/// A UDP socket bound for one transport (server listens on it; client
/// connects a peer address for send/recv).
pub struct DatagramSocket {
    inner: UdpSocket,
}

impl DatagramSocket {
    /// Binds a new UDP socket. Port 0 lets the OS pick an ephemeral port.
    pub async fn bind(addr: SocketAddr) -> StreamResult<Self> {
        let inner = UdpSocket::bind(addr).await?;
        Ok(Self { inner })
    }

    #[must_use]
    pub fn local_addr(&self) -> StreamResult<SocketAddr> {
        self.inner.local_addr().map_err(StreamError::from)
    }

    /// Sends one already-framed datagram to `peer`.
    pub async fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> StreamResult<()> {
        self.inner.send_to(datagram, peer).await?;
        Ok(())
    }

    /// Receives one datagram, sized to the current negotiated
    /// `max_fragment_size` plus header overhead.
    pub async fn recv_from(&self, max_fragment_size: u32) -> StreamResult<(Bytes, SocketAddr)> {
        let mut buf = vec![0u8; max_fragment_size as usize + FRAGMENT_HEADER_LEN];
        let (len, peer) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((Bytes::from(buf), peer))
    }
}

/// A TCP connection carrying length-prefixed frames.
pub struct StreamSocket {
    inner: TcpStream,
}

impl StreamSocket {
    #[must_use]
    pub fn new(inner: TcpStream) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn peer_addr(&self) -> StreamResult<SocketAddr> {
        self.inner.peer_addr().map_err(StreamError::from)
    }

    #[must_use]
    pub fn into_inner(self) -> TcpStream {
        self.inner
    }
}
