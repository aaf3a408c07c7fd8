//! Socket handles: stream connections, listeners and datagram endpoints

use crate::TransportError;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, warn};

/// Anything that can carry a byte stream to a peer
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeerStream for T {}

/// Boxed byte stream
pub type BoxedStream = Box<dyn PeerStream>;

/// A listening socket that hands out accepted peers
pub trait Acceptor: Send {
    /// Poll for one pending inbound connection
    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<(BoxedStream, SocketAddr)>>;

    /// Address the acceptor is listening on
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// TCP listener with per-connection socket options
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    nodelay: bool,
}

impl TcpAcceptor {
    /// Wrap a listening socket
    pub fn new(listener: TcpListener, nodelay: bool) -> Self {
        Self { listener, nodelay }
    }
}

impl Acceptor for TcpAcceptor {
    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<(BoxedStream, SocketAddr)>> {
        match self.listener.poll_accept(cx) {
            Poll::Ready(Ok((stream, addr))) => {
                if let Err(e) = stream.set_nodelay(self.nodelay) {
                    warn!(peer = %addr, "Failed to set TCP_NODELAY: {}", e);
                }
                Poll::Ready(Ok((Box::new(stream), addr)))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Stream connection to one peer.
///
/// Reads go through an internal buffer so readiness can be observed
/// without consuming anything a decoder still needs.
pub struct StreamConnection {
    /// Buffered stream
    io: BufReader<BoxedStream>,
    /// Remote address, if the transport knows it
    peer_addr: Option<SocketAddr>,
    /// Connection state
    open: bool,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("peer_addr", &self.peer_addr)
            .field("open", &self.open)
            .field("buffered", &self.io.buffer().len())
            .finish()
    }
}

impl StreamConnection {
    /// Create a connection from any byte stream
    pub fn new<S: PeerStream + 'static>(stream: S, peer_addr: Option<SocketAddr>) -> Self {
        Self::from_boxed(Box::new(stream), peer_addr)
    }

    /// Create a connection from an already boxed stream
    pub fn from_boxed(stream: BoxedStream, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            io: BufReader::new(stream),
            peer_addr,
            open: true,
        }
    }

    /// Remote address
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Check if the connection is still open
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Bytes already received but not yet consumed
    pub fn buffered(&self) -> usize {
        self.io.buffer().len()
    }

    /// Poll for readability.
    ///
    /// `Ready(Ok(()))` means a read will not wait: data is buffered or the
    /// peer has closed. A failed read is returned as `Ready(Err(_))`, since
    /// the buffered reader does not report it again.
    pub fn poll_readable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if !self.io.buffer().is_empty() {
            return Poll::Ready(Ok(()));
        }
        match Pin::new(&mut self.io).poll_fill_buf(cx) {
            Poll::Ready(Ok(_)) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Reader positioned at the next unconsumed byte
    pub fn reader(&mut self) -> &mut (impl AsyncRead + Unpin) {
        &mut self.io
    }

    /// Writer for this connection
    pub fn writer(&mut self) -> &mut (impl AsyncWrite + Unpin) {
        &mut self.io
    }

    /// Write pre-encoded bytes and flush them
    pub async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.io.write_all(data).await?;
        self.io.flush().await
    }

    /// Close the connection
    pub async fn close(&mut self) -> Result<(), TransportError> {
        if self.open {
            debug!(peer = ?self.peer_addr, "Closing stream connection");
            self.open = false;
            // The peer may already be gone, which is fine when closing
            if let Err(e) = self.io.shutdown().await {
                debug!(peer = ?self.peer_addr, "Shutdown after peer close: {}", e);
            }
        }
        Ok(())
    }
}

/// Cheap handle for sending datagrams from a shared socket
#[derive(Debug, Clone)]
pub struct DatagramSender {
    socket: Arc<UdpSocket>,
}

impl DatagramSender {
    /// Send one datagram to `peer`
    pub async fn send_to(&self, data: &[u8], peer: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, peer).await
    }

    /// Underlying socket
    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

/// Bound datagram socket
#[derive(Debug)]
pub struct DatagramEndpoint {
    socket: Arc<UdpSocket>,
    recv_buf: Vec<u8>,
}

impl DatagramEndpoint {
    /// Wrap a bound socket, receiving datagrams up to `max_datagram_size`
    pub fn new(socket: UdpSocket, max_datagram_size: usize) -> Self {
        Self {
            socket: Arc::new(socket),
            recv_buf: vec![0u8; max_datagram_size],
        }
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sending handle sharing this socket
    pub fn sender(&self) -> DatagramSender {
        DatagramSender {
            socket: Arc::clone(&self.socket),
        }
    }

    /// Poll for one inbound datagram
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<(Bytes, SocketAddr)>> {
        let mut buf = ReadBuf::new(&mut self.recv_buf);
        match self.socket.poll_recv_from(cx, &mut buf) {
            Poll::Ready(Ok(from)) => Poll::Ready(Ok((Bytes::copy_from_slice(buf.filled()), from))),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Send one datagram to `peer`
    pub async fn send_to(&self, data: &[u8], peer: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, peer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::poll_fn;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_connection_creation() {
        let (a, _b) = duplex(64);
        let conn = StreamConnection::new(a, None);
        assert!(conn.is_open());
        assert_eq!(conn.buffered(), 0);
    }

    #[tokio::test]
    async fn test_connection_close() {
        let (a, _b) = duplex(64);
        let mut conn = StreamConnection::new(a, None);
        let result = conn.close().await;
        assert!(result.is_ok());
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_readable_does_not_consume() {
        let (a, mut b) = duplex(64);
        let mut conn = StreamConnection::new(a, None);

        b.write_all(b"hello").await.unwrap();
        poll_fn(|cx| conn.poll_readable(cx)).await.unwrap();
        assert_eq!(conn.buffered(), 5);

        let mut out = [0u8; 5];
        conn.reader().read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"hello");
    }

    #[tokio::test]
    async fn test_idle_connection_is_pending() {
        let (a, _b) = duplex(64);
        let mut conn = StreamConnection::new(a, None);

        let ready = poll_fn(|cx| Poll::Ready(conn.poll_readable(cx).is_ready())).await;
        assert!(!ready);
    }

    #[tokio::test]
    async fn test_closed_peer_is_readable() {
        let (a, b) = duplex(64);
        let mut conn = StreamConnection::new(a, None);
        drop(b);

        poll_fn(|cx| conn.poll_readable(cx)).await.unwrap();
        assert_eq!(conn.buffered(), 0);
    }

    struct BrokenStream;

    impl AsyncRead for BrokenStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "link down")))
        }
    }

    impl AsyncWrite for BrokenStream {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_failure_is_reported() {
        let mut conn = StreamConnection::new(BrokenStream, None);

        let err = poll_fn(|cx| conn.poll_readable(cx)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[tokio::test]
    async fn test_send_writes_through() {
        let (a, mut b) = duplex(64);
        let mut conn = StreamConnection::new(a, None);

        conn.send(b"abc").await.unwrap();
        let mut out = [0u8; 3];
        b.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"abc");
    }

    #[tokio::test]
    async fn test_datagram_endpoint_receive() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut endpoint = DatagramEndpoint::new(socket, 1024);
        let addr = endpoint.local_addr().unwrap();

        let other = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        other.send_to(b"datagram", addr).await.unwrap();

        let (data, from) = poll_fn(|cx| endpoint.poll_recv(cx)).await.unwrap();
        assert_eq!(data.as_ref(), b"datagram");
        assert_eq!(from, other.local_addr().unwrap());
    }
}
