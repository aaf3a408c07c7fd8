//! In-process transport over `tokio::io::duplex` pipes.
//!
//! Used by tests that need deterministic peers, including peers that vanish
//! underneath an open connection.

use async_trait::async_trait;
use crate::{Acceptor, BoxedStream, DatagramEndpoint, StreamConnection, Transport, TransportError};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

type Inbound = (DuplexStream, SocketAddr);

/// Transport whose sockets are in-memory pipes
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    listeners: Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Inbound>>>>,
    next_port: Arc<AtomicU16>,
    buffer_size: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

impl MemoryTransport {
    /// Create a transport whose pipes buffer up to `buffer_size` bytes
    pub fn new(buffer_size: usize) -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_port: Arc::new(AtomicU16::new(40_000)),
            buffer_size,
        }
    }

    fn allocate(&self, addr: SocketAddr) -> SocketAddr {
        if addr.port() != 0 {
            return addr;
        }
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        SocketAddr::new(addr.ip(), port)
    }
}

/// Listener side of a [`MemoryTransport`]
#[derive(Debug)]
pub struct MemoryAcceptor {
    local_addr: SocketAddr,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl Acceptor for MemoryAcceptor {
    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<(BoxedStream, SocketAddr)>> {
        match self.inbound.poll_recv(cx) {
            Poll::Ready(Some((stream, peer))) => Poll::Ready(Ok((Box::new(stream), peer))),
            Poll::Ready(None) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "memory listener closed",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn Acceptor>, TransportError> {
        let addr = self.allocate(addr);
        let mut listeners = self.listeners.lock().await;

        if listeners.get(&addr).is_some_and(|tx| !tx.is_closed()) {
            return Err(TransportError::Bind {
                addr,
                source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        listeners.insert(addr, tx);
        debug!("Memory listener on {}", addr);

        Ok(Box::new(MemoryAcceptor {
            local_addr: addr,
            inbound: rx,
        }))
    }

    async fn bind_datagram(&self, _addr: SocketAddr) -> Result<DatagramEndpoint, TransportError> {
        Err(TransportError::Unsupported("datagrams over memory transport"))
    }

    async fn connect(&self, addr: SocketAddr) -> Result<StreamConnection, TransportError> {
        let refused = || TransportError::Connect {
            addr,
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "nothing listening"),
        };

        let listeners = self.listeners.lock().await;
        let wildcard = match addr {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), addr.port()),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), addr.port()),
        };
        // A listener on the unspecified address accepts for every local address
        let tx = listeners
            .get(&addr)
            .or_else(|| listeners.get(&wildcard))
            .ok_or_else(refused)?;

        let (local, remote) = duplex(self.buffer_size);
        let client_addr = self.allocate(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)));
        tx.send((remote, client_addr)).map_err(|_| refused())?;

        debug!("Memory connection {} -> {}", client_addr, addr);
        Ok(StreamConnection::new(local, Some(addr)))
    }
}
