//! Transport abstraction and implementations

use async_trait::async_trait;
use crate::{Acceptor, DatagramEndpoint, StreamConnection, TcpAcceptor, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpSocket, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info};

/// Transport abstraction for opening sockets.
///
/// The session layer only ever reaches the network through this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a listening stream socket bound to `addr`
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn Acceptor>, TransportError>;

    /// Bind a datagram socket to `addr`
    async fn bind_datagram(&self, addr: SocketAddr) -> Result<DatagramEndpoint, TransportError>;

    /// Open a stream connection to `addr`
    async fn connect(&self, addr: SocketAddr) -> Result<StreamConnection, TransportError>;

    /// Resolve a host and port to a socket address
    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, TransportError> {
        if host.is_empty() {
            return Err(TransportError::InvalidAddress("empty host".to_string()));
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
        lookup_host((host, port))
            .await
            .map_err(|e| TransportError::InvalidAddress(format!("{}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| TransportError::InvalidAddress(format!("{}:{}", host, port)))
    }
}

/// Transport kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Ordered, reliable byte stream (TCP)
    Stream,
    /// Message-bounded, unreliable datagrams (UDP)
    Datagram,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::Datagram => f.write_str("datagram"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" | "tcp" => Ok(Self::Stream),
            "datagram" | "udp" => Ok(Self::Datagram),
            other => Err(TransportError::InvalidAddress(format!("unknown transport kind: {}", other))),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Largest datagram accepted
    pub max_datagram_size: usize,
    /// Disable Nagle's algorithm on stream sockets
    pub nodelay: bool,
    /// Pending connection backlog for listeners
    pub backlog: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            max_datagram_size: 65_507,
            nodelay: true,
            backlog: 1024,
        }
    }
}

/// Socket transport built on tokio
#[derive(Debug, Clone, Default)]
pub struct TokioTransport {
    /// Transport configuration
    config: TransportConfig,
}

impl TokioTransport {
    /// Create a new transport
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Transport configuration
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn new_socket(addr: &SocketAddr) -> Result<TcpSocket, TransportError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        };
        socket.map_err(TransportError::SocketCreate)
    }
}

#[async_trait]
impl Transport for TokioTransport {
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn Acceptor>, TransportError> {
        let socket = Self::new_socket(&addr)?;
        socket.set_reuseaddr(true).map_err(TransportError::SocketCreate)?;
        socket
            .bind(addr)
            .map_err(|source| TransportError::Bind { addr, source })?;
        let listener = socket.listen(self.config.backlog).map_err(TransportError::Listen)?;

        info!("Listening on {}", listener.local_addr()?);
        Ok(Box::new(TcpAcceptor::new(listener, self.config.nodelay)))
    }

    async fn bind_datagram(&self, addr: SocketAddr) -> Result<DatagramEndpoint, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!("Datagram socket bound on {}", socket.local_addr()?);
        Ok(DatagramEndpoint::new(socket, self.config.max_datagram_size))
    }

    async fn connect(&self, addr: SocketAddr) -> Result<StreamConnection, TransportError> {
        debug!("Connecting to {}", addr);

        let socket = Self::new_socket(&addr)?;
        let stream = timeout(self.config.connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(self.config.connect_timeout))?
            .map_err(|source| TransportError::Connect { addr, source })?;
        stream.set_nodelay(self.config.nodelay)?;

        info!("Connected to {}", addr);
        Ok(StreamConnection::new(stream, Some(addr)))
    }
}
