//! Connection registry and per-connection state

use crate::dispatch::DataHandler;
use crate::error::NetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tagwire_net::{Acceptor, DatagramEndpoint, DatagramSender, StreamConnection, TransportKind};
use tagwire_proto::{Frame, FrameCodec};
use tracing::debug;

/// Handle identifying one connection within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw handle value
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw handle value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side of the exchange a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Connects out to one server
    Client,
    /// Listens for or receives from many clients
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

impl FromStr for Role {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            other => Err(NetError::InvalidArgument(format!("unknown role: {}", other))),
        }
    }
}

/// Connection lifecycle state.
///
/// `Created` becomes `Listening`, `Bound` or `Connected` on registration;
/// `Closed` is terminal and closed entries leave the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Built but not yet registered
    Created,
    /// Listening stream endpoint
    Listening,
    /// Bound datagram endpoint
    Bound,
    /// Peer reachable for send and receive
    Connected,
    /// Closed
    Closed,
}

/// Socket behind a connection
pub enum ConnectionIo {
    /// Listening stream socket
    Listener(Box<dyn Acceptor>),
    /// Connected or accepted byte stream
    Stream(StreamConnection),
    /// Bound datagram socket, the only readable handle of a datagram session
    Endpoint(DatagramEndpoint),
    /// Logical datagram peer sharing the endpoint's socket
    DatagramPeer {
        /// Sending half of the endpoint socket
        sender: DatagramSender,
        /// Remote address packets are sent to and matched against
        addr: SocketAddr,
    },
}

impl fmt::Debug for ConnectionIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listener(acceptor) => f
                .debug_tuple("Listener")
                .field(&acceptor.local_addr().ok())
                .finish(),
            Self::Stream(stream) => f.debug_tuple("Stream").field(stream).finish(),
            Self::Endpoint(endpoint) => f.debug_tuple("Endpoint").field(endpoint).finish(),
            Self::DatagramPeer { addr, .. } => {
                f.debug_struct("DatagramPeer").field("addr", addr).finish()
            }
        }
    }
}

/// One registered connection
pub struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) role: Role,
    pub(crate) kind: TransportKind,
    pub(crate) state: ConnectionState,
    pub(crate) io: ConnectionIo,
    pub(crate) peer_addr: Option<SocketAddr>,
    pub(crate) handler: Option<Arc<dyn DataHandler>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("io", &self.io)
            .field("peer_addr", &self.peer_addr)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl Connection {
    /// Create an unregistered connection
    pub fn new(id: ConnectionId, role: Role, io: ConnectionIo) -> Self {
        let (kind, peer_addr) = match &io {
            ConnectionIo::Listener(_) => (TransportKind::Stream, None),
            ConnectionIo::Stream(stream) => (TransportKind::Stream, stream.peer_addr()),
            ConnectionIo::Endpoint(_) => (TransportKind::Datagram, None),
            ConnectionIo::DatagramPeer { addr, .. } => (TransportKind::Datagram, Some(*addr)),
        };
        Self {
            id,
            role,
            kind,
            state: ConnectionState::Created,
            io,
            peer_addr,
            handler: None,
        }
    }

    /// Attach the handler invoked for data arriving on this connection
    pub fn with_handler(mut self, handler: Arc<dyn DataHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Connection handle
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Session role the connection belongs to
    pub fn role(&self) -> Role {
        self.role
    }

    /// Transport kind
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Remote address, when known
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Local address of a listening or bound endpoint
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.io {
            ConnectionIo::Listener(acceptor) => acceptor.local_addr().ok(),
            ConnectionIo::Endpoint(endpoint) => endpoint.local_addr().ok(),
            _ => None,
        }
    }

    /// Whether this is the session's listening or bound endpoint
    pub fn is_endpoint(&self) -> bool {
        matches!(self.io, ConnectionIo::Listener(_) | ConnectionIo::Endpoint(_))
    }

    fn settled_state(&self) -> ConnectionState {
        match self.io {
            ConnectionIo::Listener(_) => ConnectionState::Listening,
            ConnectionIo::Endpoint(_) => ConnectionState::Bound,
            ConnectionIo::Stream(_) | ConnectionIo::DatagramPeer { .. } => ConnectionState::Connected,
        }
    }

    /// Write pre-encoded bytes to the peer
    pub(crate) async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.io {
            ConnectionIo::Stream(stream) => stream.send(data).await,
            ConnectionIo::DatagramPeer { sender, addr } => {
                let sent = sender.send_to(data, *addr).await?;
                if sent == data.len() {
                    Ok(())
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("datagram truncated: {} of {} bytes", sent, data.len()),
                    ))
                }
            }
            ConnectionIo::Listener(_) | ConnectionIo::Endpoint(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "endpoint is not a peer",
            )),
        }
    }

    /// Read one frame from a stream peer
    pub(crate) async fn read_frame(&mut self, codec: &FrameCodec) -> Result<Frame, NetError> {
        match &mut self.io {
            ConnectionIo::Stream(stream) => Ok(codec.read_frame(stream.reader()).await?),
            _ => Err(NetError::InvalidState(format!(
                "{} is not a stream peer",
                self.id
            ))),
        }
    }

    /// Sending handle of a datagram endpoint
    pub(crate) fn datagram_sender(&self) -> Option<DatagramSender> {
        match &self.io {
            ConnectionIo::Endpoint(endpoint) => Some(endpoint.sender()),
            _ => None,
        }
    }

    /// Close the underlying socket and mark the connection closed
    pub(crate) async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let ConnectionIo::Stream(stream) = &mut self.io {
            if let Err(e) = stream.close().await {
                debug!(conn = %self.id, "Error closing stream: {}", e);
            }
        }
        self.state = ConnectionState::Closed;
    }
}

/// Insertion-ordered collection of live connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Vec<Connection>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, moving it out of `Created`.
    ///
    /// Returns `false` and leaves the registry untouched if the handle is
    /// already present.
    pub fn register(&mut self, mut conn: Connection) -> bool {
        if self.contains(conn.id) {
            debug!(conn = %conn.id, "Connection already registered");
            return false;
        }
        if conn.state == ConnectionState::Created {
            conn.state = conn.settled_state();
        }
        self.entries.push(conn);
        true
    }

    /// Remove a connection; removing an absent handle is a no-op
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let index = self.entries.iter().position(|c| c.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Whether the handle is registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.iter().any(|c| c.id == id)
    }

    /// Look up a connection
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.entries.iter().find(|c| c.id == id)
    }

    /// Look up a connection mutably
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.entries.iter_mut().find(|c| c.id == id)
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.entries.iter()
    }

    /// Iterate mutably in insertion order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.entries.iter_mut()
    }

    /// Number of registered connections, endpoint included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handles in insertion order
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.iter().map(|c| c.id).collect()
    }

    /// The listening or bound endpoint, if any
    pub fn endpoint(&self) -> Option<&Connection> {
        self.entries.iter().find(|c| c.is_endpoint())
    }

    /// Every connection except the endpoint
    pub fn peers(&self) -> impl Iterator<Item = &Connection> {
        self.entries.iter().filter(|c| !c.is_endpoint())
    }

    /// Datagram peer registered for `addr`
    pub fn datagram_peer(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.entries
            .iter()
            .find(|c| matches!(c.io, ConnectionIo::DatagramPeer { addr: a, .. } if a == addr))
            .map(|c| c.id)
    }

    /// Take every connection out, leaving the registry empty
    pub fn drain(&mut self) -> Vec<Connection> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::io::duplex;
    use tokio::net::UdpSocket;

    fn stream_conn(raw: u64) -> Connection {
        let (a, _b) = duplex(64);
        Connection::new(
            ConnectionId::new(raw),
            Role::Server,
            ConnectionIo::Stream(StreamConnection::new(a, None)),
        )
    }

    #[tokio::test]
    async fn test_register_settles_state() {
        let mut registry = ConnectionRegistry::new();
        let conn = stream_conn(1);
        assert_eq!(conn.state(), ConnectionState::Created);

        assert!(registry.register(conn));
        let conn = registry.get(ConnectionId::new(1)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.kind(), TransportKind::Stream);
    }

    #[tokio::test]
    async fn test_register_duplicate_is_noop() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.register(stream_conn(1)));
        assert!(!registry.register(stream_conn(1)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        registry.register(stream_conn(1));
        registry.register(stream_conn(2));

        assert!(registry.remove(ConnectionId::new(1)).is_some());
        assert!(registry.remove(ConnectionId::new(1)).is_none());
        assert_eq!(registry.ids(), vec![ConnectionId::new(2)]);
    }

    #[tokio::test]
    async fn test_insertion_order() {
        let mut registry = ConnectionRegistry::new();
        for raw in [5, 2, 9] {
            registry.register(stream_conn(raw));
        }
        let order: Vec<u64> = registry.iter().map(|c| c.id().get()).collect();
        assert_eq!(order, vec![5, 2, 9]);
    }

    #[tokio::test]
    async fn test_endpoint_and_peers() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = DatagramEndpoint::new(socket, 1024);
        let sender = endpoint.sender();
        let peer_addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();

        let mut registry = ConnectionRegistry::new();
        registry.register(Connection::new(
            ConnectionId::new(1),
            Role::Server,
            ConnectionIo::Endpoint(endpoint),
        ));
        registry.register(Connection::new(
            ConnectionId::new(2),
            Role::Server,
            ConnectionIo::DatagramPeer {
                sender,
                addr: peer_addr,
            },
        ));

        let endpoint = registry.endpoint().unwrap();
        assert_eq!(endpoint.id(), ConnectionId::new(1));
        assert_eq!(endpoint.state(), ConnectionState::Bound);
        assert!(endpoint.local_addr().is_some());

        let peers: Vec<_> = registry.peers().map(|c| c.id()).collect();
        assert_eq!(peers, vec![ConnectionId::new(2)]);
        assert_eq!(registry.datagram_peer(peer_addr), Some(ConnectionId::new(2)));
        assert_eq!(registry.datagram_peer("127.0.0.1:7001".parse().unwrap()), None);
    }

    #[tokio::test]
    async fn test_close_marks_closed() {
        let mut conn = stream_conn(1);
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        // Second close is a no-op
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_drain_empties_registry() {
        let mut registry = ConnectionRegistry::new();
        registry.register(stream_conn(1));
        registry.register(stream_conn(2));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(u64),
        Remove(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..8).prop_map(Op::Register),
            (0u64..8).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn test_registry_matches_ordered_set(ops in prop::collection::vec(op(), 0..40)) {
            let mut registry = ConnectionRegistry::new();
            let mut model: Vec<u64> = Vec::new();

            for op in ops {
                match op {
                    Op::Register(raw) => {
                        let inserted = registry.register(stream_conn(raw));
                        prop_assert_eq!(inserted, !model.contains(&raw));
                        if inserted {
                            model.push(raw);
                        }
                    }
                    Op::Remove(raw) => {
                        let removed = registry.remove(ConnectionId::new(raw));
                        prop_assert_eq!(removed.is_some(), model.contains(&raw));
                        model.retain(|m| *m != raw);
                        if let Some(mut conn) = removed {
                            tokio_test::block_on(conn.close());
                            prop_assert_eq!(conn.state(), ConnectionState::Closed);
                        }
                    }
                }
            }

            let ids: Vec<u64> = registry.ids().into_iter().map(ConnectionId::get).collect();
            prop_assert_eq!(ids, model);
        }
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Server".parse::<Role>().unwrap(), Role::Server);
        assert_eq!("client".parse::<Role>().unwrap(), Role::Client);
        assert!("peer".parse::<Role>().is_err());
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }
}
