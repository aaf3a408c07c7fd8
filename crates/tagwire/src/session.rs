//! Session context: configuration, lifecycle and last-error bookkeeping

use crate::dispatch::DataHandler;
use crate::error::{LastError, NetError};
use crate::registry::{Connection, ConnectionId, ConnectionIo, ConnectionRegistry, Role};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tagwire_net::{TokioTransport, Transport, TransportConfig, TransportKind};
use tagwire_proto::FrameCodec;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Stream or datagram sockets
    pub transport_kind: TransportKind,
    /// Client or server
    pub role: Role,
    /// Longest a dispatch pass waits for readiness
    pub poll_timeout: Duration,
    /// Largest payload accepted from a peer; unlimited when `None`
    pub max_payload_size: Option<usize>,
    /// Most peers a server keeps at once; unlimited when `None`
    #[serde(default)]
    pub max_peers: Option<usize>,
    /// Socket-level configuration
    pub transport: TransportConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport_kind: TransportKind::Stream,
            role: Role::Server,
            poll_timeout: Duration::from_millis(10),
            max_payload_size: None,
            max_peers: None,
            transport: TransportConfig::default(),
        }
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Initialised, nothing opened yet
    Idle,
    /// Server endpoint is listening or bound
    Serving,
    /// Client is paired with a server
    Connected,
}

/// Session builder for configuring sessions
pub struct SessionBuilder {
    /// Session configuration under construction
    config: SessionConfig,
    /// Transport override
    transport: Option<Arc<dyn Transport>>,
}

impl SessionBuilder {
    /// Create a new session builder
    pub fn new(transport_kind: TransportKind, role: Role) -> Self {
        Self {
            config: SessionConfig {
                transport_kind,
                role,
                ..Default::default()
            },
            transport: None,
        }
    }

    /// Set the dispatch poll timeout
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.config.poll_timeout = poll_timeout;
        self
    }

    /// Bound the payload size accepted from peers
    pub fn with_max_payload_size(mut self, max: usize) -> Self {
        self.config.max_payload_size = Some(max);
        self
    }

    /// Bound the number of peers a server keeps
    pub fn with_max_peers(mut self, max: usize) -> Self {
        self.config.max_peers = Some(max);
        self
    }

    /// Set the stream connect timeout
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.config.transport.connect_timeout = connect_timeout;
        self
    }

    /// Set the largest datagram received
    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.config.transport.max_datagram_size = size;
        self
    }

    /// Enable/disable TCP_NODELAY on stream sockets
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.config.transport.nodelay = nodelay;
        self
    }

    /// Open sockets through a custom transport
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the session configuration
    pub fn build_config(self) -> SessionConfig {
        self.config
    }

    /// Build the session
    pub fn build(self) -> Session {
        match self.transport {
            Some(transport) => Session::with_transport(self.config, transport),
            None => Session::new(self.config),
        }
    }
}

/// A session: one role, one transport kind and the connections opened under
/// them.
///
/// All state lives here, so independent sessions can coexist in one process.
/// Operations take `&mut self`; sharing a session across tasks needs a lock.
pub struct Session {
    /// Unique session ID
    pub(crate) id: Uuid,
    /// Session configuration
    pub(crate) config: SessionConfig,
    /// Socket factory
    pub(crate) transport: Arc<dyn Transport>,
    /// Frame codec shared by every connection
    pub(crate) codec: FrameCodec,
    /// Live connections
    pub(crate) registry: ConnectionRegistry,
    /// Handler given to every peer a server accepts
    pub(crate) server_handler: Option<Arc<dyn DataHandler>>,
    /// Connection to the server, for clients
    pub(crate) server_conn: Option<ConnectionId>,
    /// Next connection handle
    next_id: u64,
    /// Current status
    status: SessionStatus,
    /// Most recent recorded failure
    last_error: Option<LastError>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("status", &self.status)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl Session {
    /// Initialise a session with default configuration
    pub fn init(transport_kind: TransportKind, role: Role) -> Self {
        SessionBuilder::new(transport_kind, role).build()
    }

    /// Create a session over tokio sockets
    pub fn new(config: SessionConfig) -> Self {
        let transport = Arc::new(TokioTransport::new(config.transport.clone()));
        Self::with_transport(config, transport)
    }

    /// Create a session over an explicit transport
    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let codec = match config.max_payload_size {
            Some(max) => FrameCodec::with_max_payload_size(max),
            None => FrameCodec::new(),
        };
        let id = Uuid::new_v4();
        debug!(session = %id, kind = %config.transport_kind, role = %config.role, "Session initialised");

        Self {
            id,
            config,
            transport,
            codec,
            registry: ConnectionRegistry::new(),
            server_handler: None,
            server_conn: None,
            next_id: 1,
            status: SessionStatus::Idle,
            last_error: None,
        }
    }

    /// Session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Session role
    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Transport kind
    pub fn transport_kind(&self) -> TransportKind {
        self.config.transport_kind
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Live connections
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Number of live connections, endpoint included
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Address the listening or bound endpoint is on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.registry.endpoint().and_then(Connection::local_addr)
    }

    /// Connection to the server, for a connected client
    pub fn server_connection(&self) -> Option<ConnectionId> {
        self.server_conn.filter(|id| self.registry.contains(*id))
    }

    /// Start a server on every interface at `port`.
    ///
    /// `handler` is given to every peer accepted from now on.
    ///
    /// Datagram peers have no close signal: one registered for a source
    /// address stays until it is closed, a send to it fails, or the session
    /// shuts down. `SessionConfig::max_peers` bounds how many are kept; once
    /// it is reached, new stream peers are turned away and datagrams from
    /// new addresses are dropped.
    pub async fn start_server<H>(&mut self, port: u16, handler: H) -> Result<SocketAddr>
    where
        H: DataHandler + 'static,
    {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        self.start_server_on(addr, handler).await
    }

    /// Start a server on an explicit address; port 0 picks an ephemeral port
    pub async fn start_server_on<H>(&mut self, addr: SocketAddr, handler: H) -> Result<SocketAddr>
    where
        H: DataHandler + 'static,
    {
        if self.config.role != Role::Server {
            return Err(self.fail(NetError::InvalidState(
                "start_server requires the server role".to_string(),
            )));
        }
        if self.registry.endpoint().is_some() {
            return Err(self.fail(NetError::InvalidState("server already started".to_string())));
        }

        let transport = Arc::clone(&self.transport);
        let io = match self.config.transport_kind {
            TransportKind::Stream => transport.listen(addr).await.map(ConnectionIo::Listener),
            TransportKind::Datagram => transport.bind_datagram(addr).await.map(ConnectionIo::Endpoint),
        };
        let io = match io {
            Ok(io) => io,
            Err(e) => return Err(self.fail(e.into())),
        };

        let id = self.next_connection_id();
        let conn = Connection::new(id, Role::Server, io);
        let local = conn.local_addr().unwrap_or(addr);
        self.registry.register(conn);
        let handler: Arc<dyn DataHandler> = Arc::new(handler);
        self.server_handler = Some(handler);
        self.status = SessionStatus::Serving;

        info!(session = %self.id, kind = %self.config.transport_kind, addr = %local, "Server started");
        Ok(local)
    }

    /// Connect to a server.
    ///
    /// Stream sessions open one outbound connection. Datagram sessions bind
    /// an ephemeral socket and pair it with the server address; only
    /// datagrams from that address are delivered to `handler`.
    pub async fn connect_to_server<H>(&mut self, ip: &str, port: u16, handler: H) -> Result<ConnectionId>
    where
        H: DataHandler + 'static,
    {
        if self.config.role != Role::Client {
            return Err(self.fail(NetError::InvalidState(
                "connect_to_server requires the client role".to_string(),
            )));
        }
        if self.server_connection().is_some() || self.registry.endpoint().is_some() {
            return Err(self.fail(NetError::InvalidState("already connected".to_string())));
        }

        let transport = Arc::clone(&self.transport);
        let addr = match transport.resolve(ip, port).await {
            Ok(addr) => addr,
            Err(e) => return Err(self.fail(e.into())),
        };
        let handler: Arc<dyn DataHandler> = Arc::new(handler);

        let id = match self.config.transport_kind {
            TransportKind::Stream => {
                let stream = match transport.connect(addr).await {
                    Ok(stream) => stream,
                    Err(e) => return Err(self.fail(e.into())),
                };
                let id = self.next_connection_id();
                self.registry.register(
                    Connection::new(id, Role::Client, ConnectionIo::Stream(stream)).with_handler(handler),
                );
                id
            }
            TransportKind::Datagram => {
                let local = match addr {
                    SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                    SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
                };
                let endpoint = match transport.bind_datagram(local).await {
                    Ok(endpoint) => endpoint,
                    Err(e) => return Err(self.fail(e.into())),
                };
                let sender = endpoint.sender();

                let endpoint_id = self.next_connection_id();
                self.registry.register(Connection::new(
                    endpoint_id,
                    Role::Client,
                    ConnectionIo::Endpoint(endpoint),
                ));

                let id = self.next_connection_id();
                self.registry.register(
                    Connection::new(id, Role::Client, ConnectionIo::DatagramPeer { sender, addr })
                        .with_handler(handler),
                );
                id
            }
        };

        self.server_conn = Some(id);
        self.status = SessionStatus::Connected;
        info!(session = %self.id, conn = %id, server = %addr, "Connected to server");
        Ok(id)
    }

    /// Close one connection and remove it from the registry
    pub async fn close(&mut self, id: ConnectionId) -> Result<()> {
        match self.registry.remove(id) {
            Some(mut conn) => {
                conn.close().await;
                info!(conn = %id, "Connection closed");
                self.release_datagram_pair().await;
                self.settle_status();
                Ok(())
            }
            None => Err(self.fail(NetError::UnknownConnection(id))),
        }
    }

    /// Close every connection and reset the session to its initial state.
    ///
    /// Configuration is kept; the session can start or connect again.
    pub async fn shutdown(&mut self) {
        let conns = self.registry.drain();
        let count = conns.len();
        for mut conn in conns {
            conn.close().await;
        }

        self.server_handler = None;
        self.server_conn = None;
        self.status = SessionStatus::Idle;
        self.last_error = None;
        info!(session = %self.id, closed = count, "Session shut down");
    }

    /// Most recent recorded failure
    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    /// Describe the most recent failure
    pub fn describe_last_error(&self) -> String {
        match &self.last_error {
            Some(last) => last.to_string(),
            None => "no error".to_string(),
        }
    }

    /// Log the most recent failure
    pub fn print_last_error(&self) {
        match &self.last_error {
            Some(last) => error!(session = %self.id, code = ?last.code, "{}", last),
            None => info!(session = %self.id, "No error recorded"),
        }
    }

    /// Record `err` as the last error and hand it back
    pub(crate) fn record(&mut self, err: NetError, conn: Option<ConnectionId>) -> NetError {
        match conn {
            Some(conn) => warn!(session = %self.id, conn = %conn, code = ?err.code(), "{}", err),
            None => warn!(session = %self.id, code = ?err.code(), "{}", err),
        }
        self.last_error = Some(LastError::new(&err, conn));
        err
    }

    fn fail(&mut self, err: NetError) -> NetError {
        self.record(err, None)
    }

    pub(crate) fn next_connection_id(&mut self) -> ConnectionId {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Remove and close a connection that failed or closed
    pub(crate) async fn discard(&mut self, id: ConnectionId) {
        if let Some(mut conn) = self.registry.remove(id) {
            conn.close().await;
            info!(conn = %id, "Connection removed");
        }
        self.release_datagram_pair().await;
        self.settle_status();
    }

    /// A datagram client's endpoint and server peer live and die together
    async fn release_datagram_pair(&mut self) {
        if self.config.role != Role::Client || self.config.transport_kind != TransportKind::Datagram {
            return;
        }
        let has_peer = self.server_connection().is_some();
        let has_endpoint = self.registry.endpoint().is_some();
        if has_peer == has_endpoint {
            return;
        }
        for mut conn in self.registry.drain() {
            conn.close().await;
            debug!(conn = %conn.id(), "Released half of datagram pairing");
        }
    }

    fn settle_status(&mut self) {
        if self.status == SessionStatus::Connected && self.server_connection().is_none() {
            self.status = SessionStatus::Idle;
        } else if self.status == SessionStatus::Serving && self.registry.endpoint().is_none() {
            self.status = SessionStatus::Idle;
        }
    }
}
