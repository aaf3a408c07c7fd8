//! Event dispatch: one non-blocking pass over every registered connection

use crate::registry::{Connection, ConnectionId, ConnectionIo, Role};
use crate::session::Session;
use bytes::Bytes;
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::Poll;
use tagwire_net::{BoxedStream, StreamConnection};
use tagwire_proto::Frame;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Callback invoked with each frame received on a connection.
///
/// The frame carries the raw payload and its tag, so a handler can
/// reinterpret it with the `Frame::decode_*` methods.
pub trait DataHandler: Send + Sync {
    /// Handle one received frame
    fn on_data(&self, conn: ConnectionId, frame: &Frame);
}

impl<F> DataHandler for F
where
    F: Fn(ConnectionId, &Frame) + Send + Sync,
{
    fn on_data(&self, conn: ConnectionId, frame: &Frame) {
        self(conn, frame)
    }
}

/// Fix a closure's signature so it can be passed where a handler is expected
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(ConnectionId, &Frame) + Send + Sync + 'static,
{
    f
}

/// Outcome of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Peers accepted (stream) or first heard from (datagram)
    pub accepted: usize,
    /// Frames handed to a handler
    pub delivered: usize,
    /// Peers removed because they closed
    pub closed: usize,
    /// Failures recorded as the last error
    pub failed: usize,
}

impl DispatchReport {
    /// Whether the pass completed without recording a failure
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Whether nothing happened during the pass
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Readiness observed on one connection during the poll batch
enum Readiness {
    Accepted(BoxedStream, SocketAddr),
    AcceptFailed(io::Error),
    Readable(ConnectionId),
    ReadFailed(ConnectionId, io::Error),
    Datagram(ConnectionId, Bytes, SocketAddr),
    DatagramFailed(ConnectionId, io::Error),
}

impl Session {
    /// Run one dispatch pass.
    ///
    /// Waits at most the configured poll timeout for any connection to
    /// become ready, then handles everything that was ready: accepts at most
    /// one pending peer (without reading from it), reads one frame from each
    /// readable peer and hands it to that peer's handler. Peers that closed
    /// are removed quietly; peers that failed are removed and the failure is
    /// recorded as the last error. Removals happen after the pass.
    pub async fn run_callbacks(&mut self) -> DispatchReport {
        let mut report = DispatchReport::default();
        if self.registry.is_empty() {
            return report;
        }

        let events = self.poll_ready().await;
        let mut doomed = Vec::new();

        for event in events {
            match event {
                Readiness::Accepted(stream, addr) => self.accept_stream(stream, addr, &mut report).await,
                Readiness::AcceptFailed(e) => {
                    self.record(crate::NetError::Accept(e), None);
                    report.failed += 1;
                }
                Readiness::Readable(id) => self.read_stream(id, &mut doomed, &mut report).await,
                Readiness::ReadFailed(id, e) => {
                    let err = crate::NetError::Receive { conn: id, source: e };
                    if err.is_closed() {
                        info!(conn = %id, "Peer closed connection: {}", err);
                        report.closed += 1;
                    } else {
                        self.record(err, Some(id));
                        report.failed += 1;
                    }
                    doomed.push(id);
                }
                Readiness::Datagram(endpoint, data, from) => {
                    self.receive_datagram(endpoint, data, from, &mut report)
                }
                Readiness::DatagramFailed(endpoint, e) => {
                    // Endpoint stays registered
                    self.record(
                        crate::NetError::Receive {
                            conn: endpoint,
                            source: e,
                        },
                        Some(endpoint),
                    );
                    report.failed += 1;
                }
            }
        }

        for id in doomed {
            self.discard(id).await;
        }

        if !report.is_idle() {
            debug!(
                accepted = report.accepted,
                delivered = report.delivered,
                closed = report.closed,
                failed = report.failed,
                "Dispatch pass complete"
            );
        }
        report
    }

    /// Poll every connection once as a single batch, bounded by the poll timeout
    async fn poll_ready(&mut self) -> Vec<Readiness> {
        let registry = &mut self.registry;
        let batch = poll_fn(|cx| {
            let mut ready = Vec::new();
            for conn in registry.iter_mut() {
                let id = conn.id;
                match &mut conn.io {
                    ConnectionIo::Listener(acceptor) => match acceptor.poll_accept(cx) {
                        Poll::Ready(Ok((stream, addr))) => ready.push(Readiness::Accepted(stream, addr)),
                        Poll::Ready(Err(e)) => ready.push(Readiness::AcceptFailed(e)),
                        Poll::Pending => {}
                    },
                    ConnectionIo::Stream(stream) => match stream.poll_readable(cx) {
                        Poll::Ready(Ok(())) => ready.push(Readiness::Readable(id)),
                        Poll::Ready(Err(e)) => ready.push(Readiness::ReadFailed(id, e)),
                        Poll::Pending => {}
                    },
                    ConnectionIo::Endpoint(endpoint) => match endpoint.poll_recv(cx) {
                        Poll::Ready(Ok((data, from))) => ready.push(Readiness::Datagram(id, data, from)),
                        Poll::Ready(Err(e)) => ready.push(Readiness::DatagramFailed(id, e)),
                        Poll::Pending => {}
                    },
                    ConnectionIo::DatagramPeer { .. } => {}
                }
            }
            if ready.is_empty() {
                Poll::Pending
            } else {
                Poll::Ready(ready)
            }
        });

        timeout(self.config.poll_timeout, batch).await.unwrap_or_default()
    }

    fn at_peer_limit(&self) -> bool {
        self.config
            .max_peers
            .is_some_and(|max| self.registry.peers().count() >= max)
    }

    async fn accept_stream(&mut self, stream: BoxedStream, addr: SocketAddr, report: &mut DispatchReport) {
        if self.at_peer_limit() {
            let mut refused = StreamConnection::from_boxed(stream, Some(addr));
            if let Err(e) = refused.close().await {
                debug!(peer = %addr, "Error closing refused stream: {}", e);
            }
            warn!(peer = %addr, "Peer limit reached, connection refused");
            return;
        }
        let id = self.next_connection_id();
        let mut conn = Connection::new(
            id,
            self.config.role,
            ConnectionIo::Stream(StreamConnection::from_boxed(stream, Some(addr))),
        );
        if let Some(handler) = &self.server_handler {
            conn = conn.with_handler(Arc::clone(handler));
        }
        self.registry.register(conn);
        report.accepted += 1;
        info!(conn = %id, peer = %addr, "Accepted connection");
    }

    async fn read_stream(
        &mut self,
        id: ConnectionId,
        doomed: &mut Vec<ConnectionId>,
        report: &mut DispatchReport,
    ) {
        let codec = self.codec;
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };

        match conn.read_frame(&codec).await {
            Ok(frame) => {
                debug!(conn = %id, kind = %frame.kind(), len = frame.payload_size(), "Frame received");
                if let Some(handler) = conn.handler.clone() {
                    handler.on_data(id, &frame);
                }
                report.delivered += 1;
            }
            Err(e) if e.is_closed() => {
                info!(conn = %id, "Peer closed connection");
                doomed.push(id);
                report.closed += 1;
            }
            Err(e) => {
                self.record(e, Some(id));
                doomed.push(id);
                report.failed += 1;
            }
        }
    }

    fn receive_datagram(
        &mut self,
        endpoint: ConnectionId,
        data: Bytes,
        from: SocketAddr,
        report: &mut DispatchReport,
    ) {
        let frame = match self.codec.decode_slice(&data) {
            Ok((frame, _)) => frame,
            Err(e) => {
                self.record(e.into(), Some(endpoint));
                report.failed += 1;
                return;
            }
        };

        let peer = match self.registry.datagram_peer(from) {
            Some(peer) => peer,
            None if self.config.role == Role::Server => {
                if self.at_peer_limit() {
                    warn!(peer = %from, "Peer limit reached, datagram dropped");
                    return;
                }
                let Some(sender) = self.registry.get(endpoint).and_then(Connection::datagram_sender) else {
                    return;
                };
                let id = self.next_connection_id();
                let mut conn = Connection::new(
                    id,
                    Role::Server,
                    ConnectionIo::DatagramPeer { sender, addr: from },
                );
                if let Some(handler) = &self.server_handler {
                    conn = conn.with_handler(Arc::clone(handler));
                }
                self.registry.register(conn);
                report.accepted += 1;
                info!(conn = %id, peer = %from, "New datagram peer");
                id
            }
            None => {
                debug!(peer = %from, "Dropping datagram from unknown sender");
                return;
            }
        };

        debug!(conn = %peer, kind = %frame.kind(), len = frame.payload_size(), "Datagram received");
        if let Some(handler) = self.registry.get(peer).and_then(|c| c.handler.clone()) {
            handler.on_data(peer, &frame);
        }
        report.delivered += 1;
    }
}
