//! Outbound paths: broadcast to every peer, send to the server, send to one peer

use crate::error::NetError;
use crate::registry::{ConnectionId, Role};
use crate::session::Session;
use crate::Result;
use tagwire_proto::TypedValue;
use tracing::{debug, info};

/// Outcome of a broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the buffer was written to
    pub delivered: usize,
    /// Peers whose write failed; they have been removed
    pub failed: Vec<ConnectionId>,
}

impl BroadcastReport {
    /// Whether every peer received the buffer
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Session {
    /// Send a pre-encoded buffer to every peer.
    ///
    /// A failed write does not stop the broadcast: the failure is recorded,
    /// and every failed peer is removed once all peers have been tried.
    pub async fn send_to_all_clients(&mut self, data: &[u8]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let targets: Vec<ConnectionId> = self.registry.peers().map(|c| c.id()).collect();

        for id in targets {
            let Some(conn) = self.registry.get_mut(id) else {
                continue;
            };
            match conn.send(data).await {
                Ok(()) => report.delivered += 1,
                Err(source) => {
                    self.record(NetError::Send { conn: id, source }, Some(id));
                    report.failed.push(id);
                }
            }
        }

        for id in &report.failed {
            self.discard(*id).await;
        }

        debug!(
            len = data.len(),
            delivered = report.delivered,
            failed = report.failed.len(),
            "Broadcast complete"
        );
        report
    }

    /// Send a pre-encoded buffer to the server.
    ///
    /// Fails with an invalid-state error, leaving the registry untouched,
    /// unless this is a client with an established connection.
    pub async fn send_to_server(&mut self, data: &[u8]) -> Result<()> {
        if self.config.role != Role::Client {
            return Err(self.record(
                NetError::InvalidState("send_to_server requires the client role".to_string()),
                None,
            ));
        }
        let Some(id) = self.server_connection() else {
            return Err(self.record(
                NetError::InvalidState("not connected to a server".to_string()),
                None,
            ));
        };
        self.send_to(id, data).await
    }

    /// Send a pre-encoded buffer to one peer.
    ///
    /// A peer whose write fails is removed.
    pub async fn send_to(&mut self, id: ConnectionId, data: &[u8]) -> Result<()> {
        let Some(conn) = self.registry.get_mut(id) else {
            return Err(self.record(NetError::UnknownConnection(id), Some(id)));
        };
        if conn.is_endpoint() {
            return Err(self.record(
                NetError::InvalidArgument(format!("{} is an endpoint, not a peer", id)),
                Some(id),
            ));
        }

        match conn.send(data).await {
            Ok(()) => {
                debug!(conn = %id, len = data.len(), "Sent");
                Ok(())
            }
            Err(source) => {
                let err = self.record(NetError::Send { conn: id, source }, Some(id));
                info!(conn = %id, "Removing peer after failed send");
                self.discard(id).await;
                Err(err)
            }
        }
    }

    /// Encode a value and send it to one peer
    pub async fn send_value(&mut self, id: ConnectionId, value: &TypedValue) -> Result<()> {
        let data = match value.encode() {
            Ok(data) => data,
            Err(e) => return Err(self.record(e.into(), Some(id))),
        };
        self.send_to(id, &data).await
    }

    /// Encode a value and send it to the server
    pub async fn send_value_to_server(&mut self, value: &TypedValue) -> Result<()> {
        let data = match value.encode() {
            Ok(data) => data,
            Err(e) => return Err(self.record(e.into(), None)),
        };
        self.send_to_server(&data).await
    }
}
