//! Shared helpers for driving sessions in tests

use anyhow::{anyhow, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tagwire::{ConnectionId, DataHandler, DispatchReport, Frame, Role, Session, SessionBuilder, TransportKind};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// How long any single wait in a test may take
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Frames collected by a handler
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<(ConnectionId, Frame)>,
}

impl Inbox {
    /// Next collected frame, if any
    pub fn try_next(&mut self) -> Option<(ConnectionId, Frame)> {
        self.rx.try_recv().ok()
    }
}

/// Handler that forwards every frame into an [`Inbox`]
pub fn inbox() -> (impl DataHandler + 'static, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = tagwire::handler_fn(move |id, frame| {
        let _ = tx.send((id, frame.clone()));
    });
    (handler, Inbox { rx })
}

/// Session with a short poll timeout
pub fn session(kind: TransportKind, role: Role) -> Session {
    SessionBuilder::new(kind, role)
        .with_poll_timeout(Duration::from_millis(10))
        .build()
}

/// Loopback address with the port of `addr`
pub fn loopback(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()))
}

/// Run passes until `done` accepts the accumulated report
pub async fn drive_until<F>(session: &mut Session, mut done: F) -> Result<DispatchReport>
where
    F: FnMut(&DispatchReport) -> bool,
{
    timeout(DEADLINE, async {
        let mut total = DispatchReport::default();
        loop {
            let report = session.run_callbacks().await;
            total.accepted += report.accepted;
            total.delivered += report.delivered;
            total.closed += report.closed;
            total.failed += report.failed;
            if done(&total) {
                return total;
            }
        }
    })
    .await
    .map_err(|_| anyhow!("session did not reach the expected state in time"))
}

/// Run passes until the inbox receives a frame
pub async fn next_frame(session: &mut Session, inbox: &mut Inbox) -> Result<(ConnectionId, Frame)> {
    timeout(DEADLINE, async {
        loop {
            if let Some(item) = inbox.try_next() {
                return item;
            }
            session.run_callbacks().await;
        }
    })
    .await
    .map_err(|_| anyhow!("no frame arrived in time"))
}
