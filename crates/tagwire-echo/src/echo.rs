//! Echo server loop and ping client

use crate::config::EchoConfig;
use anyhow::{bail, Context, Result};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tagwire::{ConnectionId, Document, Frame, Role, Session, SessionBuilder, TypedValue};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long the client waits for all of its echoes
const ECHO_DEADLINE: Duration = Duration::from_secs(5);

/// Server that sends every received frame straight back to its sender
pub struct EchoServer {
    session: Session,
    inbound: mpsc::UnboundedReceiver<(ConnectionId, Frame)>,
    echoed: u64,
}

impl EchoServer {
    /// Start serving on `addr`
    pub async fn bind(config: &EchoConfig, addr: SocketAddr) -> Result<Self> {
        let mut session = SessionBuilder::new(config.transport, Role::Server).build();
        let (tx, inbound) = mpsc::unbounded_channel();

        session
            .start_server_on(addr, tagwire::handler_fn(move |id, frame| {
                let _ = tx.send((id, frame.clone()));
            }))
            .await
            .with_context(|| format!("failed to start {} server on {}", config.transport, addr))?;

        Ok(Self {
            session,
            inbound,
            echoed: 0,
        })
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.local_addr()
    }

    /// Frames echoed so far
    pub fn echoed(&self) -> u64 {
        self.echoed
    }

    /// Run dispatch passes until `shutdown` fires, then close everything
    pub async fn run(&mut self, mut shutdown: oneshot::Receiver<()>) {
        info!(addr = ?self.local_addr(), "Echo server running");

        loop {
            match shutdown.try_recv() {
                Err(oneshot::error::TryRecvError::Empty) => {}
                _ => break,
            }

            let report = self.session.run_callbacks().await;
            if !report.is_success() {
                warn!("{}", self.session.describe_last_error());
            }

            while let Ok((id, frame)) = self.inbound.try_recv() {
                debug!(conn = %id, kind = %frame.kind(), "Echoing frame");
                if self.session.send_to(id, &frame.encode()).await.is_ok() {
                    self.echoed += 1;
                }
            }
        }

        self.session.shutdown().await;
        info!(echoed = self.echoed, "Echo server stopped");
    }
}

/// Values the client sends, in order
pub fn probe_values(seq: i32) -> Vec<TypedValue> {
    vec![
        TypedValue::from("ping"),
        TypedValue::Integer(seq),
        TypedValue::Document(Document::new(json!({
            "client": "tagwire-echo",
            "seq": seq,
        }))),
    ]
}

/// Send the probe values to the server and collect the echoes
pub async fn run_client(config: &EchoConfig) -> Result<Vec<TypedValue>> {
    let mut session = SessionBuilder::new(config.transport, Role::Client).build();
    let (tx, mut inbound) = mpsc::unbounded_channel();

    session
        .connect_to_server(&config.addr, config.port, tagwire::handler_fn(move |_, frame| {
            let _ = tx.send(frame.clone());
        }))
        .await
        .with_context(|| format!("failed to connect to {}:{}", config.addr, config.port))?;

    let sent = probe_values(1);
    for value in &sent {
        session.send_value_to_server(value).await?;
    }

    let collected = timeout(ECHO_DEADLINE, async {
        let mut echoes = Vec::with_capacity(sent.len());
        while echoes.len() < sent.len() {
            let report = session.run_callbacks().await;
            if !report.is_success() || session.server_connection().is_none() {
                bail!("server went away: {}", session.describe_last_error());
            }
            while let Ok(frame) = inbound.try_recv() {
                let value = frame.to_value()?;
                info!(kind = %frame.kind(), "Echo received");
                println!("{}", describe(&value));
                echoes.push(value);
            }
        }
        Ok::<_, anyhow::Error>(echoes)
    })
    .await;

    session.shutdown().await;

    match collected {
        Ok(echoes) => echoes,
        Err(_) => bail!("timed out waiting for echoes"),
    }
}

/// One-line rendering of a value
pub fn describe(value: &TypedValue) -> String {
    match value {
        TypedValue::Integer(v) => format!("integer {}", v),
        TypedValue::Float(v) => format!("float {}", v),
        TypedValue::String(bytes) => format!("string {:?}", String::from_utf8_lossy(bytes)),
        TypedValue::Document(doc) => format!("document {}", doc),
    }
}
