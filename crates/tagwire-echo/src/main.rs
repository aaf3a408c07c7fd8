//! Tagwire echo binary
//!
//! `TAGWIRE_MODE=server` echoes frames until Ctrl-C; `TAGWIRE_MODE=client`
//! sends a few values to the server and prints what comes back.

use anyhow::{Context, Result};
use tagwire::net::{TokioTransport, Transport};
use tagwire_echo::{run_client, EchoConfig, EchoServer, Mode};
use tokio::sync::oneshot;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = EchoConfig::from_env()?;
    info!(mode = ?config.mode, transport = %config.transport, "Starting tagwire-echo");

    match config.mode {
        Mode::Server => {
            let addr = TokioTransport::default()
                .resolve(&config.addr, config.port)
                .await
                .context("invalid server address")?;
            let mut server = EchoServer::bind(&config, addr).await?;

            let (stop, shutdown) = oneshot::channel();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Received Ctrl-C, shutting down"),
                    Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
                }
                let _ = stop.send(());
            });

            server.run(shutdown).await;
        }
        Mode::Client => {
            let echoes = run_client(&config).await?;
            info!(count = echoes.len(), "All echoes received");
        }
    }

    Ok(())
}
