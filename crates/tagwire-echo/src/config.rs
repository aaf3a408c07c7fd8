//! Echo configuration from the environment

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tagwire::TransportKind;

/// Which side the binary runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Echo every frame back to its sender
    Server,
    /// Send a few values and print the echoes
    Client,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            other => bail!("unknown mode {:?}, expected server or client", other),
        }
    }
}

/// Echo configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoConfig {
    /// Server or client
    pub mode: Mode,
    /// Stream or datagram sockets
    pub transport: TransportKind,
    /// Address to bind (server) or connect to (client)
    pub addr: String,
    /// Port to bind or connect to
    pub port: u16,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Server,
            transport: TransportKind::Stream,
            addr: "127.0.0.1".to_string(),
            port: 7878,
        }
    }
}

impl EchoConfig {
    /// Read `TAGWIRE_MODE`, `TAGWIRE_TRANSPORT`, `TAGWIRE_ADDR` and `TAGWIRE_PORT`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = lookup("TAGWIRE_MODE") {
            config.mode = mode.parse()?;
        }
        if let Some(transport) = lookup("TAGWIRE_TRANSPORT") {
            config.transport = transport
                .parse()
                .with_context(|| format!("invalid TAGWIRE_TRANSPORT {:?}", transport))?;
        }
        if let Some(addr) = lookup("TAGWIRE_ADDR") {
            config.addr = addr;
        }
        if let Some(port) = lookup("TAGWIRE_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("invalid TAGWIRE_PORT {:?}", port))?;
        }

        Ok(config)
    }
}
