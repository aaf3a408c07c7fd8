//! Transport-specific error types

use thiserror::Error;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket could not be created
    #[error("Socket creation failed: {0}")]
    SocketCreate(#[source] io::Error),

    /// Socket could not be bound to the address
    #[error("Bind to {addr} failed: {source}")]
    Bind {
        /// Address that was requested
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Bound socket could not start listening
    #[error("Listen failed: {0}")]
    Listen(#[source] io::Error),

    /// Pending connection could not be accepted
    #[error("Accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Outbound connection failed
    #[error("Connect to {addr} failed: {source}")]
    Connect {
        /// Remote address
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Address could not be parsed or resolved
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Operation is not available on this transport
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
