//! # Tagwire Transport
//!
//! Socket layer for Tagwire: listeners, stream connections and datagram
//! endpoints behind a [`Transport`] trait.

#![warn(missing_docs)]

/// Transport abstraction and implementations
pub mod transport;

/// Stream, listener and datagram socket handles
pub mod connection;

/// In-memory transport for tests
pub mod memory;

/// Transport-specific error types
pub mod error;

pub use transport::{Transport, TokioTransport, TransportConfig, TransportKind};
pub use connection::{
    Acceptor, BoxedStream, DatagramEndpoint, DatagramSender, PeerStream, StreamConnection,
    TcpAcceptor,
};
pub use memory::{MemoryAcceptor, MemoryTransport};
pub use error::TransportError;
