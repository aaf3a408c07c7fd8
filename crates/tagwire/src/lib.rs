//! # Tagwire
//!
//! Typed values over TCP and UDP with a small, poll-driven session layer.
//!
//! A [`Session`] owns one listening or bound endpoint and the peers reached
//! through it. The application drives it by calling
//! [`Session::run_callbacks`] in a loop; each pass accepts new peers and
//! hands every received frame to the connection's [`DataHandler`].

#![warn(missing_docs)]

pub use tagwire_net as net;
pub use tagwire_proto as proto;

/// Error types for the Tagwire library
pub mod error;

/// Session context and lifecycle operations
pub mod session;

/// Connection registry and per-connection state
pub mod registry;

/// Event dispatch
pub mod dispatch;

/// Broadcast and send paths
pub mod broadcast;

pub use broadcast::BroadcastReport;
pub use dispatch::{handler_fn, DataHandler, DispatchReport};
pub use error::{ErrorCode, LastError, NetError};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, ConnectionState, Role};
pub use session::{Session, SessionBuilder, SessionConfig, SessionStatus};
pub use tagwire_net::{TransportConfig, TransportKind};
pub use tagwire_proto::{Document, Frame, TypedValue, ValueKind};

/// Result type alias for Tagwire operations
pub type Result<T> = std::result::Result<T, NetError>;
