//! # Tagwire Echo
//!
//! Echo server and ping client built on a Tagwire session.

#![warn(missing_docs)]

/// Configuration from environment variables
pub mod config;

/// Echo server loop and ping client
pub mod echo;

pub use config::{EchoConfig, Mode};
pub use echo::{describe, probe_values, run_client, EchoServer};
