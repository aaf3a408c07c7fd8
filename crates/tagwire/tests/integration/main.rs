//! Integration tests for Tagwire sessions over localhost sockets
//!
//! Every test binds ephemeral ports on the loopback interface, so the suite
//! needs no external services.

pub mod utils;
pub mod stream_tests;
pub mod datagram_tests;
