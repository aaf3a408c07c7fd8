//! # Tagwire Protocol
//!
//! Typed values, the tag + length + payload frame format, and the codec that
//! moves them over async streams and datagram sockets.
//!
//! Every frame on the wire is:
//!
//! ```text
//! [1 byte: type tag] [4 bytes: payload length, big-endian] [payload]
//! ```

#![warn(missing_docs)]

/// Frame structure and wire tags
pub mod frame;

/// Typed values carried by frames
pub mod value;

/// Frame codec for async streams and datagrams
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use frame::{Frame, FrameHeader, ValueKind, HEADER_LEN};
pub use value::{Document, TypedValue};
pub use codec::{
    FrameCodec, MAX_DATAGRAM_SIZE, encode_document, encode_float, encode_integer, encode_string,
    recv_any, recv_document, recv_float, recv_integer, recv_string,
    recv_value_from, send_document, send_float, send_integer, send_string, send_value,
    send_value_to,
};
pub use error::ProtocolError;
