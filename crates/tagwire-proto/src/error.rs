//! Error types for protocol operations

use std::io;
use thiserror::Error;
use crate::frame::ValueKind;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Tag on the wire does not match the type the caller asked for
    #[error("Type mismatch: expected {expected}, found tag {found}")]
    TypeMismatch {
        /// Type the caller expected
        expected: ValueKind,
        /// Raw tag byte read from the wire
        found: u8,
    },

    /// Length field disagrees with the fixed width of the type
    #[error("Length mismatch for {kind}: expected {expected} bytes, found {found}")]
    LengthMismatch {
        /// Type whose width was violated
        kind: ValueKind,
        /// Width the type requires
        expected: u32,
        /// Length declared on the wire
        found: u32,
    },

    /// Tag does not name any known type
    #[error("Unknown type tag: {0}")]
    UnknownType(u8),

    /// Peer closed before a field completed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Transport write failed; the frame may be partially written
    #[error("Send failure: {0}")]
    SendFailure(#[source] io::Error),

    /// Transport read failed
    #[error("Receive failure: {0}")]
    ReceiveFailure(#[source] io::Error),

    /// Document payload could not be parsed or printed
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Declared payload exceeds the configured bound
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },
}

impl ProtocolError {
    /// Classify an I/O error raised while reading a frame.
    ///
    /// End-of-file in the middle of a field means the peer went away, every
    /// other failure is reported as a receive failure.
    pub fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::ConnectionClosed,
            _ => Self::ReceiveFailure(err),
        }
    }

    /// Classify an I/O error raised while writing a frame
    pub fn from_write(err: io::Error) -> Self {
        Self::SendFailure(err)
    }

    /// Whether the error only means the peer has gone away
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    /// Whether the error leaves a stream out of sync with its peer.
    ///
    /// After any of these the next bytes on the stream can no longer be
    /// trusted to start a frame.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            Self::TypeMismatch { .. }
                | Self::LengthMismatch { .. }
                | Self::UnknownType(_)
                | Self::FrameTooLarge { .. }
                | Self::SendFailure(_)
        )
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidDocument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_classification() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(ProtocolError::from_read(eof).is_closed());

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            ProtocolError::from_read(reset),
            ProtocolError::ReceiveFailure(_)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::LengthMismatch {
            kind: ValueKind::Integer,
            expected: 4,
            found: 8,
        };
        assert_eq!(
            err.to_string(),
            "Length mismatch for integer: expected 4 bytes, found 8"
        );
        assert!(err.is_desync());
        assert!(!ProtocolError::ConnectionClosed.is_desync());
    }
}
