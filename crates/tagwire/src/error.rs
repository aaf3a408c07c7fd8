//! Error types for the Tagwire library

use crate::registry::ConnectionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use tagwire_net::TransportError;
use tagwire_proto::ProtocolError;
use thiserror::Error;

/// Main error type for Tagwire operations
#[derive(Debug, Error)]
pub enum NetError {
    /// Transport-related errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Write to a connection failed
    #[error("Send to {conn} failed: {source}")]
    Send {
        /// Connection written to
        conn: ConnectionId,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Receive on a connection failed
    #[error("Receive on {conn} failed: {source}")]
    Receive {
        /// Connection read from
        conn: ConnectionId,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Accepting a pending peer failed
    #[error("Accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Operation is not valid in the session's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller passed an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No such connection in the registry
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NetError {
    /// Taxonomy code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(err) => match err {
                TransportError::SocketCreate(_) => ErrorCode::SocketCreateFailure,
                TransportError::Bind { .. } => ErrorCode::BindFailure,
                TransportError::Listen(_) => ErrorCode::ListenFailure,
                TransportError::Accept(_) => ErrorCode::AcceptFailure,
                TransportError::Connect { .. } => ErrorCode::ConnectFailure,
                TransportError::Timeout(_) => ErrorCode::Timeout,
                TransportError::InvalidAddress(_) => ErrorCode::InvalidArgument,
                TransportError::Unsupported(_) => ErrorCode::InvalidState,
                TransportError::Io(e) => ErrorCode::from_io(e, ErrorCode::Unknown),
            },
            Self::Protocol(err) => match err {
                ProtocolError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
                ProtocolError::LengthMismatch { .. } => ErrorCode::LengthMismatch,
                ProtocolError::UnknownType(_) => ErrorCode::UnknownType,
                ProtocolError::ConnectionClosed => ErrorCode::ConnectionClosed,
                ProtocolError::SendFailure(e) => ErrorCode::from_io(e, ErrorCode::SendFailure),
                ProtocolError::ReceiveFailure(e) => ErrorCode::from_io(e, ErrorCode::ReceiveFailure),
                ProtocolError::InvalidDocument(_) => ErrorCode::InvalidDocument,
                ProtocolError::FrameTooLarge { .. } => ErrorCode::FrameTooLarge,
            },
            Self::Send { source, .. } => ErrorCode::from_io(source, ErrorCode::SendFailure),
            Self::Receive { source, .. } => ErrorCode::from_io(source, ErrorCode::ReceiveFailure),
            Self::Accept(e) => ErrorCode::from_io(e, ErrorCode::AcceptFailure),
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::InvalidArgument(_) | Self::UnknownConnection(_) => ErrorCode::InvalidArgument,
            Self::Io(e) => ErrorCode::from_io(e, ErrorCode::Unknown),
        }
    }

    /// Whether the error only reports a peer that went away
    pub fn is_closed(&self) -> bool {
        self.code() == ErrorCode::ConnectionClosed
    }
}

/// Error taxonomy recorded as the session's last error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Socket could not be created
    SocketCreateFailure,
    /// Socket could not be bound
    BindFailure,
    /// Socket could not listen
    ListenFailure,
    /// Pending peer could not be accepted
    AcceptFailure,
    /// Outbound connection failed
    ConnectFailure,
    /// Write failed
    SendFailure,
    /// Read failed
    ReceiveFailure,
    /// Operation timed out
    Timeout,
    /// Unusable argument
    InvalidArgument,
    /// Operation not valid in the current state
    InvalidState,
    /// Frame carried a different type than expected
    TypeMismatch,
    /// Fixed-width frame declared the wrong length
    LengthMismatch,
    /// Frame tag names no known type
    UnknownType,
    /// Peer closed mid-frame
    ConnectionClosed,
    /// Document payload did not parse
    InvalidDocument,
    /// Declared payload above the configured bound
    FrameTooLarge,
    /// Anything else
    Unknown,
}

impl ErrorCode {
    /// Classify an I/O error, falling back to `context` for ordinary failures
    pub fn from_io(err: &io::Error, context: ErrorCode) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            io::ErrorKind::InvalidInput => Self::InvalidArgument,
            _ => context,
        }
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            Self::SocketCreateFailure => "failed to create socket",
            Self::BindFailure => "failed to bind socket",
            Self::ListenFailure => "failed to listen on socket",
            Self::AcceptFailure => "failed to accept connection",
            Self::ConnectFailure => "failed to connect",
            Self::SendFailure => "failed to send data",
            Self::ReceiveFailure => "failed to receive data",
            Self::Timeout => "operation timed out",
            Self::InvalidArgument => "invalid argument",
            Self::InvalidState => "invalid state for operation",
            Self::TypeMismatch => "frame type mismatch",
            Self::LengthMismatch => "frame length mismatch",
            Self::UnknownType => "unknown frame type",
            Self::ConnectionClosed => "connection closed by peer",
            Self::InvalidDocument => "invalid document payload",
            Self::FrameTooLarge => "frame too large",
            Self::Unknown => "unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Most recent failure recorded by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// Taxonomy code
    pub code: ErrorCode,
    /// Full error message
    pub message: String,
    /// Connection involved, if any
    pub conn: Option<ConnectionId>,
}

impl LastError {
    /// Capture an error
    pub fn new(err: &NetError, conn: Option<ConnectionId>) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            conn,
        }
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.conn {
            Some(conn) => write!(f, "{} on {}: {}", self.code, conn, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}
