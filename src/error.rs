//! Error types for the handshake and frame codec

use std::fmt;
use std::io;

/// Result type alias for WebSocket operations
pub type Result<T> = std::result::Result<T, Error>;

/// WebSocket error types
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying transport
    Io(io::Error),
    /// Handshake request could not be read as HTTP
    InvalidHttp(&'static str),
    /// Handshake request was readable but not acceptable
    HandshakeFailed(&'static str),
    /// Invalid WebSocket frame
    InvalidFrame(&'static str),
    /// Protocol violation
    Protocol(&'static str),
    /// Declared payload exceeds the configured maximum
    FrameTooLarge,
    /// Operation not allowed in the current connection phase
    InvalidState(&'static str),
    /// Connection closed
    ConnectionClosed,
    /// Connection reset by peer
    ConnectionReset,
    /// Would block (non-blocking I/O)
    WouldBlock,
    /// No connection registered under this id
    UnknownConnection(u64),
}

impl Error {
    /// Whether this error came out of the handshake phase
    pub fn is_handshake(&self) -> bool {
        matches!(self, Error::InvalidHttp(_) | Error::HandshakeFailed(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::InvalidHttp(msg) => write!(f, "Invalid HTTP: {}", msg),
            Error::HandshakeFailed(msg) => write!(f, "Handshake failed: {}", msg),
            Error::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::FrameTooLarge => write!(f, "Frame too large"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::ConnectionReset => write!(f, "Connection reset by peer"),
            Error::WouldBlock => write!(f, "Would block"),
            Error::UnknownConnection(id) => write!(f, "Unknown connection: {}", id),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => Error::WouldBlock,
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::WouldBlock => io::Error::new(io::ErrorKind::WouldBlock, "would block"),
            Error::ConnectionReset => {
                io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")
            }
            Error::ConnectionClosed => {
                io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
            }
            other => io::Error::other(other.to_string()),
        }
    }
}
