//! Error types for buswire.

use thiserror::Error;

/// Main error type for all bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus address is missing, malformed, or names an unsupported
    /// transport.
    #[error("bad bus address: {0}")]
    Address(String),

    /// The server rejected the authentication exchange.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream.
    #[error("connection closed")]
    Disconnected,

    /// A frame violated the wire format or a protocol rule. Reported per
    /// occurrence; does not tear down the connection.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// An incoming call targeted an object path nothing is exported at.
    #[error("no object exported at {0}")]
    UnknownObject(String),

    /// The remote peer answered a call with an ERROR message.
    #[error("remote error {name}: {message}")]
    Remote { name: String, message: String },

    /// The connection was torn down while a reply was still pending.
    #[error("pending reply dropped")]
    ReplyDropped,
}

/// Result type alias using BusError.
pub type Result<T> = std::result::Result<T, BusError>;
