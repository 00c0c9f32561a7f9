//! Top-level error types.

use thiserror::Error;

use crate::connection::ConnectionKind;
use crate::transport::{PacketError, TransportError};

/// Errors returned by connection operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The transport reported a failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A packet could not be encoded or decoded.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// The handshake did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The operation does not apply to this kind of connection.
    #[error("{operation} is not supported on a {kind:?} connection")]
    WrongKind {
        /// Name of the rejected operation.
        operation: &'static str,
        /// Kind of the connection it was attempted on.
        kind: ConnectionKind,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ConnectionError {
    /// Check if this error closed the connection it was reported on.
    pub fn is_fatal(&self) -> bool {
        match self {
            ConnectionError::Transport(_) | ConnectionError::Closed => true,
            ConnectionError::Packet(e) => e.is_desync(),
            _ => false,
        }
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;
