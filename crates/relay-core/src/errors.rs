//! Protocol error types.

use thiserror::Error;

/// Reasons an inbound frame is rejected.
///
/// None of these terminate the connection: the frame is logged and discarded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON, named an unknown event, or was missing
    /// a required payload field.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A `userId`, `from`, or `to` value was the empty string.
    #[error("identity must not be empty")]
    EmptyIdentity,
}

/// Result type for protocol decoding.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Why a frame could not be queued for a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The connection's outbound queue is at capacity.
    #[error("outbound queue full")]
    Full,
    /// The connection's writer has gone away.
    #[error("connection closed")]
    Closed,
}
