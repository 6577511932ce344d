//! Error types for the status client

use std::time::Duration;
use thiserror::Error;

/// Result type alias for status client operations
pub type Result<T> = std::result::Result<T, StatusError>;

#[derive(Debug, Error)]
pub enum StatusError {
    /// Socket-level failure
    #[error("ZeroMQ error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    /// Payload is not a valid container
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// No ping acknowledgement within the handshake timeout
    #[error("No ping acknowledgement within {0:?}")]
    HandshakeTimeout(Duration),

    /// The peer answered the ping with something else
    #[error("Unexpected handshake reply: message type {0}")]
    UnexpectedReply(i32),

    /// A multipart message did not have the expected frames
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The channel to the status service is closed
    #[error("Status channel closed")]
    Closed,
}
