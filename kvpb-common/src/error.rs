//! # Codec Errors
//!
//! Failures produced by the pure frame/message transforms. They carry no I/O
//! state; the client crate folds them into its own error type.

use thiserror::Error;

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The outgoing message could not be serialized (e.g. a required field
    /// is missing).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The response payload could not be deserialized into the target type.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The frame body was empty, so no opcode could be read.
    #[error("invalid response code")]
    InvalidResponseCode,

    /// The server answered with the reserved error response.
    #[error("server error: {0}")]
    Server(String),
}
