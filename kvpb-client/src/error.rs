//! # Client Errors
//!
//! One error type for every layer above the codec. Variants follow the
//! failure taxonomy of the driver: connection faults close the socket and
//! are retryable, payload faults are not, pool faults are surfaced as-is.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use kvpb_common::CodecError;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
///
/// The type is `Clone` so the terminal error of an operation can be recorded
/// in its `Profile` and returned to the caller at the same time; I/O errors
/// are shared behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The socket could not be (re)established.
    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// Writing a request frame failed.
    #[error("write failed: {0}")]
    Write(#[source] Arc<io::Error>),

    /// Reading a response frame failed (including read deadlines).
    #[error("read failed: {0}")]
    Read(#[source] Arc<io::Error>),

    /// Fewer than 4 length bytes arrived before the stream ended.
    #[error("invalid response header")]
    InvalidResponseHeader,

    /// The stream ended before the declared body length was read.
    #[error("incomplete response body: expected {expected} bytes")]
    IncompleteResponseBody { expected: usize },

    /// The declared body length exceeds the configured frame limit.
    #[error("response of {len} bytes exceeds limit of {max}")]
    ResponseTooLarge { len: usize, max: usize },

    /// The response frame had no opcode byte.
    #[error("invalid response code")]
    InvalidResponseCode,

    /// The request message could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The response payload could not be deserialized.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The server rejected the operation.
    #[error("server error: {0}")]
    Server(String),

    /// The pool is shutting down.
    #[error("pool closing")]
    PoolClosing,

    /// No connection became available within the pool wait timeout.
    #[error("pool wait timed out")]
    PoolWaitTimeout,
}

impl ClientError {
    pub(crate) fn dial(addr: &str, err: io::Error) -> Self {
        ClientError::Dial {
            addr: addr.to_string(),
            source: Arc::new(err),
        }
    }

    pub(crate) fn write(err: io::Error) -> Self {
        ClientError::Write(Arc::new(err))
    }

    pub(crate) fn read(err: io::Error) -> Self {
        ClientError::Read(Arc::new(err))
    }

    /// Returns true when re-running the whole exchange could succeed.
    ///
    /// Malformed requests and responses will fail the same way every time,
    /// and a closing pool never hands out another connection.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ClientError::Serialization(_) | ClientError::Deserialization(_) | ClientError::PoolClosing
        )
    }

    /// Returns true when the failure happened on the socket or in framing,
    /// i.e. the connection was closed because its state is unknown.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            ClientError::Dial { .. }
                | ClientError::Write(_)
                | ClientError::Read(_)
                | ClientError::InvalidResponseHeader
                | ClientError::IncompleteResponseBody { .. }
                | ClientError::ResponseTooLarge { .. }
        )
    }

    /// Returns true for timeouts at the socket layer.
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::Read(err) | ClientError::Write(err) => matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            ClientError::Dial { source, .. } => source.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Serialization(msg) => ClientError::Serialization(msg),
            CodecError::Deserialization(msg) => ClientError::Deserialization(msg),
            CodecError::InvalidResponseCode => ClientError::InvalidResponseCode,
            CodecError::Server(msg) => ClientError::Server(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_errors_are_not_retryable() {
        assert!(!ClientError::Serialization("x".into()).is_retryable());
        assert!(!ClientError::Deserialization("x".into()).is_retryable());
        assert!(ClientError::Server("busy".into()).is_retryable());
        assert!(ClientError::PoolWaitTimeout.is_retryable());
        assert!(!ClientError::PoolClosing.is_retryable());
        assert!(ClientError::read(io::Error::from(io::ErrorKind::ConnectionReset)).is_retryable());
    }

    #[test]
    fn connection_faults() {
        assert!(ClientError::InvalidResponseHeader.is_connection_fault());
        assert!(ClientError::IncompleteResponseBody { expected: 3 }.is_connection_fault());
        assert!(ClientError::dial("127.0.0.1:1", io::Error::from(io::ErrorKind::ConnectionRefused))
            .is_connection_fault());
        assert!(!ClientError::Server("nope".into()).is_connection_fault());
        assert!(!ClientError::PoolClosing.is_connection_fault());
    }

    #[test]
    fn codec_errors_map_one_to_one() {
        assert!(matches!(
            ClientError::from(CodecError::Server("bad".into())),
            ClientError::Server(ref msg) if msg == "bad"
        ));
        assert!(matches!(
            ClientError::from(CodecError::InvalidResponseCode),
            ClientError::InvalidResponseCode
        ));
    }

    #[test]
    fn timeouts_are_detected() {
        assert!(ClientError::read(io::Error::from(io::ErrorKind::WouldBlock)).is_timeout());
        assert!(ClientError::write(io::Error::from(io::ErrorKind::TimedOut)).is_timeout());
        assert!(!ClientError::read(io::Error::from(io::ErrorKind::BrokenPipe)).is_timeout());
    }

    #[test]
    fn display_includes_address() {
        let err = ClientError::dial("10.0.0.1:8087", io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(err.to_string().starts_with("dial 10.0.0.1:8087 failed"));
    }
}
