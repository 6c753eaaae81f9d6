use std::time::Duration;

use thiserror::Error;

use crate::rpc::types::ErrorObject;

/// Failures of the `Content-Length` framing layer.
///
/// Any of these ends the read loop of the connection that hit it.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The stream ended cleanly between two messages.
    #[error("stream closed")]
    Closed,

    /// The stream ended inside a header block or payload.
    #[error("stream closed mid-message")]
    Truncated,

    #[error("missing Content-Length header")]
    MissingLength,

    #[error("invalid Content-Length value: {0}")]
    InvalidLength(String),

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("message size {size} exceeds maximum {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("header block exceeds maximum {max} bytes")]
    HeaderTooLarge { max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by [`Connection`](crate::rpc::connection::Connection) operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Fatal transport error (malformed header, mid-message EOF, broken pipe).
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A payload that is not a valid JSON-RPC 2.0 envelope.
    #[error("decode error: {0}")]
    Decode(String),

    /// Outbound params or results could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The peer answered with an `error` object.
    #[error("remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The caller's cancellation token fired before a response arrived.
    #[error("call cancelled")]
    Cancelled,

    /// No response arrived within the per-call deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was torn down before (or while) the call was pending.
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<ErrorObject> for RpcError {
    fn from(err: ErrorObject) -> Self {
        RpcError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_display() {
        let remote = RpcError::Remote {
            code: -32601,
            message: "method not found".to_string(),
            data: None,
        };
        assert_eq!(remote.to_string(), "remote error -32601: method not found");
        assert_eq!(RpcError::ConnectionClosed.to_string(), "connection closed");

        let framing: RpcError = FramingError::TooLarge { size: 10, max: 5 }.into();
        assert_eq!(
            framing.to_string(),
            "framing error: message size 10 exceeds maximum 5 bytes"
        );
    }

    #[test]
    fn test_rpc_error_from_error_object() {
        let obj = ErrorObject {
            code: -32000,
            message: "boom".to_string(),
            data: Some(serde_json::json!({"detail": 1})),
        };
        match RpcError::from(obj) {
            RpcError::Remote {
                code,
                message,
                data,
            } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "boom");
                assert!(data.is_some());
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }
}
