use std::time::Duration;

use lspwire_frame::{FrameError, Id, ResponseError};

/// Errors returned by connection, dispatch, and handshake operations.
///
/// Per-call variants carry the method name and, once one was allocated, the
/// request id.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The byte stream failed or carried a malformed message. Fatal to the connection.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Request parameters could not be serialized. Nothing was sent.
    #[error("failed to encode params for {method}: {source}")]
    Encoding {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// A successful result did not decode into the requested type.
    #[error("failed to decode result of {method}: {source}")]
    Decoding {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// The peer answered with an error object.
    #[error("{method} (id {id}) failed: {error}")]
    Remote {
        method: String,
        id: Id,
        error: ResponseError,
    },

    /// The connection terminated before the call could complete.
    #[error("connection closed")]
    ConnectionClosed,

    /// The caller cancelled the operation.
    #[error("{method} cancelled")]
    Cancelled { method: String, id: Option<Id> },

    /// The call deadline elapsed before a response arrived.
    #[error("{method} (id {id}) timed out after {after:?}")]
    Timeout {
        method: String,
        id: Id,
        after: Duration,
    },

    /// Ordinary traffic attempted before the handshake completed.
    #[error("{method} rejected: connection not initialized")]
    NotInitialized { method: String },

    /// The handshake failed permanently.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// `run` was invoked more than once on the same connection.
    #[error("dispatch loop already running")]
    AlreadyRunning,
}

impl RpcError {
    /// Remote error object, if the peer answered with one.
    pub fn response_error(&self) -> Option<&ResponseError> {
        match self {
            RpcError::Remote { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Whether the connection can no longer carry traffic.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, RpcError::Frame(_) | RpcError::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
