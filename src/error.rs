//! Error types for cluster-rpc.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for all client operations.
///
/// Cloneable so that a single terminal error can be handed to every call
/// still pending when the connection goes away.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(Arc<rmp_serde::encode::Error>),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(Arc<rmp_serde::decode::Error>),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// Receive buffer holds no bytes.
    #[error("empty buffer")]
    EmptyBuffer,

    /// Receive buffer holds less than one complete frame.
    #[error("buffer length less than response length")]
    TruncatedBuffer,

    /// Incoming frame declares a payload larger than the configured limit.
    #[error("frame payload of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Outgoing request payload is larger than the configured limit.
    #[error("request too long: {size} bytes, maximum {max}")]
    RequestTooLong { size: usize, max: usize },

    /// Protocol violation (malformed length prefix, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection is closed or closing.
    #[error("connection is shut down")]
    Shutdown,

    /// The peer closed the stream while the client was still in use.
    #[error("unexpected EOF")]
    UnexpectedEof,

    /// Error string reported by the remote service.
    #[error("{0}")]
    Remote(String),

    /// A completion channel without buffer space was passed to `go`.
    #[error("done channel is unbuffered")]
    UnbufferedDone,
}

impl RpcError {
    /// True for the two "wait for more bytes" signals of the decoder.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, RpcError::EmptyBuffer | RpcError::TruncatedBuffer)
    }

    /// True when the error was reported by the remote service.
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote(_))
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Io(Arc::new(err))
    }
}

impl From<rmp_serde::encode::Error> for RpcError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RpcError::MsgPackEncode(Arc::new(err))
    }
}

impl From<rmp_serde::decode::Error> for RpcError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RpcError::MsgPackDecode(Arc::new(err))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json(Arc::new(err))
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
