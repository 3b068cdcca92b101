//! Server error types.

use std::net::SocketAddr;

use callstate_sessions::SessionError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur during server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Frame was not a well-formed request.
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    /// No handler for the method.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Parameters did not match the method's argument type.
    #[error("invalid params for {method}: {source}")]
    InvalidParams {
        method: String,
        source: serde_json::Error,
    },

    /// Session layer error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Bind failed.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Frame exceeded the size limit.
    #[error("frame exceeds {0} byte limit")]
    FrameTooLarge(usize),

    /// Blocking handler task did not complete.
    #[error("handler task failed: {0}")]
    Handler(String),
}

impl ServerError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "MALFORMED_REQUEST",
            Self::UnknownMethod(_) => "UNKNOWN_METHOD",
            Self::InvalidParams { .. } => "INVALID_PARAMS",
            Self::Session(e) => e.code(),
            Self::FrameTooLarge(_) => "FRAME_TOO_LARGE",
            Self::Io(_) | Self::BindFailed { .. } | Self::Handler(_) => "INTERNAL_ERROR",
        }
    }
}
