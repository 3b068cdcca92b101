//! Session error types.

use callstate_types::{SessionKey, TypesError};
use thiserror::Error;

use crate::billing::BillingError;
use crate::replication::TransportError;
use crate::session::SessionState;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A field needed to derive the session key is absent or empty.
    #[error("missing identity field: {0}")]
    MissingIdentity(&'static str),

    /// The session is not active on this node.
    #[error("session not found: {0}")]
    SessionNotFound(SessionKey),

    /// A query or promotion matched nothing.
    #[error("not found")]
    NotFound,

    /// Bulk replication reached only some of its targets.
    #[error("partial replication: {} succeeded, failed: {}", succeeded.len(), failed.join("; "))]
    PartialReplication {
        succeeded: Vec<String>,
        failed: Vec<String>,
    },

    /// The requested state change is not an edge of the lifecycle.
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// Event attribute could not be interpreted.
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] TypesError),

    /// Malformed request arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Billing collaborator failure.
    #[error("billing error: {0}")]
    Billing(#[from] BillingError),

    /// Peer call failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Internal invariant failure (poisoned lock, worker spawn).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Stable code identifying the error kind across process boundaries.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingIdentity(_) => "MISSING_IDENTITY",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::NotFound => "NOT_FOUND",
            Self::PartialReplication { .. } => "PARTIAL_REPLICATION",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::InvalidEvent(_) => "INVALID_EVENT",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Billing(_) => "BILLING_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn lock_poisoned() -> Self {
        Self::Internal("lock poisoned".to_string())
    }
}
