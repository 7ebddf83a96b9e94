// src/error.rs
// Domain error taxonomy shared by the state machine, stores and the ws layer.
// Exactly one boundary (the connection dispatch loop) converts these into
// `error` events; everything below returns them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed or unparseable inbound message. Reported to the sender; the
    /// connection stays open.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Role mismatch for an operation (e.g. client attempting recording
    /// control). Reported; connection stays open.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// The caller is not a participant of the session. The only error that
    /// rejects a connection outright.
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A lifecycle rule refused the operation (wrong status, cancellation
    /// window expired). Reported as a user-facing message, never retried.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Transient persistence failure. Logged and surfaced to the sender, not
    /// retried inside the event loop.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl SessionError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::AccessDenied(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state_conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    /// Stable machine-readable code carried on ws `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Authorization(_) => "AUTHORIZATION_ERROR",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::StateConflict(_) => "STATE_CONFLICT",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
