//! Error types for the messaging subsystem.

use thiserror::Error;

use crate::dm::core::conversation::ConversationStatus;
use crate::dm::core::ids::ConversationId;

/// Messaging subsystem error type.
///
/// Every failure an operation can produce is an expected, typed outcome;
/// nothing in this subsystem panics on bad input or a lost storage call.
#[derive(Debug, Error)]
pub enum DmError {
    /// No resolvable calling party (missing or unknown credentials).
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Referenced conversation or party does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Acting party is not allowed to perform this action.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Malformed or unacceptable input (empty content, self-messaging, bad ids).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A conversation already exists for this pair of parties.
    ///
    /// Carries the winner so the caller can redirect into the existing
    /// thread instead of treating this as a hard failure.
    #[error("a conversation with this party already exists")]
    ConversationAlreadyExists {
        /// Identifier of the existing conversation.
        id: ConversationId,
        /// Current status of the existing conversation.
        status: ConversationStatus,
    },
    /// Action not permitted in the conversation's current state.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),
    /// Caller exceeded the allowed rate for this action.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    /// `SQLite` storage error (sync). Retryable by the caller.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async). Retryable by the caller.
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DmError {
    /// Whether retrying the same call may succeed without any other change.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Sqlite(_) | Self::TokioSqlite(_))
    }
}

/// Convenience result alias for messaging operations.
pub type DmResult<T> = Result<T, DmError>;
