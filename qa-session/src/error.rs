//! Error types for the chat session core.

use thiserror::Error;

/// Request-level failure kinds returned by [`crate::ChatSessionManager`].
///
/// Variants carry enough detail for logs; callers facing end users should
/// render [`SessionError::public_message`] instead of `Display`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No chat session found for user {user_id}")]
    NoSessionFound { user_id: String },

    #[error("Remote store unavailable for user {user_id}: {reason}")]
    UpstreamUnavailable { user_id: String, reason: String },

    #[error("Corrupt snapshot for user {user_id}: {reason}")]
    CorruptSnapshot { user_id: String, reason: String },

    #[error("QA processing failed for user {user_id}: {reason}")]
    Processing { user_id: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

impl SessionError {
    /// HTTP-equivalent status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NoSessionFound { .. } => 404,
            _ => 500,
        }
    }

    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_REQUEST",
            Self::NoSessionFound { .. } => "NO_SESSION_FOUND",
            Self::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            Self::CorruptSnapshot { .. } => "CORRUPT_SNAPSHOT",
            Self::Processing { .. } => "PROCESSING_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Generic message safe to show to callers. Underlying causes stay in logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::NoSessionFound { .. } => "No chat session found for this user_id".to_string(),
            Self::UpstreamUnavailable { .. } => "Session storage is currently unavailable".to_string(),
            Self::CorruptSnapshot { .. } => "Stored session state could not be read".to_string(),
            Self::Processing { .. } => "Failed to process chat".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }
}
