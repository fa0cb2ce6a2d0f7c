use thiserror::Error;

use crate::models::{DeviceId, SessionId, SyncStatus};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stream token expired")]
    TokenExpired,

    #[error("Stream token signature mismatch")]
    BadSignature,

    #[error("Range not satisfiable for resource of {total} bytes")]
    RangeNotSatisfiable { total: u64 },

    #[error("Replica not found: session {session_id}, device {device_id}")]
    ReplicaNotFound {
        session_id: SessionId,
        device_id: DeviceId,
    },

    #[error("Failed to fetch playback session {session_id}: {reason}")]
    SessionFetchFailed {
        session_id: SessionId,
        reason: String,
    },

    #[error("No active conflict on session {session_id}, device {device_id}")]
    NoActiveConflict {
        session_id: SessionId,
        device_id: DeviceId,
    },

    #[error("Invalid sync status transition: {from} -> {to}")]
    InvalidStateTransition { from: SyncStatus, to: SyncStatus },

    #[error("Message delivery failed: {0}")]
    Messaging(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Token failures are indistinguishable to HTTP callers
    #[must_use]
    pub const fn is_token_error(&self) -> bool {
        matches!(self, Self::TokenExpired | Self::BadSignature)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // PostgreSQL unique_violation
                    "23505" => Self::AlreadyExists("Replica already exists".to_string()),
                    // PostgreSQL check_violation
                    "23514" => Self::InvalidInput("Constraint check failed".to_string()),
                    // PostgreSQL not_null_violation
                    "23502" => Self::InvalidInput("Required field is missing".to_string()),
                    _ => Self::Database(err),
                }
            }
            _ => Self::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
