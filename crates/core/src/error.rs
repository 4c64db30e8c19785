use thiserror::Error;

/// Errors shared by every storage backend (in-memory and PostgreSQL).
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique constraint rejected the write. Callers that arbitrate on
    /// uniqueness (job admission) react to this instead of pre-checking.
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}

/// Errors produced while interpreting a subject URL.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubjectError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("not a work or series URL: {0}")]
    Unrecognised(String),

    #[error("invalid subject key: {0}")]
    InvalidKey(String),
}
