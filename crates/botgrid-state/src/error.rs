//! Error types shared by every BotGrid crate.

use thiserror::Error;

/// Result type alias for store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Result type alias for workload management operations.
pub type GridResult<T> = Result<T, GridError>;

/// Errors raised by the persistence layer (content, archive, shared stores).
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for StateError {
    fn from(e: std::io::Error) -> Self {
        StateError::Io(e.to_string())
    }
}

/// Errors surfaced to the API layer that owns workload management.
///
/// Only failures the caller must react to are represented here. Mount
/// failures and best-effort side effects are converted into health state
/// and log lines instead.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(
        "workload {workload_id}: supported languages must include the default language \"{default_language}\""
    )]
    ConfigurationInvariant {
        workload_id: String,
        default_language: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GridError {
    pub fn validation(msg: impl Into<String>) -> Self {
        GridError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        GridError::NotFound(msg.into())
    }
}
