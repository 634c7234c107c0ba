//! Error types for process execution and job persistence.

use ogc_common::OgcError;
use thiserror::Error;

/// Why a process run did not produce outputs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProcessError {
    /// Inputs the process cannot work with.
    #[error("Invalid input '{name}': {message}")]
    InvalidInput { name: String, message: String },

    /// The run observed its cancellation signal.
    #[error("Execution cancelled")]
    Cancelled,

    /// The process panicked.
    #[error("Process panicked: {0}")]
    Panicked(String),

    #[error("Execution failed: {0}")]
    Failed(String),
}

impl ProcessError {
    pub fn invalid_input(name: impl Into<String>, message: impl Into<String>) -> Self {
        ProcessError::InvalidInput {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Job store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job '{0}' already exists")]
    Duplicate(String),

    #[error("Job '{0}' does not exist")]
    Missing(String),

    /// A persisted record that cannot be read back.
    #[error("Corrupt job record '{id}': {message}")]
    Corrupt { id: String, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for OgcError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(id) => OgcError::Conflict(format!("job '{}' already exists", id)),
            StoreError::Missing(id) => OgcError::NotFound(format!("job '{}'", id)),
            StoreError::Database(e @ (sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))) => {
                OgcError::BackendUnavailable(format!("job store: {}", e))
            }
            other => OgcError::Internal(other.to_string()),
        }
    }
}
