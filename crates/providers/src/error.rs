//! Adapter-level errors.

use ogc_common::OgcError;
use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Connectivity or server-side failure; retryable by the caller.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something that is not a feature response.
    #[error("malformed backend response: {0}")]
    Malformed(String),

    /// A write collided with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request cannot be expressed against this backend.
    #[error("unsupported request: {0}")]
    Unsupported(String),

    /// Invalid adapter configuration.
    #[error("invalid provider configuration: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        ProviderError::Unavailable(format!("{}: {}", context, err))
    }
}

impl From<ProviderError> for OgcError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(msg) | ProviderError::Malformed(msg) => {
                OgcError::BackendUnavailable(msg)
            }
            ProviderError::Conflict(msg) => OgcError::Conflict(msg),
            ProviderError::Unsupported(msg) => OgcError::Validation(msg),
            ProviderError::Config(msg) => OgcError::Internal(msg),
        }
    }
}

impl From<sqlx::Error> for ProviderError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ProviderError::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.code().map_or(false, |c| is_rejected_statement(&c)) => {
                ProviderError::Unsupported(db.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                ProviderError::Malformed(err.to_string())
            }
            _ => ProviderError::Unavailable(format!("database error: {}", err)),
        }
    }
}

/// SQLSTATE classes for statements the server refused to evaluate: data
/// exceptions (22) and type or name errors (42). Retrying cannot help.
fn is_rejected_statement(code: &str) -> bool {
    code.starts_with("22") || code.starts_with("42")
}

impl From<redis::RedisError> for ProviderError {
    fn from(err: redis::RedisError) -> Self {
        ProviderError::Unavailable(format!("redis error: {}", err))
    }
}

impl From<object_store::Error> for ProviderError {
    fn from(err: object_store::Error) -> Self {
        ProviderError::Unavailable(format!("object store error: {}", err))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Unavailable(format!("remote service error: {}", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_to_ogc_error() {
        let err: OgcError = ProviderError::Unavailable("down".into()).into();
        assert!(err.is_retryable());

        let err: OgcError = ProviderError::Conflict("exists".into()).into();
        assert_eq!(err.http_status_code(), 409);

        let err: OgcError = ProviderError::Unsupported("no".into()).into();
        assert!(matches!(err, OgcError::Validation(_)));
    }

    #[test]
    fn test_rejected_statement_codes() {
        // undefined_function, datatype_mismatch, invalid_text_representation
        assert!(is_rejected_statement("42883"));
        assert!(is_rejected_statement("42804"));
        assert!(is_rejected_statement("22P02"));
        // connection_failure, serialization_failure, sqlite's generic code
        assert!(!is_rejected_statement("08006"));
        assert!(!is_rejected_statement("40001"));
        assert!(!is_rejected_statement("1"));
    }
}
