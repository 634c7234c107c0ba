//! Error taxonomy shared by the query path and the job engine.

use thiserror::Error;

/// Result type alias using OgcError.
pub type OgcResult<T> = Result<T, OgcError>;

/// Primary error type for query and process operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OgcError {
    // === Request Errors ===
    /// Query rejected before any backend is touched.
    #[error("Invalid query: {0}")]
    Validation(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    // === Backend Errors ===
    /// Transient backend failure. Retryable by the caller, never retried internally.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A single stored record could not be decoded.
    #[error("Malformed record '{id}': {message}")]
    DataIntegrity { id: String, message: String },

    // === Resource / Job Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Result not ready: {0}")]
    ResultNotReady(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OgcError {
    /// Shorthand for an [`OgcError::InvalidParameter`].
    pub fn invalid_parameter(param: impl Into<String>, message: impl Into<String>) -> Self {
        OgcError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OgcError::BackendUnavailable(_) | OgcError::Timeout(_))
    }

    /// Get the OGC API exception type for this error.
    pub fn ogc_exception_code(&self) -> &'static str {
        match self {
            OgcError::Validation(_) => "InvalidQuery",
            OgcError::InvalidParameter { .. } => "InvalidParameterValue",
            OgcError::UnsupportedCrs(_) => "InvalidCRS",
            OgcError::BackendUnavailable(_) => "BackendUnavailable",
            OgcError::DataIntegrity { .. } => "DataIntegrity",
            OgcError::NotFound(_) => "NotFound",
            OgcError::ResultNotReady(_) => "ResultNotReady",
            OgcError::Conflict(_) => "Conflict",
            OgcError::Timeout(_) => "Timeout",
            OgcError::Internal(_) => "NoApplicableCode",
        }
    }

    /// Get the HTTP status code a transport layer should use for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            OgcError::Validation(_)
            | OgcError::InvalidParameter { .. }
            | OgcError::UnsupportedCrs(_) => 400,

            OgcError::NotFound(_) | OgcError::ResultNotReady(_) => 404,
            OgcError::Conflict(_) => 409,

            OgcError::BackendUnavailable(_) => 503,
            OgcError::Timeout(_) => 504,

            OgcError::DataIntegrity { .. } | OgcError::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for OgcError {
    fn from(err: serde_json::Error) -> Self {
        OgcError::Internal(format!("JSON error: {}", err))
    }
}
