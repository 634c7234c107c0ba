//! Projection errors.

use ogc_common::{CrsCode, OgcError};
use thiserror::Error;

/// Errors raised by coordinate transforms. Never swallowed into
/// untransformed output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    /// The coordinate lies outside the domain of the projection.
    #[error("coordinate ({x}, {y}) is outside the domain of {crs}")]
    OutOfDomain { crs: CrsCode, x: f64, y: f64 },

    /// The inverse projection did not converge.
    #[error("inverse projection for {crs} did not converge")]
    NoConvergence { crs: CrsCode },
}

impl From<ProjectionError> for OgcError {
    fn from(err: ProjectionError) -> Self {
        OgcError::UnsupportedCrs(err.to_string())
    }
}
