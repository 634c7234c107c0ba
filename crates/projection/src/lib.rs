//! Coordinate reference system transformations.
//!
//! Implements the supported map projections from scratch. Every transform
//! pivots through WGS84 geodetic longitude/latitude; coordinates enter and
//! leave in the authority axis order of their CRS.

pub mod ellipsoid;
pub mod error;
pub mod mercator;
pub mod transform;
pub mod transverse_mercator;

pub use error::ProjectionError;
pub use transform::{reproject_bbox, reproject_geometry, CrsTransform};
pub use transverse_mercator::TransverseMercator;
