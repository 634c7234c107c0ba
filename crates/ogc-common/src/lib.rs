//! Common types and utilities shared across the feature query core.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod geometry;
pub mod time;

pub use bbox::BoundingBox;
pub use crs::{AxisOrder, CrsCode};
pub use error::{OgcError, OgcResult};
pub use geometry::{Geometry, Position};
pub use time::{DateTimeFilter, TimeInterval};
