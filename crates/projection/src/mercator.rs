//! Mercator projections.
//!
//! - Web Mercator (EPSG:3857): spherical formulas applied to WGS84
//!   coordinates with R = a.
//! - World Mercator (EPSG:3395): true ellipsoidal Mercator on WGS84.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use ogc_common::CrsCode;

use crate::ellipsoid::{Ellipsoid, WGS84};
use crate::error::ProjectionError;

/// Latitude limit where Web Mercator northing reaches the square extent.
pub const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_6;

/// Half the side of the Web Mercator square, in meters.
pub const WEB_MERCATOR_EXTENT: f64 = 20_037_508.342_789_244;

/// Latitude limit accepted by World Mercator.
const WORLD_MERCATOR_MAX_LAT: f64 = 89.5;

const MAX_ITERATIONS: usize = 20;

/// Spherical (pseudo) Mercator.
#[derive(Debug, Clone, Copy)]
pub struct WebMercator {
    radius: f64,
}

impl Default for WebMercator {
    fn default() -> Self {
        Self { radius: WGS84.a }
    }
}

impl WebMercator {
    /// (lon, lat) degrees -> (x, y) meters.
    pub fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64), ProjectionError> {
        if !lon.is_finite() || !lat.is_finite() || lat.abs() > WEB_MERCATOR_MAX_LAT + 1e-9 {
            return Err(ProjectionError::OutOfDomain {
                crs: CrsCode::Epsg3857,
                x: lon,
                y: lat,
            });
        }
        let x = self.radius * lon.to_radians();
        let y = self.radius * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
        Ok((x, y))
    }

    /// (x, y) meters -> (lon, lat) degrees.
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::OutOfDomain {
                crs: CrsCode::Epsg3857,
                x,
                y,
            });
        }
        let lon = (x / self.radius).to_degrees();
        let lat = (2.0 * (y / self.radius).exp().atan() - FRAC_PI_2).to_degrees();
        Ok((lon, lat))
    }
}

/// Ellipsoidal Mercator.
#[derive(Debug, Clone, Copy)]
pub struct WorldMercator {
    ellipsoid: Ellipsoid,
}

impl Default for WorldMercator {
    fn default() -> Self {
        Self { ellipsoid: WGS84 }
    }
}

impl WorldMercator {
    /// (lon, lat) degrees -> (x, y) meters.
    pub fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64), ProjectionError> {
        if !lon.is_finite() || !lat.is_finite() || lat.abs() > WORLD_MERCATOR_MAX_LAT {
            return Err(ProjectionError::OutOfDomain {
                crs: CrsCode::Epsg3395,
                x: lon,
                y: lat,
            });
        }
        let a = self.ellipsoid.a;
        let e = self.ellipsoid.e();
        let phi = lat.to_radians();
        let con = e * phi.sin();
        let x = a * lon.to_radians();
        let y = a
            * ((FRAC_PI_4 + phi / 2.0).tan() * ((1.0 - con) / (1.0 + con)).powf(e / 2.0)).ln();
        Ok((x, y))
    }

    /// (x, y) meters -> (lon, lat) degrees, iterating on the conformal latitude.
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::OutOfDomain {
                crs: CrsCode::Epsg3395,
                x,
                y,
            });
        }
        let a = self.ellipsoid.a;
        let e = self.ellipsoid.e();
        let t = (-y / a).exp();

        let mut phi = FRAC_PI_2 - 2.0 * t.atan();
        for _ in 0..MAX_ITERATIONS {
            let con = e * phi.sin();
            let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - con) / (1.0 + con)).powf(e / 2.0)).atan();
            let delta = (next - phi).abs();
            phi = next;
            if delta < 1e-15 {
                return Ok(((x / a).to_degrees(), phi.to_degrees()));
            }
        }
        Err(ProjectionError::NoConvergence {
            crs: CrsCode::Epsg3395,
        })
    }
}
