//! Transverse Mercator projection (UTM zones).
//!
//! Uses the Krüger series to sixth order in the third flattening, which is
//! accurate to well under a millimeter within a UTM zone. The inverse
//! recovers latitude from the conformal latitude by Newton iteration.

use ogc_common::CrsCode;

use crate::ellipsoid::{Ellipsoid, WGS84};
use crate::error::ProjectionError;

const UTM_SCALE: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Longitude offset from the central meridian beyond which the series is
/// not trusted.
const MAX_LON_OFFSET: f64 = 45.0;
const MAX_LAT: f64 = 89.9;

const MAX_ITERATIONS: usize = 20;

/// A transverse Mercator projection on a given ellipsoid.
#[derive(Debug, Clone)]
pub struct TransverseMercator {
    crs: CrsCode,
    /// Central meridian (degrees)
    lon0: f64,
    k0: f64,
    false_easting: f64,
    false_northing: f64,
    e: f64,
    /// Rectifying radius
    big_a: f64,
    alpha: [f64; 6],
    beta: [f64; 6],
}

impl TransverseMercator {
    /// UTM zone 1..=60 on WGS84.
    pub fn utm(zone: u8, north: bool) -> Self {
        let lon0 = (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0;
        let false_northing = if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH };
        Self::new(
            CrsCode::Utm { zone, north },
            WGS84,
            lon0,
            UTM_SCALE,
            UTM_FALSE_EASTING,
            false_northing,
        )
    }

    pub fn new(
        crs: CrsCode,
        ellipsoid: Ellipsoid,
        lon0: f64,
        k0: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let n = ellipsoid.n();
        let n2 = n * n;
        let n3 = n2 * n;
        let n4 = n3 * n;
        let n5 = n4 * n;
        let n6 = n5 * n;

        let big_a = ellipsoid.a / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0 + n6 / 256.0);

        let alpha = [
            n / 2.0 - 2.0 / 3.0 * n2 + 5.0 / 16.0 * n3 + 41.0 / 180.0 * n4 - 127.0 / 288.0 * n5
                + 7891.0 / 37800.0 * n6,
            13.0 / 48.0 * n2 - 3.0 / 5.0 * n3 + 557.0 / 1440.0 * n4 + 281.0 / 630.0 * n5
                - 1983433.0 / 1935360.0 * n6,
            61.0 / 240.0 * n3 - 103.0 / 140.0 * n4 + 15061.0 / 26880.0 * n5
                + 167603.0 / 181440.0 * n6,
            49561.0 / 161280.0 * n4 - 179.0 / 168.0 * n5 + 6601661.0 / 7257600.0 * n6,
            34729.0 / 80640.0 * n5 - 3418889.0 / 1995840.0 * n6,
            212378941.0 / 319334400.0 * n6,
        ];

        let beta = [
            n / 2.0 - 2.0 / 3.0 * n2 + 37.0 / 96.0 * n3 - 1.0 / 360.0 * n4 - 81.0 / 512.0 * n5
                + 96199.0 / 604800.0 * n6,
            1.0 / 48.0 * n2 + 1.0 / 15.0 * n3 - 437.0 / 1440.0 * n4 + 46.0 / 105.0 * n5
                - 1118711.0 / 3870720.0 * n6,
            17.0 / 480.0 * n3 - 37.0 / 840.0 * n4 - 209.0 / 4480.0 * n5 + 5569.0 / 90720.0 * n6,
            4397.0 / 161280.0 * n4 - 11.0 / 504.0 * n5 - 830251.0 / 7257600.0 * n6,
            4583.0 / 161280.0 * n5 - 108847.0 / 3991680.0 * n6,
            20648693.0 / 638668800.0 * n6,
        ];

        Self {
            crs,
            lon0,
            k0,
            false_easting,
            false_northing,
            e: ellipsoid.e(),
            big_a,
            alpha,
            beta,
        }
    }

    fn out_of_domain(&self, x: f64, y: f64) -> ProjectionError {
        ProjectionError::OutOfDomain {
            crs: self.crs,
            x,
            y,
        }
    }

    /// (lon, lat) degrees -> (easting, northing) meters.
    pub fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64), ProjectionError> {
        if !lon.is_finite() || !lat.is_finite() || lat.abs() > MAX_LAT {
            return Err(self.out_of_domain(lon, lat));
        }
        let mut dlon = lon - self.lon0;
        // normalize to [-180, 180)
        dlon = (dlon + 180.0).rem_euclid(360.0) - 180.0;
        if dlon.abs() > MAX_LON_OFFSET {
            return Err(self.out_of_domain(lon, lat));
        }

        let lambda = dlon.to_radians();
        let phi = lat.to_radians();
        let e = self.e;

        let tau = phi.tan();
        let sigma = (e * (e * tau / (1.0 + tau * tau).sqrt()).atanh()).sinh();
        let tau_p = tau * (1.0 + sigma * sigma).sqrt() - sigma * (1.0 + tau * tau).sqrt();

        let cos_lambda = lambda.cos();
        let xi_p = tau_p.atan2(cos_lambda);
        let eta_p = (lambda.sin() / (tau_p * tau_p + cos_lambda * cos_lambda).sqrt()).asinh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, alpha) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        let x = self.k0 * self.big_a * eta + self.false_easting;
        let y = self.k0 * self.big_a * xi + self.false_northing;
        Ok((x, y))
    }

    /// (easting, northing) meters -> (lon, lat) degrees.
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(self.out_of_domain(x, y));
        }

        let xi = (y - self.false_northing) / (self.k0 * self.big_a);
        let eta = (x - self.false_easting) / (self.k0 * self.big_a);

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, beta) in self.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
            eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
        }

        let sinh_eta_p = eta_p.sinh();
        let cos_xi_p = xi_p.cos();
        let tau_p = xi_p.sin() / (sinh_eta_p * sinh_eta_p + cos_xi_p * cos_xi_p).sqrt();

        let e = self.e;
        let e2 = e * e;
        let mut tau = tau_p;
        let mut converged = false;
        for _ in 0..MAX_ITERATIONS {
            let sigma = (e * (e * tau / (1.0 + tau * tau).sqrt()).atanh()).sinh();
            let tau_i = tau * (1.0 + sigma * sigma).sqrt() - sigma * (1.0 + tau * tau).sqrt();
            let delta = (tau_p - tau_i) / (1.0 + tau_i * tau_i).sqrt()
                * (1.0 + (1.0 - e2) * tau * tau)
                / ((1.0 - e2) * (1.0 + tau * tau).sqrt());
            tau += delta;
            if delta.abs() < 1e-12 {
                converged = true;
                break;
            }
        }
        if !converged || !tau.is_finite() {
            return Err(ProjectionError::NoConvergence { crs: self.crs });
        }

        let lat = tau.atan().to_degrees();
        let lon = self.lon0 + sinh_eta_p.atan2(cos_xi_p).to_degrees();
        Ok((lon, lat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{assert_approx_eq, assert_coords_approx_eq};

    #[test]
    fn test_central_meridian_on_equator() {
        let north = TransverseMercator::utm(31, true);
        let (x, y) = north.forward(3.0, 0.0).unwrap();
        assert_coords_approx_eq!((x, y), (500_000.0, 0.0), 1e-6);

        let south = TransverseMercator::utm(31, false);
        let (_, y) = south.forward(3.0, 0.0).unwrap();
        assert_approx_eq!(y, 10_000_000.0, 1e-6);
    }

    #[test]
    fn test_known_points() {
        // Eiffel Tower, 31U 448251 5411932
        let zone31 = TransverseMercator::utm(31, true);
        let (x, y) = zone31.forward(2.0 + 17.0 / 60.0 + 40.2 / 3600.0, 48.0 + 51.0 / 60.0 + 29.5 / 3600.0)
            .unwrap();
        assert_approx_eq!(x, 448_251.79, 0.01);
        assert_approx_eq!(y, 5_411_932.06, 0.01);

        let zone18 = TransverseMercator::utm(18, true);
        let (x, y) = zone18.forward(-74.0060, 40.7128).unwrap();
        assert_approx_eq!(x, 583_959.37, 0.01);
        assert_approx_eq!(y, 4_507_351.00, 0.01);

        let zone56s = TransverseMercator::utm(56, false);
        let (x, y) = zone56s.forward(151.2093, -33.8688).unwrap();
        assert_approx_eq!(x, 334_368.63, 0.01);
        assert_approx_eq!(y, 6_250_948.35, 0.01);
    }

    #[test]
    fn test_round_trip() {
        let zone33 = TransverseMercator::utm(33, true);
        for (lon, lat) in [(15.0, 0.0), (12.1, 45.3), (17.9, 71.0), (9.0, 84.0), (20.0, 10.0)] {
            let (x, y) = zone33.forward(lon, lat).unwrap();
            let (lon2, lat2) = zone33.inverse(x, y).unwrap();
            assert_coords_approx_eq!((lon2, lat2), (lon, lat), 1e-7);
        }

        let zone19s = TransverseMercator::utm(19, false);
        let (x, y) = zone19s.forward(-70.6, -33.4).unwrap();
        let (lon, lat) = zone19s.inverse(x, y).unwrap();
        assert_coords_approx_eq!((lon, lat), (-70.6, -33.4), 1e-7);
    }

    #[test]
    fn test_rejects_far_from_central_meridian() {
        let zone31 = TransverseMercator::utm(31, true);
        assert!(matches!(
            zone31.forward(120.0, 10.0),
            Err(ProjectionError::OutOfDomain { .. })
        ));
        assert!(matches!(
            zone31.forward(3.0, 90.0),
            Err(ProjectionError::OutOfDomain { .. })
        ));
        assert!(zone31.inverse(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_antimeridian_zone_wraps() {
        let zone1 = TransverseMercator::utm(1, true);
        // 179E is 4 degrees west of zone 1's central meridian at 177W
        let (x, _) = zone1.forward(179.0, 10.0).unwrap();
        assert!(x < 500_000.0);
    }
}
