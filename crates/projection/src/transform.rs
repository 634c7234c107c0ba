//! Transforms between supported CRSs.
//!
//! Every transform pivots through WGS84 geodetic (lon, lat) degrees.
//! NAD83 (EPSG:4269) is treated as WGS84; the sub-meter datum difference
//! is ignored.
//!
//! Coordinates enter and leave in the authority axis order of their CRS.
//! [`CrsTransform::transform`] applies that order, while
//! [`CrsTransform::transform_xy`] works on already-normalized (x, y) pairs
//! such as [`BoundingBox`] corners.

use ogc_common::{BoundingBox, CrsCode, Geometry};
use tracing::trace;

use crate::error::ProjectionError;
use crate::mercator::{WebMercator, WorldMercator, WEB_MERCATOR_MAX_LAT};
use crate::transverse_mercator::TransverseMercator;

/// Samples per bbox edge when densifying.
const BBOX_EDGE_SAMPLES: usize = 21;

#[derive(Debug, Clone)]
enum Projector {
    Geographic(CrsCode),
    WebMercator(WebMercator),
    WorldMercator(WorldMercator),
    TransverseMercator(Box<TransverseMercator>),
}

impl Projector {
    fn for_crs(crs: CrsCode) -> Self {
        match crs {
            CrsCode::Crs84 | CrsCode::Epsg4326 | CrsCode::Epsg4269 => Projector::Geographic(crs),
            CrsCode::Epsg3857 => Projector::WebMercator(WebMercator::default()),
            CrsCode::Epsg3395 => Projector::WorldMercator(WorldMercator::default()),
            CrsCode::Utm { zone, north } => {
                Projector::TransverseMercator(Box::new(TransverseMercator::utm(zone, north)))
            }
        }
    }

    /// (x, y) in this CRS -> (lon, lat) degrees.
    fn to_geodetic(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        match self {
            Projector::Geographic(crs) => check_geodetic(*crs, x, y),
            Projector::WebMercator(p) => p.inverse(x, y),
            Projector::WorldMercator(p) => p.inverse(x, y),
            Projector::TransverseMercator(p) => p.inverse(x, y),
        }
    }

    /// (lon, lat) degrees -> (x, y) in this CRS.
    fn from_geodetic(&self, lon: f64, lat: f64) -> Result<(f64, f64), ProjectionError> {
        match self {
            Projector::Geographic(crs) => check_geodetic(*crs, lon, lat),
            Projector::WebMercator(p) => p.forward(lon, lat),
            Projector::WorldMercator(p) => p.forward(lon, lat),
            Projector::TransverseMercator(p) => p.forward(lon, lat),
        }
    }

    /// Latitude bound of a Mercator target; `None` when the target has no
    /// polar cutoff worth clamping to.
    fn max_lat(&self) -> Option<f64> {
        match self {
            Projector::WebMercator(_) => Some(WEB_MERCATOR_MAX_LAT),
            Projector::WorldMercator(_) => Some(89.5),
            _ => None,
        }
    }
}

fn check_geodetic(crs: CrsCode, lon: f64, lat: f64) -> Result<(f64, f64), ProjectionError> {
    if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 || lon.abs() > 540.0 {
        return Err(ProjectionError::OutOfDomain { crs, x: lon, y: lat });
    }
    Ok((lon, lat))
}

/// A prepared transform from one CRS to another.
#[derive(Debug, Clone)]
pub struct CrsTransform {
    from: CrsCode,
    to: CrsCode,
    source: Projector,
    target: Projector,
}

impl CrsTransform {
    pub fn new(from: CrsCode, to: CrsCode) -> Self {
        Self {
            from,
            to,
            source: Projector::for_crs(from),
            target: Projector::for_crs(to),
        }
    }

    pub fn from_crs(&self) -> CrsCode {
        self.from
    }

    pub fn to_crs(&self) -> CrsCode {
        self.to
    }

    /// True when source and target are the same CRS.
    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// Transform one coordinate given in the source CRS's axis order,
    /// returning it in the target CRS's axis order.
    pub fn transform(&self, a: f64, b: f64) -> Result<(f64, f64), ProjectionError> {
        if self.is_identity() {
            return Ok((a, b));
        }
        let (x, y) = self.from.axis_order().to_xy(a, b);
        let (x, y) = self.transform_xy(x, y)?;
        Ok(self.to.axis_order().from_xy(x, y))
    }

    /// Transform an (x, y) pair, ignoring authority axis order.
    pub fn transform_xy(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        if self.is_identity() {
            return Ok((x, y));
        }
        let (lon, lat) = self.source.to_geodetic(x, y)?;
        self.target.from_geodetic(lon, lat)
    }

    /// Transform a geometry, preserving its structure.
    pub fn transform_geometry(&self, geometry: &Geometry) -> Result<Geometry, ProjectionError> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        geometry.try_map_positions(|[a, b]| self.transform(a, b).map(|(c, d)| [c, d]))
    }

    /// Envelope of a densified (x, y) bbox boundary in the target CRS.
    ///
    /// Latitudes past a Mercator target's polar cutoff are clamped to it,
    /// so whole-world boxes remain usable against Mercator storage.
    pub fn transform_bbox(&self, bbox: &BoundingBox) -> Result<BoundingBox, ProjectionError> {
        if self.is_identity() {
            return Ok(*bbox);
        }

        let mut out: Option<BoundingBox> = None;
        for (x, y) in densify(bbox, BBOX_EDGE_SAMPLES) {
            let (lon, mut lat) = self.source.to_geodetic(x, y)?;
            if let Some(limit) = self.target.max_lat() {
                lat = lat.clamp(-limit, limit);
            }
            let (tx, ty) = self.target.from_geodetic(lon, lat)?;
            match out.as_mut() {
                Some(env) => env.expand_to(tx, ty),
                None => out = Some(BoundingBox::new(tx, ty, tx, ty)),
            }
        }

        // densify always yields the four corners
        out.ok_or(ProjectionError::OutOfDomain {
            crs: self.from,
            x: bbox.min_x,
            y: bbox.min_y,
        })
    }
}

/// Points along the boundary of a bbox, `samples` per edge including corners.
fn densify(bbox: &BoundingBox, samples: usize) -> Vec<(f64, f64)> {
    let steps = samples.max(2) - 1;
    let mut points = Vec::with_capacity(steps * 4);
    for i in 0..steps {
        let t = i as f64 / steps as f64;
        let x = bbox.min_x + t * bbox.width();
        let y = bbox.min_y + t * bbox.height();
        points.push((x, bbox.min_y));
        points.push((bbox.max_x, y));
        points.push((bbox.max_x - t * bbox.width(), bbox.max_y));
        points.push((bbox.min_x, bbox.max_y - t * bbox.height()));
    }
    points
}

/// Reproject a geometry whose positions are in `from`'s axis order.
///
/// Equal CRSs return the geometry unchanged.
pub fn reproject_geometry(
    geometry: &Geometry,
    from: CrsCode,
    to: CrsCode,
) -> Result<Geometry, ProjectionError> {
    trace!(from = %from, to = %to, kind = geometry.type_name(), "Reprojecting geometry");
    CrsTransform::new(from, to).transform_geometry(geometry)
}

/// Reproject an (x, y) bbox to the envelope of its image in `to`.
pub fn reproject_bbox(
    bbox: &BoundingBox,
    from: CrsCode,
    to: CrsCode,
) -> Result<BoundingBox, ProjectionError> {
    CrsTransform::new(from, to).transform_bbox(bbox)
}
