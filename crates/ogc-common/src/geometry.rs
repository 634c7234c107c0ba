//! GeoJSON-shaped geometry model.
//!
//! Positions are `[a, b]` pairs in the axis order of whatever CRS the
//! geometry is currently expressed in. The type itself carries no CRS;
//! the surrounding feature/envelope does.

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;

/// A single coordinate pair.
pub type Position = [f64; 2];

/// Geometry types supported by the feature model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    /// Linear rings, first is exterior, rest are holes.
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    /// Create a point geometry.
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point([x, y])
    }

    /// GeoJSON type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Visit every position in the geometry.
    pub fn positions(&self) -> Vec<Position> {
        match self {
            Geometry::Point(p) => vec![*p],
            Geometry::MultiPoint(ps) | Geometry::LineString(ps) => ps.clone(),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                lines.iter().flatten().copied().collect()
            }
            Geometry::MultiPolygon(polys) => polys.iter().flatten().flatten().copied().collect(),
        }
    }

    /// Apply a fallible function to every position, preserving structure.
    pub fn try_map_positions<E, F>(&self, mut f: F) -> Result<Geometry, E>
    where
        F: FnMut(Position) -> Result<Position, E>,
    {
        let mut map_ring = |ring: &Vec<Position>| -> Result<Vec<Position>, E> {
            ring.iter().map(|p| f(*p)).collect()
        };

        Ok(match self {
            Geometry::Point(p) => Geometry::Point(map_ring(&vec![*p])?[0]),
            Geometry::MultiPoint(ps) => Geometry::MultiPoint(map_ring(ps)?),
            Geometry::LineString(ps) => Geometry::LineString(map_ring(ps)?),
            Geometry::MultiLineString(lines) => Geometry::MultiLineString(
                lines.iter().map(&mut map_ring).collect::<Result<_, _>>()?,
            ),
            Geometry::Polygon(rings) => {
                Geometry::Polygon(rings.iter().map(&mut map_ring).collect::<Result<_, _>>()?)
            }
            Geometry::MultiPolygon(polys) => {
                let mut out = Vec::with_capacity(polys.len());
                for rings in polys {
                    out.push(rings.iter().map(&mut map_ring).collect::<Result<_, _>>()?);
                }
                Geometry::MultiPolygon(out)
            }
        })
    }

    /// Envelope of the geometry in its own coordinate order.
    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.positions().into_iter().map(|[a, b]| (a, b)))
    }

    /// Envelope intersection test against an (x, y) box.
    ///
    /// Points are tested exactly; other geometries match when their
    /// envelope intersects the box.
    pub fn intersects_bbox(&self, bbox: &BoundingBox) -> bool {
        match self {
            Geometry::Point([x, y]) => bbox.contains_point(*x, *y),
            _ => self.bbox().map_or(false, |env| env.intersects(bbox)),
        }
    }

    /// Structural sanity check: non-empty and finite.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let positions = self.positions();
        if positions.is_empty() {
            return Err(GeometryError::Empty(self.type_name()));
        }
        if positions.iter().any(|[a, b]| !a.is_finite() || !b.is_finite()) {
            return Err(GeometryError::NonFinite);
        }
        if let Geometry::Polygon(rings) = self {
            for ring in rings {
                if ring.len() < 4 || ring.first() != ring.last() {
                    return Err(GeometryError::UnclosedRing);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("{0} geometry has no coordinates")]
    Empty(&'static str),

    #[error("geometry contains non-finite coordinates")]
    NonFinite,

    #[error("polygon ring is not closed")]
    UnclosedRing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geojson_shape() {
        let geom = Geometry::point(1.5, 2.5);
        let json = serde_json::to_value(&geom).unwrap();
        assert_eq!(json["type"], "Point");
        assert_eq!(json["coordinates"][0], 1.5);

        let parsed: Geometry = serde_json::from_str(
            r#"{"type":"LineString","coordinates":[[0,0],[1,1]]}"#,
        )
        .unwrap();
        assert_eq!(parsed, Geometry::LineString(vec![[0.0, 0.0], [1.0, 1.0]]));
    }

    #[test]
    fn test_bbox_of_polygon() {
        let polygon = Geometry::Polygon(vec![vec![
            [0.0, 0.0],
            [4.0, 0.0],
            [4.0, 3.0],
            [0.0, 0.0],
        ]]);
        assert_eq!(polygon.bbox().unwrap(), BoundingBox::new(0.0, 0.0, 4.0, 3.0));
        assert!(polygon.validate().is_ok());
    }

    #[test]
    fn test_try_map_preserves_structure() {
        let multi = Geometry::MultiPolygon(vec![vec![vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [0.0, 0.0],
        ]]]);
        let swapped = multi
            .try_map_positions(|[a, b]| Ok::<_, ()>([b, a]))
            .unwrap();
        match swapped {
            Geometry::MultiPolygon(polys) => assert_eq!(polys[0][0][1], [0.0, 1.0]),
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        assert_eq!(
            Geometry::MultiPoint(vec![]).validate(),
            Err(GeometryError::Empty("MultiPoint"))
        );
        assert_eq!(
            Geometry::point(f64::NAN, 0.0).validate(),
            Err(GeometryError::NonFinite)
        );
        assert_eq!(
            Geometry::Polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]]).validate(),
            Err(GeometryError::UnclosedRing)
        );
    }

    #[test]
    fn test_intersects_bbox() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(Geometry::point(10.0, 10.0).intersects_bbox(&bbox));
        assert!(!Geometry::point(10.1, 10.0).intersects_bbox(&bbox));
        let line = Geometry::LineString(vec![[-5.0, 5.0], [5.0, 5.0]]);
        assert!(line.intersects_bbox(&bbox));
    }
}
