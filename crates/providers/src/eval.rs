//! In-memory evaluation of query clauses.
//!
//! Used by adapters that keep features in process and by the executor for
//! residual clauses, so both paths agree on semantics.

use feature_query::{CapabilityDescriptor, Feature, PropertyFilter};
use ogc_common::{time::parse_timestamp, AxisOrder, BoundingBox, CrsCode, DateTimeFilter, Geometry};

/// What an in-memory evaluator needs to know about stored features.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    pub id_field: String,
    pub time_field: Option<String>,
    /// CRS of stored geometries.
    pub crs: CrsCode,
}

impl FeatureSchema {
    pub fn from_descriptor(descriptor: &CapabilityDescriptor) -> Self {
        Self {
            id_field: descriptor.id_field.clone(),
            time_field: descriptor.time_field.clone(),
            crs: descriptor.storage_crs,
        }
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            time_field: None,
            crs: CrsCode::Crs84,
        }
    }
}

/// The geometry with its two axes exchanged.
pub fn swap_axes(geometry: &Geometry) -> Geometry {
    match geometry.try_map_positions(|[a, b]| Ok::<_, ()>([b, a])) {
        Ok(swapped) => swapped,
        Err(()) => geometry.clone(),
    }
}

/// The geometry in (x, y) order of a CRS with the given axis order.
pub fn to_xy(geometry: &Geometry, crs: CrsCode) -> Geometry {
    match crs.axis_order() {
        AxisOrder::XY => geometry.clone(),
        AxisOrder::LatLon => swap_axes(geometry),
    }
}

/// Envelope of a geometry stored in `crs`, in (x, y) order.
pub fn xy_envelope(geometry: &Geometry, crs: CrsCode) -> Option<BoundingBox> {
    to_xy(geometry, crs).bbox()
}

/// Envelope test of a geometry stored in `crs` against an (x, y) bbox.
pub fn geometry_intersects(geometry: &Geometry, bbox: &BoundingBox, crs: CrsCode) -> bool {
    match crs.axis_order() {
        AxisOrder::XY => geometry.intersects_bbox(bbox),
        AxisOrder::LatLon => swap_axes(geometry).intersects_bbox(bbox),
    }
}

/// A conjunction of clauses evaluated against decoded features.
#[derive(Debug, Clone, Copy, Default)]
pub struct Predicate<'a> {
    pub bbox: Option<&'a BoundingBox>,
    pub datetime: Option<&'a DateTimeFilter>,
    pub filters: &'a [PropertyFilter],
}

impl<'a> Predicate<'a> {
    pub fn is_empty(&self) -> bool {
        self.bbox.is_none() && self.datetime.is_none() && self.filters.is_empty()
    }

    pub fn matches(&self, feature: &Feature, schema: &FeatureSchema) -> bool {
        if let Some(bbox) = self.bbox {
            match &feature.geometry {
                Some(geometry) if geometry_intersects(geometry, bbox, schema.crs) => {}
                _ => return false,
            }
        }

        if let Some(datetime) = self.datetime {
            let stamp = schema
                .time_field
                .as_deref()
                .and_then(|field| feature.properties.get(field))
                .and_then(|v| v.as_str())
                .and_then(|s| parse_timestamp(s).ok());
            match stamp {
                Some(t) if datetime.matches(&t) => {}
                _ => return false,
            }
        }

        self.filters.iter().all(|filter| {
            let value = feature.value_of(&filter.name, &schema.id_field);
            filter.matches(value.as_ref())
        })
    }
}
