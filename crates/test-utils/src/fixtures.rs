//! Common test fixtures.
//!
//! GeoJSON documents with known membership against known boxes, so paging
//! and filtering tests can assert exact counts.

use serde_json::{json, Value};

/// Common bounding boxes as `[min_x, min_y, max_x, max_y]` in CRS84.
pub mod bbox {
    /// Global bounding box (-180 to 180, -90 to 90)
    pub const GLOBAL: [f64; 4] = [-180.0, -90.0, 180.0, 90.0];

    /// The box [`super::points_collection`] is built around.
    pub const UNIT: [f64; 4] = [0.0, 0.0, 10.0, 10.0];

    /// Europe bounding box
    pub const EUROPE: [f64; 4] = [-15.0, 35.0, 45.0, 72.0];

    /// Disjoint from every fixture geometry.
    pub const EMPTY_OCEAN: [f64; 4] = [-40.0, -60.0, -30.0, -50.0];
}

/// Ids of the features of [`points_collection`] inside [`bbox::UNIT`].
pub const INSIDE_IDS: [&str; 5] = ["p1", "p2", "p3", "p4", "p5"];

/// Ids of the features of [`points_collection`] outside [`bbox::UNIT`].
pub const OUTSIDE_IDS: [&str; 3] = ["q1", "q2", "q3"];

/// A GeoJSON point feature.
pub fn point_feature(id: &str, lon: f64, lat: f64, properties: Value) -> Value {
    json!({
        "type": "Feature",
        "id": id,
        "geometry": { "type": "Point", "coordinates": [lon, lat] },
        "properties": properties,
    })
}

/// Wrap features into a FeatureCollection.
pub fn feature_collection(features: Vec<Value>) -> Value {
    json!({ "type": "FeatureCollection", "features": features })
}

/// Five points inside [`bbox::UNIT`] and three outside it.
///
/// Every feature has `name`, `category` (`"a"` or `"b"`), `rank` (integer)
/// and `observed` (RFC 3339, one day apart starting 2024-01-01).
pub fn points_collection() -> Value {
    let inside = [(1.0, 1.0), (2.0, 8.0), (5.0, 5.0), (9.5, 0.5), (7.0, 3.0)];
    let outside = [(20.0, 20.0), (-5.0, 5.0), (5.0, 45.0)];

    let features = INSIDE_IDS
        .iter()
        .zip(inside)
        .chain(OUTSIDE_IDS.iter().zip(outside))
        .enumerate()
        .map(|(i, (id, (lon, lat)))| {
            point_feature(
                id,
                lon,
                lat,
                json!({
                    "name": format!("point {}", id),
                    "category": if i % 2 == 0 { "a" } else { "b" },
                    "rank": (i as i64 * 3) % 8,
                    "observed": format!("2024-01-{:02}T00:00:00Z", i + 1),
                }),
            )
        })
        .collect();
    feature_collection(features)
}

/// A collection holding one record of every broken kind next to a good one.
pub fn broken_collection() -> Value {
    feature_collection(vec![
        point_feature("good", 1.0, 1.0, json!({ "name": "fine" })),
        json!({
            "type": "Feature",
            "id": "bad-geometry",
            "geometry": { "type": "Point", "coordinates": ["x", 1.0] },
            "properties": {},
        }),
        json!({
            "type": "Feature",
            "id": "nested",
            "geometry": null,
            "properties": { "tags": ["a", "b"] },
        }),
        json!({ "type": "Feature", "geometry": null, "properties": {} }),
    ])
}
