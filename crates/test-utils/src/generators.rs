//! Synthetic feature generators.
//!
//! Generated values are predictable so tests can compute expected results
//! instead of hard-coding them.

use serde_json::{json, Value};

use crate::fixtures::point_feature;

/// `n` point features on a regular grid inside `[min_x, min_y, max_x, max_y]`.
///
/// Feature `i` has id `f{i:04}`, `rank = i % 10` and `even = (i % 2 == 0)`.
/// Ids sort in generation order.
///
/// # Example
///
/// ```
/// use test_utils::grid_features;
///
/// let features = grid_features(12, [0.0, 0.0, 10.0, 10.0]);
/// assert_eq!(features.len(), 12);
/// assert_eq!(features[11]["id"], "f0011");
/// assert_eq!(features[11]["properties"]["rank"], 1);
/// ```
pub fn grid_features(n: usize, bbox: [f64; 4]) -> Vec<Value> {
    let [min_x, min_y, max_x, max_y] = bbox;
    let side = (n as f64).sqrt().ceil().max(1.0) as usize;
    let step_x = (max_x - min_x) / side as f64;
    let step_y = (max_y - min_y) / side as f64;

    (0..n)
        .map(|i| {
            let col = i % side;
            let row = i / side;
            point_feature(
                &format!("f{:04}", i),
                min_x + step_x * (col as f64 + 0.5),
                min_y + step_y * (row as f64 + 0.5),
                json!({ "rank": i % 10, "even": i % 2 == 0 }),
            )
        })
        .collect()
}

/// Features alternating between inside and outside a bbox.
///
/// Even-indexed features are at the center of `bbox`, odd-indexed ones are
/// one box-width to the east of it.
pub fn alternating_features(n: usize, bbox: [f64; 4]) -> Vec<Value> {
    let [min_x, min_y, max_x, max_y] = bbox;
    let (cx, cy) = ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0);
    let width = max_x - min_x;
    (0..n)
        .map(|i| {
            let x = if i % 2 == 0 { cx } else { cx + width };
            point_feature(&format!("f{:04}", i), x, cy, json!({ "index": i }))
        })
        .collect()
}
