//! Test fixtures and assertions shared across the workspace.
//!
//! - [`fixtures`]: GeoJSON collections whose bbox membership is known
//! - [`generators`]: larger synthetic collections
//! - [`paths`]: scratch directories and fixture files
//!
//! Tests that need PostgreSQL or Redis use [`require_env!`] so they skip
//! cleanly where no server is configured.

pub mod fixtures;
pub mod generators;
pub mod paths;

pub use fixtures::*;
pub use generators::*;
pub use paths::*;

/// Read a connection URL from the environment, or return early from the
/// calling test when it is unset or empty.
///
/// ```ignore
/// #[tokio::test]
/// async fn test_postgis_paging() {
///     let url = require_env!("TEST_DATABASE_URL");
/// }
/// ```
#[macro_export]
macro_rules! require_env {
    ($name:expr) => {{
        match std::env::var($name) {
            Ok(value) if !value.is_empty() => value,
            _ => {
                eprintln!("skipping: {} is not set", $name);
                return;
            }
        }
    }};
}

/// Assert two numbers differ by at most `tolerance`.
#[macro_export]
macro_rules! assert_approx_eq {
    ($actual:expr, $expected:expr, $tolerance:expr) => {{
        let (actual, expected, tolerance) = ($actual as f64, $expected as f64, $tolerance as f64);
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {} within {} of {}, off by {}",
            actual,
            tolerance,
            expected,
            (actual - expected).abs()
        );
    }};
}

/// [`assert_approx_eq!`] on both members of an (x, y) pair.
#[macro_export]
macro_rules! assert_coords_approx_eq {
    (($x:expr, $y:expr), ($ex:expr, $ey:expr), $tolerance:expr) => {{
        $crate::assert_approx_eq!($x, $ex, $tolerance);
        $crate::assert_approx_eq!($y, $ey, $tolerance);
    }};
}

/// Assert the ids of a result envelope's features, in order.
///
/// ```ignore
/// assert_feature_ids!(envelope, ["p1", "p2"]);
/// ```
#[macro_export]
macro_rules! assert_feature_ids {
    ($envelope:expr, [$($id:expr),* $(,)?]) => {{
        let actual: Vec<&str> = $envelope.features.iter().map(|f| f.id.as_str()).collect();
        let expected: Vec<&str> = vec![$($id),*];
        assert_eq!(actual, expected, "feature ids");
    }};
}
