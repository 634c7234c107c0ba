//! Query execution across native, residual and in-memory sort paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feature_query::{
    normalize, BackendKind, CapabilityDescriptor, Feature, FeatureResultEnvelope, PageToken,
    RawQueryParams,
};
use ogc_common::{BoundingBox, CrsCode, Geometry, OgcError};
use providers::adapters::{GeoJsonProvider, GeoJsonSource, MemoryProvider};
use providers::{
    Dataset, ExecutorConfig, FeatureProvider, FeatureSchema, FetchRequest, FetchResult,
    ProviderCapabilities, ProviderResult, ProviderRow,
};
use serde_json::Value;
use test_utils::{
    alternating_features, assert_coords_approx_eq, assert_feature_ids, bbox, broken_collection, feature_collection,
    points_collection, temp_test_dir, write_json, INSIDE_IDS,
};

// ============================================================================
// Helpers
// ============================================================================

fn decode_all(collection: &Value) -> Vec<Feature> {
    collection["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| Feature::from_geojson(v.clone(), "id").unwrap())
        .collect()
}

fn descriptor(id: &str, kind: BackendKind) -> CapabilityDescriptor {
    CapabilityDescriptor::new(id, kind)
        .with_queryables(["name", "category", "rank", "observed", "index"])
        .with_time_field("observed")
}

fn memory_dataset(collection: &Value) -> Dataset {
    let descriptor = descriptor("points", BackendKind::Document);
    let provider = MemoryProvider::with_features(
        FeatureSchema::from_descriptor(&descriptor),
        decode_all(collection),
    );
    Dataset::new(Arc::new(descriptor), Arc::new(provider), ExecutorConfig::default())
}

fn geojson_dataset(dir: &std::path::Path, collection: &Value, config: ExecutorConfig) -> Dataset {
    let path = write_json(dir, "points.geojson", collection);
    let descriptor = descriptor("points-file", BackendKind::FlatFile);
    let provider = GeoJsonProvider::new(
        GeoJsonSource::File(path),
        FeatureSchema::from_descriptor(&descriptor),
    );
    Dataset::new(Arc::new(descriptor), Arc::new(provider), config)
}

fn params(pairs: &[(&str, &str)]) -> RawQueryParams {
    RawQueryParams::from_pairs(pairs.iter().copied())
}

async fn run(dataset: &Dataset, params: &RawQueryParams) -> Result<FeatureResultEnvelope, OgcError> {
    let query = normalize(params, dataset.descriptor())?;
    dataset.query(query).await
}

fn ids(envelope: &FeatureResultEnvelope) -> Vec<String> {
    envelope.features.iter().map(|f| f.id.clone()).collect()
}

/// Follow next tokens to the end, returning every page's ids.
async fn all_pages(dataset: &Dataset, base: RawQueryParams) -> Vec<Vec<String>> {
    let mut pages = Vec::new();
    let mut envelope = run(dataset, &base).await.unwrap();
    loop {
        pages.push(ids(&envelope));
        let Some(token) = envelope.next_token.clone() else {
            break;
        };
        envelope = run(dataset, &base.clone().with("cursor", token)).await.unwrap();
        assert!(pages.len() < 50, "paging does not terminate");
    }
    pages
}

/// Wraps another provider, overriding capabilities and counting calls.
struct Instrumented {
    inner: MemoryProvider,
    capabilities: ProviderCapabilities,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl Instrumented {
    fn new(collection: &Value, capabilities: ProviderCapabilities) -> Self {
        Self {
            inner: MemoryProvider::with_features(FeatureSchema::default(), decode_all(collection)),
            capabilities,
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FeatureProvider for Instrumented {
    fn kind(&self) -> BackendKind {
        BackendKind::SearchIndex
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    async fn fetch(&self, request: &FetchRequest) -> ProviderResult<FetchResult> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.fetch(request).await
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<ProviderRow>> {
        self.inner.get(id).await
    }
}

const UNIT_BBOX: &str = "0,0,10,10";

// ============================================================================
// Native paging
// ============================================================================

#[tokio::test]
async fn test_native_bbox_pages_two_two_one() {
    let dataset = memory_dataset(&points_collection());
    let base = params(&[("bbox", UNIT_BBOX), ("limit", "2")]);

    let first = run(&dataset, &base).await.unwrap();
    assert_eq!(first.number_matched, 5);
    assert!(first.number_matched_exact);
    assert_eq!(first.number_returned, 2);

    let pages = all_pages(&dataset, base).await;
    assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
    let all: Vec<String> = pages.concat();
    assert_eq!(all, INSIDE_IDS.to_vec());
}

#[tokio::test]
async fn test_native_sorted_keyset_paging() {
    let dataset = memory_dataset(&points_collection());
    let base = params(&[("sortby", "-rank"), ("limit", "3")]);
    let pages = all_pages(&dataset, base).await;
    // ranks: p1 0, p2 3, p3 6, p4 1, p5 4, q1 7, q2 2, q3 5
    assert_eq!(
        pages,
        vec![
            vec!["q1", "p3", "q3"],
            vec!["p5", "p2", "q2"],
            vec!["p4", "p1"],
        ]
    );
}

#[tokio::test]
async fn test_offset_paging_has_prev_token() {
    let dataset = memory_dataset(&points_collection());
    let envelope = run(&dataset, &params(&[("offset", "4"), ("limit", "2")])).await.unwrap();
    assert_feature_ids!(envelope, ["p5", "q1"]);
    let prev = PageToken::decode(envelope.prev_token.as_deref().unwrap()).unwrap();
    assert_eq!(prev, PageToken::Offset { offset: 2 });
    let next = PageToken::decode(envelope.next_token.as_deref().unwrap()).unwrap();
    assert_eq!(next, PageToken::Offset { offset: 6 });
}

#[tokio::test]
async fn test_foreign_token_is_rejected() {
    let dataset = memory_dataset(&points_collection());
    let token = PageToken::Scan {
        position: 3,
        matched_before: 1,
    }
    .encode();
    let err = run(&dataset, &params(&[("cursor", &token)])).await.unwrap_err();
    assert!(matches!(err, OgcError::InvalidParameter { ref param, .. } if param == "cursor"));
}

// ============================================================================
// Residual evaluation
// ============================================================================

#[tokio::test]
async fn test_residual_bbox_over_flat_file() {
    let dir = temp_test_dir();
    let dataset = geojson_dataset(dir.path(), &points_collection(), ExecutorConfig::default());
    let base = params(&[("bbox", UNIT_BBOX), ("limit", "2")]);

    let pages = all_pages(&dataset, base.clone()).await;
    assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
    assert_eq!(pages.concat(), INSIDE_IDS.to_vec());

    // every page reports the same exact total
    let first = run(&dataset, &base).await.unwrap();
    let token = first.next_token.clone().unwrap();
    let second = run(&dataset, &base.with("cursor", token)).await.unwrap();
    assert_eq!(first.number_matched, 5);
    assert_eq!(second.number_matched, 5);
    assert!(second.number_matched_exact);
}

#[tokio::test]
async fn test_residual_filter_and_datetime() {
    let dir = temp_test_dir();
    let dataset = geojson_dataset(dir.path(), &points_collection(), ExecutorConfig::default());
    let envelope = run(
        &dataset,
        &params(&[
            ("filter", "category eq 'a' and rank gt 1"),
            ("datetime", "2024-01-01T00:00:00Z/2024-01-06T00:00:00Z"),
        ]),
    )
    .await
    .unwrap();
    // category a: p1 (0), p3 (6), p5 (4), q2 (2); q2 is observed on the 7th
    assert_feature_ids!(envelope, ["p3", "p5"]);
    assert_eq!(envelope.number_matched, 2);
}

#[tokio::test]
async fn test_scan_budget_makes_count_inexact() {
    let dir = temp_test_dir();
    let collection = feature_collection(alternating_features(20, bbox::UNIT));
    let config = ExecutorConfig {
        fetch_window: 4,
        max_scan: 6,
        ..ExecutorConfig::default()
    };
    let dataset = geojson_dataset(dir.path(), &collection, config);
    let base = params(&[("bbox", UNIT_BBOX), ("limit", "2")]);

    let first = run(&dataset, &base).await.unwrap();
    assert_feature_ids!(first, ["f0000", "f0002"]);
    assert!(!first.number_matched_exact);
    assert_eq!(first.number_matched, 20);

    // later pages still make progress under the same budget
    let pages = all_pages(&dataset, base).await;
    let all: Vec<String> = pages.concat();
    let expected: Vec<String> = (0..20).step_by(2).map(|i| format!("f{:04}", i)).collect();
    assert_eq!(all, expected);
}

#[tokio::test]
async fn test_residual_scan_without_keyset_uses_positions() {
    let provider = Instrumented::new(
        &points_collection(),
        ProviderCapabilities {
            exact_count: true,
            ..ProviderCapabilities::default()
        },
    );
    let dataset = Dataset::new(
        Arc::new(descriptor("indexed", BackendKind::SearchIndex)),
        Arc::new(provider),
        ExecutorConfig::default(),
    );
    let base = params(&[("filter", "category eq 'b'"), ("limit", "2")]);

    let first = run(&dataset, &base).await.unwrap();
    assert!(matches!(
        PageToken::decode(first.next_token.as_deref().unwrap()).unwrap(),
        PageToken::Scan { .. }
    ));
    let pages = all_pages(&dataset, base).await;
    assert_eq!(pages, vec![vec!["p2", "p4"], vec!["q1", "q3"]]);
}

#[tokio::test]
async fn test_integrity_errors_do_not_fail_the_page() {
    let dir = temp_test_dir();
    let dataset = geojson_dataset(dir.path(), &broken_collection(), ExecutorConfig::default());
    let envelope = run(&dataset, &params(&[])).await.unwrap();
    assert_feature_ids!(envelope, ["good"]);
    let mut bad: Vec<_> = envelope
        .integrity_errors
        .iter()
        .map(|e| e.id.clone().unwrap())
        .collect();
    bad.sort();
    assert_eq!(bad, vec!["#3", "bad-geometry", "nested"]);

    let err = dataset.get("nested", CrsCode::Crs84).await.unwrap_err();
    assert!(matches!(err, OgcError::DataIntegrity { ref id, .. } if id == "nested"));
}

// ============================================================================
// In-memory sort
// ============================================================================

#[tokio::test]
async fn test_sort_without_native_support() {
    let dir = temp_test_dir();
    let dataset = geojson_dataset(dir.path(), &points_collection(), ExecutorConfig::default());
    let base = params(&[("bbox", UNIT_BBOX), ("sortby", "-rank"), ("limit", "3")]);
    let pages = all_pages(&dataset, base).await;
    assert_eq!(pages, vec![vec!["p3", "p5", "p2"], vec!["p4", "p1"]]);
}

#[tokio::test]
async fn test_sort_beyond_scan_budget_is_rejected() {
    let dir = temp_test_dir();
    let collection = feature_collection(alternating_features(20, bbox::UNIT));
    let config = ExecutorConfig {
        max_scan: 10,
        ..ExecutorConfig::default()
    };
    let dataset = geojson_dataset(dir.path(), &collection, config);
    let err = run(&dataset, &params(&[("sortby", "-index")])).await.unwrap_err();
    assert!(matches!(err, OgcError::Validation(_)));

    // the same dataset pages fine in id order
    let envelope = run(&dataset, &params(&[("limit", "5")])).await.unwrap();
    assert_eq!(envelope.number_returned, 5);
}

// ============================================================================
// Hits, extent and timeouts
// ============================================================================

#[tokio::test]
async fn test_hits() {
    let dataset = memory_dataset(&points_collection());
    let hits = run(&dataset, &params(&[("bbox", UNIT_BBOX), ("resulttype", "hits")]))
        .await
        .unwrap();
    assert_eq!(hits.number_matched, 5);
    assert!(hits.features.is_empty());

    let dir = temp_test_dir();
    let dataset = geojson_dataset(dir.path(), &points_collection(), ExecutorConfig::default());
    let hits = run(
        &dataset,
        &params(&[("filter", "rank lt 3"), ("resulttype", "hits"), ("limit", "1")]),
    )
    .await
    .unwrap();
    assert_eq!(hits.number_matched, 3);
    assert!(hits.number_matched_exact);
    assert_eq!(hits.number_returned, 0);
}

#[tokio::test]
async fn test_bbox_outside_extent_skips_backend() {
    let provider = Arc::new(Instrumented::new(&points_collection(), ProviderCapabilities::full()));
    let descriptor = descriptor("bounded", BackendKind::SearchIndex)
        .with_spatial_extent(BoundingBox::new(-20.0, -10.0, 30.0, 50.0));
    let dataset = Dataset::new(Arc::new(descriptor), provider.clone(), ExecutorConfig::default());

    let ocean = bbox::EMPTY_OCEAN.map(|v| v.to_string()).join(",");
    let envelope = run(&dataset, &params(&[("bbox", &ocean)])).await.unwrap();
    assert!(envelope.features.is_empty());
    assert_eq!(envelope.number_matched, 0);
    assert_eq!(provider.fetches.load(Ordering::SeqCst), 0);

    run(&dataset, &params(&[("bbox", UNIT_BBOX)])).await.unwrap();
    assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_backend_timeout_is_unavailable() {
    let mut provider = Instrumented::new(&points_collection(), ProviderCapabilities::full());
    provider.delay = Some(Duration::from_millis(500));
    let config = ExecutorConfig {
        backend_timeout: Duration::from_millis(20),
        ..ExecutorConfig::default()
    };
    let dataset = Dataset::new(
        Arc::new(descriptor("slow", BackendKind::SearchIndex)),
        Arc::new(provider),
        config,
    );
    let err = run(&dataset, &params(&[])).await.unwrap_err();
    assert!(matches!(err, OgcError::BackendUnavailable(_)));
    assert!(err.is_retryable());
}

// ============================================================================
// Reprojection and writes
// ============================================================================

const BERLIN_3857: (f64, f64) = (1_492_232.653_387_255_7, 6_894_701.264_846_518);

fn mercator_dataset() -> Dataset {
    let descriptor = descriptor("mercator", BackendKind::Document)
        .with_storage_crs(CrsCode::Epsg3857)
        .with_supported_crs([CrsCode::Crs84, CrsCode::Epsg4326]);
    let stored = Feature::new("berlin").with_geometry(Geometry::point(BERLIN_3857.0, BERLIN_3857.1));
    let provider =
        MemoryProvider::with_features(FeatureSchema::from_descriptor(&descriptor), [stored]);
    Dataset::new(Arc::new(descriptor), Arc::new(provider), ExecutorConfig::default())
}

#[tokio::test]
async fn test_results_are_reprojected_to_output_crs() {
    let dataset = mercator_dataset();

    let envelope = run(&dataset, &params(&[("bbox", "13,52,14,53")])).await.unwrap();
    let Some(Geometry::Point([lon, lat])) = envelope.features[0].geometry else {
        panic!("expected a point");
    };
    assert_coords_approx_eq!((lon, lat), (13.404954, 52.520008), 1e-6);

    let envelope = run(&dataset, &params(&[("crs", "EPSG:4326")])).await.unwrap();
    assert_eq!(envelope.crs, CrsCode::Epsg4326.uri());
    let Some(Geometry::Point([lat, lon])) = envelope.features[0].geometry else {
        panic!("expected a point");
    };
    assert_coords_approx_eq!((lon, lat), (13.404954, 52.520008), 1e-6);

    let feature = dataset.get("berlin", CrsCode::Epsg3857).await.unwrap().unwrap();
    assert_eq!(
        feature.geometry,
        Some(Geometry::point(BERLIN_3857.0, BERLIN_3857.1))
    );
}

#[tokio::test]
async fn test_properties_subset_and_skip_geometry() {
    let dataset = memory_dataset(&points_collection());
    let envelope = run(
        &dataset,
        &params(&[("properties", "rank"), ("skipGeometry", "true"), ("limit", "1")]),
    )
    .await
    .unwrap();
    let feature = &envelope.features[0];
    assert!(feature.geometry.is_none());
    assert_eq!(feature.properties.keys().collect::<Vec<_>>(), vec!["rank"]);
}

#[tokio::test]
async fn test_writes_through_dataset() {
    let dataset = mercator_dataset();

    let id = dataset
        .create(
            Feature::new("paris").with_geometry(Geometry::point(2.2945, 48.8584)),
            CrsCode::Crs84,
        )
        .await
        .unwrap();
    assert_eq!(id, "paris");
    let stored = dataset.get("paris", CrsCode::Epsg3857).await.unwrap().unwrap();
    let Some(Geometry::Point([x, _])) = stored.geometry else {
        panic!("expected a point");
    };
    assert!(x > 255_000.0 && x < 256_000.0);

    let err = dataset
        .create(Feature::new("paris"), CrsCode::Crs84)
        .await
        .unwrap_err();
    assert!(matches!(err, OgcError::Conflict(_)));

    let err = dataset
        .update("nowhere", Feature::new("nowhere"), CrsCode::Crs84)
        .await
        .unwrap_err();
    assert!(matches!(err, OgcError::NotFound(_)));

    dataset.delete("paris").await.unwrap();
    assert!(dataset.get("paris", CrsCode::Crs84).await.unwrap().is_none());
}

#[tokio::test]
async fn test_read_only_dataset_rejects_writes() {
    let dir = temp_test_dir();
    let dataset = geojson_dataset(dir.path(), &points_collection(), ExecutorConfig::default());
    let err = dataset.delete("p1").await.unwrap_err();
    assert!(matches!(err, OgcError::Validation(_)));
}
