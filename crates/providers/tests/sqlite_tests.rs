//! The SQLite adapter behind a dataset, end to end.

use std::sync::Arc;

use feature_query::{
    normalize, BackendKind, CapabilityDescriptor, Feature, FeatureResultEnvelope, PageToken,
    RawQueryParams,
};
use ogc_common::{CrsCode, Geometry, OgcError};
use providers::adapters::{MemoryProvider, SqlTable, SqliteProvider};
use providers::{Dataset, ExecutorConfig, FeatureProvider, FeatureSchema};
use test_utils::{assert_feature_ids, points_collection, temp_test_dir, INSIDE_IDS};

fn descriptor() -> CapabilityDescriptor {
    CapabilityDescriptor::new("points-sql", BackendKind::Relational)
        .with_queryables(["name", "category", "rank", "observed"])
        .with_time_field("observed")
}

fn table() -> SqlTable {
    SqlTable::new("points")
        .with_columns(["name", "category", "rank"])
        .with_time_column("observed")
}

async fn load(dataset: &Dataset) {
    for value in points_collection()["features"].as_array().unwrap() {
        let feature = Feature::from_geojson(value.clone(), "id").unwrap();
        dataset.create(feature, CrsCode::Crs84).await.unwrap();
    }
}

async fn sqlite_dataset() -> (Dataset, Arc<SqliteProvider>) {
    let descriptor = descriptor();
    let provider = SqliteProvider::in_memory(table(), FeatureSchema::from_descriptor(&descriptor))
        .await
        .unwrap();
    provider.create_table().await.unwrap();
    let provider = Arc::new(provider);
    let dataset = Dataset::new(
        Arc::new(descriptor),
        provider.clone(),
        ExecutorConfig::default(),
    );
    load(&dataset).await;
    (dataset, provider)
}

fn memory_dataset() -> Dataset {
    let descriptor = descriptor();
    let features = points_collection()["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|value| Feature::from_geojson(value.clone(), "id").unwrap())
        .collect::<Vec<_>>();
    let provider = MemoryProvider::with_features(FeatureSchema::from_descriptor(&descriptor), features);
    Dataset::new(Arc::new(descriptor), Arc::new(provider), ExecutorConfig::default())
}

async fn run(dataset: &Dataset, pairs: &[(&str, &str)]) -> Result<FeatureResultEnvelope, OgcError> {
    let params = RawQueryParams::from_pairs(pairs.iter().copied());
    dataset.query(normalize(&params, dataset.descriptor())?).await
}

fn ids(envelope: &FeatureResultEnvelope) -> Vec<String> {
    envelope.features.iter().map(|f| f.id.clone()).collect()
}

#[tokio::test]
async fn test_capabilities() {
    let (dataset, provider) = sqlite_dataset().await;
    let caps = dataset.capabilities();
    assert!(caps.bbox && caps.datetime && caps.sort && caps.write);
    assert!(!caps.keyset);
    assert_eq!(provider.kind(), BackendKind::Relational);
}

#[tokio::test]
async fn test_bbox_paging_uses_offsets() {
    let (dataset, _) = sqlite_dataset().await;
    let mut pairs = vec![("bbox", "0,0,10,10".to_string()), ("limit", "2".to_string())];
    let mut pages = Vec::new();
    loop {
        let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let envelope = run(&dataset, &borrowed).await.unwrap();
        assert_eq!(envelope.number_matched, 5);
        assert!(envelope.number_matched_exact);
        pages.push(ids(&envelope));

        let Some(token) = envelope.next_token else {
            break;
        };
        assert!(matches!(
            PageToken::decode(&token).unwrap(),
            PageToken::Offset { .. }
        ));
        pairs.retain(|(k, _)| *k != "cursor");
        pairs.push(("cursor", token));
    }
    assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
    assert_eq!(pages.concat(), INSIDE_IDS.to_vec());
}

#[tokio::test]
async fn test_native_filter_and_sort() {
    let (dataset, _) = sqlite_dataset().await;
    let envelope = run(&dataset, &[("filter", "category eq 'a'"), ("sortby", "-rank")])
        .await
        .unwrap();
    assert_feature_ids!(envelope, ["p3", "p5", "q2", "p1"]);
    assert_eq!(envelope.number_matched, 4);
}

#[tokio::test]
async fn test_mismatched_kinds_match_nothing_like_memory() {
    let (sqlite, _) = sqlite_dataset().await;
    let memory = memory_dataset();

    for filter in ["rank lt 'x'", "rank gt ''", "name gt 3", "name lt 1e9", "category eq 0"] {
        let from_sqlite = run(&sqlite, &[("filter", filter)]).await.unwrap();
        let from_memory = run(&memory, &[("filter", filter)]).await.unwrap();
        assert_eq!(from_sqlite.number_matched, 0, "{}", filter);
        assert_eq!(from_memory.number_matched, 0, "{}", filter);
    }

    let envelope = run(&sqlite, &[("filter", "rank in (3, 'x', 6)")]).await.unwrap();
    let expected = run(&memory, &[("filter", "rank in (3, 'x', 6)")]).await.unwrap();
    assert_eq!(ids(&envelope), ids(&expected));
    assert_feature_ids!(envelope, ["p2", "p3"]);
}

#[tokio::test]
async fn test_like_runs_as_residual() {
    let (dataset, _) = sqlite_dataset().await;
    let envelope = run(&dataset, &[("filter", "name like 'point p%'"), ("limit", "3")])
        .await
        .unwrap();
    assert_feature_ids!(envelope, ["p1", "p2", "p3"]);
    assert_eq!(envelope.number_matched, 5);
    assert!(envelope.number_matched_exact);
    assert!(matches!(
        PageToken::decode(envelope.next_token.as_deref().unwrap()).unwrap(),
        PageToken::Scan { .. }
    ));
}

#[tokio::test]
async fn test_datetime_interval() {
    let (dataset, _) = sqlite_dataset().await;
    let envelope = run(
        &dataset,
        &[("datetime", "2024-01-02T00:00:00Z/2024-01-04T00:00:00Z")],
    )
    .await
    .unwrap();
    assert_feature_ids!(envelope, ["p2", "p3", "p4"]);
}

#[tokio::test]
async fn test_update_and_delete() {
    let (dataset, _) = sqlite_dataset().await;

    let moved = Feature::new("p1")
        .with_geometry(Geometry::point(50.0, 50.0))
        .with_property("name", "moved")
        .with_property("category", "a")
        .with_property("rank", 9);
    dataset.update("p1", moved, CrsCode::Crs84).await.unwrap();

    let inside = run(&dataset, &[("bbox", "0,0,10,10")]).await.unwrap();
    assert_eq!(inside.number_matched, 4);
    let stored = dataset.get("p1", CrsCode::Crs84).await.unwrap().unwrap();
    assert_eq!(stored.properties["name"], "moved");

    dataset.delete("p1").await.unwrap();
    assert!(dataset.get("p1", CrsCode::Crs84).await.unwrap().is_none());
    let err = dataset.delete("p1").await.unwrap_err();
    assert!(matches!(err, OgcError::NotFound(_)));
}

#[tokio::test]
async fn test_duplicate_insert_is_a_conflict() {
    let (dataset, _) = sqlite_dataset().await;
    let err = dataset
        .create(Feature::new("p2"), CrsCode::Crs84)
        .await
        .unwrap_err();
    assert!(matches!(err, OgcError::Conflict(_)));
}

#[tokio::test]
async fn test_corrupt_row_is_an_integrity_error() {
    let (dataset, provider) = sqlite_dataset().await;
    sqlx::query("UPDATE \"points\" SET \"geom\" = 'not json' WHERE \"id\" = 'p3'")
        .execute(provider.pool())
        .await
        .unwrap();

    let envelope = run(&dataset, &[("filter", "category eq 'a'")]).await.unwrap();
    assert_feature_ids!(envelope, ["p1", "p5", "q2"]);
    assert_eq!(envelope.integrity_errors.len(), 1);
    assert_eq!(envelope.integrity_errors[0].id.as_deref(), Some("p3"));
}

#[tokio::test]
async fn test_file_database_persists() {
    let dir = temp_test_dir();
    let path = dir.path().join("points.sqlite");
    let schema = FeatureSchema::from_descriptor(&descriptor());

    {
        let provider = SqliteProvider::open(&path, table(), schema.clone()).await.unwrap();
        provider.create_table().await.unwrap();
        let dataset = Dataset::new(
            Arc::new(descriptor()),
            Arc::new(provider),
            ExecutorConfig::default(),
        );
        load(&dataset).await;
    }

    let provider = SqliteProvider::open(&path, table(), schema).await.unwrap();
    let dataset = Dataset::new(
        Arc::new(descriptor()),
        Arc::new(provider),
        ExecutorConfig::default(),
    );
    let hits = run(&dataset, &[("resulttype", "hits")]).await.unwrap();
    assert_eq!(hits.number_matched, 8);
}
