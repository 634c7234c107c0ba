//! The shipped sample configuration stays loadable.

use std::path::PathBuf;

use ogcapi_cli::{App, AppConfig};
use processes::JobStoreConfig;
use providers::ProviderConfig;

fn sample_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/ogcapi.yaml")
}

#[test]
fn test_sample_config_parses() {
    let config = AppConfig::load(&sample_path(), None).unwrap();
    let ids: Vec<_> = config
        .catalog
        .datasets
        .iter()
        .map(|d| d.descriptor.id.as_str())
        .collect();
    assert_eq!(ids, vec!["landmarks", "observations"]);
    assert!(matches!(config.jobs.store, JobStoreConfig::Sqlite { .. }));
}

#[tokio::test]
async fn test_sample_datasets_answer_queries() {
    let mut config = AppConfig::load(&sample_path(), None).unwrap();
    let dir = tempfile::tempdir().unwrap();
    for dataset in &mut config.catalog.datasets {
        if let ProviderConfig::Sqlite { path, .. } = &mut dataset.provider {
            *path = dir.path().join("observations.db");
        }
    }
    config.jobs.store = JobStoreConfig::Sqlite {
        path: dir.path().join("jobs.db"),
    };

    let app = App::init(&config).await.unwrap();
    let params = feature_query::RawQueryParams::parse_assignments([
        "bbox=10,40,20,55",
        "sortby=name",
    ])
    .unwrap();
    let out = app.query("landmarks", &params).await.unwrap();
    let ids: Vec<_> = out["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["brandenburg", "colosseum"]);

    let empty = app
        .query("observations", &feature_query::RawQueryParams::new())
        .await
        .unwrap();
    assert_eq!(empty["numberMatched"], 0);
}
