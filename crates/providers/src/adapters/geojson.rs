//! Flat GeoJSON files, local or in S3-compatible object storage.
//!
//! The file is read once, on first use, and held in id order. Paging by id
//! is the only native operation.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use feature_query::{BackendKind, Feature, RecordError};
use object_store::{aws::AmazonS3Builder, local::LocalFileSystem, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::eval::FeatureSchema;
use crate::traits::{
    FeatureProvider, FetchRequest, FetchResult, FetchStart, MatchCount, ProviderCapabilities,
    ProviderRow,
};

/// S3/MinIO connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// S3/MinIO endpoint URL
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// AWS region (use "us-east-1" for MinIO)
    #[serde(default = "default_region")]
    pub region: String,
    /// Allow HTTP (for local MinIO)
    #[serde(default)]
    pub allow_http: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Where the file lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoJsonSource {
    File(PathBuf),
    S3 {
        #[serde(flatten)]
        storage: ObjectStorageConfig,
        key: String,
    },
}

impl GeoJsonSource {
    fn open(&self) -> ProviderResult<(Arc<dyn ObjectStore>, Path)> {
        match self {
            GeoJsonSource::File(path) => {
                let location = Path::from_filesystem_path(path).map_err(|e| {
                    ProviderError::Config(format!("{}: {}", path.display(), e))
                })?;
                Ok((Arc::new(LocalFileSystem::new()), location))
            }
            GeoJsonSource::S3 { storage, key } => {
                let store = AmazonS3Builder::new()
                    .with_endpoint(&storage.endpoint)
                    .with_bucket_name(&storage.bucket)
                    .with_access_key_id(&storage.access_key_id)
                    .with_secret_access_key(&storage.secret_access_key)
                    .with_region(&storage.region)
                    .with_allow_http(storage.allow_http)
                    .build()
                    .map_err(|e| ProviderError::Config(format!("S3 client: {}", e)))?;
                Ok((Arc::new(store), Path::from(key.as_str())))
            }
        }
    }
}

/// Decode a FeatureCollection into id-ordered rows.
///
/// Records without a usable id are keyed `#<index>` so every row keeps a
/// stable position; a repeated id is reported on its later occurrences.
pub fn parse_collection(bytes: &[u8], id_field: &str) -> ProviderResult<Vec<(String, ProviderRow)>> {
    let document: Value = serde_json::from_slice(bytes)
        .map_err(|e| ProviderError::Malformed(format!("not JSON: {}", e)))?;
    let features = match document {
        Value::Object(mut object)
            if object.get("type").and_then(Value::as_str) == Some("FeatureCollection") =>
        {
            match object.remove("features") {
                Some(Value::Array(features)) => features,
                _ => {
                    return Err(ProviderError::Malformed(
                        "FeatureCollection has no features array".to_string(),
                    ))
                }
            }
        }
        _ => {
            return Err(ProviderError::Malformed(
                "document is not a FeatureCollection".to_string(),
            ))
        }
    };

    let mut rows: Vec<(String, ProviderRow)> = features
        .into_iter()
        .enumerate()
        .map(|(index, value)| match Feature::from_geojson(value, id_field) {
            Ok(feature) => (feature.id.clone(), Ok(feature)),
            Err(err) => {
                let key = err.id.clone().unwrap_or_else(|| format!("#{}", index));
                let err = RecordError {
                    id: Some(key.clone()),
                    message: err.message,
                };
                (key, Err(err))
            }
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    for i in 1..rows.len() {
        if rows[i].0 == rows[i - 1].0 {
            let id = rows[i].0.clone();
            rows[i].1 = Err(RecordError::new(Some(&id), "duplicate feature id"));
        }
    }
    Ok(rows)
}

pub struct GeoJsonProvider {
    source: GeoJsonSource,
    schema: FeatureSchema,
    rows: OnceCell<Arc<Vec<(String, ProviderRow)>>>,
}

impl GeoJsonProvider {
    pub fn new(source: GeoJsonSource, schema: FeatureSchema) -> Self {
        Self {
            source,
            schema,
            rows: OnceCell::new(),
        }
    }

    #[instrument(skip(self))]
    async fn rows(&self) -> ProviderResult<Arc<Vec<(String, ProviderRow)>>> {
        let rows = self
            .rows
            .get_or_try_init(|| async {
                let (store, location) = self.source.open()?;
                let bytes = store.get(&location).await?.bytes().await?;
                let rows = parse_collection(&bytes, &self.schema.id_field)?;
                let bad = rows.iter().filter(|(_, r)| r.is_err()).count();
                if bad > 0 {
                    warn!(location = %location, bad, "GeoJSON file has undecodable features");
                }
                info!(location = %location, features = rows.len(), "Loaded GeoJSON dataset");
                Ok::<_, ProviderError>(Arc::new(rows))
            })
            .await?;
        Ok(rows.clone())
    }
}

#[async_trait]
impl FeatureProvider for GeoJsonProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::FlatFile
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            keyset: true,
            exact_count: true,
            ..ProviderCapabilities::default()
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> ProviderResult<FetchResult> {
        if request.has_clauses() || !request.sort_by.is_empty() {
            return Err(ProviderError::Unsupported(
                "GeoJSON datasets only page by id".to_string(),
            ));
        }
        let rows = self.rows().await?;

        let start = match &request.start {
            FetchStart::Offset(n) => (*n as usize).min(rows.len()),
            FetchStart::After { id, .. } => rows.partition_point(|(key, _)| key.as_str() <= id.as_str()),
        };
        let page = rows[start..]
            .iter()
            .take(request.limit)
            .map(|(_, row)| row.clone())
            .collect();

        Ok(FetchResult {
            rows: page,
            matched: request.count.then(|| MatchCount {
                value: rows.len() as u64,
                exact: true,
            }),
        })
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<ProviderRow>> {
        let rows = self.rows().await?;
        Ok(rows
            .binary_search_by(|(key, _)| key.as_str().cmp(id))
            .ok()
            .map(|i| rows[i].1.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "id": "b", "geometry": {"type": "Point", "coordinates": [1, 2]}, "properties": {"n": 1}},
            {"type": "Feature", "geometry": null, "properties": {"id": "a"}},
            {"type": "Feature", "geometry": null, "properties": {}},
            {"type": "Feature", "id": "c", "geometry": {"type": "Point", "coordinates": [1]}, "properties": {}},
            {"type": "Feature", "id": "b", "geometry": null, "properties": {}}
        ]
    }"#;

    #[test]
    fn test_parse_collection() {
        let rows = parse_collection(COLLECTION.as_bytes(), "id").unwrap();
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["#2", "a", "b", "b", "c"]);

        assert!(rows[0].1.is_err());
        assert!(rows[1].1.is_ok());
        assert!(rows[2].1.is_ok());
        assert_eq!(
            rows[3].1.as_ref().unwrap_err().message,
            "duplicate feature id"
        );
        assert_eq!(rows[4].1.as_ref().unwrap_err().id.as_deref(), Some("c"));
    }

    #[test]
    fn test_rejects_non_collection() {
        let err = parse_collection(br#"{"type": "Feature"}"#, "id").unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
