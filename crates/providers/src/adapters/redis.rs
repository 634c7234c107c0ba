//! Redis document store.
//!
//! Layout under a key prefix:
//!
//! - `{prefix}:features`: hash of id to GeoJSON feature text
//! - `{prefix}:ids`: sorted set of ids, all scored 0, read in lexical order
//!
//! Only id-ordered paging runs in Redis; every other clause is residual.

use async_trait::async_trait;
use feature_query::{BackendKind, Feature, RecordError};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, Script};
use tracing::{debug, info, instrument};

use crate::error::{ProviderError, ProviderResult};
use crate::eval::FeatureSchema;
use crate::traits::{
    FeatureProvider, FeatureWriter, FetchRequest, FetchResult, FetchStart, MatchCount,
    ProviderCapabilities, ProviderRow,
};

/// Overwrite a document only while its id is stored; returns 1 when written.
const UPDATE_IF_PRESENT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZADD', KEYS[2], 0, ARGV[1])
return 1
"#;

pub struct RedisProvider {
    conn: MultiplexedConnection,
    update_script: Script,
    features_key: String,
    ids_key: String,
    schema: FeatureSchema,
}

impl RedisProvider {
    /// Connect to Redis.
    pub async fn connect(url: &str, prefix: &str, schema: FeatureSchema) -> ProviderResult<Self> {
        let client = Client::open(url)
            .map_err(|e| ProviderError::Config(format!("redis url: {}", e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ProviderError::unavailable("redis connection failed", e))?;
        info!(prefix, "Connected to Redis dataset");
        Ok(Self {
            conn,
            update_script: Script::new(UPDATE_IF_PRESENT),
            features_key: format!("{}:features", prefix),
            ids_key: format!("{}:ids", prefix),
            schema,
        })
    }

    fn decode(&self, id: &str, text: Option<String>) -> ProviderRow {
        let text = text.ok_or_else(|| RecordError::new(Some(id), "indexed id has no document"))?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| RecordError::new(Some(id), format!("document is not JSON: {}", e)))?;
        Feature::from_geojson(value, &self.schema.id_field).map_err(|e| RecordError {
            id: e.id.or_else(|| Some(id.to_string())),
            message: e.message,
        })
    }

    fn encode(feature: &Feature) -> ProviderResult<String> {
        serde_json::to_string(feature)
            .map_err(|e| ProviderError::Unsupported(format!("feature is not serializable: {}", e)))
    }
}

#[async_trait]
impl FeatureProvider for RedisProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            keyset: true,
            exact_count: true,
            write: true,
            ..ProviderCapabilities::default()
        }
    }

    #[instrument(skip(self, request), fields(prefix = %self.ids_key))]
    async fn fetch(&self, request: &FetchRequest) -> ProviderResult<FetchResult> {
        if request.has_clauses() || !request.sort_by.is_empty() {
            return Err(ProviderError::Unsupported(
                "redis datasets only page by id".to_string(),
            ));
        }
        let mut conn = self.conn.clone();

        let matched = if request.count {
            let total: u64 = conn.zcard(&self.ids_key).await?;
            Some(MatchCount {
                value: total,
                exact: true,
            })
        } else {
            None
        };

        if request.limit == 0 {
            return Ok(FetchResult {
                rows: Vec::new(),
                matched,
            });
        }

        let (min, offset) = match &request.start {
            FetchStart::Offset(n) => ("-".to_string(), *n),
            FetchStart::After { id, .. } => (format!("({}", id), 0),
        };
        let ids: Vec<String> = redis::cmd("ZRANGEBYLEX")
            .arg(&self.ids_key)
            .arg(&min)
            .arg("+")
            .arg("LIMIT")
            .arg(offset)
            .arg(request.limit)
            .query_async(&mut conn)
            .await?;

        let documents: Vec<Option<String>> = if ids.is_empty() {
            Vec::new()
        } else {
            redis::cmd("HMGET")
                .arg(&self.features_key)
                .arg(&ids)
                .query_async(&mut conn)
                .await?
        };

        let rows: Vec<ProviderRow> = ids
            .iter()
            .zip(documents.into_iter().chain(std::iter::repeat(None)))
            .map(|(id, text)| self.decode(id, text))
            .collect();
        debug!(rows = rows.len(), "Redis fetch");
        Ok(FetchResult { rows, matched })
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<ProviderRow>> {
        let mut conn = self.conn.clone();
        let text: Option<String> = conn.hget(&self.features_key, id).await?;
        Ok(text.map(|t| self.decode(id, Some(t))))
    }

    fn writer(&self) -> Option<&dyn FeatureWriter> {
        Some(self)
    }
}

#[async_trait]
impl FeatureWriter for RedisProvider {
    async fn create(&self, mut feature: Feature) -> ProviderResult<String> {
        if feature.id.is_empty() {
            feature.id = uuid::Uuid::new_v4().to_string();
        }
        let document = Self::encode(&feature)?;
        let mut conn = self.conn.clone();
        let (inserted, _): (bool, i64) = redis::pipe()
            .atomic()
            .hset_nx(&self.features_key, &feature.id, &document)
            .zadd(&self.ids_key, &feature.id, 0)
            .query_async(&mut conn)
            .await?;
        if !inserted {
            return Err(ProviderError::Conflict(format!(
                "feature '{}' already exists",
                feature.id
            )));
        }
        Ok(feature.id)
    }

    async fn update(&self, id: &str, mut feature: Feature) -> ProviderResult<bool> {
        feature.id = id.to_string();
        let document = Self::encode(&feature)?;
        let mut conn = self.conn.clone();
        let written: i64 = self
            .update_script
            .key(&self.features_key)
            .key(&self.ids_key)
            .arg(id)
            .arg(&document)
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn delete(&self, id: &str) -> ProviderResult<bool> {
        let mut conn = self.conn.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .hdel(&self.features_key, id)
            .zrem(&self.ids_key, id)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}
