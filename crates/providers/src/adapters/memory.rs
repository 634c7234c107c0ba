//! In-process feature store.
//!
//! Every clause is evaluated natively with the same predicate the executor
//! uses for residual clauses, so this adapter is also the reference for
//! adapter behavior in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use feature_query::{compare_features, is_after, BackendKind, Feature};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::eval::{FeatureSchema, Predicate};
use crate::traits::{
    FeatureProvider, FeatureWriter, FetchRequest, FetchResult, FetchStart, MatchCount,
    ProviderCapabilities, ProviderRow,
};

pub struct MemoryProvider {
    schema: FeatureSchema,
    features: RwLock<BTreeMap<String, Feature>>,
    read_only: bool,
}

impl MemoryProvider {
    pub fn new(schema: FeatureSchema) -> Self {
        Self {
            schema,
            features: RwLock::new(BTreeMap::new()),
            read_only: false,
        }
    }

    /// Seed with features; a repeated id keeps the last one.
    pub fn with_features<I>(schema: FeatureSchema, features: I) -> Self
    where
        I: IntoIterator<Item = Feature>,
    {
        let map = features.into_iter().map(|f| (f.id.clone(), f)).collect();
        Self {
            schema,
            features: RwLock::new(map),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub async fn len(&self) -> usize {
        self.features.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.features.read().await.is_empty()
    }
}

#[async_trait]
impl FeatureProvider for MemoryProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            write: !self.read_only,
            ..ProviderCapabilities::full()
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> ProviderResult<FetchResult> {
        let features = self.features.read().await;
        let predicate = Predicate {
            bbox: request.bbox.as_ref(),
            datetime: request.datetime.as_ref(),
            filters: &request.filters,
        };
        let id_field = self.schema.id_field.as_str();

        let mut matching: Vec<&Feature> = features
            .values()
            .filter(|f| predicate.matches(f, &self.schema))
            .collect();
        if !request.sort_by.is_empty() {
            matching.sort_by(|a, b| compare_features(a, b, &request.sort_by, id_field));
        }

        let matched = request.count.then(|| MatchCount {
            value: matching.len() as u64,
            exact: true,
        });

        let rows: Vec<ProviderRow> = match &request.start {
            FetchStart::Offset(offset) => matching
                .into_iter()
                .skip(*offset as usize)
                .take(request.limit)
                .map(|f| Ok(f.clone()))
                .collect(),
            FetchStart::After { key, id } => matching
                .into_iter()
                .filter(|f| is_after(f, key, id, &request.sort_by, id_field))
                .take(request.limit)
                .map(|f| Ok(f.clone()))
                .collect(),
        };

        debug!(rows = rows.len(), "Memory fetch");
        Ok(FetchResult { rows, matched })
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<ProviderRow>> {
        Ok(self.features.read().await.get(id).cloned().map(Ok))
    }

    fn writer(&self) -> Option<&dyn FeatureWriter> {
        if self.read_only {
            None
        } else {
            Some(self)
        }
    }
}

#[async_trait]
impl FeatureWriter for MemoryProvider {
    async fn create(&self, feature: Feature) -> ProviderResult<String> {
        let mut features = self.features.write().await;
        let id = if feature.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            feature.id.clone()
        };
        if features.contains_key(&id) {
            return Err(ProviderError::Conflict(format!("feature '{}' already exists", id)));
        }
        features.insert(id.clone(), Feature { id: id.clone(), ..feature });
        Ok(id)
    }

    async fn update(&self, id: &str, feature: Feature) -> ProviderResult<bool> {
        let mut features = self.features.write().await;
        match features.get_mut(id) {
            Some(slot) => {
                *slot = Feature {
                    id: id.to_string(),
                    ..feature
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> ProviderResult<bool> {
        Ok(self.features.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_query::{FilterOp, Literal, PropertyFilter, SortKey};
    use ogc_common::{BoundingBox, Geometry};

    fn provider() -> MemoryProvider {
        MemoryProvider::with_features(
            FeatureSchema::default(),
            (0..6).map(|i| {
                Feature::new(format!("f{}", i))
                    .with_geometry(Geometry::point(i as f64, i as f64))
                    .with_property("rank", (6 - i) as i64)
            }),
        )
    }

    #[tokio::test]
    async fn test_fetch_offset_and_count() {
        let p = provider();
        let mut request = FetchRequest::all(2);
        request.start = FetchStart::Offset(3);
        request.count = true;
        let result = p.fetch(&request).await.unwrap();
        let ids: Vec<_> = result.rows.iter().map(|r| r.as_ref().unwrap().id.clone()).collect();
        assert_eq!(ids, vec!["f3", "f4"]);
        assert_eq!(result.matched, Some(MatchCount { value: 6, exact: true }));
    }

    #[tokio::test]
    async fn test_fetch_sorted_keyset() {
        let p = provider();
        let mut request = FetchRequest::all(2);
        request.sort_by = vec![SortKey::asc("rank")];
        request.bbox = Some(BoundingBox::new(0.5, 0.5, 4.5, 4.5));
        request.start = FetchStart::After {
            key: vec![serde_json::json!(3)],
            id: "f3".into(),
        };
        let result = p.fetch(&request).await.unwrap();
        let ids: Vec<_> = result.rows.iter().map(|r| r.as_ref().unwrap().id.clone()).collect();
        // ranks 5..2 in bbox; after rank 3 come f2 (4) and f1 (5)
        assert_eq!(ids, vec!["f2", "f1"]);
        assert!(result.matched.is_none());
    }

    #[tokio::test]
    async fn test_filter_and_count_only() {
        let p = provider();
        let mut request = FetchRequest::all(0);
        request.filters = vec![PropertyFilter::new("rank", FilterOp::Gt, Literal::Number(4.0))];
        request.count = true;
        let result = p.fetch(&request).await.unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.matched.map(|m| m.value), Some(2));
    }

    #[tokio::test]
    async fn test_writes() {
        let p = provider();
        let writer = p.writer().unwrap();

        let err = writer.create(Feature::new("f1")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Conflict(_)));

        let id = writer.create(Feature::new("")).await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(p.len().await, 7);

        assert!(writer.update("f1", Feature::new("x").with_property("rank", 0)).await.unwrap());
        let row = p.get("f1").await.unwrap().unwrap().unwrap();
        assert_eq!(row.id, "f1");
        assert_eq!(row.properties["rank"], 0);

        assert!(!writer.update("missing", Feature::new("missing")).await.unwrap());
        assert!(writer.delete("f1").await.unwrap());
        assert!(!writer.delete("f1").await.unwrap());
        assert!(p.get("f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_only_has_no_writer() {
        let p = provider().read_only();
        assert!(p.writer().is_none());
        assert!(!p.capabilities().write);
    }
}
