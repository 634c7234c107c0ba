//! Dataset lookup.

use std::collections::HashMap;
use std::sync::Arc;

use feature_query::CapabilityDescriptor;
use futures::future::try_join_all;
use ogc_common::{OgcError, OgcResult};
use tracing::info;

use crate::config::{build_dataset, CatalogConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::executor::Dataset;

/// All configured datasets, by id.
#[derive(Default, Clone)]
pub struct DatasetRegistry {
    datasets: HashMap<String, Arc<Dataset>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every dataset in a catalog, connecting to backends
    /// concurrently. Duplicate ids are rejected.
    pub async fn from_config(config: &CatalogConfig) -> ProviderResult<Self> {
        let built = try_join_all(
            config
                .datasets
                .iter()
                .map(|dataset| build_dataset(dataset, &config.executor)),
        )
        .await?;

        let mut registry = Self::new();
        for dataset in built {
            registry.insert(dataset)?;
        }
        info!(datasets = registry.len(), "Dataset registry ready");
        Ok(registry)
    }

    pub fn insert(&mut self, dataset: Dataset) -> ProviderResult<()> {
        let id = dataset.id().to_string();
        if self.datasets.contains_key(&id) {
            return Err(ProviderError::Config(format!("dataset '{}' is defined twice", id)));
        }
        self.datasets.insert(id, Arc::new(dataset));
        Ok(())
    }

    pub fn get(&self, id: &str) -> OgcResult<Arc<Dataset>> {
        self.datasets
            .get(id)
            .cloned()
            .ok_or_else(|| OgcError::NotFound(format!("dataset '{}'", id)))
    }

    /// Descriptors sorted by id.
    pub fn descriptors(&self) -> Vec<Arc<CapabilityDescriptor>> {
        let mut descriptors: Vec<_> = self
            .datasets
            .values()
            .map(|d| d.descriptor().clone())
            .collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}
