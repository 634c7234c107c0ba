//! Dataset configuration loading and provider construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use feature_query::{CapabilityDescriptor, Feature};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::adapters::{
    GeoJsonProvider, GeoJsonSource, MemoryProvider, PostgresProvider, RedisProvider,
    RemoteProvider, SqlTable, SqliteProvider,
};
use crate::error::{ProviderError, ProviderResult};
use crate::eval::FeatureSchema;
use crate::executor::{Dataset, ExecutorConfig};
use crate::traits::FeatureProvider;

/// Backend of one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    Memory {
        /// Inline GeoJSON features.
        #[serde(default)]
        features: Vec<Value>,
        #[serde(default)]
        read_only: bool,
    },
    Geojson {
        source: GeoJsonSource,
    },
    Sqlite {
        /// Database file; `:memory:` for a private in-memory database.
        path: PathBuf,
        #[serde(flatten)]
        table: SqlTable,
        /// Create the table if it does not exist.
        #[serde(default)]
        create: bool,
    },
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        #[serde(flatten)]
        table: SqlTable,
    },
    Redis {
        url: String,
        prefix: String,
    },
    Remote {
        base_url: String,
        collection: String,
    },
}

fn default_max_connections() -> u32 {
    5
}

/// One dataset: its descriptor plus where its features live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(flatten)]
    pub descriptor: CapabilityDescriptor,
    pub provider: ProviderConfig,
}

/// Everything needed to build a registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

impl CatalogConfig {
    pub fn from_yaml_str(yaml: &str) -> ProviderResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ProviderError::Config(e.to_string()))
    }

    /// Load a catalog file.
    pub fn load(path: &Path) -> ProviderResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProviderError::Config(format!("{}: {}", path.display(), e)))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ProviderError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load a directory: `executor.yaml` holds executor settings, every
    /// other YAML file is one dataset.
    pub fn load_from_dir(dir: &Path) -> ProviderResult<Self> {
        if !dir.exists() {
            warn!(dir = %dir.display(), "Dataset config directory does not exist, using defaults");
            return Ok(Self::default());
        }

        let read_err = |e: std::io::Error| ProviderError::Config(format!("{}: {}", dir.display(), e));
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(read_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_err)?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
            .collect();
        paths.sort();

        let mut config = Self::default();
        for path in paths {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| ProviderError::Config(format!("{}: {}", path.display(), e)))?;
            let parse_err = |e: serde_yaml::Error| ProviderError::Config(format!("{}: {}", path.display(), e));
            if path.file_stem().and_then(|s| s.to_str()) == Some("executor") {
                config.executor = serde_yaml::from_str(&content).map_err(parse_err)?;
            } else {
                config
                    .datasets
                    .push(serde_yaml::from_str(&content).map_err(parse_err)?);
            }
        }
        info!(dir = %dir.display(), datasets = config.datasets.len(), "Loaded dataset configs");
        Ok(config)
    }
}

/// Construct the adapter for a dataset.
pub async fn build_provider(
    config: &ProviderConfig,
    descriptor: &CapabilityDescriptor,
    executor: &ExecutorConfig,
) -> ProviderResult<Arc<dyn FeatureProvider>> {
    let schema = FeatureSchema::from_descriptor(descriptor);
    let provider: Arc<dyn FeatureProvider> = match config {
        ProviderConfig::Memory { features, read_only } => {
            let decoded = features
                .iter()
                .cloned()
                .map(|value| Feature::from_geojson(value, &schema.id_field))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ProviderError::Config(format!("inline feature: {}", e.message)))?;
            let provider = MemoryProvider::with_features(schema, decoded);
            Arc::new(if *read_only { provider.read_only() } else { provider })
        }
        ProviderConfig::Geojson { source } => Arc::new(GeoJsonProvider::new(source.clone(), schema)),
        ProviderConfig::Sqlite { path, table, create } => {
            let provider = if path.as_os_str() == ":memory:" {
                SqliteProvider::in_memory(table.clone(), schema).await?
            } else {
                SqliteProvider::open(path, table.clone(), schema).await?
            };
            if *create || path.as_os_str() == ":memory:" {
                provider.create_table().await?;
            }
            Arc::new(provider)
        }
        ProviderConfig::Postgres {
            url,
            max_connections,
            table,
        } => Arc::new(PostgresProvider::connect(url, *max_connections, table.clone(), schema).await?),
        ProviderConfig::Redis { url, prefix } => {
            Arc::new(RedisProvider::connect(url, prefix, schema).await?)
        }
        ProviderConfig::Remote {
            base_url,
            collection,
        } => Arc::new(RemoteProvider::new(
            base_url,
            collection,
            executor.backend_timeout,
            schema,
        )?),
    };

    if provider.kind() != descriptor.backend_kind {
        warn!(
            dataset = %descriptor.id,
            declared = ?descriptor.backend_kind,
            actual = ?provider.kind(),
            "Descriptor backend kind differs from its provider"
        );
    }
    Ok(provider)
}

/// Build a ready-to-query dataset.
pub async fn build_dataset(
    config: &DatasetConfig,
    executor: &ExecutorConfig,
) -> ProviderResult<Dataset> {
    let provider = build_provider(&config.provider, &config.descriptor, executor).await?;
    Ok(Dataset::new(
        Arc::new(config.descriptor.clone()),
        provider,
        executor.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
executor:
  backend_timeout: 2.5
  fetch_window: 100
datasets:
  - id: parks
    title: Parks
    backend_kind: document
    queryables: [name]
    provider:
      type: memory
      features:
        - type: Feature
          id: p1
          geometry: { type: Point, coordinates: [1.0, 2.0] }
          properties: { name: Central }
  - id: roads
    backend_kind: relational
    storage_crs: EPSG:3857
    provider:
      type: sqlite
      path: ":memory:"
      table: roads
      columns: [name, lanes]
"#;

    #[test]
    fn test_catalog_from_yaml() {
        let catalog = CatalogConfig::from_yaml_str(CATALOG).unwrap();
        assert_eq!(catalog.executor.backend_timeout.as_millis(), 2500);
        assert_eq!(catalog.executor.fetch_window, 100);
        assert_eq!(catalog.executor.max_scan, 10_000);
        assert_eq!(catalog.datasets.len(), 2);
        assert!(matches!(
            &catalog.datasets[1].provider,
            ProviderConfig::Sqlite { table, .. } if table.columns == vec!["name", "lanes"]
        ));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let yaml = "datasets:\n  - id: x\n    backend_kind: document\n    provider: { type: cassandra }\n";
        assert!(CatalogConfig::from_yaml_str(yaml).is_err());
    }

    #[tokio::test]
    async fn test_build_memory_dataset() {
        let catalog = CatalogConfig::from_yaml_str(CATALOG).unwrap();
        let dataset = build_dataset(&catalog.datasets[0], &catalog.executor).await.unwrap();
        assert_eq!(dataset.id(), "parks");
        let feature = dataset
            .get("p1", ogc_common::CrsCode::Crs84)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(feature.properties["name"], "Central");
    }
}
