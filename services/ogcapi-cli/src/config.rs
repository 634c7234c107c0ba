//! Configuration loading for the CLI.

use std::path::Path;

use anyhow::{Context, Result};
use processes::{JobManagerConfig, JobStoreConfig};
use providers::CatalogConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Job engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub store: JobStoreConfig,

    #[serde(flatten)]
    pub manager: JobManagerConfig,
}

/// Top-level configuration file.
///
/// ```yaml
/// executor: { backend_timeout: 5 }
/// datasets: [...]
/// jobs:
///   sync_timeout: 30
///   store: { type: sqlite, path: data/jobs.db }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub jobs: JobsConfig,
}

impl AppConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse configuration")
    }

    /// Load the main file and, optionally, extra dataset files from a
    /// directory. A missing main file yields the defaults.
    pub fn load(file: &Path, datasets_dir: Option<&Path>) -> Result<Self> {
        let mut config = if file.exists() {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read: {}", file.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse: {}", file.display()))?
        } else {
            warn!(path = %file.display(), "Config file does not exist, using defaults");
            Self::default()
        };

        if let Some(dir) = datasets_dir {
            let extra = CatalogConfig::load_from_dir(dir)
                .with_context(|| format!("Failed to load datasets from {}", dir.display()))?;
            config.catalog.datasets.extend(extra.datasets);
        }

        info!(
            datasets = config.catalog.datasets.len(),
            "Configuration loaded"
        );
        Ok(config)
    }
}
