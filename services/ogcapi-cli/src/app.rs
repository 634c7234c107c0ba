//! Runtime state and the operations behind each subcommand.
//!
//! Every operation returns the JSON document the CLI prints, so the same
//! calls can be tested without a terminal.

use std::time::Duration;

use feature_query::{normalize, CapabilityDescriptor, Feature, RawQueryParams};
use ogc_common::{CrsCode, OgcError, OgcResult};
use processes::{JobManager, JobMode, ProcessRegistry, SubmitOutcome};
use providers::DatasetRegistry;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::AppConfig;

/// Everything a command needs: the datasets and the job engine.
pub struct App {
    datasets: DatasetRegistry,
    jobs: JobManager,
}

impl App {
    /// Build datasets and the job manager, then settle jobs an earlier run
    /// left unfinished.
    pub async fn init(config: &AppConfig) -> anyhow::Result<Self> {
        let datasets = DatasetRegistry::from_config(&config.catalog).await?;
        let store = config.jobs.store.open().await?;
        let jobs = JobManager::new(
            ProcessRegistry::with_builtins(),
            store,
            config.jobs.manager.clone(),
        );

        let recovered = jobs.recover_interrupted().await?;
        if recovered > 0 {
            warn!(recovered, "Settled jobs interrupted by a previous run");
        }
        info!(datasets = datasets.len(), "Application ready");
        Ok(Self { datasets, jobs })
    }

    // ========================================================================
    // Features
    // ========================================================================

    pub fn collections(&self) -> OgcResult<Value> {
        let descriptors = self.datasets.descriptors();
        let collections: Vec<&CapabilityDescriptor> = descriptors.iter().map(|d| d.as_ref()).collect();
        Ok(json!({ "collections": to_json(&collections)? }))
    }

    pub async fn query(&self, collection: &str, params: &RawQueryParams) -> OgcResult<Value> {
        let dataset = self.datasets.get(collection)?;
        let query = normalize(params, dataset.descriptor())?;
        to_json(&dataset.query(query).await?)
    }

    pub async fn get_feature(&self, collection: &str, id: &str, crs: CrsCode) -> OgcResult<Value> {
        let dataset = self.datasets.get(collection)?;
        match dataset.get(id, crs).await? {
            Some(feature) => to_json(&feature),
            None => Err(OgcError::NotFound(format!(
                "feature '{}' in collection '{}'",
                id, collection
            ))),
        }
    }

    pub async fn create_feature(&self, collection: &str, body: Value, crs: CrsCode) -> OgcResult<Value> {
        let dataset = self.datasets.get(collection)?;
        let feature: Feature = serde_json::from_value(body)
            .map_err(|e| OgcError::Validation(format!("invalid feature: {}", e)))?;
        let id = dataset.create(feature, crs).await?;
        Ok(json!({ "id": id }))
    }

    pub async fn delete_feature(&self, collection: &str, id: &str) -> OgcResult<Value> {
        self.datasets.get(collection)?.delete(id).await?;
        Ok(json!({ "deleted": id }))
    }

    // ========================================================================
    // Processes
    // ========================================================================

    pub fn processes(&self) -> OgcResult<Value> {
        Ok(json!({ "processes": to_json(&self.jobs.processes())? }))
    }

    pub fn describe(&self, process_id: &str) -> OgcResult<Value> {
        to_json(&self.jobs.describe(process_id)?)
    }

    /// Submit a job. Synchronous runs print their outputs; asynchronous
    /// runs print the status document, or wait first when `wait` is set.
    pub async fn execute(
        &self,
        process_id: &str,
        inputs: Value,
        mode: JobMode,
        wait: Option<Duration>,
    ) -> OgcResult<Value> {
        match self.jobs.submit(process_id, inputs, mode).await? {
            SubmitOutcome::Completed(job) => match &job.outputs {
                Some(outputs) => Ok(outputs.clone()),
                None => to_json(&job.status_info()),
            },
            SubmitOutcome::Dispatched(job) => match wait {
                Some(timeout) => {
                    let job = self.jobs.wait(&job.id, timeout).await?;
                    to_json(&job.status_info())
                }
                None => to_json(&job.status_info()),
            },
        }
    }

    pub async fn list_jobs(&self) -> OgcResult<Value> {
        let jobs = self.jobs.list_jobs().await?;
        let infos: Vec<_> = jobs.iter().map(|job| job.status_info()).collect();
        Ok(json!({ "jobs": to_json(&infos)? }))
    }

    pub async fn job_status(&self, job_id: &str) -> OgcResult<Value> {
        to_json(&self.jobs.status_info(job_id).await?)
    }

    pub async fn job_result(&self, job_id: &str) -> OgcResult<Value> {
        self.jobs.get_result(job_id).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> OgcResult<Value> {
        to_json(&self.jobs.cancel(job_id).await?.status_info())
    }
}

/// The exception document printed for a failed command.
pub fn exception(err: &OgcError) -> Value {
    json!({
        "type": err.ogc_exception_code(),
        "status": err.http_status_code(),
        "detail": err.to_string(),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> OgcResult<Value> {
    serde_json::to_value(value).map_err(|e| OgcError::Internal(e.to_string()))
}
