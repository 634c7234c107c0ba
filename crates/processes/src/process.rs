//! The process contract and the registry of available processes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use ogc_common::{OgcError, OgcResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProcessError;
use crate::executor::ExecutionEvent;
use crate::job::JobMode;

/// One declared input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDescription {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Zero for optional inputs.
    #[serde(default = "default_min_occurs")]
    pub min_occurs: u32,
    /// JSON Schema of the value.
    #[serde(default)]
    pub schema: Value,
}

fn default_min_occurs() -> u32 {
    1
}

impl InputDescription {
    pub fn required(title: impl Into<String>, schema: Value) -> Self {
        Self {
            title: title.into(),
            description: None,
            min_occurs: 1,
            schema,
        }
    }

    pub fn optional(title: impl Into<String>, schema: Value) -> Self {
        Self {
            min_occurs: 0,
            ..Self::required(title, schema)
        }
    }

    pub fn is_required(&self) -> bool {
        self.min_occurs > 0
    }
}

/// What a process is and how it may be run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDescription {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputDescription>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    pub job_control_options: Vec<JobMode>,
}

impl ProcessDescription {
    /// Check a submission against this description.
    pub fn validate(&self, inputs: &Value, mode: JobMode) -> OgcResult<()> {
        if !self.job_control_options.contains(&mode) {
            return Err(OgcError::Validation(format!(
                "process '{}' does not support {} execution",
                self.id, mode
            )));
        }
        let object = inputs.as_object().ok_or_else(|| {
            OgcError::Validation(format!("inputs of '{}' must be a JSON object", self.id))
        })?;
        for (name, input) in &self.inputs {
            if input.is_required() && object.get(name).map_or(true, Value::is_null) {
                return Err(OgcError::invalid_parameter(
                    name.as_str(),
                    format!("required input of '{}' is missing", self.id),
                ));
            }
        }
        Ok(())
    }
}

/// The handle a running process uses to talk back to its job.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    job_id: String,
    events: mpsc::Sender<ExecutionEvent>,
    cancel: CancellationToken,
}

impl ProcessContext {
    pub(crate) fn new(
        job_id: impl Into<String>,
        events: mpsc::Sender<ExecutionEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            events,
            cancel,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Record progress in percent, capped at 100. Never waits: a report made
    /// while the job manager is behind is dropped, so the recorded progress
    /// can trail the last report until a later one gets through.
    pub fn report_progress(&self, percent: u8) {
        let _ = self.events.try_send(ExecutionEvent::Progress(percent.min(100)));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A safe point: fails with [`ProcessError::Cancelled`] once the job was
    /// dismissed.
    pub fn checkpoint(&self) -> Result<(), ProcessError> {
        if self.cancel.is_cancelled() {
            Err(ProcessError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the job is dismissed.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// A runnable process.
#[async_trait]
pub trait Process: Send + Sync {
    fn description(&self) -> &ProcessDescription;

    /// Run once with inputs already validated against the description.
    async fn execute(&self, inputs: Value, ctx: &ProcessContext) -> Result<Value, ProcessError>;
}

/// Processes by id.
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    processes: HashMap<String, Arc<dyn Process>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in processes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for process in crate::builtins::all() {
            registry.processes.insert(process.description().id.clone(), process);
        }
        registry
    }

    /// Add a process; an id already present is a conflict.
    pub fn register(&mut self, process: Arc<dyn Process>) -> OgcResult<()> {
        let id = process.description().id.clone();
        if self.processes.contains_key(&id) {
            return Err(OgcError::Conflict(format!("process '{}' is already registered", id)));
        }
        self.processes.insert(id, process);
        Ok(())
    }

    pub fn get(&self, id: &str) -> OgcResult<Arc<dyn Process>> {
        self.processes
            .get(id)
            .cloned()
            .ok_or_else(|| OgcError::NotFound(format!("process '{}'", id)))
    }

    /// Descriptions sorted by id.
    pub fn descriptions(&self) -> Vec<ProcessDescription> {
        let mut descriptions: Vec<_> = self
            .processes
            .values()
            .map(|p| p.description().clone())
            .collect();
        descriptions.sort_by(|a, b| a.id.cmp(&b.id));
        descriptions
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
