//! Job lifecycle management.
//!
//! Every job has its own slot holding an async mutex over the record, a
//! cancellation token and a status watch. The slot map lock is only held to
//! insert or look up a slot, so unrelated jobs never wait on each other.
//!
//! `accepted → running` happens only in [`JobManager::start`], which hands
//! out the [`RunToken`] that every later runner write must present. All
//! writes to a job happen with its mutex held and are persisted to the
//! [`JobStore`] before they become visible.
//!
//! A slot lives only while its job can still change. Once a terminal state
//! is persisted the slot is dropped from the map and the store answers for
//! the job from then on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use ogc_common::{OgcError, OgcResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::ProcessError;
use crate::executor::{ExecutionEvent, ProcessExecutor};
use crate::job::{Job, JobMode, JobStatus, StatusInfo};
use crate::process::{ProcessDescription, ProcessRegistry};
use crate::store::JobStore;

/// Job manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobManagerConfig {
    /// How long a synchronous submission waits before returning a timeout.
    /// The job itself keeps running.
    #[serde(with = "ogc_common::time::duration_secs")]
    pub sync_timeout: Duration,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(30),
        }
    }
}

/// Ownership of one execution attempt.
///
/// Only [`JobManager::start`] creates tokens, at most once per job.
#[derive(Debug, PartialEq, Eq)]
pub struct RunToken {
    job_id: String,
    attempt: Uuid,
}

impl RunToken {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

/// What [`JobManager::submit`] hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Synchronous run that reached a terminal state; outputs are inline.
    Completed(Job),
    /// Asynchronous run, still in progress; poll by id.
    Dispatched(Job),
}

impl SubmitOutcome {
    pub fn job(&self) -> &Job {
        match self {
            SubmitOutcome::Completed(job) | SubmitOutcome::Dispatched(job) => job,
        }
    }
}

struct JobState {
    job: Job,
    /// Set by `start`.
    attempt: Option<Uuid>,
    /// Set once the attempt has been handed to the executor.
    dispatched: bool,
}

struct JobSlot {
    state: Mutex<JobState>,
    cancel: CancellationToken,
    status: watch::Sender<JobStatus>,
}

struct Inner {
    processes: ProcessRegistry,
    store: Arc<dyn JobStore>,
    executor: ProcessExecutor,
    jobs: RwLock<HashMap<String, Arc<JobSlot>>>,
    config: JobManagerConfig,
}

/// Creates, runs and tracks jobs. Cheap to clone.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(processes: ProcessRegistry, store: Arc<dyn JobStore>, config: JobManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                processes,
                store,
                executor: ProcessExecutor,
                jobs: RwLock::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &JobManagerConfig {
        &self.inner.config
    }

    pub fn processes(&self) -> Vec<ProcessDescription> {
        self.inner.processes.descriptions()
    }

    pub fn describe(&self, process_id: &str) -> OgcResult<ProcessDescription> {
        Ok(self.inner.processes.get(process_id)?.description().clone())
    }

    async fn slot(&self, job_id: &str) -> Option<Arc<JobSlot>> {
        self.inner.jobs.read().await.get(job_id).cloned()
    }

    async fn live_slot(&self, job_id: &str) -> OgcResult<Arc<JobSlot>> {
        if let Some(slot) = self.slot(job_id).await {
            return Ok(slot);
        }
        match self.inner.store.get(job_id).await? {
            Some(job) => Err(OgcError::Conflict(format!(
                "job '{}' is {} and no longer active",
                job_id, job.status
            ))),
            None => Err(OgcError::NotFound(format!("job '{}'", job_id))),
        }
    }

    /// Drop a finished job's slot. Callers hold its state lock and have
    /// persisted the terminal record.
    async fn evict(&self, job_id: &str) {
        self.inner.jobs.write().await.remove(job_id);
        debug!(job_id, "Released job slot");
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Validate a submission and record the job in `accepted`.
    pub async fn create(&self, process_id: &str, inputs: Value, mode: JobMode) -> OgcResult<Job> {
        let process = self.inner.processes.get(process_id)?;
        process.description().validate(&inputs, mode)?;

        let job = Job::new(process_id, inputs, mode);
        self.inner.store.insert(&job).await?;

        let (status, _) = watch::channel(job.status);
        let slot = Arc::new(JobSlot {
            state: Mutex::new(JobState {
                job: job.clone(),
                attempt: None,
                dispatched: false,
            }),
            cancel: CancellationToken::new(),
            status,
        });
        self.inner.jobs.write().await.insert(job.id.clone(), slot);

        counter!("jobs_submitted_total", "process" => process_id.to_string()).increment(1);
        info!(job_id = %job.id, process_id, mode = %mode, "Job accepted");
        Ok(job)
    }

    /// Claim the single execution attempt of an accepted job.
    ///
    /// Fails with a conflict for any job that is not `accepted`, including
    /// one another caller already started.
    pub async fn start(&self, job_id: &str) -> OgcResult<RunToken> {
        let slot = self.live_slot(job_id).await?;
        let mut state = slot.state.lock().await;
        if state.job.status != JobStatus::Accepted {
            return Err(OgcError::Conflict(format!(
                "job '{}' is {} and cannot be started",
                job_id, state.job.status
            )));
        }

        let mut next = state.job.clone();
        next.transition(JobStatus::Running)?;
        next.message = Some("Job running".to_string());
        self.inner.store.update(&next).await?;

        let attempt = Uuid::new_v4();
        state.job = next;
        state.attempt = Some(attempt);
        slot.status.send_replace(JobStatus::Running);
        debug!(job_id, "Job started");

        Ok(RunToken {
            job_id: job_id.to_string(),
            attempt,
        })
    }

    /// Hand a started job to the executor and follow it in the background.
    pub async fn execute(&self, token: RunToken) -> OgcResult<()> {
        // only `start` hands out tokens, so a missing slot means the job
        // was dismissed in between
        let Some(slot) = self.slot(&token.job_id).await else {
            debug!(job_id = %token.job_id, "Job ended before dispatch");
            return Ok(());
        };
        let (process, inputs) = {
            let mut state = slot.state.lock().await;
            if state.attempt != Some(token.attempt) || state.dispatched {
                return Err(OgcError::Conflict(format!(
                    "job '{}' already has an active runner",
                    token.job_id
                )));
            }
            if state.job.status != JobStatus::Running {
                debug!(job_id = %token.job_id, status = %state.job.status, "Job left running before dispatch");
                return Ok(());
            }
            state.dispatched = true;
            (
                self.inner.processes.get(&state.job.process_id)?,
                state.job.inputs.clone(),
            )
        };

        let events = self
            .inner
            .executor
            .spawn(&token.job_id, process, inputs, slot.cancel.clone());
        let manager = self.clone();
        tokio::spawn(async move { manager.follow(token, slot, events).await });
        Ok(())
    }

    /// Create, start and dispatch in one step.
    ///
    /// A synchronous submission waits up to `sync_timeout` for the terminal
    /// job; on expiry it fails with [`OgcError::Timeout`] and the job stays
    /// pollable.
    #[instrument(skip(self, inputs))]
    pub async fn submit(&self, process_id: &str, inputs: Value, mode: JobMode) -> OgcResult<SubmitOutcome> {
        let job = self.create(process_id, inputs, mode).await?;
        let token = self.start(&job.id).await?;
        self.execute(token).await?;

        match mode {
            JobMode::Async => Ok(SubmitOutcome::Dispatched(self.get_status(&job.id).await?)),
            JobMode::Sync => {
                let job = self.wait(&job.id, self.inner.config.sync_timeout).await?;
                Ok(SubmitOutcome::Completed(job))
            }
        }
    }

    /// Wait until a job reaches a terminal state. A job that already ended
    /// is returned at once.
    pub async fn wait(&self, job_id: &str, timeout: Duration) -> OgcResult<Job> {
        let Some(slot) = self.slot(job_id).await else {
            let job = self.get_status(job_id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            return Err(OgcError::Conflict(format!(
                "job '{}' is {} but not run by this manager",
                job_id, job.status
            )));
        };
        let mut status = slot.status.subscribe();
        match tokio::time::timeout(timeout, status.wait_for(JobStatus::is_terminal)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => {
                return Err(OgcError::Internal(format!(
                    "status channel of job '{}' closed",
                    job_id
                )))
            }
            Err(_) => {
                info!(job_id, timeout_ms = timeout.as_millis() as u64, "Wait for job timed out");
                return Err(OgcError::Timeout(format!(
                    "job '{}' did not finish within {:?}; it is still running",
                    job_id, timeout
                )));
            }
        }
        let job = slot.state.lock().await.job.clone();
        Ok(job)
    }

    // ========================================================================
    // Runner side
    // ========================================================================

    async fn follow(
        &self,
        token: RunToken,
        slot: Arc<JobSlot>,
        mut events: mpsc::Receiver<ExecutionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ExecutionEvent::Progress(percent) => {
                    self.record_progress(&token, &slot, percent).await
                }
                ExecutionEvent::Finished(outcome) => {
                    self.record_outcome(&token, &slot, outcome).await;
                    return;
                }
            }
        }
        self.record_outcome(
            &token,
            &slot,
            Err(ProcessError::Failed("executor stopped without reporting".to_string())),
        )
        .await;
    }

    async fn record_progress(&self, token: &RunToken, slot: &JobSlot, percent: u8) {
        let mut state = slot.state.lock().await;
        if state.attempt != Some(token.attempt) || state.job.status != JobStatus::Running {
            return;
        }
        let mut next = state.job.clone();
        next.set_progress(percent);
        if let Err(e) = self.inner.store.update(&next).await {
            warn!(job_id = %token.job_id, error = %e, "Failed to persist job progress");
            return;
        }
        state.job = next;
    }

    async fn record_outcome(
        &self,
        token: &RunToken,
        slot: &JobSlot,
        outcome: Result<Value, ProcessError>,
    ) {
        let mut state = slot.state.lock().await;
        if state.attempt != Some(token.attempt) {
            return;
        }
        if state.job.status.is_terminal() {
            info!(
                job_id = %token.job_id,
                status = %state.job.status,
                "Discarding completion of a job that already ended"
            );
            return;
        }

        let mut next = state.job.clone();
        let transition = match outcome {
            Ok(outputs) => {
                next.outputs = Some(outputs);
                next.message = Some("Job complete".to_string());
                next.transition(JobStatus::Successful)
            }
            Err(err) => {
                next.error_detail = Some(err.to_string());
                next.message = Some("Job failed".to_string());
                next.transition(JobStatus::Failed)
            }
        };
        if let Err(e) = transition {
            error!(job_id = %token.job_id, error = %e, "Invalid completion transition");
            return;
        }

        // the terminal state is applied even if it cannot be persisted; the
        // slot then stays as the only record of it
        let persisted = match self.inner.store.update(&next).await {
            Ok(()) => true,
            Err(e) => {
                error!(job_id = %token.job_id, error = %e, "Failed to persist job outcome");
                false
            }
        };

        match next.status {
            JobStatus::Failed => warn!(
                job_id = %next.id,
                process_id = %next.process_id,
                error = next.error_detail.as_deref().unwrap_or(""),
                "Job failed"
            ),
            _ => info!(job_id = %next.id, process_id = %next.process_id, "Job successful"),
        }
        counter!("jobs_finished_total", "status" => next.status.as_str()).increment(1);
        let status = next.status;
        state.job = next;
        if persisted {
            self.evict(&token.job_id).await;
        }
        slot.status.send_replace(status);
    }

    // ========================================================================
    // Queries and control
    // ========================================================================

    pub async fn get_status(&self, job_id: &str) -> OgcResult<Job> {
        if let Some(slot) = self.slot(job_id).await {
            return Ok(slot.state.lock().await.job.clone());
        }
        self.inner
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| OgcError::NotFound(format!("job '{}'", job_id)))
    }

    pub async fn status_info(&self, job_id: &str) -> OgcResult<StatusInfo> {
        Ok(self.get_status(job_id).await?.status_info())
    }

    /// Outputs of a successful job, exactly as the process produced them.
    pub async fn get_result(&self, job_id: &str) -> OgcResult<Value> {
        let job = self.get_status(job_id).await?;
        match job.status {
            JobStatus::Successful => Ok(job.outputs.unwrap_or(Value::Null)),
            status => Err(OgcError::ResultNotReady(format!(
                "job '{}' is {}",
                job_id, status
            ))),
        }
    }

    /// Dismiss an accepted or running job.
    ///
    /// Returns once `dismissed` is recorded; the run is signalled and its
    /// eventual outcome discarded.
    pub async fn cancel(&self, job_id: &str) -> OgcResult<Job> {
        let Some(slot) = self.slot(job_id).await else {
            return self.dismiss_stored(job_id).await;
        };

        let mut state = slot.state.lock().await;
        let mut next = state.job.clone();
        next.transition(JobStatus::Dismissed)?;
        next.message = Some("Job dismissed".to_string());
        self.inner.store.update(&next).await?;

        state.job = next.clone();
        slot.cancel.cancel();
        self.evict(job_id).await;
        slot.status.send_replace(JobStatus::Dismissed);
        counter!("jobs_finished_total", "status" => JobStatus::Dismissed.as_str()).increment(1);
        info!(job_id, "Job dismissed");
        Ok(next)
    }

    /// Dismiss a job that only exists in the store.
    async fn dismiss_stored(&self, job_id: &str) -> OgcResult<Job> {
        let mut job = self
            .inner
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| OgcError::NotFound(format!("job '{}'", job_id)))?;
        job.transition(JobStatus::Dismissed)?;
        job.message = Some("Job dismissed".to_string());
        self.inner.store.update(&job).await?;
        info!(job_id, "Stored job dismissed");
        Ok(job)
    }

    /// Every known job, oldest first.
    pub async fn list_jobs(&self) -> OgcResult<Vec<Job>> {
        Ok(self.inner.store.list().await?)
    }

    /// Close out jobs a previous run left unfinished.
    ///
    /// Running jobs become `failed`; accepted ones, which never started,
    /// become `dismissed`. Returns how many were closed.
    pub async fn recover_interrupted(&self) -> OgcResult<usize> {
        let mut recovered = 0;
        for mut job in self.inner.store.list().await? {
            if job.status.is_terminal() || self.slot(&job.id).await.is_some() {
                continue;
            }
            if job.status == JobStatus::Running {
                job.error_detail = Some("interrupted by a restart".to_string());
                job.message = Some("Job failed".to_string());
                job.transition(JobStatus::Failed)?;
            } else {
                job.message = Some("Job dismissed before it started".to_string());
                job.transition(JobStatus::Dismissed)?;
            }
            self.inner.store.update(&job).await?;
            warn!(job_id = %job.id, status = %job.status, "Recovered interrupted job");
            recovered += 1;
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;
    use serde_json::json;

    fn manager() -> JobManager {
        JobManager::new(
            ProcessRegistry::with_builtins(),
            Arc::new(MemoryJobStore::new()),
            JobManagerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_sync_submit_returns_outputs() {
        let outcome = manager()
            .submit("hello-world", json!({"name": "Ada"}), JobMode::Sync)
            .await
            .unwrap();
        let SubmitOutcome::Completed(job) = outcome else {
            panic!("expected a completed job");
        };
        assert_eq!(job.status, JobStatus::Successful);
        assert_eq!(job.outputs.unwrap()["value"], "Hello Ada!");
    }

    #[tokio::test]
    async fn test_finished_jobs_release_their_slots() {
        let m = manager();
        let mut ids = Vec::new();
        for n in 0..20 {
            let outcome = m.submit("echo", json!({"n": n}), JobMode::Async).await.unwrap();
            ids.push(outcome.job().id.clone());
        }
        for id in &ids {
            assert_eq!(m.wait(id, Duration::from_secs(5)).await.unwrap().status, JobStatus::Successful);
        }
        assert!(m.inner.jobs.read().await.is_empty());

        let last = ids.last().unwrap();
        assert_eq!(m.get_result(last).await.unwrap(), json!({"n": 19}));
        assert_eq!(m.status_info(last).await.unwrap().status, JobStatus::Successful);
        assert_eq!(m.wait(last, Duration::from_millis(1)).await.unwrap().progress, 100);
        assert!(matches!(m.start(last).await, Err(OgcError::Conflict(_))));

        let accepted = m.create("echo", json!({}), JobMode::Async).await.unwrap();
        m.cancel(&accepted.id).await.unwrap();
        assert!(m.inner.jobs.read().await.is_empty());
        assert_eq!(m.get_status(&accepted.id).await.unwrap().status, JobStatus::Dismissed);
    }

    #[tokio::test]
    async fn test_start_twice_conflicts() {
        let m = manager();
        let job = m.create("echo", json!({}), JobMode::Async).await.unwrap();
        let token = tokio_test::assert_ok!(m.start(&job.id).await);
        assert_eq!(token.job_id(), job.id);
        let err = tokio_test::assert_err!(m.start(&job.id).await);
        assert!(matches!(err, OgcError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_validates_inputs() {
        let m = manager();
        let err = m.create("hello-world", json!({}), JobMode::Async).await.unwrap_err();
        assert!(matches!(err, OgcError::InvalidParameter { .. }));
        assert!(matches!(
            m.create("missing", json!({}), JobMode::Async).await,
            Err(OgcError::NotFound(_))
        ));
        assert!(m.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let m = manager();
        assert!(matches!(m.get_status("nope").await, Err(OgcError::NotFound(_))));
        assert!(matches!(m.cancel("nope").await, Err(OgcError::NotFound(_))));
    }

    #[test]
    fn test_config_from_json() {
        let config: JobManagerConfig = serde_json::from_value(json!({"sync_timeout": 0.5})).unwrap();
        assert_eq!(config.sync_timeout, Duration::from_millis(500));
        assert!(serde_json::from_value::<JobManagerConfig>(json!({"sync_timeout": 0})).is_err());
    }
}
