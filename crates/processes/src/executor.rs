//! Runs a process on its own task and reports back over a channel.
//!
//! The executor never touches job records; the job manager consumes the
//! events and owns every transition.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Instrument};

use crate::error::ProcessError;
use crate::process::{Process, ProcessContext};

/// Progress and completion of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Progress(u8),
    /// Always the last event of a run.
    Finished(Result<Value, ProcessError>),
}

const EVENT_BUFFER: usize = 32;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn join_failure(err: JoinError) -> ProcessError {
    if err.is_panic() {
        ProcessError::Panicked(panic_message(err.into_panic()))
    } else {
        ProcessError::Failed("execution task was aborted".to_string())
    }
}

/// Spawns process runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    /// Start `process` and return the stream of its events.
    ///
    /// The run observes `cancel` only cooperatively; a dismissed job's run
    /// keeps going until its next checkpoint.
    pub fn spawn(
        &self,
        job_id: &str,
        process: Arc<dyn Process>,
        inputs: Value,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ExecutionEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let ctx = ProcessContext::new(job_id, tx.clone(), cancel);
        let span = tracing::info_span!("process", job_id = %job_id, process_id = %process.description().id);

        let run = tokio::spawn(
            async move { process.execute(inputs, &ctx).await }.instrument(span.clone()),
        );

        tokio::spawn(
            async move {
                let outcome = match run.await {
                    Ok(result) => result,
                    Err(err) => {
                        let failure = join_failure(err);
                        error!(error = %failure, "Process task did not complete");
                        Err(failure)
                    }
                };
                debug!(ok = outcome.is_ok(), "Process run finished");
                // the receiver may be gone if the manager shut down
                let _ = tx.send(ExecutionEvent::Finished(outcome)).await;
            }
            .instrument(span),
        );

        rx
    }
}
