//! Process execution as tracked jobs.
//!
//! A [`JobManager`] validates submissions against a [`ProcessRegistry`],
//! persists each job through a [`JobStore`], and runs it on the
//! [`ProcessExecutor`], synchronously or in the background. Cancellation is
//! cooperative: processes poll [`ProcessContext::checkpoint`].

pub mod builtins;
pub mod error;
pub mod executor;
pub mod job;
pub mod manager;
pub mod process;
pub mod store;

pub use builtins::{EchoProcess, HelloWorldProcess};
pub use error::{ProcessError, StoreError, StoreResult};
pub use executor::{ExecutionEvent, ProcessExecutor};
pub use job::{Job, JobMode, JobStatus, StatusInfo};
pub use manager::{JobManager, JobManagerConfig, RunToken, SubmitOutcome};
pub use process::{InputDescription, Process, ProcessContext, ProcessDescription, ProcessRegistry};
pub use store::{JobStore, JobStoreConfig, MemoryJobStore, SqliteJobStore};
