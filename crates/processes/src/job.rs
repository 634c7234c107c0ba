//! Job records and their lifecycle.
//!
//! ```text
//! accepted ──► running ──► successful
//!    │            │ └────► failed
//!    └────────────┴──────► dismissed
//! ```
//!
//! Terminal states never change.

use std::fmt;

use chrono::{DateTime, Utc};
use ogc_common::OgcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Accepted,
    Running,
    Successful,
    Failed,
    Dismissed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Running => "running",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(Self::Accepted),
            "running" => Some(Self::Running),
            "successful" => Some(Self::Successful),
            "failed" => Some(Self::Failed),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed | Self::Dismissed)
    }

    /// Whether `self → next` is an edge of the lifecycle.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Accepted, Running)
                | (Running, Successful)
                | (Running, Failed)
                | (Accepted, Dismissed)
                | (Running, Dismissed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the submitter waits for the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Sync,
    Async,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(Self::Sync),
            "async" => Some(Self::Async),
            _ => None,
        }
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked execution of one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub process_id: String,
    pub status: JobStatus,
    pub mode: JobMode,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    /// 0..=100
    pub progress: u8,
    pub inputs: Value,
    pub outputs: Option<Value>,
    pub error_detail: Option<String>,
    pub message: Option<String>,
}

impl Job {
    /// A new job in `accepted`.
    pub fn new(process_id: impl Into<String>, inputs: Value, mode: JobMode) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            process_id: process_id.into(),
            status: JobStatus::Accepted,
            mode,
            created: now,
            updated: now,
            started: None,
            finished: None,
            progress: 0,
            inputs,
            outputs: None,
            error_detail: None,
            message: Some("Job accepted".to_string()),
        }
    }

    /// Move along a lifecycle edge, stamping timestamps.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), OgcError> {
        if !self.status.can_transition_to(next) {
            return Err(OgcError::Conflict(format!(
                "job '{}' cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let now = Utc::now();
        match next {
            JobStatus::Running => self.started = Some(now),
            s if s.is_terminal() => self.finished = Some(now),
            _ => {}
        }
        if next == JobStatus::Successful {
            self.progress = 100;
        }
        self.status = next;
        self.updated = now;
        Ok(())
    }

    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
        self.updated = Utc::now();
    }

    pub fn status_info(&self) -> StatusInfo {
        StatusInfo {
            job_id: self.id.clone(),
            process_id: self.process_id.clone(),
            kind: "process".to_string(),
            status: self.status,
            progress: self.progress,
            created: self.created,
            updated: self.updated,
            started: self.started,
            finished: self.finished,
            message: self.message.clone(),
        }
    }
}

/// The job outcome envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "processID")]
    pub process_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
