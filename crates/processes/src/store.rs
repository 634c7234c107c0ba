//! Durable job records.
//!
//! The job manager writes every transition through a [`JobStore`] so that
//! status survives the process that ran the job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::job::{Job, JobMode, JobStatus};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job; an existing id is [`StoreError::Duplicate`].
    async fn insert(&self, job: &Job) -> StoreResult<()>;

    /// Overwrite an existing job; a missing id is [`StoreError::Missing`].
    async fn update(&self, job: &Job) -> StoreResult<()>;

    async fn get(&self, id: &str) -> StoreResult<Option<Job>>;

    /// Every job, oldest first.
    async fn list(&self) -> StoreResult<Vec<Job>>;
}

/// Where job records live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStoreConfig {
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
    },
}

impl JobStoreConfig {
    pub async fn open(&self) -> StoreResult<Arc<dyn JobStore>> {
        Ok(match self {
            JobStoreConfig::Memory => Arc::new(MemoryJobStore::new()),
            JobStoreConfig::Sqlite { path } => Arc::new(SqliteJobStore::open(path).await?),
        })
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Jobs held in process; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id.clone()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update(&self, job: &Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(StoreError::Missing(job.id.clone())),
        }
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }
}

// ============================================================================
// SQLite
// ============================================================================

const CREATE_JOBS: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        process_id TEXT NOT NULL,
        status TEXT NOT NULL,
        mode TEXT NOT NULL,
        progress INTEGER NOT NULL DEFAULT 0,
        inputs TEXT NOT NULL,
        outputs TEXT,
        error_detail TEXT,
        message TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        started_at TEXT,
        finished_at TEXT
    )
"#;

const SELECT_JOBS: &str = r#"
    SELECT id, process_id, status, mode, progress, inputs, outputs,
           error_detail, message, created_at, updated_at, started_at, finished_at
    FROM jobs
"#;

type JobRow = (
    String,
    String,
    String,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<String>,
);

fn corrupt(id: &str, message: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        message: message.into(),
    }
}

fn parse_time(id: &str, text: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| corrupt(id, format!("timestamp '{}': {}", text, e)))
}

fn parse_json(id: &str, text: &str) -> StoreResult<Value> {
    serde_json::from_str(text).map_err(|e| corrupt(id, format!("JSON column: {}", e)))
}

fn job_from_row(row: JobRow) -> StoreResult<Job> {
    let (
        id,
        process_id,
        status,
        mode,
        progress,
        inputs,
        outputs,
        error_detail,
        message,
        created,
        updated,
        started,
        finished,
    ) = row;
    Ok(Job {
        status: JobStatus::parse(&status)
            .ok_or_else(|| corrupt(&id, format!("unknown status '{}'", status)))?,
        mode: JobMode::parse(&mode).ok_or_else(|| corrupt(&id, format!("unknown mode '{}'", mode)))?,
        progress: progress.clamp(0, 100) as u8,
        inputs: parse_json(&id, &inputs)?,
        outputs: outputs.as_deref().map(|o| parse_json(&id, o)).transpose()?,
        created: parse_time(&id, &created)?,
        updated: parse_time(&id, &updated)?,
        started: started.as_deref().map(|t| parse_time(&id, t)).transpose()?,
        finished: finished.as_deref().map(|t| parse_time(&id, t)).transpose()?,
        error_detail,
        message,
        process_id,
        id,
    })
}

/// Jobs in a SQLite database.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open or create the job database at the given path.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(path = %path.display(), "Opened job store");
        Ok(store)
    }

    /// An in-memory database (for testing).
    pub async fn open_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(CREATE_JOBS).execute(&self.pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn opt_time(t: &Option<DateTime<Utc>>) -> Option<String> {
    t.map(|t| t.to_rfc3339())
}

fn opt_json(v: &Option<Value>) -> Option<String> {
    v.as_ref().map(Value::to_string)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO jobs (id, process_id, status, mode, progress, inputs, outputs,
                error_detail, message, created_at, updated_at, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.process_id)
        .bind(job.status.as_str())
        .bind(job.mode.as_str())
        .bind(job.progress as i64)
        .bind(job.inputs.to_string())
        .bind(opt_json(&job.outputs))
        .bind(&job.error_detail)
        .bind(&job.message)
        .bind(job.created.to_rfc3339())
        .bind(job.updated.to_rfc3339())
        .bind(opt_time(&job.started))
        .bind(opt_time(&job.finished))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(job.id.clone()));
        }
        debug!(job_id = %job.id, "Inserted job record");
        Ok(())
    }

    async fn update(&self, job: &Job) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, progress = ?, outputs = ?, error_detail = ?, message = ?,
                updated_at = ?, started_at = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(opt_json(&job.outputs))
        .bind(&job.error_detail)
        .bind(&job.message)
        .bind(job.updated.to_rfc3339())
        .bind(opt_time(&job.started))
        .bind(opt_time(&job.finished))
        .bind(&job.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(job.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_JOBS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(job_from_row).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!("{} ORDER BY created_at ASC, id ASC", SELECT_JOBS))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(job_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn exercise(store: &dyn JobStore) {
        let mut job = Job::new("echo", json!({"a": [1, 2]}), JobMode::Async);
        store.insert(&job).await.unwrap();
        assert!(matches!(store.insert(&job).await, Err(StoreError::Duplicate(_))));

        job.transition(JobStatus::Running).unwrap();
        job.set_progress(40);
        store.update(&job).await.unwrap();

        job.outputs = Some(json!({"a": [1, 2]}));
        job.transition(JobStatus::Successful).unwrap();
        store.update(&job).await.unwrap();

        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Successful);
        assert_eq!(loaded.progress, 100);
        assert_eq!(loaded.outputs, job.outputs);
        assert_eq!(loaded.inputs, job.inputs);
        assert!(loaded.started.is_some() && loaded.finished.is_some());

        assert!(store.get("missing").await.unwrap().is_none());
        let ghost = Job::new("echo", json!({}), JobMode::Sync);
        assert!(matches!(store.update(&ghost).await, Err(StoreError::Missing(_))));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        exercise(&SqliteJobStore::open_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("jobs.db");
        let job = Job::new("hello-world", json!({"name": "Ada"}), JobMode::Async);
        {
            let store = SqliteJobStore::open(&path).await.unwrap();
            store.insert(&job).await.unwrap();
        }
        let store = SqliteJobStore::open(&path).await.unwrap();
        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.process_id, "hello-world");
        assert_eq!(loaded.status, JobStatus::Accepted);
    }

    #[test]
    fn test_config_parses() {
        let config: JobStoreConfig = serde_json::from_value(json!({"type": "sqlite", "path": "/tmp/jobs.db"})).unwrap();
        assert!(matches!(config, JobStoreConfig::Sqlite { .. }));
        let config: JobStoreConfig = serde_json::from_value(json!({"type": "memory"})).unwrap();
        assert!(matches!(config, JobStoreConfig::Memory));
    }
}
