//! Task Metadata Index: an ownership-aware shadow of live jobs.
//!
//! Keyed by job id and kept in lockstep with the Job Store so that ownership
//! and categorization can be queried without interpreting job payloads.
//! Recorded as part of `add_task` before the call returns; forgotten when a
//! job completes or is cancelled. Metadata for naturally failed jobs is kept
//! alongside the retained record so the failure stays inspectable.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::{JobId, TaskType};
use crate::error::EngineError;

/// Queryable attributes of a job, independent of its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub task_type: TaskType,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Port over the metadata side store. Infrastructure failures surface as
/// [`EngineError::Backend`].
#[async_trait]
pub trait MetadataIndex: Send + Sync {
    async fn record(&self, job_id: JobId, meta: TaskMetadata) -> Result<(), EngineError>;

    async fn lookup(&self, job_id: JobId) -> Result<Option<TaskMetadata>, EngineError>;

    /// Idempotent: forgetting an absent key is a no-op.
    async fn forget(&self, job_id: JobId) -> Result<(), EngineError>;

    /// Job ids owned by `user_id`, for per-user listing without scanning
    /// payloads.
    async fn scan_by_owner(&self, user_id: &str) -> Result<Vec<JobId>, EngineError>;
}

struct IndexState {
    by_job: HashMap<JobId, TaskMetadata>,
    by_owner: HashMap<String, HashSet<JobId>>,
}

/// In-memory metadata index.
pub struct InMemoryMetadataIndex {
    state: Mutex<IndexState>,
}

impl InMemoryMetadataIndex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IndexState {
                by_job: HashMap::new(),
                by_owner: HashMap::new(),
            }),
        }
    }
}

impl Default for InMemoryMetadataIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataIndex for InMemoryMetadataIndex {
    async fn record(&self, job_id: JobId, meta: TaskMetadata) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state
            .by_owner
            .entry(meta.user_id.clone())
            .or_default()
            .insert(job_id);
        state.by_job.insert(job_id, meta);
        Ok(())
    }

    async fn lookup(&self, job_id: JobId) -> Result<Option<TaskMetadata>, EngineError> {
        let state = self.state.lock().await;
        Ok(state.by_job.get(&job_id).cloned())
    }

    async fn forget(&self, job_id: JobId) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if let Some(meta) = state.by_job.remove(&job_id) {
            if let Some(owned) = state.by_owner.get_mut(&meta.user_id) {
                owned.remove(&job_id);
                if owned.is_empty() {
                    state.by_owner.remove(&meta.user_id);
                }
            }
        }
        Ok(())
    }

    async fn scan_by_owner(&self, user_id: &str) -> Result<Vec<JobId>, EngineError> {
        let state = self.state.lock().await;
        Ok(state
            .by_owner
            .get(user_id)
            .map(|owned| owned.iter().copied().collect())
            .unwrap_or_default())
    }
}
