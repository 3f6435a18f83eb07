//! Task Lifecycle Controller: the only surface callers interact with.
//!
//! An explicit engine object, constructed once at startup and passed by
//! reference wherever it is needed. No module-level globals; tests build
//! isolated instances freely.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::EngineConfig;
use crate::domain::{JobId, JobState, Task, TaskProgress, TaskSummary, TaskType};
use crate::error::EngineError;
use crate::index::{InMemoryMetadataIndex, MetadataIndex, TaskMetadata};
use crate::runtime::{HandlerRegistry, TaskHandler};
use crate::store::{CancelOutcome, InMemoryJobStore, JobStore, ProgressEvent};
use crate::worker::WorkerPool;

/// Builds a [`TaskEngine`]: configuration, handler registration, and optional
/// store/index injection (the in-memory implementations are the default).
pub struct TaskEngineBuilder {
    config: EngineConfig,
    registry: HandlerRegistry,
    store: Option<Arc<dyn JobStore>>,
    index: Option<Arc<dyn MetadataIndex>>,
}

impl TaskEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: HandlerRegistry::new(),
            store: None,
            index: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the handler for one task type. Duplicate registration is a
    /// configuration error and fails fast.
    pub fn handler(
        mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, EngineError> {
        self.registry.register(task_type, handler)?;
        Ok(self)
    }

    /// Swap in a different store implementation (e.g. a durable backend).
    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn index(mut self, index: Arc<dyn MetadataIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn build(self) -> TaskEngine {
        let store = self.store.unwrap_or_else(|| {
            Arc::new(InMemoryJobStore::new(
                self.config.retry_policy(),
                self.config.max_attempts,
            ))
        });
        let index = self
            .index
            .unwrap_or_else(|| Arc::new(InMemoryMetadataIndex::new()));
        TaskEngine {
            store,
            index,
            registry: Arc::new(self.registry),
            config: self.config,
            workers: std::sync::Mutex::new(None),
        }
    }
}

impl Default for TaskEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The background task execution engine.
pub struct TaskEngine {
    store: Arc<dyn JobStore>,
    index: Arc<dyn MetadataIndex>,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    workers: std::sync::Mutex<Option<WorkerPool>>,
}

impl TaskEngine {
    pub fn builder() -> TaskEngineBuilder {
        TaskEngineBuilder::new()
    }

    /// Start the worker pool. Until this is called, submitted tasks sit in
    /// `waiting`; calling it twice is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock().expect("worker handle lock");
        if workers.is_none() {
            let concurrency = self.config.concurrency.max(1);
            tracing::info!(concurrency, "starting worker pool");
            *workers = Some(WorkerPool::spawn(
                concurrency,
                Arc::clone(&self.store),
                Arc::clone(&self.index),
                Arc::clone(&self.registry),
            ));
        }
    }

    /// Stop claiming new work and wait for the loops to exit. In-flight
    /// handlers finish on their own; their jobs resolve normally.
    pub async fn shutdown(&self) {
        self.store.shutdown().await;
        let pool = self.workers.lock().expect("worker handle lock").take();
        if let Some(pool) = pool {
            pool.shutdown_and_join().await;
        }
    }

    /// Submit a task for asynchronous execution.
    ///
    /// Returns once both the job and its metadata are persisted; execution
    /// happens later on the worker pool. If metadata recording fails after
    /// the job was persisted, the job is rolled back and the error
    /// propagates, so a metadata-less job is never left behind.
    pub async fn add_task(
        &self,
        task_type: TaskType,
        input: serde_json::Value,
        user_id: impl Into<String>,
    ) -> Result<JobId, EngineError> {
        let task = Task::new(task_type, input, user_id);
        let record = self.store.enqueue(task).await?;

        let meta = TaskMetadata {
            task_type: record.task.task_type.clone(),
            user_id: record.task.user_id.clone(),
            created_at: record.created_at,
        };
        if let Err(e) = self.index.record(record.id, meta).await {
            let _ = self.store.remove(record.id).await;
            return Err(e);
        }

        tracing::info!(
            job_id = %record.id,
            task_type = %record.task.task_type,
            user_id = %record.task.user_id,
            "task added"
        );
        Ok(record.id)
    }

    /// Read-consistent snapshot of one task: the join of the live job record
    /// with its metadata. `None` if either side is missing; partial data is
    /// treated as absent, never padded with defaults.
    pub async fn get_task_progress(
        &self,
        job_id: JobId,
    ) -> Result<Option<TaskProgress>, EngineError> {
        let Some(record) = self.store.get(job_id).await? else {
            return Ok(None);
        };
        let Some(meta) = self.index.lookup(job_id).await? else {
            return Ok(None);
        };
        Ok(Some(TaskProgress {
            progress: record.progress,
            state: record.state,
            task_type: meta.task_type,
            user_id: meta.user_id,
            created_at: meta.created_at,
            error: record.last_error,
        }))
    }

    /// Best-effort cancellation.
    ///
    /// Waiting/delayed jobs are removed outright; an active job is force-
    /// failed with the cancellation sentinel while its handler keeps running
    /// cooperatively. Returns `false` for unknown or already-terminal jobs,
    /// which cancellation never alters.
    pub async fn cancel_task(&self, job_id: JobId) -> Result<bool, EngineError> {
        match self.store.cancel(job_id).await? {
            CancelOutcome::NotFound | CancelOutcome::AlreadyTerminal => Ok(false),
            CancelOutcome::Removed | CancelOutcome::FailedActive => {
                self.index.forget(job_id).await?;
                Ok(true)
            }
        }
    }

    /// All non-terminal tasks owned by `user_id`, in submission order. Jobs
    /// whose metadata is missing (mid-cleanup) are silently excluded.
    pub async fn list_tasks(&self, user_id: &str) -> Result<Vec<TaskSummary>, EngineError> {
        let records = self
            .store
            .list(&[JobState::Active, JobState::Waiting, JobState::Delayed])
            .await?;

        let mut summaries = Vec::new();
        for record in records {
            let Some(meta) = self.index.lookup(record.id).await? else {
                continue;
            };
            if meta.user_id != user_id {
                continue;
            }
            summaries.push(TaskSummary {
                id: record.id,
                task_type: meta.task_type,
                user_id: meta.user_id,
                state: record.state,
                progress: record.progress,
                created_at: meta.created_at,
            });
        }
        summaries.sort_by_key(|s| s.id);
        Ok(summaries)
    }

    /// Subscribe to progress and terminal-transition notifications for
    /// in-process observers. Cross-process observers poll
    /// [`get_task_progress`](Self::get_task_progress) instead.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.store.subscribe()
    }
}
