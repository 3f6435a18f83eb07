//! Handler dispatch: the seam where type-specific work plugs in.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::domain::{JobId, Task, TaskType};
use crate::error::{EngineError, TaskError};
use crate::store::JobStore;

/// Execution context handed to a handler alongside its task.
///
/// Progress reporting is fire-and-forget from the handler's perspective:
/// store errors are logged, never propagated into handler logic. The
/// cancellation flag is cooperative; a handler that ignores it simply runs to
/// completion and has its result discarded.
pub struct JobContext {
    job_id: JobId,
    store: Arc<dyn JobStore>,
    cancelled: Arc<AtomicBool>,
}

impl JobContext {
    pub fn new(job_id: JobId, store: Arc<dyn JobStore>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            job_id,
            store,
            cancelled,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Report completion percentage (clamped to 0..=100 by the store).
    pub async fn report_progress(&self, pct: u8) {
        if let Err(e) = self.store.report_progress(self.job_id, pct).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "progress report failed");
        }
    }

    /// Has this job been cancelled while in flight? Handlers doing long or
    /// expensive work should poll this between steps and bail out early.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// A handler for a specific task type.
///
/// The returned value is the task's result; for auto-removed successes it is
/// only observable through the progress event stream, so handlers whose
/// output matters should deliver it to their own sink as a side effect.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &JobContext, task: &Task) -> Result<serde_json::Value, TaskError>;
}

/// Registry of handlers (task_type -> handler).
///
/// Built during initialization, immutable at runtime, so dispatch needs no
/// locking.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), EngineError> {
        if self.handlers.contains_key(&task_type) {
            return Err(EngineError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch one task by type.
    ///
    /// An unrecognized type is reported as a transient task failure, so it
    /// follows the same retry path as any other handler error instead of
    /// crashing the worker.
    pub async fn dispatch(
        &self,
        ctx: &JobContext,
        task: &Task,
    ) -> Result<serde_json::Value, TaskError> {
        let Some(handler) = self.handlers.get(&task.task_type) else {
            return Err(TaskError::transient(format!(
                "no handler registered for task type '{}'",
                task.task_type
            )));
        };
        handler.handle(ctx, task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryJobStore, RetryPolicy};

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn handle(
            &self,
            _ctx: &JobContext,
            _task: &Task,
        ) -> Result<serde_json::Value, TaskError> {
            Ok(serde_json::json!("ok"))
        }
    }

    fn ctx() -> JobContext {
        let store = Arc::new(InMemoryJobStore::new(RetryPolicy::default(), 3));
        JobContext::new(JobId::generate(), store, Arc::new(AtomicBool::new(false)))
    }

    #[tokio::test]
    async fn dispatches_registered_handler() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(TaskType::new("chat"), Arc::new(OkHandler))
            .unwrap();

        let task = Task::new(TaskType::new("chat"), serde_json::json!({}), "u1");
        let out = registry.dispatch(&ctx(), &task).await.unwrap();
        assert_eq!(out, serde_json::json!("ok"));
    }

    #[tokio::test]
    async fn missing_handler_is_a_transient_task_error() {
        let registry = HandlerRegistry::new();
        let task = Task::new(TaskType::new("unknown"), serde_json::json!({}), "u1");
        let err = registry.dispatch(&ctx(), &task).await.unwrap_err();
        assert!(!err.is_permanent());
        assert!(err.message.contains("unknown"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(TaskType::new("chat"), Arc::new(OkHandler))
            .unwrap();
        let err = registry
            .register(TaskType::new("chat"), Arc::new(OkHandler))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateHandler(_)));
    }
}
