//! Worker pool: turns claimed jobs into executed, resolved jobs.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::index::MetadataIndex;
use crate::runtime::{HandlerRegistry, JobContext};
use crate::store::JobStore;

/// Handle over a group of concurrent execution loops.
///
/// Dropping the handle does not stop the workers; call
/// `shutdown_and_join` for a graceful stop. Shutdown stops the loops from
/// taking new claims; in-flight handler execution is never interrupted.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` worker loops against the given store/index/registry.
    pub fn spawn(
        n: usize,
        store: Arc<dyn JobStore>,
        index: Arc<dyn MetadataIndex>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let store = Arc::clone(&store);
            let index = Arc::clone(&index);
            let registry = Arc::clone(&registry);
            let mut rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, store, index, registry, &mut rx).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    /// Ask all workers to stop after their current job.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Request shutdown and wait for every loop to exit.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<dyn JobStore>,
    index: Arc<dyn MetadataIndex>,
    registry: Arc<HandlerRegistry>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // claim() suspends, so race it against the shutdown signal.
        let claimed = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            claimed = store.claim() => claimed,
        };
        let Some(claimed) = claimed else {
            // store shut down
            break;
        };

        let job_id = claimed.record.id;
        tracing::debug!(
            worker_id,
            %job_id,
            task_type = %claimed.record.task.task_type,
            attempt = claimed.attempt,
            "job claimed"
        );

        let ctx = JobContext::new(job_id, Arc::clone(&store), Arc::clone(&claimed.cancelled));
        ctx.report_progress(0).await;

        match registry.dispatch(&ctx, &claimed.record.task).await {
            Ok(output) => {
                if let Err(e) = store.resolve(job_id, output).await {
                    tracing::error!(worker_id, %job_id, error = %e, "resolve failed");
                }
                // Completed records are auto-removed, so the metadata must go
                // with them. Failed records are retained for inspection and
                // keep theirs.
                if let Err(e) = index.forget(job_id).await {
                    tracing::error!(worker_id, %job_id, error = %e, "metadata cleanup failed");
                }
            }
            Err(err) => {
                if let Err(e) = store.reject(job_id, err).await {
                    tracing::error!(worker_id, %job_id, error = %e, "reject failed");
                }
            }
        }
    }
    tracing::debug!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobState, Task, TaskType};
    use crate::error::TaskError;
    use crate::index::InMemoryMetadataIndex;
    use crate::runtime::TaskHandler;
    use crate::store::{InMemoryJobStore, RetryPolicy};
    use async_trait::async_trait;
    use std::time::Duration;

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        async fn handle(
            &self,
            ctx: &JobContext,
            task: &Task,
        ) -> Result<serde_json::Value, TaskError> {
            ctx.report_progress(50).await;
            Ok(task.input.clone())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_delay: Duration::from_millis(20),
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn pool_executes_jobs_end_to_end() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new(fast_policy(), 3));
        let index: Arc<dyn MetadataIndex> = Arc::new(InMemoryMetadataIndex::new());
        let mut registry = HandlerRegistry::new();
        registry
            .register(TaskType::new("chat"), Arc::new(EchoHandler))
            .unwrap();
        let pool = WorkerPool::spawn(2, Arc::clone(&store), index, Arc::new(registry));

        let mut events = store.subscribe();
        let record = store
            .enqueue(Task::new(
                TaskType::new("chat"),
                serde_json::json!({"message": "hi"}),
                "u1",
            ))
            .await
            .unwrap();

        // Completed jobs are auto-removed, so observe through the events.
        let mut last_state = None;
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_secs(1), events.recv()).await
        {
            if event.job_id == record.id {
                last_state = Some(event.state);
                if event.state.is_terminal() {
                    break;
                }
            }
        }
        assert_eq!(last_state, Some(JobState::Completed));
        assert!(store.get(record.id).await.unwrap().is_none());

        pool.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new(fast_policy(), 3));
        let index: Arc<dyn MetadataIndex> = Arc::new(InMemoryMetadataIndex::new());
        let pool = WorkerPool::spawn(2, store, index, Arc::new(HandlerRegistry::new()));

        tokio::time::timeout(Duration::from_secs(1), pool.shutdown_and_join())
            .await
            .expect("workers did not stop");
    }
}
