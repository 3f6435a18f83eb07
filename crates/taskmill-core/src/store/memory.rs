//! In-memory job store.
//!
//! Stands in for the durable queue backend in tests and single-process
//! deployments. All mutation happens under one mutex, which is what makes
//! `claim` and `cancel` atomic with respect to each other.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, broadcast, watch};

use super::record::JobRecord;
use super::retry::RetryPolicy;
use super::{CancelOutcome, ClaimedJob, JobStore, ProgressEvent};
use crate::domain::{JobId, JobState, Task};
use crate::error::{EngineError, TaskError};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Entry in the delayed min-heap.
///
/// Reverse ordering so BinaryHeap pops the earliest `next_run_at` first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DelayedEntry {
    next_run_at: Instant,
    job_id: JobId,
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.next_run_at.cmp(&self.next_run_at)
    }
}

struct StoreState {
    /// All job records (single source of truth).
    records: HashMap<JobId, JobRecord>,

    /// FIFO of Waiting jobs (ids only).
    ready: VecDeque<JobId>,

    /// Delayed jobs ordered by wake time. May hold stale entries for jobs
    /// that were removed or requeued; promotion re-checks the record state.
    delayed: BinaryHeap<DelayedEntry>,

    /// Live cancellation flags for Active jobs.
    cancel_flags: HashMap<JobId, Arc<AtomicBool>>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            ready: VecDeque::new(),
            delayed: BinaryHeap::new(),
            cancel_flags: HashMap::new(),
        }
    }

    /// Move delayed jobs whose backoff has elapsed back into the ready queue.
    fn promote_due_jobs(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.delayed.peek() {
            if entry.next_run_at > now {
                break; // heap is sorted, nothing else is due
            }
            let entry = self.delayed.pop().expect("peeked entry exists");
            if let Some(record) = self.records.get_mut(&entry.job_id)
                && record.state == JobState::Delayed
            {
                record.requeue();
                self.ready.push_back(entry.job_id);
            }
        }
    }
}

pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
    notify: Notify,
    events: broadcast::Sender<ProgressEvent>,
    shutdown_tx: watch::Sender<bool>,
    retry_policy: RetryPolicy,
    max_attempts: u32,
}

impl InMemoryJobStore {
    pub fn new(retry_policy: RetryPolicy, max_attempts: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(StoreState::new()),
            notify: Notify::new(),
            events,
            shutdown_tx,
            retry_policy,
            max_attempts,
        }
    }

    fn emit(&self, job_id: JobId, progress: u8, state: JobState) {
        // No subscribers is fine; the event channel is best-effort.
        let _ = self.events.send(ProgressEvent {
            job_id,
            progress,
            state,
        });
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, task: Task) -> Result<JobRecord, EngineError> {
        let record = JobRecord::new(JobId::generate(), task, self.max_attempts);
        let snapshot = record.clone();
        {
            let mut state = self.state.lock().await;
            state.ready.push_back(record.id);
            state.records.insert(record.id, record);
        }
        self.notify.notify_one();
        tracing::debug!(job_id = %snapshot.id, task_type = %snapshot.task.task_type, "job enqueued");
        Ok(snapshot)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, EngineError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn list(&self, states: &[JobState]) -> Result<Vec<JobRecord>, EngineError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| states.contains(&r.state))
            .cloned()
            .collect())
    }

    async fn claim(&self) -> Option<ClaimedJob> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            if *shutdown_rx.borrow() {
                return None;
            }

            let next_wake = {
                let mut state = self.state.lock().await;
                state.promote_due_jobs();

                // Skip stale ids whose record was removed under them.
                while let Some(job_id) = state.ready.pop_front() {
                    let Some(record) = state.records.get_mut(&job_id) else {
                        continue;
                    };
                    if record.state != JobState::Waiting {
                        continue;
                    }
                    record.start_attempt();
                    let attempt = record.attempts_made + 1;
                    let snapshot = record.clone();
                    let cancelled = Arc::new(AtomicBool::new(false));
                    state.cancel_flags.insert(job_id, Arc::clone(&cancelled));
                    return Some(ClaimedJob {
                        record: snapshot,
                        attempt,
                        cancelled,
                    });
                }

                state.delayed.peek().map(|entry| entry.next_run_at)
            };

            // Wait for an enqueue/retry notification, the next backoff
            // expiry, or shutdown, whichever comes first.
            if let Some(wake_at) = next_wake {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep_until(wake_at.into()) => {}
                }
            } else {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = self.notify.notified() => {}
                }
            }
        }
    }

    async fn report_progress(&self, id: JobId, value: u8) -> Result<(), EngineError> {
        let accepted = {
            let mut state = self.state.lock().await;
            match state.records.get_mut(&id) {
                // Progress only means something while the job is Active. A
                // late report from a handler whose job was force-failed by
                // cancellation is dropped silently.
                Some(record) if record.state == JobState::Active => {
                    let value = value.min(100);
                    if value < record.progress {
                        None
                    } else {
                        record.set_progress(value);
                        Some(record.progress)
                    }
                }
                _ => None,
            }
        };
        if let Some(progress) = accepted {
            self.emit(id, progress, JobState::Active);
        }
        Ok(())
    }

    async fn resolve(&self, id: JobId, _result: serde_json::Value) -> Result<(), EngineError> {
        let completed = {
            let mut state = self.state.lock().await;
            state.cancel_flags.remove(&id);
            match state.records.get(&id).map(|r| r.state) {
                Some(JobState::Active) => {
                    let mut record = state.records.remove(&id).expect("record exists");
                    record.mark_completed();
                    true
                }
                // Cancellation won the race; the handler's result is
                // discarded and the force-failed record stands.
                _ => false,
            }
        };
        if completed {
            self.emit(id, 100, JobState::Completed);
            tracing::debug!(job_id = %id, "job completed");
        }
        Ok(())
    }

    async fn reject(&self, id: JobId, error: TaskError) -> Result<JobState, EngineError> {
        let (outcome, should_notify) = {
            let mut state = self.state.lock().await;
            state.cancel_flags.remove(&id);

            let Some(record) = state.records.get_mut(&id) else {
                return Err(EngineError::JobNotFound(id));
            };
            if record.state != JobState::Active {
                // Cancellation already force-failed this job mid-flight.
                return Ok(record.state);
            }

            if error.is_permanent() || record.budget_exhausted() {
                record.mark_failed(error.message.clone());
                let (progress, attempts, max_attempts) =
                    (record.progress, record.attempts_made, record.max_attempts);
                tracing::warn!(
                    job_id = %id,
                    attempts,
                    max_attempts,
                    error = %error.message,
                    "job failed permanently"
                );
                ((progress, JobState::Failed), false)
            } else {
                let delay = self.retry_policy.next_delay(record.attempts_made + 1);
                let next_run_at = Instant::now() + delay;
                record.schedule_retry(next_run_at, error.message.clone());
                let attempts = record.attempts_made;
                state.delayed.push(DelayedEntry {
                    next_run_at,
                    job_id: id,
                });
                tracing::info!(
                    job_id = %id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error.message,
                    "retry scheduled"
                );
                ((0, JobState::Delayed), true)
            }
        };

        let (progress, new_state) = outcome;
        self.emit(id, progress, new_state);
        // A newly scheduled wake time may be earlier than what a sleeping
        // claimer computed.
        if should_notify {
            self.notify.notify_one();
        }
        Ok(new_state)
    }

    async fn remove(&self, id: JobId) -> Result<bool, EngineError> {
        let mut state = self.state.lock().await;
        match state.records.get(&id).map(|r| r.state) {
            Some(JobState::Waiting) | Some(JobState::Delayed) => {
                state.records.remove(&id);
                state.ready.retain(|queued| *queued != id);
                // Any delayed-heap entry goes stale and is skipped at
                // promotion time.
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel(&self, id: JobId) -> Result<CancelOutcome, EngineError> {
        let outcome = {
            let mut state = self.state.lock().await;
            match state.records.get(&id).map(|r| r.state) {
                None => return Ok(CancelOutcome::NotFound),
                Some(JobState::Waiting) | Some(JobState::Delayed) => {
                    state.records.remove(&id);
                    state.ready.retain(|queued| *queued != id);
                    CancelOutcome::Removed
                }
                Some(JobState::Active) => {
                    if let Some(flag) = state.cancel_flags.remove(&id) {
                        flag.store(true, Ordering::Relaxed);
                    }
                    let record = state.records.get_mut(&id).expect("record exists");
                    record.mark_cancelled();
                    CancelOutcome::FailedActive
                }
                Some(JobState::Completed) | Some(JobState::Failed) => {
                    CancelOutcome::AlreadyTerminal
                }
            }
        };
        if outcome == CancelOutcome::FailedActive {
            self.emit(id, 0, JobState::Failed);
        }
        if outcome != CancelOutcome::AlreadyTerminal {
            tracing::info!(job_id = %id, ?outcome, "job cancelled");
        }
        Ok(outcome)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use rstest::rstest;
    use std::time::Duration;

    fn store() -> InMemoryJobStore {
        InMemoryJobStore::new(fast_policy(), 3)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_millis(100),
            jitter: 0.0,
        }
    }

    fn task(task_type: &str, user: &str) -> Task {
        Task::new(TaskType::new(task_type), serde_json::json!({}), user)
    }

    async fn claim(store: &InMemoryJobStore) -> ClaimedJob {
        tokio::time::timeout(Duration::from_secs(1), store.claim())
            .await
            .expect("claim timed out")
            .expect("store not shut down")
    }

    #[tokio::test]
    async fn enqueue_assigns_id_and_waits() {
        let store = store();
        let record = store.enqueue(task("chat", "u1")).await.unwrap();
        assert_eq!(record.state, JobState::Waiting);
        assert_eq!(record.progress, 0);

        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.state, JobState::Waiting);
    }

    #[tokio::test]
    async fn claim_is_fifo_and_transitions_to_active() {
        let store = store();
        let first = store.enqueue(task("chat", "u1")).await.unwrap();
        let second = store.enqueue(task("search", "u1")).await.unwrap();

        let claimed = claim(&store).await;
        assert_eq!(claimed.record.id, first.id);
        assert_eq!(claimed.attempt, 1);
        assert_eq!(
            store.get(first.id).await.unwrap().unwrap().state,
            JobState::Active
        );
        assert_eq!(
            store.get(second.id).await.unwrap().unwrap().state,
            JobState::Waiting
        );
    }

    #[tokio::test]
    async fn claim_suspends_until_enqueue() {
        let store = Arc::new(store());
        let claimer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!claimer.is_finished());

        let record = store.enqueue(task("chat", "u1")).await.unwrap();
        let claimed = tokio::time::timeout(Duration::from_secs(1), claimer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(claimed.record.id, record.id);
    }

    #[tokio::test]
    async fn resolve_removes_the_record() {
        let store = store();
        let record = store.enqueue(task("chat", "u1")).await.unwrap();
        let claimed = claim(&store).await;
        store
            .resolve(claimed.record.id, serde_json::json!("done"))
            .await
            .unwrap();
        assert!(store.get(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reject_schedules_retry_then_requeues() {
        let store = store();
        let record = store.enqueue(task("chat", "u1")).await.unwrap();
        let _claimed = claim(&store).await;

        let state = store
            .reject(record.id, TaskError::transient("boom"))
            .await
            .unwrap();
        assert_eq!(state, JobState::Delayed);

        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.attempts_made, 1);
        assert_eq!(fetched.last_error.as_deref(), Some("boom"));

        // Second claim only becomes possible after the backoff elapses.
        let reclaimed = claim(&store).await;
        assert_eq!(reclaimed.record.id, record.id);
        assert_eq!(reclaimed.attempt, 2);
        assert_eq!(reclaimed.record.progress, 0);
    }

    #[tokio::test]
    async fn reject_exhausts_budget_to_failed() {
        let store = store();
        let record = store.enqueue(task("chat", "u1")).await.unwrap();

        for n in 1..=3u32 {
            let _claimed = claim(&store).await;
            let state = store
                .reject(record.id, TaskError::transient(format!("boom #{n}")))
                .await
                .unwrap();
            if n < 3 {
                assert_eq!(state, JobState::Delayed);
            } else {
                assert_eq!(state, JobState::Failed);
            }
        }

        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.attempts_made, 3);
        assert_eq!(fetched.last_error.as_deref(), Some("boom #3"));
    }

    #[tokio::test]
    async fn permanent_error_fails_without_retry() {
        let store = store();
        let record = store.enqueue(task("search", "u1")).await.unwrap();
        let _claimed = claim(&store).await;

        let state = store
            .reject(
                record.id,
                TaskError::invalid_input("Invalid input for search task"),
            )
            .await
            .unwrap();
        assert_eq!(state, JobState::Failed);

        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.attempts_made, 1);
        assert_eq!(
            fetched.last_error.as_deref(),
            Some("Invalid input for search task")
        );
    }

    #[tokio::test]
    async fn progress_updates_are_monotonic_and_emitted() {
        let store = store();
        let record = store.enqueue(task("chat", "u1")).await.unwrap();
        let mut events = store.subscribe();
        let _claimed = claim(&store).await;

        store.report_progress(record.id, 0).await.unwrap();
        store.report_progress(record.id, 50).await.unwrap();
        store.report_progress(record.id, 30).await.unwrap(); // regression, dropped
        store
            .resolve(record.id, serde_json::Value::Null)
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push((event.progress, event.state));
        }
        assert_eq!(
            seen,
            vec![
                (0, JobState::Active),
                (50, JobState::Active),
                (100, JobState::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn progress_on_non_active_job_is_ignored() {
        let store = store();
        let record = store.enqueue(task("chat", "u1")).await.unwrap();
        store.report_progress(record.id, 50).await.unwrap();
        assert_eq!(store.get(record.id).await.unwrap().unwrap().progress, 0);
    }

    #[tokio::test]
    async fn remove_deletes_waiting_jobs_only() {
        let store = store();
        let record = store.enqueue(task("chat", "u1")).await.unwrap();
        assert!(store.remove(record.id).await.unwrap());
        assert!(store.get(record.id).await.unwrap().is_none());
        // Gone, so a second remove is a no-op.
        assert!(!store.remove(record.id).await.unwrap());

        let active = store.enqueue(task("chat", "u1")).await.unwrap();
        let _claimed = claim(&store).await;
        assert!(!store.remove(active.id).await.unwrap());
    }

    #[tokio::test]
    async fn removed_job_is_never_claimed() {
        let store = store();
        let doomed = store.enqueue(task("chat", "u1")).await.unwrap();
        let kept = store.enqueue(task("chat", "u1")).await.unwrap();
        store.remove(doomed.id).await.unwrap();

        let claimed = claim(&store).await;
        assert_eq!(claimed.record.id, kept.id);
    }

    #[tokio::test]
    async fn cancel_waiting_removes_outright() {
        let store = store();
        let record = store.enqueue(task("chat", "u1")).await.unwrap();
        let outcome = store.cancel(record.id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Removed);
        assert!(store.get(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_active_force_fails_with_sentinel() {
        let store = store();
        let record = store.enqueue(task("chat", "u1")).await.unwrap();
        let claimed = claim(&store).await;
        assert!(!claimed.cancelled.load(Ordering::Relaxed));

        let outcome = store.cancel(record.id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::FailedActive);
        assert!(claimed.cancelled.load(Ordering::Relaxed));

        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.state, JobState::Failed);
        assert_eq!(
            fetched.last_error.as_deref(),
            Some(crate::error::CANCELLED_ERROR)
        );
        // Forced straight to terminal without touching the retry counter.
        assert_eq!(fetched.attempts_made, 0);
    }

    #[tokio::test]
    async fn late_resolve_after_cancel_is_discarded() {
        let store = store();
        let record = store.enqueue(task("chat", "u1")).await.unwrap();
        let _claimed = claim(&store).await;
        store.cancel(record.id).await.unwrap();

        store
            .resolve(record.id, serde_json::json!("too late"))
            .await
            .unwrap();
        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.state, JobState::Failed);
    }

    #[rstest]
    #[case::not_found(false, CancelOutcome::NotFound)]
    #[case::terminal(true, CancelOutcome::AlreadyTerminal)]
    #[tokio::test]
    async fn cancel_edge_cases(#[case] make_failed: bool, #[case] expected: CancelOutcome) {
        let store = store();
        let id = if make_failed {
            let record = store.enqueue(task("chat", "u1")).await.unwrap();
            let _claimed = claim(&store).await;
            store
                .reject(record.id, TaskError::permanent("nope"))
                .await
                .unwrap();
            record.id
        } else {
            JobId::generate()
        };
        assert_eq!(store.cancel(id).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn list_filters_by_state() {
        let store = store();
        let waiting = store.enqueue(task("chat", "u1")).await.unwrap();
        let active = store.enqueue(task("chat", "u1")).await.unwrap();
        // FIFO: the first enqueued job gets claimed.
        let claimed = claim(&store).await;
        assert_eq!(claimed.record.id, waiting.id);

        let listed = store.list(&[JobState::Waiting]).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active.id);

        let both = store
            .list(&[JobState::Waiting, JobState::Active])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_unblocks_claimers() {
        let store = Arc::new(store());
        let claimer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.shutdown().await;

        let claimed = tokio::time::timeout(Duration::from_secs(1), claimer)
            .await
            .unwrap()
            .unwrap();
        assert!(claimed.is_none());
    }
}
