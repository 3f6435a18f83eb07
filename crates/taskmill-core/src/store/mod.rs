//! Job Store: state machine ownership, retry policy, and claim semantics.
//!
//! The [`JobStore`] trait is the seam between the engine and the durable
//! queue backend. The in-memory implementation ships with the crate; a
//! Redis- or Postgres-backed one would implement the same trait. Claim is
//! the sole point of mutual exclusion: implementations must hand a given
//! Waiting job to exactly one concurrent caller.

mod memory;
mod record;
mod retry;

pub use memory::InMemoryJobStore;
pub use record::JobRecord;
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{JobId, JobState, Task};
use crate::error::{EngineError, TaskError};

/// One notification per state-visible transition of a job: every accepted
/// progress update, entry into Delayed, and each terminal transition.
/// Emitted only after the change is visible to `get`/`list` readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub progress: u8,
    pub state: JobState,
}

/// A claimed job handed to exactly one worker.
///
/// `record` is a snapshot taken at claim time; `cancelled` is the live flag a
/// cooperative handler can poll to abort its own work after `cancel` has
/// force-failed the job.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub record: JobRecord,
    /// 1-based number of the attempt this claim starts.
    pub attempt: u32,
    pub cancelled: Arc<AtomicBool>,
}

/// Result of the atomic cancel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No such job.
    NotFound,

    /// A Waiting/Delayed job was deleted outright.
    Removed,

    /// An Active job was force-failed with the cancellation sentinel; the
    /// in-flight handler keeps running but its result will be discarded.
    FailedActive,

    /// The job had already reached a terminal state; nothing changed.
    AlreadyTerminal,
}

/// Port over the durable queue backend.
///
/// Infrastructure failures surface as [`EngineError`] from every call and are
/// never fed into the task-level retry policy.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new Waiting job and wake a claimer. Returns the stored
    /// record so callers can read the assigned id and creation time.
    async fn enqueue(&self, task: Task) -> Result<JobRecord, EngineError>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, EngineError>;

    /// All jobs currently in any of the given states.
    async fn list(&self, states: &[JobState]) -> Result<Vec<JobRecord>, EngineError>;

    /// Atomically transition exactly one Waiting job to Active (FIFO within
    /// the queue, promoting due Delayed jobs first). Suspends until a job is
    /// available; returns `None` once the store has shut down.
    async fn claim(&self) -> Option<ClaimedJob>;

    /// Update progress on an Active job. Values are clamped to 0..=100 and
    /// regressions within an attempt are ignored. A no-op if the job is no
    /// longer Active (e.g. it was force-failed by cancellation mid-flight).
    async fn report_progress(&self, id: JobId, value: u8) -> Result<(), EngineError>;

    /// Handler success: Completed, progress 100, record removed (successes
    /// are not retained). A no-op if cancellation already won the race.
    async fn resolve(&self, id: JobId, result: serde_json::Value) -> Result<(), EngineError>;

    /// Handler failure. A transient error with budget left schedules a
    /// Delayed retry with backoff; otherwise the job is Failed and retained.
    /// Returns the resulting state.
    async fn reject(&self, id: JobId, error: TaskError) -> Result<JobState, EngineError>;

    /// Delete a Waiting/Delayed job outright. Returns false if the job does
    /// not exist or is not in a removable state.
    async fn remove(&self, id: JobId) -> Result<bool, EngineError>;

    /// Cancel as a single atomic operation, so a check-then-act caller can
    /// never race a concurrent claim or completion.
    async fn cancel(&self, id: JobId) -> Result<CancelOutcome, EngineError>;

    /// Subscribe to progress/terminal notifications.
    fn subscribe(&self) -> broadcast::Receiver<ProgressEvent>;

    /// Wake blocked `claim` callers with `None`. In-flight work is not
    /// interrupted.
    async fn shutdown(&self);
}
