//! Job record: the queue's unit of work.

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::domain::{JobId, JobState, Task};
use crate::error::CANCELLED_ERROR;

/// Metadata + payload for one job in the store.
///
/// This is the single source of truth for a job's lifecycle. The store's
/// queue structures (ready/delayed) hold JobIds only; every state transition
/// happens here, through methods rather than direct field writes.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub task: Task,
    pub state: JobState,

    /// Completion percentage, 0..=100. Meaningful only while Active;
    /// resets to 0 at the start of each attempt.
    pub progress: u8,

    /// Number of completed (failed) executions so far.
    pub attempts_made: u32,

    /// Attempt budget before the job fails permanently.
    pub max_attempts: u32,

    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,

    /// When to requeue (set while Delayed).
    pub next_run_at: Option<Instant>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: JobId, task: Task, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            task,
            state: JobState::Waiting,
            progress: 0,
            attempts_made: 0,
            max_attempts,
            last_error: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Waiting -> Active. Progress resets so readers never see a stale value
    /// from a previous attempt.
    pub fn start_attempt(&mut self) {
        self.state = JobState::Active;
        self.progress = 0;
        self.touch();
    }

    /// Update progress, clamped to 100. Regressions within an attempt are
    /// ignored to keep successive reads non-decreasing.
    pub fn set_progress(&mut self, value: u8) {
        let value = value.min(100);
        if value > self.progress {
            self.progress = value;
            self.touch();
        }
    }

    /// Active -> Completed (terminal).
    pub fn mark_completed(&mut self) {
        self.state = JobState::Completed;
        self.progress = 100;
        self.touch();
    }

    /// Active -> Failed (terminal). Counts the final attempt.
    pub fn mark_failed(&mut self, error: String) {
        self.state = JobState::Failed;
        self.attempts_made += 1;
        self.last_error = Some(error);
        self.touch();
    }

    /// Active -> Delayed. Counts the failed attempt and parks the job until
    /// `next_run_at`.
    pub fn schedule_retry(&mut self, next_run_at: Instant, error: String) {
        self.state = JobState::Delayed;
        self.attempts_made += 1;
        self.last_error = Some(error);
        self.next_run_at = Some(next_run_at);
        self.touch();
    }

    /// Delayed -> Waiting once the backoff has elapsed.
    pub fn requeue(&mut self) {
        self.state = JobState::Waiting;
        self.next_run_at = None;
        self.touch();
    }

    /// Active -> Failed with the cancellation sentinel. Bypasses the attempt
    /// counter: a cancelled job was not a failed execution.
    pub fn mark_cancelled(&mut self) {
        self.state = JobState::Failed;
        self.last_error = Some(CANCELLED_ERROR.to_string());
        self.touch();
    }

    /// Has the attempt budget been used up?
    pub fn budget_exhausted(&self) -> bool {
        self.attempts_made + 1 >= self.max_attempts
    }
}
