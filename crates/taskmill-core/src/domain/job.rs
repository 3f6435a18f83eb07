//! Job lifecycle state and the read-only views callers see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::task::TaskType;

/// Lifecycle state of a job.
///
/// Transitions:
/// - Waiting -> Active (claimed by a worker)
/// - Active -> Completed (handler success; terminal, record auto-removed)
/// - Active -> Delayed (handler failure with retry budget left) -> Waiting
/// - Active -> Failed (retry budget exhausted, permanent error, or
///   cancellation of an active job; terminal, record retained)
/// - Waiting | Delayed -> removed outright by cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to be claimed by a worker.
    Waiting,

    /// Currently being executed.
    Active,

    /// Waiting out a retry backoff.
    Delayed,

    /// Finished successfully.
    Completed,

    /// Finished unsuccessfully.
    Failed,
}

impl JobState {
    /// No further automatic transition occurs from these states.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Eligible for a worker claim?
    pub fn is_runnable(self) -> bool {
        matches!(self, JobState::Waiting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Delayed => "delayed",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

/// Snapshot returned by `TaskEngine::get_task_progress`: the join of the live
/// job record with its metadata. Progress is meaningful only while `state` is
/// `active`; `error` is set once the job has failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub progress: u8,
    pub state: JobState,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One row of `TaskEngine::list_tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: JobId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub user_id: String,
    pub state: JobState,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
}
