//! Error taxonomy.
//!
//! Two distinct failure channels, never mixed:
//! - [`EngineError`]: infrastructure and configuration failures. These
//!   propagate as `Err` from the public API and are never fed into the
//!   task-level retry policy.
//! - [`TaskError`]: handler failures. These never surface as `Err` to the
//!   caller of `add_task`; they are recorded in job state and drive the
//!   retry/backoff machinery.

use thiserror::Error;

use crate::domain::{JobId, TaskType};

/// Sentinel message stored on a job that was force-failed by cancellation.
/// Distinguishes a cancellation-induced failure from a genuine handler error.
pub const CANCELLED_ERROR: &str = "Cancelled by user";

/// Infrastructure-level failure of an engine call.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("handler not found for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Retry classification of a handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
    /// Worth retrying; consumes the attempt budget.
    Transient,

    /// Retrying cannot help; the job fails on this attempt.
    Permanent,
}

/// A failure reported by (or on behalf of) a task handler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Input that can never become valid by waiting. Fails fast instead of
    /// burning the whole attempt budget.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::permanent(message)
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == TaskErrorKind::Permanent
    }
}
