use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of work a job carries, e.g. `chat`, `analysis`, `search`.
///
/// Kept as an open string newtype on purpose: an unrecognized type must flow
/// through the normal dispatch-failure path instead of being rejected at the
/// type level, so submitters and workers can be deployed independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskType(String);

impl TaskType {
    /// Well-known task types shipped with the engine's reference handlers.
    pub const CHAT: &'static str = "chat";
    pub const ANALYSIS: &'static str = "analysis";
    pub const SEARCH: &'static str = "search";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The logical work request carried as a job's payload.
///
/// Immutable once submitted. `input` is opaque to the engine; only the
/// type-specific handler interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_type: TaskType,
    pub input: serde_json::Value,
    pub user_id: String,
}

impl Task {
    pub fn new(task_type: TaskType, input: serde_json::Value, user_id: impl Into<String>) -> Self {
        Self {
            task_type,
            input,
            user_id: user_id.into(),
        }
    }
}
