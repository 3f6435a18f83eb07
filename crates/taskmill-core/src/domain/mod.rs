//! Domain model: identifiers, task payloads, job state, and API views.

pub mod ids;
pub mod job;
pub mod task;

pub use ids::JobId;
pub use job::{JobState, TaskProgress, TaskSummary};
pub use task::{Task, TaskType};
