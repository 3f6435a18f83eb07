//! taskmill-core
//!
//! Background task execution engine: accepts asynchronous units of work,
//! schedules them with bounded concurrency, tracks per-task progress, retries
//! transient failures with exponential backoff, supports cooperative
//! cancellation, and exposes a queryable per-user view of task state.
//!
//! # Module map
//! - **domain**: identifiers, task payloads, job state, API views
//! - **store**: the Job Store port, its state machine, retry policy, and the
//!   in-memory implementation
//! - **index**: the Task Metadata Index (ownership-aware shadow of live jobs)
//! - **runtime**: task handlers and type-based dispatch
//! - **worker**: the bounded pool of claim/execute/resolve loops
//! - **engine**: the Task Lifecycle Controller composing the above
//! - **config** / **error**: deployment tunables and the error taxonomy

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod index;
pub mod runtime;
pub mod store;
pub mod worker;

pub use config::EngineConfig;
pub use domain::{JobId, JobState, Task, TaskProgress, TaskSummary, TaskType};
pub use engine::{TaskEngine, TaskEngineBuilder};
pub use error::{CANCELLED_ERROR, EngineError, TaskError, TaskErrorKind};
pub use index::{InMemoryMetadataIndex, MetadataIndex, TaskMetadata};
pub use runtime::{HandlerRegistry, JobContext, TaskHandler};
pub use store::{
    CancelOutcome, ClaimedJob, InMemoryJobStore, JobRecord, JobStore, ProgressEvent, RetryPolicy,
};
pub use worker::WorkerPool;
