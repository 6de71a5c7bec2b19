//! Abstract interface for running lifecycle tasks off the caller's thread.
//!
//! A [`Task`] is a named future that may be gated on other tasks. Submitting
//! it to a [`TaskScheduler`] returns a [`TaskHandle`] that observes progress
//! and the final [`TaskOutcome`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod handle;
mod task;

pub use error::TaskError;
pub use handle::{TaskHandle, TaskOutcome, TaskReporter, TaskStatus, task_channel};
pub use task::{AbortCallback, Task, TaskFuture, TaskId, TaskParts};

/// Executes tasks asynchronously.
///
/// Implementations must never run a task inline inside [`submit`]: callers
/// submit while holding short-lived locks that the task itself may need.
///
/// A task's gates are awaited before it starts. If any gate finishes with an
/// outcome other than [`TaskOutcome::Completed`], the task body is skipped, its
/// abort callback runs and the task finishes as [`TaskOutcome::Aborted`]. A
/// panicking body invokes the abort callback and finishes as
/// [`TaskOutcome::Failed`].
///
/// [`submit`]: TaskScheduler::submit
pub trait TaskScheduler: Clone + Send + Sync + 'static {
    /// Submits a task and returns immediately.
    fn submit(&self, task: Task) -> TaskHandle;
}
