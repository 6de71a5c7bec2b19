use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::task::TaskId;

/// How a task ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The body ran and returned `Ok`.
    Completed,
    /// The body returned an error or panicked.
    Failed(String),
    /// The body never ran, because a gate did not complete or the scheduler
    /// went away.
    Aborted(String),
}

impl TaskOutcome {
    /// Whether the body ran to successful completion.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Progress of a submitted task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// Waiting for gates or a free worker.
    Pending,
    /// The body is executing.
    Running,
    /// The task is done.
    Finished(TaskOutcome),
}

/// Observes a submitted task. Cheap to clone.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    name: Arc<str>,
    status: watch::Receiver<TaskStatus>,
}

impl TaskHandle {
    /// Identifier of the observed task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Name of the observed task.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.status.borrow().clone()
    }

    /// Whether the task has finished, successfully or not.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(*self.status.borrow(), TaskStatus::Finished(_))
    }

    /// The outcome, if the task has finished.
    #[must_use]
    pub fn outcome(&self) -> Option<TaskOutcome> {
        match &*self.status.borrow() {
            TaskStatus::Finished(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Waits for the task to finish.
    ///
    /// A task whose reporter is dropped without finishing counts as aborted.
    pub async fn wait(&self) -> TaskOutcome {
        let mut status = self.status.clone();
        let finished = status
            .wait_for(|status| matches!(status, TaskStatus::Finished(_)))
            .await;

        match finished.as_deref() {
            Ok(TaskStatus::Finished(outcome)) => outcome.clone(),
            _ => TaskOutcome::Aborted(format!("task {} was dropped before finishing", self.name)),
        }
    }

    /// Waits for the task to finish, giving up after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

/// Publishing side of a [`TaskHandle`], owned by whoever executes the task.
#[derive(Debug)]
pub struct TaskReporter {
    status: watch::Sender<TaskStatus>,
}

impl TaskReporter {
    /// Marks the task as running.
    pub fn running(&self) {
        self.status.send_replace(TaskStatus::Running);
    }

    /// Publishes the final outcome.
    pub fn finish(self, outcome: TaskOutcome) {
        self.status.send_replace(TaskStatus::Finished(outcome));
    }
}

/// Creates a linked reporter and handle for a task.
#[must_use]
pub fn task_channel(id: TaskId, name: &str) -> (TaskReporter, TaskHandle) {
    let (tx, rx) = watch::channel(TaskStatus::Pending);

    (
        TaskReporter { status: tx },
        TaskHandle {
            id,
            name: Arc::from(name),
            status: rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_wait_returns_published_outcome() {
        let (reporter, handle) = task_channel(TaskId::new(), "enable 1");
        assert_eq!(handle.status(), TaskStatus::Pending);

        reporter.running();
        assert_eq!(handle.status(), TaskStatus::Running);
        assert!(!handle.is_finished());

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.wait().await }
        });
        reporter.finish(TaskOutcome::Failed("boom".to_string()));

        assert_eq!(
            waiter.await.unwrap(),
            TaskOutcome::Failed("boom".to_string())
        );
        assert_eq!(handle.outcome(), Some(TaskOutcome::Failed("boom".to_string())));
    }

    #[tokio::test]
    async fn test_dropped_reporter_counts_as_aborted() {
        let (reporter, handle) = task_channel(TaskId::new(), "enable 2");
        drop(reporter);

        assert_matches!(handle.wait().await, TaskOutcome::Aborted(_));
    }

    #[tokio::test]
    async fn test_wait_timeout_expires() {
        let (_reporter, handle) = task_channel(TaskId::new(), "enable 3");

        assert_eq!(handle.wait_timeout(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn test_outcome_survives_reporter() {
        let (reporter, handle) = task_channel(TaskId::new(), "enable 4");
        reporter.finish(TaskOutcome::Completed);

        assert!(handle.is_finished());
        assert_eq!(handle.wait().await, TaskOutcome::Completed);
    }
}
