use std::fmt;
use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

use crate::error::TaskError;
use crate::handle::TaskHandle;

/// Boxed body of a task.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Invoked with a reason when a task's body does not run to completion.
pub type AbortCallback = Box<dyn FnOnce(&str) + Send + 'static>;

/// Unique identifier of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work for a [`TaskScheduler`](crate::TaskScheduler).
pub struct Task {
    id: TaskId,
    name: String,
    gates: Vec<TaskHandle>,
    work: TaskFuture,
    on_abort: Option<AbortCallback>,
}

/// The pieces of a [`Task`], taken apart by scheduler implementations.
pub struct TaskParts {
    /// Task identifier.
    pub id: TaskId,
    /// Human readable name used in logs.
    pub name: String,
    /// Tasks that must complete before this one starts.
    pub gates: Vec<TaskHandle>,
    /// The task body.
    pub work: TaskFuture,
    /// Callback for a body that was skipped or panicked.
    pub on_abort: Option<AbortCallback>,
}

impl Task {
    /// Creates a new ungated task.
    pub fn new<N, F>(name: N, work: F) -> Self
    where
        N: Into<String>,
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            id: TaskId::new(),
            name: name.into(),
            gates: Vec::new(),
            work: Box::pin(work),
            on_abort: None,
        }
    }

    /// Adds a gate. The task starts only once every gate has completed.
    #[must_use]
    pub fn gated_on(mut self, gate: TaskHandle) -> Self {
        if !self.gates.iter().any(|existing| existing.id() == gate.id()) {
            self.gates.push(gate);
        }
        self
    }

    /// Sets the callback invoked when the body is skipped or panics.
    #[must_use]
    pub fn on_abort<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&str) + Send + 'static,
    {
        self.on_abort = Some(Box::new(callback));
        self
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gates this task waits on.
    #[must_use]
    pub fn gates(&self) -> &[TaskHandle] {
        &self.gates
    }

    /// Splits the task into its parts.
    #[must_use]
    pub fn into_parts(self) -> TaskParts {
        TaskParts {
            id: self.id,
            name: self.name,
            gates: self.gates,
            work: self.work,
            on_abort: self.on_abort,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("gates", &self.gates.len())
            .field("on_abort", &self.on_abort.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::task_channel;

    #[test]
    fn test_gates_are_deduplicated() {
        let (_reporter, gate) = task_channel(TaskId::new(), "gate");

        let task = Task::new("work", async { Ok(()) })
            .gated_on(gate.clone())
            .gated_on(gate);

        assert_eq!(task.gates().len(), 1);
    }

    #[tokio::test]
    async fn test_into_parts_keeps_body_and_callback() {
        let (tx, rx) = std::sync::mpsc::channel();
        let task = Task::new("work", async { Err(TaskError::new("boom")) })
            .on_abort(move |reason| tx.send(reason.to_string()).unwrap());
        let id = task.id();

        let parts = task.into_parts();
        assert_eq!(parts.id, id);
        assert_eq!(parts.name, "work");
        assert_eq!(parts.work.await, Err(TaskError::new("boom")));

        (parts.on_abort.unwrap())("skipped");
        assert_eq!(rx.recv().unwrap(), "skipped");
    }
}
