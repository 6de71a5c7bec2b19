//! Tokio implementation of the lifecycle task scheduler.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;

pub use config::SchedulerConfig;
pub use error::Error;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, trace, warn};
use weir_scheduler::{
    AbortCallback, Task, TaskHandle, TaskId, TaskOutcome, TaskParts, TaskReporter,
    TaskScheduler, task_channel,
};

/// Runs tasks on a tokio runtime with a bounded number of concurrent bodies.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: SchedulerConfig,
    runtime: Handle,
    permits: Semaphore,
    pending: AtomicUsize,
    running: AtomicUsize,
}

impl TokioScheduler {
    /// Creates a scheduler that spawns onto the given runtime.
    #[must_use]
    pub fn new(config: SchedulerConfig, runtime: Handle) -> Self {
        let permits = Semaphore::new(config.max_concurrent_tasks.max(1));

        info!(
            "Starting task scheduler {} with {} workers",
            config.name,
            permits.available_permits()
        );

        Self {
            inner: Arc::new(Inner {
                config,
                runtime,
                permits,
                pending: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
            }),
        }
    }

    /// Creates a scheduler on the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside of a tokio runtime.
    pub fn from_current(config: SchedulerConfig) -> Result<Self, Error> {
        Ok(Self::new(config, Handle::try_current()?))
    }

    /// Scheduler configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Tasks submitted but not yet running.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Task bodies currently executing.
    #[must_use]
    pub fn running_tasks(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Stops accepting work. Tasks that have not started yet are aborted.
    pub fn shutdown(&self) {
        info!("Shutting down task scheduler {}", self.inner.config.name);
        self.inner.permits.close();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.permits.is_closed()
    }
}

impl TaskScheduler for TokioScheduler {
    fn submit(&self, task: Task) -> TaskHandle {
        let parts = task.into_parts();
        let (reporter, handle) = task_channel(parts.id, &parts.name);

        trace!(
            "Submitting task {} ({}) with {} gates",
            parts.name,
            parts.id,
            parts.gates.len()
        );

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            inner.execute(parts, reporter).await;
        });

        handle
    }
}

impl Inner {
    async fn execute(&self, parts: TaskParts, reporter: TaskReporter) {
        let TaskParts {
            id,
            name,
            gates,
            work,
            on_abort,
        } = parts;
        let run = Run {
            id,
            name,
            on_abort,
            reporter: Some(reporter),
        };

        if let Some(reason) = wait_for_gates(&gates).await {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            run.abort(reason);
            return;
        }

        let Ok(permit) = self.permits.acquire().await else {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            run.abort(format!("scheduler {} is shut down", self.config.name));
            return;
        };

        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);
        run.running();

        let result = AssertUnwindSafe(work).catch_unwind().await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        drop(permit);

        match result {
            Ok(Ok(())) => run.finish(TaskOutcome::Completed),
            Ok(Err(error)) => {
                debug!("Task {} ({}) failed: {}", run.name, run.id, error);
                run.finish(TaskOutcome::Failed(error.to_string()));
            }
            Err(panic) => {
                let reason = format!("task panicked: {}", panic_message(panic.as_ref()));
                warn!("Task {} ({}) {}", run.name, run.id, reason);
                run.fail(reason);
            }
        }
    }
}

/// A task between submission and its outcome.
///
/// If the runtime drops the task before it finishes, for example while
/// shutting down, the abort callback still runs and the task reports aborted.
struct Run {
    id: TaskId,
    name: String,
    on_abort: Option<AbortCallback>,
    reporter: Option<TaskReporter>,
}

impl Run {
    fn running(&self) {
        if let Some(reporter) = &self.reporter {
            reporter.running();
        }
    }

    fn finish(mut self, outcome: TaskOutcome) {
        if let Some(reporter) = self.reporter.take() {
            reporter.finish(outcome);
        }
    }

    fn abort(mut self, reason: String) {
        debug!("Task {} ({}) aborted: {}", self.name, self.id, reason);
        self.run_abort_callback(&reason);
        self.finish(TaskOutcome::Aborted(reason));
    }

    fn fail(mut self, reason: String) {
        self.run_abort_callback(&reason);
        self.finish(TaskOutcome::Failed(reason));
    }

    fn run_abort_callback(&mut self, reason: &str) {
        if let Some(callback) = self.on_abort.take() {
            callback(reason);
        }
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if let Some(reporter) = self.reporter.take() {
            let reason = format!("task {} was dropped before finishing", self.name);
            warn!("Task {} ({}) aborted: {}", self.name, self.id, reason);
            self.run_abort_callback(&reason);
            reporter.finish(TaskOutcome::Aborted(reason));
        }
    }
}

async fn wait_for_gates(gates: &[TaskHandle]) -> Option<String> {
    for gate in gates {
        match gate.wait().await {
            TaskOutcome::Completed => {}
            outcome => {
                return Some(format!("gate {} ({}) {}", gate.name(), gate.id(), outcome));
            }
        }
    }

    None
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
