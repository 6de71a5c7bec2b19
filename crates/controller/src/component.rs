//! Non-service components that reference controller services

use crate::id::ComponentId;
use crate::lifecycle::ScheduledState;

/// A processor-like component whose scheduling the provider can stop and start.
pub trait SchedulableComponent: Send + Sync + 'static {
    /// Component id.
    fn id(&self) -> &ComponentId;

    /// Current scheduling state.
    fn scheduled_state(&self) -> ScheduledState;

    /// Threads still executing. A stopped component may still be draining.
    fn active_threads(&self) -> usize {
        0
    }

    /// Asks the component to stop being scheduled.
    fn request_stop(&self);

    /// Asks the component to start being scheduled.
    fn request_start(&self);

    /// Scheduled, or still draining threads.
    fn is_running(&self) -> bool {
        self.scheduled_state() == ScheduledState::Running || self.active_threads() > 0
    }
}
