use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use weir_controller::{ComponentId, ScheduledState, SchedulableComponent};

/// A processor-like component that follows stop and start requests.
#[derive(Debug)]
pub struct MockProcessor {
    id: ComponentId,
    state: Mutex<ScheduledState>,
    stop_requests: AtomicUsize,
    start_requests: AtomicUsize,
}

impl MockProcessor {
    /// A stopped processor.
    #[must_use]
    pub fn new(id: impl Into<ComponentId>) -> Self {
        Self::with_state(id, ScheduledState::Stopped)
    }

    /// A running processor.
    #[must_use]
    pub fn running(id: impl Into<ComponentId>) -> Self {
        Self::with_state(id, ScheduledState::Running)
    }

    fn with_state(id: impl Into<ComponentId>, state: ScheduledState) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(state),
            stop_requests: AtomicUsize::new(0),
            start_requests: AtomicUsize::new(0),
        }
    }

    /// Stop requests received.
    pub fn stop_requests(&self) -> usize {
        self.stop_requests.load(Ordering::SeqCst)
    }

    /// Start requests received.
    pub fn start_requests(&self) -> usize {
        self.start_requests.load(Ordering::SeqCst)
    }
}

impl SchedulableComponent for MockProcessor {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn scheduled_state(&self) -> ScheduledState {
        *self.state.lock()
    }

    fn request_stop(&self) {
        self.stop_requests.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ScheduledState::Stopped;
    }

    fn request_start(&self) {
        self.start_requests.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ScheduledState::Running;
    }
}
