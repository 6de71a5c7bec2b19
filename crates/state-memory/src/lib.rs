//! In-memory implementation of component state for tests and local use.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;
use weir_state::{StateError, StateManager, StateManagerProvider, StateMap};

/// In-memory state manager provider.
#[derive(Clone, Debug, Default)]
pub struct MemoryStateManagerProvider {
    managers: Arc<DashMap<String, Arc<MemoryStateManager>>>,
}

impl MemoryStateManagerProvider {
    /// Creates a new instance of `MemoryStateManagerProvider`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether state is held for `component_id`.
    #[must_use]
    pub fn contains(&self, component_id: &str) -> bool {
        self.managers.contains_key(component_id)
    }

    /// Number of components with state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.managers.len()
    }

    /// Whether no component has state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

impl StateManagerProvider for MemoryStateManagerProvider {
    fn state_manager(&self, component_id: &str) -> Arc<dyn StateManager> {
        self.managers
            .entry(component_id.to_string())
            .or_insert_with(|| Arc::new(MemoryStateManager::new(component_id)))
            .clone()
    }

    fn on_component_removed(&self, component_id: &str) {
        if let Some((_, manager)) = self.managers.remove(component_id) {
            manager.removed.store(true, Ordering::SeqCst);
            debug!("Dropped state of component {}", component_id);
        }
    }
}

/// In-memory state of one component.
#[derive(Debug)]
pub struct MemoryStateManager {
    component_id: String,
    state: Mutex<StateMap>,
    removed: AtomicBool,
}

impl MemoryStateManager {
    /// Creates an empty state manager.
    #[must_use]
    pub fn new(component_id: &str) -> Self {
        Self {
            component_id: component_id.to_string(),
            state: Mutex::new(StateMap::default()),
            removed: AtomicBool::new(false),
        }
    }

    fn ensure_available(&self) -> Result<(), StateError> {
        if self.removed.load(Ordering::SeqCst) {
            return Err(StateError::Removed(self.component_id.clone()));
        }

        Ok(())
    }
}

#[async_trait]
impl StateManager for MemoryStateManager {
    async fn get_state(&self) -> Result<StateMap, StateError> {
        self.ensure_available()?;

        Ok(self.state.lock().await.clone())
    }

    async fn set_state(&self, entries: HashMap<String, String>) -> Result<(), StateError> {
        self.ensure_available()?;

        let mut state = self.state.lock().await;
        *state = StateMap::new(state.version() + 1, entries);

        Ok(())
    }

    async fn replace(
        &self,
        expected: &StateMap,
        entries: HashMap<String, String>,
    ) -> Result<bool, StateError> {
        self.ensure_available()?;

        let mut state = self.state.lock().await;
        if state.version() != expected.version() {
            return Ok(false);
        }
        *state = StateMap::new(state.version() + 1, entries);

        Ok(true)
    }

    async fn clear(&self) -> Result<(), StateError> {
        self.set_state(HashMap::new()).await
    }
}
