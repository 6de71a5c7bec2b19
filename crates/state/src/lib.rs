//! Abstract interface for per-component key/value state.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::StateError;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A versioned snapshot of a component's state.
///
/// Version `0` means nothing has been stored yet. Every successful write
/// increments the version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMap {
    version: u64,
    entries: HashMap<String, String>,
}

impl StateMap {
    /// Creates a snapshot.
    #[must_use]
    pub const fn new(version: u64, entries: HashMap<String, String>) -> Self {
        Self { version, entries }
    }

    /// Snapshot version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// All entries.
    #[must_use]
    pub const fn entries(&self) -> &HashMap<String, String> {
        &self.entries
    }

    /// Whether the snapshot holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reads and writes the state of a single component.
#[async_trait]
pub trait StateManager: Send + Sync + 'static {
    /// Current snapshot.
    async fn get_state(&self) -> Result<StateMap, StateError>;

    /// Replaces all entries unconditionally.
    async fn set_state(&self, entries: HashMap<String, String>) -> Result<(), StateError>;

    /// Replaces all entries if the stored version still matches `expected`.
    ///
    /// Returns `false` when another writer got there first.
    async fn replace(
        &self,
        expected: &StateMap,
        entries: HashMap<String, String>,
    ) -> Result<bool, StateError>;

    /// Removes all entries.
    async fn clear(&self) -> Result<(), StateError>;
}

/// Hands out state managers keyed by component id.
pub trait StateManagerProvider: Send + Sync + 'static {
    /// The state manager for `component_id`, created on first use.
    fn state_manager(&self, component_id: &str) -> Arc<dyn StateManager>;

    /// Drops the state of a removed component.
    fn on_component_removed(&self, component_id: &str);
}
