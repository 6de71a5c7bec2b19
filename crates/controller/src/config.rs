//! Configuration for the service provider

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time [`ServiceProvider::wait_for_state`](crate::ServiceProvider::wait_for_state) waits
const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`ServiceProvider`](crate::ServiceProvider)
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Timeout used when waiting for a service to reach a state
    pub await_timeout: Duration,

    /// Run the deactivation hook after a failed activation, so partially
    /// acquired resources are released
    pub deactivate_on_failed_activation: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            await_timeout: DEFAULT_AWAIT_TIMEOUT,
            deactivate_on_failed_activation: true,
        }
    }
}
