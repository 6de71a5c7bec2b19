use serde::{Deserialize, Serialize};

/// Configuration for [`TokioScheduler`](crate::TokioScheduler).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name used in log output.
    pub name: String,

    /// Upper bound on task bodies executing at the same time.
    ///
    /// Tasks waiting on gates do not count against this limit.
    pub max_concurrent_tasks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "lifecycle".to_string(),
            max_concurrent_tasks: num_cpus::get().saturating_mul(2).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SchedulerConfig = serde_json::from_str(r#"{ "name": "flow" }"#).unwrap();

        assert_eq!(config.name, "flow");
        assert!(config.max_concurrent_tasks >= 1);
    }
}
