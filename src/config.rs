//! Orchestrator Configuration
//!
//! Process-level settings for an [`Orchestrator`](crate::execution::Orchestrator).
//! Every field has a default, so a YAML file only needs the values it changes:
//!
//! ```yaml
//! max_concurrent_workflows: 5
//! history_limit: 50
//! watchdog_interval: 2
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::workflow::model::duration_secs;

/// Default number of workflows allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_WORKFLOWS: usize = 3;

/// Default number of finished executions kept in history.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Default watchdog polling interval.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Default minimum success rate for a workflow to count as completed.
pub const DEFAULT_SUCCESS_THRESHOLD: f64 = 0.8;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_workflows: usize,
    pub history_limit: usize,
    #[serde(with = "duration_secs")]
    pub watchdog_interval: Duration,
    pub event_buffer: usize,
    pub success_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: DEFAULT_MAX_CONCURRENT_WORKFLOWS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            event_buffer: DEFAULT_EVENT_BUFFER,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and validates a configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn with_max_concurrent_workflows(mut self, max: usize) -> Self {
        self.max_concurrent_workflows = max;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn with_success_threshold(mut self, threshold: f64) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Rejects values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_workflows == 0 {
            return Err(OrchestratorError::Config(
                "max_concurrent_workflows must be at least 1".to_string(),
            ));
        }
        if self.watchdog_interval.is_zero() {
            return Err(OrchestratorError::Config(
                "watchdog_interval must be greater than zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(OrchestratorError::Config(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.success_threshold) {
            return Err(OrchestratorError::Config(format!(
                "success_threshold must be between 0 and 1, got {}",
                self.success_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_workflows, 3);
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.watchdog_interval, Duration::from_secs(1));
        assert_eq!(config.success_threshold, 0.8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: OrchestratorConfig =
            serde_yaml::from_str("max_concurrent_workflows: 7\nwatchdog_interval: 0.5\n").unwrap();
        assert_eq!(config.max_concurrent_workflows, 7);
        assert_eq!(config.watchdog_interval, Duration::from_millis(500));
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(OrchestratorConfig::new()
            .with_max_concurrent_workflows(0)
            .validate()
            .is_err());
        assert!(OrchestratorConfig::new()
            .with_success_threshold(1.5)
            .validate()
            .is_err());
        assert!(OrchestratorConfig::new()
            .with_watchdog_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("phasekeeper.yaml");
        fs::write(&path, "history_limit: 5\n").unwrap();

        let config = OrchestratorConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.history_limit, 5);

        fs::write(&path, "event_buffer: 0\n").unwrap();
        assert!(matches!(
            OrchestratorConfig::from_yaml_file(&path),
            Err(OrchestratorError::Config(_))
        ));
    }
}
