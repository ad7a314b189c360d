//! Configuration for articles, the engine and the task manager.
//!
//! All types deserialize from JSON with every field optional; missing
//! fields take the documented defaults.

mod article;

pub use article::{
    ArticleConfig, ArticleType, Audience, CodeConfig, IllustrateConfig, PlanConfig,
    ResearchConfig, ReviewConfig, TargetLength, WriteConfig,
};

use crate::errors::{ArticleflowError, ConfigError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Workflow engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout applied to every individual adapter call.
    #[serde(default = "default_adapter_timeout_ms")]
    pub adapter_timeout_ms: u64,
}

fn default_adapter_timeout_ms() -> u64 {
    60_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: default_adapter_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Creates a new engine configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the adapter timeout.
    #[must_use]
    pub fn with_adapter_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.adapter_timeout_ms = timeout_ms;
        self
    }

    /// Gets the adapter timeout as a Duration.
    #[must_use]
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.adapter_timeout_ms == 0 {
            return Err(ConfigError::new("engine.adapter_timeout_ms", "must be positive"));
        }
        Ok(())
    }
}

/// Task manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskManagerConfig {
    /// Executions allowed to run at the same time.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Seconds a terminal execution is kept before it is reaped.
    #[serde(default = "default_expiry_seconds")]
    pub expiry_seconds: u64,
    /// Seconds between reaper sweeps.
    #[serde(default = "default_reap_interval_seconds")]
    pub reap_interval_seconds: u64,
    /// Engine settings shared by every execution.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_expiry_seconds() -> u64 {
    300
}

fn default_reap_interval_seconds() -> u64 {
    60
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            expiry_seconds: default_expiry_seconds(),
            reap_interval_seconds: default_reap_interval_seconds(),
            engine: EngineConfig::default(),
        }
    }
}

impl TaskManagerConfig {
    /// Creates a new task manager configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Sets the expiry window.
    #[must_use]
    pub fn with_expiry_seconds(mut self, seconds: u64) -> Self {
        self.expiry_seconds = seconds;
        self
    }

    /// Sets the reap interval.
    #[must_use]
    pub fn with_reap_interval_seconds(mut self, seconds: u64) -> Self {
        self.reap_interval_seconds = seconds;
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Gets the expiry window as a Duration.
    #[must_use]
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_seconds)
    }

    /// Gets the reap interval as a Duration.
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::new("max_concurrent_tasks", "must be at least 1"));
        }
        if self.reap_interval_seconds == 0 {
            return Err(ConfigError::new("reap_interval_seconds", "must be positive"));
        }
        self.engine.validate()
    }
}

/// Loading helpers shared by the configuration types.
pub trait LoadConfig: DeserializeOwned + Sized {
    /// Parses the configuration from a JSON string.
    fn from_json_str(json: &str) -> Result<Self, ArticleflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses the configuration from a JSON file.
    fn from_file(path: impl AsRef<Path>) -> Result<Self, ArticleflowError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

impl LoadConfig for ArticleConfig {}
impl LoadConfig for EngineConfig {}
impl LoadConfig for TaskManagerConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_task_manager_config_defaults() {
        let config = TaskManagerConfig::default();
        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.expiry(), Duration::from_secs(300));
        assert_eq!(config.engine.adapter_timeout(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_task_manager_config_validate() {
        let err = TaskManagerConfig::new()
            .with_max_concurrent_tasks(0)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "max_concurrent_tasks");

        let err = TaskManagerConfig::new()
            .with_engine(EngineConfig::new().with_adapter_timeout_ms(0))
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "engine.adapter_timeout_ms");
    }

    #[test]
    fn test_from_json_str() {
        let config =
            TaskManagerConfig::from_json_str(r#"{"max_concurrent_tasks": 2, "engine": {"adapter_timeout_ms": 500}}"#)
                .unwrap();
        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.engine.adapter_timeout_ms, 500);
        assert_eq!(config.expiry_seconds, 300);
    }

    #[test]
    fn test_from_json_str_invalid() {
        let err = ArticleConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ArticleflowError::Serialization(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"model": "local-llm", "illustrate": false}}"#).unwrap();

        let config = ArticleConfig::from_file(file.path()).unwrap();
        assert_eq!(config.model, "local-llm");
        assert!(!config.illustrate);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::from_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ArticleflowError::Io(_)));
    }
}
