//! Manager configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//! Durations are plain millisecond integers on the wire.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resources::ResourceCapacity;
use crate::scheduler::{RetryPolicy, ScoreParams, SchedulingStrategy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub max_history: usize,
    pub window_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_history: 10_000,
            window_ms: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightedConfig {
    pub horizon_ms: u64,
}

impl Default for WeightedConfig {
    fn default() -> Self {
        Self {
            horizon_ms: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub max_workers: usize,
    pub strategy: SchedulingStrategy,
    pub default_timeout_ms: u64,
    pub grace_period_ms: u64,
    pub default_max_retries: u32,
    pub default_estimated_duration_ms: u64,
    pub maintenance_interval_ms: u64,
    /// Finished tasks kept in the registry before pruning the oldest.
    pub max_retained_tasks: usize,
    /// Finished tasks older than this are pruned.
    pub history_retention_ms: u64,
    pub cancel_dependents_on_failure: bool,
    pub capacity: ResourceCapacity,
    pub retry: RetryConfig,
    pub monitor: MonitorConfig,
    pub weighted: WeightedConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            strategy: SchedulingStrategy::PriorityFirst,
            default_timeout_ms: 300_000,
            grace_period_ms: 5_000,
            default_max_retries: 3,
            default_estimated_duration_ms: 300_000,
            maintenance_interval_ms: 1_000,
            max_retained_tasks: 10_000,
            history_retention_ms: 86_400_000,
            cancel_dependents_on_failure: true,
            capacity: ResourceCapacity::default(),
            retry: RetryConfig::default(),
            monitor: MonitorConfig::default(),
            weighted: WeightedConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ManagerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("default_timeout_ms must be positive".into()));
        }
        if self.maintenance_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "maintenance_interval_ms must be positive".into(),
            ));
        }
        if !self.capacity.cpu_cores.is_finite() || self.capacity.cpu_cores < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "capacity.cpu_cores must be a non-negative number, got {}",
                self.capacity.cpu_cores
            )));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if self.monitor.max_history == 0 {
            return Err(ConfigError::Invalid("monitor.max_history must be at least 1".into()));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn history_retention(&self) -> Duration {
        Duration::from_millis(self.history_retention_ms)
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_millis(self.monitor.window_ms)
    }

    pub fn score_params(&self) -> ScoreParams {
        ScoreParams {
            default_duration: Duration::from_millis(self.default_estimated_duration_ms),
            horizon: Duration::from_millis(self.weighted.horizon_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ManagerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert_eq!(config.strategy, SchedulingStrategy::PriorityFirst);
    }

    #[test]
    fn partial_document_overrides_only_what_it_names() {
        let config = ManagerConfig::from_toml_str(
            r#"
            max_workers = 8
            strategy = "deadline_first"

            [capacity]
            gpu_slots = 2

            [retry]
            base_delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.max_workers, 8);
        assert_eq!(config.strategy, SchedulingStrategy::DeadlineFirst);
        assert_eq!(config.capacity.gpu_slots, 2);
        assert_eq!(config.capacity.memory_mb, 16_384);
        assert_eq!(config.retry.policy().base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay_ms, 60_000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = ManagerConfig::from_toml_str("max_workers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ManagerConfig::from_toml_str("strategy = \"lottery\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ManagerConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("not/here.toml"));
    }
}
