//! Immutable engine configuration.
//!
//! An [`EngineConfig`] is built once (from defaults, a TOML file, or both),
//! validated, and then handed to each component constructor. Nothing mutates
//! it afterwards.
//!
//! ```toml
//! [database]
//! path = "queue.db"
//!
//! [rate_limit]
//! max_per_second = 2
//! mode = "adaptive"
//!
//! [retry]
//! max_attempts = 3
//! backoff = "exponential"
//!
//! [orchestrator]
//! max_concurrency = 5
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::db::DatabaseOptions;
use crate::download::{RateLimitConfig, RateLimitMode, RetryPolicy};

/// Lowest accepted worker count.
pub const MIN_CONCURRENCY: usize = 1;

/// Highest accepted worker count.
pub const MAX_CONCURRENCY: usize = 100;

/// Default worker count.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default per-task attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Configuration loading/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// `[database]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSection {
    /// SQLite file holding the task store.
    pub path: PathBuf,
    /// Connection pool size (1..=20).
    pub max_connections: u32,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        let options = DatabaseOptions::default();
        Self {
            path: PathBuf::from("mediafetch.db"),
            max_connections: options.max_connections,
            busy_timeout_ms: options.busy_timeout_ms,
        }
    }
}

impl DatabaseSection {
    /// Pool options derived from this section.
    #[must_use]
    pub fn options(&self) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.max_connections,
            busy_timeout_ms: self.busy_timeout_ms,
        }
    }
}

/// `[rate_limit]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSection {
    pub enabled: bool,
    pub mode: RateLimitMode,
    pub max_per_second: u32,
    pub max_per_minute: u32,
    pub max_per_hour: u32,
    pub min_per_second: u32,
    pub min_per_minute: u32,
    pub min_per_hour: u32,
    pub burst_size: u32,
    pub cooldown_secs: u64,
    pub cooldown_failure_threshold: usize,
    pub cooldown_window_secs: u64,
    /// When false, `acquire` reports a hard block instead of waiting.
    pub block_on_limit: bool,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            enabled: true,
            mode: defaults.mode,
            max_per_second: defaults.max_per_second,
            max_per_minute: defaults.max_per_minute,
            max_per_hour: defaults.max_per_hour,
            min_per_second: defaults.min_per_second,
            min_per_minute: defaults.min_per_minute,
            min_per_hour: defaults.min_per_hour,
            burst_size: defaults.burst_size,
            cooldown_secs: defaults.cooldown.as_secs(),
            cooldown_failure_threshold: defaults.cooldown_failure_threshold,
            cooldown_window_secs: defaults.cooldown_window.as_secs(),
            block_on_limit: defaults.block_on_limit,
        }
    }
}

impl RateLimitSection {
    /// Limiter configuration derived from this section.
    #[must_use]
    pub fn to_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            mode: self.mode,
            max_per_second: self.max_per_second,
            max_per_minute: self.max_per_minute,
            max_per_hour: self.max_per_hour,
            min_per_second: self.min_per_second,
            min_per_minute: self.min_per_minute,
            min_per_hour: self.min_per_hour,
            burst_size: self.burst_size,
            cooldown: Duration::from_secs(self.cooldown_secs),
            cooldown_failure_threshold: self.cooldown_failure_threshold,
            cooldown_window: Duration::from_secs(self.cooldown_window_secs),
            block_on_limit: self.block_on_limit,
        }
    }
}

/// Backoff flavour for `[retry]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffSetting {
    Exponential,
    Table,
}

/// `[retry]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    /// In-place attempts per strategy call.
    pub max_attempts: u32,
    pub backoff: BackoffSetting,
    /// Delay table in milliseconds, used when `backoff = "table"`.
    pub delays_ms: Vec<u64>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffSetting::Exponential,
            delays_ms: vec![1_000, 2_000, 5_000, 10_000, 30_000],
        }
    }
}

impl RetrySection {
    /// Retry policy derived from this section.
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        match self.backoff {
            BackoffSetting::Exponential => RetryPolicy::exponential(self.max_attempts),
            BackoffSetting::Table => RetryPolicy::with_delay_table(
                self.max_attempts,
                self.delays_ms.iter().copied().map(Duration::from_millis).collect(),
            ),
        }
    }
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorSection {
    pub max_concurrency: usize,
    /// Attempt ceiling stamped on newly submitted tasks.
    pub default_max_attempts: u32,
    pub dequeue_timeout_ms: u64,
    /// Interval between progress snapshots; 0 disables them.
    pub checkpoint_interval_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_CONCURRENCY,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            dequeue_timeout_ms: 1_000,
            checkpoint_interval_secs: 60,
        }
    }
}

impl OrchestratorSection {
    #[must_use]
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    /// `None` when checkpoints are disabled.
    #[must_use]
    pub fn checkpoint_interval(&self) -> Option<Duration> {
        (self.checkpoint_interval_secs > 0)
            .then(|| Duration::from_secs(self.checkpoint_interval_secs))
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub database: DatabaseSection,
    pub rate_limit: RateLimitSection,
    pub retry: RetrySection,
    pub orchestrator: OrchestratorSection,
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a value is out of range.
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`], [`ConfigError::Parse`] or
    /// [`ConfigError::Invalid`].
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// Checks every value against the ranges the engine accepts.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=20).contains(&self.database.max_connections) {
            return Err(ConfigError::invalid(
                "database.max_connections",
                format!("{} (expected 1..=20)", self.database.max_connections),
            ));
        }
        if self.database.busy_timeout_ms > 120_000 {
            return Err(ConfigError::invalid(
                "database.busy_timeout_ms",
                format!("{} (expected 0..=120000)", self.database.busy_timeout_ms),
            ));
        }

        let rl = &self.rate_limit;
        for (field, max, min) in [
            ("rate_limit.max_per_second", rl.max_per_second, rl.min_per_second),
            ("rate_limit.max_per_minute", rl.max_per_minute, rl.min_per_minute),
            ("rate_limit.max_per_hour", rl.max_per_hour, rl.min_per_hour),
        ] {
            if max == 0 {
                return Err(ConfigError::invalid(field, "must be at least 1"));
            }
            if min > max {
                return Err(ConfigError::invalid(
                    field,
                    format!("floor {min} exceeds maximum {max}"),
                ));
            }
        }
        if rl.mode == RateLimitMode::Burst && rl.burst_size == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.burst_size",
                "must be at least 1 in burst mode",
            ));
        }
        if rl.cooldown_failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.cooldown_failure_threshold",
                "must be at least 1",
            ));
        }

        if self.retry.max_attempts == 0 || self.retry.max_attempts > 10 {
            return Err(ConfigError::invalid(
                "retry.max_attempts",
                format!("{} (expected 1..=10)", self.retry.max_attempts),
            ));
        }
        if self.retry.backoff == BackoffSetting::Table && self.retry.delays_ms.is_empty() {
            return Err(ConfigError::invalid(
                "retry.delays_ms",
                "table backoff needs at least one delay",
            ));
        }

        let orch = &self.orchestrator;
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&orch.max_concurrency) {
            return Err(ConfigError::invalid(
                "orchestrator.max_concurrency",
                format!(
                    "{} (expected {MIN_CONCURRENCY}..={MAX_CONCURRENCY})",
                    orch.max_concurrency
                ),
            ));
        }
        if orch.default_max_attempts == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.default_max_attempts",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.max_concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            [rate_limit]
            max_per_second = 4
            mode = "burst"
            burst_size = 2

            [orchestrator]
            max_concurrency = 8
        "#;
        let config = EngineConfig::from_toml_str(raw, Path::new("inline.toml")).unwrap();
        assert_eq!(config.rate_limit.max_per_second, 4);
        assert_eq!(config.rate_limit.mode, RateLimitMode::Burst);
        assert_eq!(config.rate_limit.max_per_minute, 30);
        assert_eq!(config.orchestrator.max_concurrency, 8);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let raw = "[orchestrator]\nworkers = 3\n";
        let err = EngineConfig::from_toml_str(raw, Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_concurrency_out_of_range_rejected() {
        let raw = "[orchestrator]\nmax_concurrency = 0\n";
        let err = EngineConfig::from_toml_str(raw, Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("orchestrator.max_concurrency"));
    }

    #[test]
    fn test_floor_above_max_rejected() {
        let raw = "[rate_limit]\nmax_per_second = 2\nmin_per_second = 3\n";
        let err = EngineConfig::from_toml_str(raw, Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("floor 3 exceeds maximum 2"));
    }

    #[test]
    fn test_table_backoff_requires_delays() {
        let raw = "[retry]\nbackoff = \"table\"\ndelays_ms = []\n";
        let err = EngineConfig::from_toml_str(raw, Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("retry.delays_ms"));
    }

    #[test]
    fn test_from_toml_file_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let err = EngineConfig::from_toml_file(&temp.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_checkpoint_interval_zero_disables() {
        let section = OrchestratorSection {
            checkpoint_interval_secs: 0,
            ..OrchestratorSection::default()
        };
        assert!(section.checkpoint_interval().is_none());
    }
}
