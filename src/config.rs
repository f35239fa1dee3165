//! Aggregate configuration: TOML loading, per-component sections, and
//! cross-field validation.
//!
//! Every section is optional in the file; missing fields take the
//! component defaults.

use std::path::Path;

use serde::Deserialize;

use crate::breaker::CircuitBreakerConfig;
use crate::error::{ConfigError, Error, Result};
use crate::limiter::RateLimiterConfig;
use crate::nonce::NonceConfig;
use crate::retry::RetryConfig;
use crate::stream::StreamConfig;

/// Log output configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `gimbal=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Top-level configuration for one upstream target.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limiter: RateLimiterConfig,
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub nonce: NonceConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.limiter.capacity <= 0.0 {
            return Err(invalid("limiter.capacity", "must be positive"));
        }
        if self.limiter.refill_per_sec <= 0.0 {
            return Err(invalid("limiter.refill_per_sec", "must be positive"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(invalid("breaker.failure_threshold", "must be at least 1"));
        }
        if self.breaker.success_threshold == 0 {
            return Err(invalid("breaker.success_threshold", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.breaker.error_rate_threshold) {
            return Err(invalid(
                "breaker.error_rate_threshold",
                "must be a ratio in 0..=1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid(
                "retry.max_delay_ms",
                "must be at least base_delay_ms",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid("retry.backoff_multiplier", "must be at least 1"));
        }
        if self.stream.max_delay_ms < self.stream.initial_delay_ms {
            return Err(invalid(
                "stream.max_delay_ms",
                "must be at least initial_delay_ms",
            ));
        }
        if self.stream.backoff_multiplier < 1.0 {
            return Err(invalid("stream.backoff_multiplier", "must be at least 1"));
        }
        if self.stream.heartbeat_enabled && self.stream.heartbeat_interval_ms == 0 {
            return Err(invalid(
                "stream.heartbeat_interval_ms",
                "must be positive when heartbeat is enabled",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> Error {
    Error::Config(ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    })
}
