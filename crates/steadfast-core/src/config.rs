//! Serializable retry configuration.
//!
//! [`RetryConfig`] is the plain-data form of a [`RetryPolicy`]: durations in
//! milliseconds, loadable from any serde format or from `STEADFAST_*`
//! environment variables. Hooks, classifiers and cancellation are runtime
//! concerns and are attached to the built policy instead.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::{Jitter, RetryPolicy};

/// Plain-data retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound for any delay, in milliseconds
    pub max_delay_ms: u64,
    /// Exponential growth factor (>= 1)
    pub factor: f64,
    /// Jitter mode
    pub jitter: Jitter,
    /// Per-attempt timeout in milliseconds
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 60_000,
            factor: 2.0,
            jitter: Jitter::None,
            attempt_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    /// Load configuration from environment variables on top of the defaults.
    ///
    /// This will look for:
    /// - `STEADFAST_MAX_RETRIES`
    /// - `STEADFAST_BASE_DELAY_MS`
    /// - `STEADFAST_MAX_DELAY_MS`
    /// - `STEADFAST_FACTOR`
    /// - `STEADFAST_JITTER` (`none`, `full`, `equal`, `decorrelated`)
    /// - `STEADFAST_ATTEMPT_TIMEOUT_MS`
    ///
    /// Unparsable values are an error rather than silently ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(max_retries) = env_var("STEADFAST_MAX_RETRIES")? {
            config.max_retries = max_retries;
        }
        if let Some(base) = env_var("STEADFAST_BASE_DELAY_MS")? {
            config.base_delay_ms = base;
        }
        if let Some(max) = env_var("STEADFAST_MAX_DELAY_MS")? {
            config.max_delay_ms = max;
        }
        if let Some(factor) = env_var("STEADFAST_FACTOR")? {
            config.factor = factor;
        }
        if let Some(jitter) = env_var("STEADFAST_JITTER")? {
            config.jitter = jitter;
        }
        if let Some(timeout) = env_var("STEADFAST_ATTEMPT_TIMEOUT_MS")? {
            config.attempt_timeout_ms = Some(timeout);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the backoff invariants: `max_delay >= base_delay`, `factor >= 1`,
    /// and a non-zero attempt timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Invalid {
                field: "max_delay_ms",
                reason: format!(
                    "{} is smaller than base_delay_ms ({})",
                    self.max_delay_ms, self.base_delay_ms
                ),
            });
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(ConfigError::Invalid {
                field: "factor",
                reason: format!("must be a finite number >= 1, got {}", self.factor),
            });
        }
        if self.attempt_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "attempt_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Build a [`RetryPolicy`] with the default classifier and no hooks.
    pub fn to_policy(&self) -> Result<RetryPolicy, ConfigError> {
        self.validate()?;

        let mut builder = RetryPolicy::builder()
            .max_retries(self.max_retries)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .factor(self.factor)
            .jitter(self.jitter);
        if let Some(timeout) = self.attempt_timeout_ms {
            builder = builder.attempt_timeout(Duration::from_millis(timeout));
        }
        Ok(builder.build())
    }
}

/// Read and parse an environment variable. Missing is `Ok(None)`.
pub fn env_var<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
        Err(_) => Ok(None),
    }
}
