//! Serializable batch configuration.

use serde::{Deserialize, Serialize};

use steadfast_core::config::{RetryConfig, env_var};
use steadfast_core::error::ConfigError;

use crate::runner::FailureMode;

/// Plain-data batch settings, including the per-job retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum jobs in flight (>= 1)
    pub concurrency: usize,
    /// Continue past failed jobs or abort on the first
    pub failure_mode: FailureMode,
    /// Retry settings applied to every job
    pub retry: RetryConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            failure_mode: FailureMode::Continue,
            retry: RetryConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Load configuration from environment variables on top of the defaults.
    ///
    /// Reads `STEADFAST_CONCURRENCY` and `STEADFAST_FAILURE_MODE`
    /// (`continue` or `abort`), plus every variable understood by
    /// [`RetryConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            retry: RetryConfig::from_env()?,
            ..Self::default()
        };

        if let Some(concurrency) = env_var("STEADFAST_CONCURRENCY")? {
            config.concurrency = concurrency;
        }
        if let Some(mode) = env_var("STEADFAST_FAILURE_MODE")? {
            config.failure_mode = mode;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that concurrency is at least 1 and the retry settings are valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        self.retry.validate()
    }
}
