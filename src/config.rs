//! Configuration management for Dualrate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{DualrateError, Result};
use crate::ratelimit::WAIT_BUFFER_SECS;

/// Prefix for environment variable overrides, e.g. `DUALRATE__LIMITER__RPM_LIMIT`.
pub const ENV_PREFIX: &str = "DUALRATE";

/// Main configuration for Dualrate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DualrateConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Simulated workload driven by the CLI
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Limits and window for a single [`RateLimiter`](crate::RateLimiter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum requests per window (`None` disables request throttling)
    #[serde(default)]
    pub rpm_limit: Option<u64>,

    /// Maximum tokens per window (`None` disables token throttling)
    #[serde(default)]
    pub tpm_limit: Option<u64>,

    /// Length of the trailing window in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rpm_limit: None,
            tpm_limit: None,
            window_seconds: default_window_seconds(),
        }
    }
}

fn default_window_seconds() -> f64 {
    60.0
}

impl LimiterConfig {
    /// Create an unlimited configuration with the default 60 second window.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rpm_limit(mut self, limit: u64) -> Self {
        self.rpm_limit = Some(limit);
        self
    }

    pub fn with_tpm_limit(mut self, limit: u64) -> Self {
        self.tpm_limit = Some(limit);
        self
    }

    pub fn with_window_seconds(mut self, window_seconds: f64) -> Self {
        self.window_seconds = window_seconds;
        self
    }

    /// Reject zero limits and windows that are non-positive or too large for a `Duration`.
    pub fn validate(&self) -> Result<()> {
        if self.rpm_limit == Some(0) {
            return Err(DualrateError::InvalidArgument(
                "rpm_limit must be positive".to_string(),
            ));
        }
        if self.tpm_limit == Some(0) {
            return Err(DualrateError::InvalidArgument(
                "tpm_limit must be positive".to_string(),
            ));
        }
        if self.window_seconds <= 0.0
            || Duration::try_from_secs_f64(self.window_seconds + WAIT_BUFFER_SECS).is_err()
        {
            return Err(DualrateError::InvalidArgument(format!(
                "window_seconds must be a positive, representable duration, got {}",
                self.window_seconds
            )));
        }
        Ok(())
    }
}

/// Simulated workload configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of worker threads sharing the limiter
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Throttled calls made by each worker
    #[serde(default = "default_requests_per_worker")]
    pub requests_per_worker: usize,

    /// Lower bound of the simulated token cost per call
    #[serde(default = "default_min_tokens")]
    pub min_tokens: u64,

    /// Upper bound of the simulated token cost per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,

    /// Simulated duration of each call in milliseconds
    #[serde(default = "default_work_millis")]
    pub work_millis: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            requests_per_worker: default_requests_per_worker(),
            min_tokens: default_min_tokens(),
            max_tokens: default_max_tokens(),
            work_millis: default_work_millis(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_requests_per_worker() -> usize {
    10
}

fn default_min_tokens() -> u64 {
    100
}

fn default_max_tokens() -> u64 {
    1000
}

fn default_work_millis() -> u64 {
    50
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(DualrateError::Config(
                "simulation.workers must be at least 1".to_string(),
            ));
        }
        if self.min_tokens > self.max_tokens {
            return Err(DualrateError::Config(format!(
                "simulation.min_tokens ({}) exceeds simulation.max_tokens ({})",
                self.min_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

impl DualrateConfig {
    /// Load configuration from an optional file, overlaid with
    /// `DUALRATE__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: DualrateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: DualrateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| DualrateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;
        self.simulation.validate()
    }
}
