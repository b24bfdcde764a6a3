//! Serving configuration: one TOML file for all three subsystems.
//!
//! # Configuration File Location
//!
//! The config file is loaded from (in order of priority):
//! 1. `EDGEQUAKE_RETRIEVAL_CONFIG` environment variable
//! 2. `./retrieval.toml` (current working directory)
//! 3. `~/.edgequake/retrieval.toml` (user config)
//! 4. Built-in defaults
//!
//! Environment overrides are applied on top of whichever source was used:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `EDGEQUAKE_MAX_RPS` | `backpressure.max_requests_per_second` |
//! | `EDGEQUAKE_BURST_CAPACITY` | `backpressure.burst_capacity` |
//! | `EDGEQUAKE_MAX_QUEUE_SIZE` | `backpressure.max_queue_size` |
//! | `EDGEQUAKE_ENABLE_RERANKING` | `retrieval.enable_reranking` |
//! | `EDGEQUAKE_RERANK_TOP_K` | `retrieval.rerank_top_k` |
//! | `EDGEQUAKE_SLA_P95_MS` | `latency.sla_p95_ms` |
//!
//! # Example Configuration
//!
//! ```toml
//! [retrieval]
//! dense_weight = 0.6
//! lexical_weight = 0.4
//! rerank_top_k = 10
//!
//! [backpressure]
//! max_requests_per_second = 50.0
//! degradation_levels = ["normal", "reduced_features", "essential_only"]
//!
//! [latency]
//! sla_p95_ms = 250.0
//! ```
//!
//! Unknown keys are rejected.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::backpressure::BackpressureConfig;
use crate::error::RetrievalError;
use crate::latency::LatencyConfig;
use crate::retrieval::RetrievalConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "EDGEQUAKE_RETRIEVAL_CONFIG";
const CONFIG_FILE_NAME: &str = "retrieval.toml";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or write the configuration file.
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML configuration.
    #[error("Failed to parse TOML config: {0}")]
    Parse(String),

    /// Failed to serialize configuration.
    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    /// Invalid values.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl From<RetrievalError> for ConfigError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Config(msg) => ConfigError::Validation(msg),
            other => ConfigError::Validation(other.to_string()),
        }
    }
}

// ============================================================================
// Root config
// ============================================================================

/// Configuration for a [`ServingContext`](crate::ServingContext).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServingConfig {
    pub retrieval: RetrievalConfig,
    pub backpressure: BackpressureConfig,
    pub latency: LatencyConfig,
}

fn env_override<T: FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => {
            let trimmed = raw.trim();
            trimmed.parse::<T>().map(Some).map_err(|_| {
                ConfigError::Validation(format!("{} has an invalid value: {:?}", var, raw))
            })
        }
        Err(_) => Ok(None),
    }
}

impl ServingConfig {
    /// Load from the first config file found, apply environment overrides
    /// and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file()?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn load_file() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if Path::new(&path).exists() {
                debug!(path = %path, "Loading serving config from env path");
                return Self::from_file(&path);
            }
        }

        let local_path = Path::new(CONFIG_FILE_NAME);
        if local_path.exists() {
            debug!(path = %local_path.display(), "Loading serving config");
            return Self::from_file(local_path);
        }

        if let Some(home) = dirs::home_dir() {
            let user_path = home.join(".edgequake").join(CONFIG_FILE_NAME);
            if user_path.exists() {
                debug!(path = %user_path.display(), "Loading serving config");
                return Self::from_file(&user_path);
            }
        }

        Ok(Self::default())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_str = self.to_toml()?;
        std::fs::write(path.as_ref(), toml_str)?;
        Ok(())
    }

    /// Apply `EDGEQUAKE_*` overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_override::<f64>("EDGEQUAKE_MAX_RPS")? {
            self.backpressure.max_requests_per_second = v;
        }
        if let Some(v) = env_override::<u32>("EDGEQUAKE_BURST_CAPACITY")? {
            self.backpressure.burst_capacity = v;
        }
        if let Some(v) = env_override::<usize>("EDGEQUAKE_MAX_QUEUE_SIZE")? {
            self.backpressure.max_queue_size = v;
        }
        if let Some(v) = env_override::<bool>("EDGEQUAKE_ENABLE_RERANKING")? {
            self.retrieval.enable_reranking = v;
        }
        if let Some(v) = env_override::<usize>("EDGEQUAKE_RERANK_TOP_K")? {
            self.retrieval.rerank_top_k = v;
        }
        if let Some(v) = env_override::<f64>("EDGEQUAKE_SLA_P95_MS")? {
            self.latency.sla_p95_ms = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retrieval.validate()?;
        self.backpressure.validate()?;
        self.latency.validate()?;
        Ok(())
    }
}
