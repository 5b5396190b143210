//! Configuration management for formgate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{FormgateError, Result};
use crate::ratelimit::Backend;

/// Prefix for environment variable overrides, e.g. `FORMGATE__LIMITER__MAX_REQUESTS`.
const ENV_PREFIX: &str = "FORMGATE";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for formgate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormgateConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Slot storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Background sweep configuration
    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Limiter configuration. Immutable once a limiter has been built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum accepted requests per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Where the request log lives
    #[serde(default)]
    pub backend: Backend,

    /// Slot name of the request log on the durable backend
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            backend: Backend::default(),
            storage_key: default_storage_key(),
        }
    }
}

fn default_max_requests() -> u32 {
    5
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_storage_key() -> String {
    "formgate:requests".to_string()
}

impl LimiterConfig {
    /// Create a config with the given quota and window, other fields defaulted.
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
            ..Self::default()
        }
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the durable slot name.
    pub fn with_storage_key(mut self, storage_key: impl Into<String>) -> Self {
        self.storage_key = storage_key.into();
        self
    }

    /// Reject settings a limiter cannot operate with.
    ///
    /// `max_requests == 0` is accepted and yields a limiter that rejects everything.
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(FormgateError::Config(
                "limiter.window_ms must be greater than zero".to_string(),
            ));
        }
        if self.backend == Backend::Durable && self.storage_key.trim().is_empty() {
            return Err(FormgateError::Config(
                "limiter.storage_key must not be empty for the durable backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// Slot storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one file per slot. When unset, slots live in memory.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Optional byte quota for in-memory slots
    #[serde(default)]
    pub quota_bytes: Option<usize>,
}

/// Background sweep configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Whether durable limiters get a periodic sweep
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,

    /// Sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    30
}

impl FormgateConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| FormgateError::Config(e.to_string()))
    }

    /// Load configuration from an optional file layered under `FORMGATE__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`FormgateConfig::load`], reading overrides from `env` instead of the
    /// process environment when given.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let config: FormgateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| FormgateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;
        if self.sweep.enabled && self.sweep.interval_secs == 0 {
            return Err(FormgateError::Config(
                "sweep.interval_secs must be greater than zero when the sweep is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
