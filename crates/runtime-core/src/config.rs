//! Runtime configuration types

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::{Error, Result};

/// Environment variable overriding the tensor store location
pub const STORE_PATH_ENV: &str = "TENSOR_STORE_PATH";

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tensor store settings
    pub store: StoreConfig,

    /// Model synchronization settings
    pub model: ModelConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Load a configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        let config: RuntimeConfig = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), "Loaded runtime configuration");
        Ok(config)
    }

    /// Apply overrides taken from the process environment
    pub fn apply_env(mut self) -> Self {
        if let Ok(path) = std::env::var(STORE_PATH_ENV) {
            debug!(base_path = %path, "Tensor store path taken from environment");
            self.store.base_path = path;
        }
        self
    }

    /// Check the configuration for values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Local && self.store.base_path.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "store.base_path must not be empty for the local backend".to_string(),
            });
        }
        if self.logging.filter.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "logging.filter must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Tensor store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store backend type
    pub backend: StoreBackend,

    /// Base path for the local backend
    pub base_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Local,
            base_path: "./tensors".to_string(),
        }
    }
}

/// Tensor store backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local, lost on exit
    Memory,

    /// Local filesystem
    Local,
}

/// Model synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Skip contributions whose id was already merged in the current round
    pub deduplicate_contributions: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            deduplicate_contributions: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "model_sync=info,tensor_store=info".to_string(),
        }
    }
}
