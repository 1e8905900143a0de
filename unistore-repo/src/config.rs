//! Runtime configuration, loaded from TOML.
//!
//! ```toml
//! [document]
//! path = "data/primary.duckdb"
//! pool_size = 4
//!
//! [relational]
//! path = "data/auxiliary.sqlite"
//!
//! [sync]
//! enqueue_wait_ms = 100
//! [sync.queue_capacity]
//! entity_created = 64
//!
//! [repository]
//! default_timeout_ms = 5000
//! ```
//!
//! Every section is optional. A missing store path means an in-memory store.

use crate::handlers::CompanionRule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use unistore_model::EntityManifest;
use unistore_sync::SyncConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One physical store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
    pub pool_size: usize,
}

impl StoreConfig {
    fn with_pool(pool_size: usize) -> Self {
        Self { path: None, pool_size }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::with_pool(4)
    }
}

/// Facade behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Used when a call passes no timeout (ms).
    pub default_timeout_ms: u64,
    /// An update that sets this field to `completion_value` also emits
    /// `EntityCompleted`.
    pub completion_field: String,
    pub completion_value: Value,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            completion_field: "status".to_string(),
            completion_value: Value::String("completed".to_string()),
        }
    }
}

impl RepositoryConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnistoreConfig {
    pub document: StoreConfig,
    pub relational: StoreConfig,
    pub sync: SyncConfig,
    pub repository: RepositoryConfig,
    pub companion: CompanionRule,
    pub manifest: EntityManifest,
}

impl Default for UnistoreConfig {
    fn default() -> Self {
        Self {
            document: StoreConfig::default(),
            relational: StoreConfig::with_pool(2),
            sync: SyncConfig::default(),
            repository: RepositoryConfig::default(),
            companion: CompanionRule::default(),
            manifest: EntityManifest::notes_default(),
        }
    }
}

impl UnistoreConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.document.pool_size == 0 || self.relational.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.repository.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("repository.default_timeout_ms must be positive".into()));
        }
        if self.manifest.entities.is_empty() {
            return Err(ConfigError::Invalid("manifest registers no entity types".into()));
        }
        self.sync
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
