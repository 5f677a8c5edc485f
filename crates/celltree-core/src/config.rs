//! Engine configuration.
//!
//! All settings have defaults; a TOML file only needs the keys it changes.
//!
//! ```toml
//! unit_url = "https://unit.example/"
//! lock_timeout_ms = 2000
//! max_collection_depth = 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Base URL of this unit; cell URLs are `<unit_url><cell>/`.
    pub unit_url: String,
    /// Longest wait for a Box or Cell lock.
    pub lock_timeout_ms: u64,
    /// Deepest allowed collection nesting below a Box.
    pub max_collection_depth: usize,
    /// Most children a single collection may hold.
    pub max_child_resources: usize,
    /// Page size cap for control-object searches.
    pub top_num: usize,
    /// Polls made while waiting for a Cell to become idle before deletion.
    pub cell_lock_retry_count: u32,
    pub cell_lock_retry_interval_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unit_url: "https://localhost/".to_string(),
            lock_timeout_ms: 5000,
            max_collection_depth: 5,
            max_child_resources: 1000,
            top_num: 10_000,
            cell_lock_retry_count: 50,
            cell_lock_retry_interval_ms: 100,
            cache_ttl_secs: 300,
            cache_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.unit_url)
            .map_err(|e| ConfigError::Invalid(format!("unit_url '{}': {e}", self.unit_url)))?;
        if !url.path().ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "unit_url '{}' must end with '/'",
                self.unit_url
            )));
        }
        if self.max_collection_depth == 0 {
            return Err(ConfigError::Invalid("max_collection_depth must be at least 1".into()));
        }
        if self.max_child_resources == 0 || self.top_num == 0 {
            return Err(ConfigError::Invalid(
                "max_child_resources and top_num must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn cell_lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.cell_lock_retry_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// URL of a Cell on this unit.
    pub fn cell_url(&self, cell_name: &str) -> String {
        format!("{}{cell_name}/", self.unit_url)
    }
}
