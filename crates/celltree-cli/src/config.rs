//! Configuration file support for the celltree CLI.
//!
//! Configuration is read from `config.toml` in the platform config directory
//! (`~/.config/celltree/` on Linux) unless `--config` or `CELLTREE_CONFIG`
//! names another file. A missing default file means "all defaults"; a missing
//! explicit file is an error.
//!
//! # Example configuration
//!
//! ```toml
//! state_dir = "/var/lib/celltree"
//!
//! [engine]
//! unit_url = "https://unit.example/"
//! lock_timeout_ms = 2000
//! max_collection_depth = 8
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use celltree_core::EngineConfig;

/// Main configuration structure
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// State directory used when `--state-dir` is not given
    pub state_dir: Option<PathBuf>,

    /// Engine settings (limits, timeouts, unit URL)
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load the explicit file, or the default file when it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let Some(path) = config_path() else {
                    return Ok(Config::default());
                };
                if !path.exists() {
                    return Ok(Config::default());
                }
                path
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Resolve the state directory: flag or env, then config file, then the
    /// platform data directory.
    pub fn state_dir(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(dir) = explicit.or(self.state_dir.as_deref()) {
            return Ok(dir.to_path_buf());
        }
        let dirs = project_dirs().context("Could not determine a data directory; pass --state-dir")?;
        Ok(dirs.data_dir().join("state"))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "celltree", "celltree")
}

/// Path of the default configuration file.
pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}
