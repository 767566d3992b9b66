//! Global context for vagabond operations.
//!
//! Provides centralized access to configuration and the on-disk layout of
//! the vagabond home directory:
//!
//! ```text
//! <home>/
//! ├── config.toml
//! ├── boxes/          installed boxes, name/version/provider
//! ├── data/
//! │   └── machine-index/
//! │       ├── index       machine index (JSON)
//! │       └── index.lock
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::util::config::{load_config, project_config_path, Config};

/// Environment variable that overrides the home directory.
pub const HOME_ENV: &str = "VAGABOND_HOME";

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Home directory for global vagabond data
    home: PathBuf,

    /// Merged configuration
    config: Config,
}

impl GlobalContext {
    /// Create a new GlobalContext from the process environment.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        let home = default_home();
        Ok(Self::with_paths(cwd, home))
    }

    /// Create a GlobalContext rooted at explicit directories.
    ///
    /// `cwd` only locates the project-level config overlay.
    pub fn with_paths(cwd: PathBuf, home: PathBuf) -> Self {
        let config = load_config(&home.join("config.toml"), &project_config_path(&cwd));
        GlobalContext { home, config }
    }

    /// Get the vagabond home directory.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Get the merged configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory holding installed boxes.
    pub fn boxes_dir(&self) -> PathBuf {
        self.home.join("boxes")
    }

    /// Directory for persistent global data.
    pub fn data_dir(&self) -> PathBuf {
        self.home.join("data")
    }

    /// Directory holding the machine index.
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir().join("machine-index")
    }
}

fn default_home() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }

    directories::BaseDirs::new()
        .map(|b| b.home_dir().join(".vagabond"))
        .unwrap_or_else(|| PathBuf::from(".vagabond"))
}
