//! Configuration file support for vagabond.
//!
//! Two configuration file locations are consulted:
//! - Global: `<home>/config.toml` - user-wide defaults
//! - Project: `.vagabond/config.toml` - project-specific overrides
//!
//! Project config takes precedence over global config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default time to wait for the machine index or box tree lock.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

/// vagabond configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Machine index settings
    pub index: IndexConfig,

    /// Box store settings
    pub boxes: BoxConfig,

    /// Network settings
    pub net: NetConfig,
}

/// Machine index configuration.
///
/// Unset values fall through to the next layer, then to the built-in
/// default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Seconds to wait for another process to release a lock
    pub lock_timeout_secs: Option<u64>,
}

/// Box store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxConfig {
    /// Providers accepted when a command does not name any
    pub default_providers: Option<Vec<String>>,
}

/// Network-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Download timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Offline mode (refuse http(s) box sources)
    pub offline: Option<bool>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Load configuration, falling back to defaults if the file doesn't exist
    /// or can't be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence for every
    /// value it sets).
    pub fn merge(&mut self, other: Config) {
        if other.index.lock_timeout_secs.is_some() {
            self.index.lock_timeout_secs = other.index.lock_timeout_secs;
        }
        if other.boxes.default_providers.is_some() {
            self.boxes.default_providers = other.boxes.default_providers;
        }
        if other.net.timeout_secs.is_some() {
            self.net.timeout_secs = other.net.timeout_secs;
        }
        if other.net.offline.is_some() {
            self.net.offline = other.net.offline;
        }
    }

    /// Lock acquisition timeout as a duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(
            self.index
                .lock_timeout_secs
                .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS),
        )
    }

    /// Providers accepted when a command does not name any.
    pub fn default_providers(&self) -> &[String] {
        self.boxes.default_providers.as_deref().unwrap_or_default()
    }

    /// Whether remote box sources are refused.
    pub fn is_offline(&self) -> bool {
        self.net.offline.unwrap_or(false)
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.vagabond/config.toml)
/// 2. Global config (<home>/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        config.merge(Config::load_or_default(global_path));
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

/// Get the project config path (.vagabond/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".vagabond").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.lock_timeout(), Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS));
        assert!(config.default_providers().is_empty());
        assert!(!config.is_offline());
    }

    #[test]
    fn test_parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
[boxes]
default_providers = ["virtualbox", "libvirt"]
"#,
        )
        .unwrap();

        assert_eq!(config.default_providers(), ["virtualbox", "libvirt"]);
        assert_eq!(config.index.lock_timeout_secs, None);
        assert_eq!(config.lock_timeout(), Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS));
    }

    #[test]
    fn test_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[index]\nlock_timeout_secs = 5\n[net]\noffline = true\n").unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!(loaded.is_offline());
        assert_eq!(loaded.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_project_overrides_global() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        let project = project_config_path(tmp.path());

        std::fs::write(
            &global,
            "[index]\nlock_timeout_secs = 10\n[boxes]\ndefault_providers = [\"virtualbox\"]\n",
        )
        .unwrap();
        std::fs::create_dir_all(project.parent().unwrap()).unwrap();
        std::fs::write(&project, "[boxes]\ndefault_providers = [\"docker\"]\n").unwrap();

        let config = load_config(&global, &project);
        assert_eq!(config.lock_timeout(), Duration::from_secs(10));
        assert_eq!(config.default_providers(), ["docker"]);
    }

    #[test]
    fn test_project_can_restore_defaults() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        let project = project_config_path(tmp.path());

        std::fs::write(
            &global,
            "[index]\nlock_timeout_secs = 10\n[boxes]\ndefault_providers = [\"virtualbox\"]\n[net]\noffline = true\n",
        )
        .unwrap();
        std::fs::create_dir_all(project.parent().unwrap()).unwrap();
        std::fs::write(
            &project,
            format!(
                "[index]\nlock_timeout_secs = {}\n[boxes]\ndefault_providers = []\n[net]\noffline = false\n",
                DEFAULT_LOCK_TIMEOUT_SECS
            ),
        )
        .unwrap();

        let config = load_config(&global, &project);
        assert_eq!(config.lock_timeout(), Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS));
        assert!(config.default_providers().is_empty());
        assert!(!config.is_offline());
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        assert!(Config::load(&path).is_err());
        assert_eq!(Config::load_or_default(&path), Config::default());
    }
}
