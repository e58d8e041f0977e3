//! Configuration for the self-update subsystem.

use crate::error::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level updater configuration, stored as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Base URL of the release registry API.
    pub registry_base_url: String,
    /// Timeout for the "latest release" query, in seconds.
    pub check_timeout_secs: u64,
    /// Timeout for downloading a release asset, in seconds.
    pub download_timeout_secs: u64,
    /// Delay between a completed apply and the restart, in milliseconds.
    pub restart_delay_ms: u64,
    /// Time the old process waits after spawning its replacement, in milliseconds.
    pub exit_grace_ms: u64,
    /// Nominal size used for percentages when the server omits `Content-Length`.
    pub fallback_content_length: u64,
    /// Schedule a restart after a successful apply.
    pub auto_restart: bool,
    /// Application name, used for asset matching.
    pub app_name: String,
    /// Application manifest consulted for the version.
    pub manifest_path: PathBuf,
    /// Root-level version file consulted after the manifest.
    pub root_config_path: PathBuf,
    /// Release owner override.
    pub release_owner: Option<String>,
    /// Release project override.
    pub release_project: Option<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            registry_base_url: "https://api.github.com".to_owned(),
            check_timeout_secs: 15,
            download_timeout_secs: 30 * 60,
            restart_delay_ms: 2_000,
            exit_grace_ms: 500,
            fallback_content_length: 10 * 1024 * 1024,
            auto_restart: true,
            app_name: "URLNavigator".to_owned(),
            manifest_path: PathBuf::from("wails.json"),
            root_config_path: PathBuf::from("version.json"),
            release_owner: None,
            release_project: None,
        }
    }
}

impl UpdaterConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| UpdateError::Parse(e.to_string()))
    }

    /// Load from the default path, falling back to defaults if the file is
    /// missing. A present but malformed file is still an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`config_dir()/updater.toml`).
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::updater_config_file()
    }

    /// Timeout for the availability check.
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    /// Timeout for the asset download.
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Delay between `Completed` and the automatic restart.
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Time the relaunched process gets before this one exits.
    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}
