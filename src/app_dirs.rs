//! Application directory paths for URLNavigator.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | Windows | macOS | Linux |
//! |---------|---------|-------|-------|
//! | Config | `%APPDATA%\urlnavigator\` | `~/Library/Application Support/urlnavigator/` | `~/.config/urlnavigator/` |
//!
//! # Environment Override
//!
//! `URLNAV_CONFIG_DIR` overrides [`config_dir`].

use std::path::PathBuf;

const APP_DIR_NAME: &str = "urlnavigator";

/// Application config directory.
///
/// Holds `updater.toml` and the cached `version.json`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("URLNAV_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| std::env::temp_dir().join("urlnavigator-config"))
}

/// Updater configuration file (`config_dir()/updater.toml`).
#[must_use]
pub fn updater_config_file() -> PathBuf {
    config_dir().join("updater.toml")
}

/// User-writable cached version record (`config_dir()/version.json`).
#[must_use]
pub fn version_cache_file() -> PathBuf {
    config_dir().join("version.json")
}
