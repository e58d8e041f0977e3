//! Target platform identification for self-update.
//!
//! Release assets follow the `{app}-{os}-{arch}[.exe]` naming convention used
//! by the release pipeline (`URLNavigator-windows-amd64.exe`,
//! `URLNavigator-linux-arm64`, ...), so the OS and architecture tokens here use
//! that vocabulary rather than Rust's `std::env::consts` names.

use std::fmt;

/// Operating systems that support in-place replacement and restart.
const SELF_UPDATE_OS: [&str; 3] = ["windows", "linux", "darwin"];

/// An `(os, arch)` pair in asset-naming vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Operating system token: `windows`, `linux`, `darwin`, ...
    pub os: String,
    /// Architecture token: `amd64`, `arm64`, `386`, ...
    pub arch: String,
}

impl Platform {
    /// A platform from asset-naming tokens.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        Self::new(
            os_token(std::env::consts::OS),
            arch_token(std::env::consts::ARCH),
        )
    }

    /// Whether this platform is on the self-update allow-list.
    pub fn supports_self_update(&self) -> bool {
        SELF_UPDATE_OS.contains(&self.os.as_str())
    }

    /// Whether a detached relaunch is possible. Same allow-list as updates.
    pub fn supports_restart(&self) -> bool {
        self.supports_self_update()
    }

    /// `"{os}-{arch}"`, e.g. `windows-amd64`.
    pub fn identifier(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }

    /// Executable suffix for this platform.
    pub fn exe_suffix(&self) -> &'static str {
        if self.os == "windows" { ".exe" } else { "" }
    }

    /// The exact asset filename expected for `app_name` on this platform.
    pub fn asset_filename(&self, app_name: &str) -> String {
        format!("{app_name}-{}{}", self.identifier(), self.exe_suffix())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

fn os_token(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn arch_token(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}
