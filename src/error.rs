//! Error types for the self-update subsystem.

/// Errors surfaced by version resolution, update checks and update application.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Release registry identity (owner/project) is not configured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport failure: timeout, DNS, connection reset, truncated body.
    #[error("network error: {0}")]
    Network(String),

    /// The remote answered with a non-200 status.
    #[error("request failed, status {status}")]
    HttpStatus {
        /// HTTP status code returned by the server.
        status: u16,
    },

    /// Malformed registry response or local version file.
    #[error("parse error: {0}")]
    Parse(String),

    /// Staging or replacing the executable failed; the original binary is intact.
    #[error("apply error: {0}")]
    Apply(String),

    /// Replacing failed and restoring the backup failed too. The installation
    /// may be inconsistent and needs manual intervention.
    #[error(
        "update failed and rollback failed, manual reinstall required (apply: {apply}; rollback: {rollback})"
    )]
    Fatal {
        /// Error from the replace step.
        apply: String,
        /// Error from the rollback step.
        rollback: String,
    },

    /// Self-update or restart is not available on this platform.
    #[error("not supported on this platform: {0}")]
    PlatformUnsupported(String),

    /// The asset handed to the updater cannot be downloaded.
    #[error("invalid update asset: {0}")]
    InvalidAsset(String),

    /// Another attempt is already running on the same updater.
    #[error("an update is already in progress")]
    InProgress,

    /// No authoritative version source was found; a default is in use.
    #[error("cannot determine application version, using default {0}")]
    VersionUnresolved(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Returns `true` for the apply-and-rollback double failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Returns `true` if the user can simply retry.
    ///
    /// Configuration and platform errors need a change before a retry can
    /// succeed, and fatal errors need a reinstall.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Fatal { .. } | Self::Configuration(_) | Self::PlatformUnsupported(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, UpdateError>;
