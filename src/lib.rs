//! URLNavigator self-update subsystem.
//!
//! # Architecture
//!
//! - **Version resolution** ([`update::version`]): works out which version is
//!   running and where that answer came from
//! - **Update check** ([`update::checker`]): asks the release registry for the
//!   latest release and picks the asset for this platform
//! - **Progress** ([`progress`]): shared, lock-guarded download/install state
//!   that the UI polls
//! - **Updater** ([`update::updater`]): download, atomic replace, rollback and
//!   delayed restart
//!
//! A typical host resolves the version once at startup, checks on demand, and
//! hands the selected asset to [`Updater::spawn_apply`] after the user agrees.

pub mod app_dirs;
pub mod config;
pub mod error;
pub mod platform;
pub mod progress;
pub mod update;

pub use config::UpdaterConfig;
pub use error::{Result, UpdateError};
pub use platform::Platform;
pub use progress::{ProgressPhase, ProgressState, ProgressTracker};
pub use update::{
    ReleaseAsset, UpdateAvailability, UpdateChecker, Updater, VersionRecord, VersionResolver,
};
