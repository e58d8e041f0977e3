//! Self-update system for URLNavigator.
//!
//! Resolves the running version, checks the release registry for a newer
//! one, and applies it by replacing the executable in place with rollback
//! on failure, then restarts the application.

pub mod applier;
pub mod checker;
pub mod compare;
pub mod updater;
pub mod version;

pub use applier::{FileReplacer, FsReplacer};
pub use checker::{CheckFailure, ReleaseAsset, UpdateAvailability, UpdateChecker};
pub use compare::compare_versions;
pub use updater::Updater;
pub use version::{VersionRecord, VersionResolver, VersionSource, VersionSources};
