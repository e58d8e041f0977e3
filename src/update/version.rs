//! Application version resolution.
//!
//! The running version is taken from the first source that yields a real
//! value:
//!
//! 1. Build-time injection (`URLNAV_BUILD_VERSION`, see `build.rs`)
//! 2. The application manifest (`info.version`)
//! 3. The root-level `version.json`
//! 4. The user's cached `version.json` in the config directory
//! 5. A hard-coded default, flagged with `is_defaulted`
//!
//! Empty strings, `"dev"` and `"unknown"` count as absent.
//!
//! Release owner/project come from the config overrides, then the winning
//! source, then the user cache (whatever its version), then build time.

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Version used when no source yields one.
pub const DEFAULT_VERSION: &str = "unknown";

/// Build-time value meaning "not injected".
pub const UNSET_BUILD_VERSION: &str = "dev";

/// Where a [`VersionRecord`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    CompileTime,
    Manifest,
    FallbackConfig,
    UserCache,
    Default,
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompileTime => write!(f, "compile-time"),
            Self::Manifest => write!(f, "manifest"),
            Self::FallbackConfig => write!(f, "fallback-config"),
            Self::UserCache => write!(f, "user-cache"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// The running application's version and release identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Display version, `v`-prefixed unless it is a placeholder. Never empty.
    pub version: String,
    /// Which source supplied `version`.
    pub source: VersionSource,
    /// Release registry owner. Empty when unknown.
    pub release_owner: String,
    /// Release registry project. Empty when unknown.
    pub release_project: String,
    /// Application name used for asset matching.
    pub app_name: String,
    /// Set when no source was found and the default is in use.
    pub is_defaulted: bool,
}

impl VersionRecord {
    /// Whether owner and project are both set.
    pub fn has_release_identity(&self) -> bool {
        !self.release_owner.trim().is_empty() && !self.release_project.trim().is_empty()
    }
}

/// Values baked in at compile time.
#[derive(Debug, Clone, Default)]
pub struct BuildInfo {
    /// `URLNAV_BUILD_VERSION`.
    pub version: Option<String>,
    /// `URLNAV_RELEASE_OWNER`.
    pub owner: Option<String>,
    /// `URLNAV_RELEASE_PROJECT`.
    pub project: Option<String>,
}

impl BuildInfo {
    /// Read the values forwarded by `build.rs`.
    pub fn from_env() -> Self {
        Self {
            version: option_env!("URLNAV_BUILD_VERSION").map(str::to_owned),
            owner: option_env!("URLNAV_RELEASE_OWNER").map(str::to_owned),
            project: option_env!("URLNAV_RELEASE_PROJECT").map(str::to_owned),
        }
    }
}

/// Everything the resolver may consult.
#[derive(Debug, Clone)]
pub struct VersionSources {
    /// Values baked in at compile time.
    pub build: BuildInfo,
    /// Application manifest (`info.version`, `github`).
    pub manifest_path: Option<PathBuf>,
    /// Root-level `version.json`.
    pub root_config_path: Option<PathBuf>,
    /// User-cached record written by `set_release_identity`.
    pub cache_path: Option<PathBuf>,
    /// Application name copied into every record.
    pub app_name: String,
    /// Owner that wins over every source.
    pub owner_override: Option<String>,
    /// Project that wins over every source.
    pub project_override: Option<String>,
}

impl VersionSources {
    /// Sources for the running build, with paths and overrides from `config`.
    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self {
            build: BuildInfo::from_env(),
            manifest_path: Some(config.manifest_path.clone()),
            root_config_path: Some(config.root_config_path.clone()),
            cache_path: Some(crate::app_dirs::version_cache_file()),
            app_name: config.app_name.clone(),
            owner_override: config.release_owner.clone(),
            project_override: config.release_project.clone(),
        }
    }
}

/// No authoritative source was found. Carries the defaulted record, which is
/// still usable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("no version source found, defaulting to {}", .fallback.version)]
pub struct UnresolvedVersion {
    /// The defaulted record, still usable.
    pub fallback: VersionRecord,
}

/// Prefix `v` unless the value is a placeholder.
pub fn display_version(version: &str) -> String {
    let version = version.trim();
    if version.is_empty()
        || version == DEFAULT_VERSION
        || version == UNSET_BUILD_VERSION
        || version.starts_with('v')
    {
        version.to_owned()
    } else {
        format!("v{version}")
    }
}

fn is_placeholder(version: &str) -> bool {
    let version = version.trim();
    version.is_empty() || version == UNSET_BUILD_VERSION || version == DEFAULT_VERSION
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[derive(Debug, Default, Deserialize)]
struct GithubWire {
    #[serde(default)]
    owner: String,
    #[serde(default)]
    repo: String,
}

#[derive(Debug, Deserialize)]
struct ManifestWire {
    #[serde(default)]
    info: ManifestInfoWire,
    #[serde(default)]
    github: GithubWire,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestInfoWire {
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct RootConfigWire {
    #[serde(default)]
    version: String,
    #[serde(default)]
    github: GithubWire,
}

/// On-disk shape of the user's cached record.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CachedVersionWire {
    #[serde(default)]
    version: String,
    #[serde(default)]
    github_owner: String,
    #[serde(default)]
    github_repo: String,
    #[serde(default)]
    app_name: String,
}

/// A candidate found in one source, before identity defaults are applied.
struct Candidate {
    version: String,
    owner: Option<String>,
    project: Option<String>,
    source: VersionSource,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "version source not readable");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed version source");
            None
        }
    }
}

fn from_build(build: &BuildInfo) -> Option<Candidate> {
    let version = non_empty(build.version.as_deref()).filter(|v| !is_placeholder(v))?;
    Some(Candidate {
        version,
        owner: None,
        project: None,
        source: VersionSource::CompileTime,
    })
}

fn from_manifest(path: &Path) -> Option<Candidate> {
    let wire: ManifestWire = read_json(path)?;
    if is_placeholder(&wire.info.version) {
        return None;
    }
    Some(Candidate {
        version: wire.info.version,
        owner: non_empty(Some(&wire.github.owner)),
        project: non_empty(Some(&wire.github.repo)),
        source: VersionSource::Manifest,
    })
}

fn from_root_config(path: &Path) -> Option<Candidate> {
    let wire: RootConfigWire = read_json(path)?;
    if is_placeholder(&wire.version) {
        return None;
    }
    Some(Candidate {
        version: wire.version,
        owner: non_empty(Some(&wire.github.owner)),
        project: non_empty(Some(&wire.github.repo)),
        source: VersionSource::FallbackConfig,
    })
}

fn from_cache(path: &Path) -> Option<Candidate> {
    let wire: CachedVersionWire = read_json(path)?;
    if is_placeholder(&wire.version) {
        return None;
    }
    Some(Candidate {
        version: wire.version,
        owner: non_empty(Some(&wire.github_owner)),
        project: non_empty(Some(&wire.github_repo)),
        source: VersionSource::UserCache,
    })
}

/// Owner/project saved by [`VersionResolver::set_release_identity`].
///
/// Read independently of the cached version, which may be a placeholder.
fn cached_identity(path: &Path) -> (Option<String>, Option<String>) {
    match read_json::<CachedVersionWire>(path) {
        Some(wire) => (
            non_empty(Some(&wire.github_owner)),
            non_empty(Some(&wire.github_repo)),
        ),
        None => (None, None),
    }
}

/// Run the resolution chain once.
///
/// # Errors
///
/// Returns [`UnresolvedVersion`] carrying a defaulted record when every
/// source is absent.
pub fn resolve_version(
    sources: &VersionSources,
) -> std::result::Result<VersionRecord, UnresolvedVersion> {
    let candidate = from_build(&sources.build)
        .or_else(|| sources.manifest_path.as_deref().and_then(from_manifest))
        .or_else(|| sources.root_config_path.as_deref().and_then(from_root_config))
        .or_else(|| sources.cache_path.as_deref().and_then(from_cache));

    let (cached_owner, cached_project) = sources
        .cache_path
        .as_deref()
        .map(cached_identity)
        .unwrap_or_default();

    let identity = |own: Option<String>,
                    over: &Option<String>,
                    cached: &Option<String>,
                    built: &Option<String>| {
        non_empty(over.as_deref())
            .or(own)
            .or_else(|| cached.clone())
            .or_else(|| non_empty(built.as_deref()))
            .unwrap_or_default()
    };
    let owner = |own: Option<String>| {
        identity(own, &sources.owner_override, &cached_owner, &sources.build.owner)
    };
    let project = |own: Option<String>| {
        identity(
            own,
            &sources.project_override,
            &cached_project,
            &sources.build.project,
        )
    };

    match candidate {
        Some(c) => Ok(VersionRecord {
            version: display_version(&c.version),
            source: c.source,
            release_owner: owner(c.owner),
            release_project: project(c.project),
            app_name: sources.app_name.clone(),
            is_defaulted: false,
        }),
        None => Err(UnresolvedVersion {
            fallback: VersionRecord {
                version: DEFAULT_VERSION.to_owned(),
                source: VersionSource::Default,
                release_owner: owner(None),
                release_project: project(None),
                app_name: sources.app_name.clone(),
                is_defaulted: true,
            },
        }),
    }
}

/// Owns the process-wide [`VersionRecord`].
///
/// Created once at startup and shared by reference; [`force_reload`] swaps
/// the record under the same lock readers use.
///
/// [`force_reload`]: VersionResolver::force_reload
#[derive(Debug)]
pub struct VersionResolver {
    sources: VersionSources,
    record: RwLock<VersionRecord>,
}

impl VersionResolver {
    /// Resolve once and keep the result. A defaulted version is logged, not
    /// returned as an error.
    pub fn new(sources: VersionSources) -> Self {
        let record = Self::run(&sources);
        Self {
            sources,
            record: RwLock::new(record),
        }
    }

    fn run(sources: &VersionSources) -> VersionRecord {
        match resolve_version(sources) {
            Ok(record) => {
                tracing::info!(version = %record.version, source = %record.source, "resolved application version");
                record
            }
            Err(unresolved) => {
                tracing::warn!("{unresolved}; version provenance is unreliable");
                unresolved.fallback
            }
        }
    }

    /// A copy of the current record.
    pub fn resolve(&self) -> VersionRecord {
        self.record
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Re-run resolution from scratch and replace the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::VersionUnresolved`] when only the default could
    /// be used. The defaulted record is stored regardless.
    pub fn force_reload(&self) -> Result<VersionRecord> {
        let outcome = resolve_version(&self.sources);
        let record = match &outcome {
            Ok(r) => r.clone(),
            Err(u) => u.fallback.clone(),
        };
        *self.record.write().unwrap_or_else(|e| e.into_inner()) = record.clone();
        match outcome {
            Ok(_) => Ok(record),
            Err(u) => Err(UpdateError::VersionUnresolved(u.fallback.version)),
        }
    }

    /// Point the record at a different release owner/project and persist it
    /// to the user cache.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either value is blank, or an I/O
    /// error if the cache cannot be written. The in-memory record is only
    /// replaced after the cache write succeeds.
    pub fn set_release_identity(&self, owner: &str, project: &str) -> Result<VersionRecord> {
        let (owner, project) = (owner.trim(), project.trim());
        if owner.is_empty() || project.is_empty() {
            return Err(UpdateError::Configuration(
                "release owner and project must both be set".to_owned(),
            ));
        }

        let mut guard = self.record.write().unwrap_or_else(|e| e.into_inner());
        let mut updated = guard.clone();
        updated.release_owner = owner.to_owned();
        updated.release_project = project.to_owned();

        if let Some(path) = &self.sources.cache_path {
            save_cached(path, &updated)?;
        }
        *guard = updated.clone();
        tracing::info!(owner, project, "release identity updated");
        Ok(updated)
    }
}

fn save_cached(path: &Path, record: &VersionRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let wire = CachedVersionWire {
        version: record.version.clone(),
        github_owner: record.release_owner.clone(),
        github_repo: record.release_project.clone(),
        app_name: record.app_name.clone(),
    };
    let json =
        serde_json::to_string_pretty(&wire).map_err(|e| UpdateError::Parse(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}
