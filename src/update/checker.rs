//! Release registry checker.
//!
//! Queries `{base}/repos/{owner}/{project}/releases/latest`, compares the
//! tag against the running version and picks the asset for this platform.
//! Every failure comes back as an [`UpdateAvailability`] with
//! `has_update == false`; nothing here returns `Err`.

use crate::config::UpdaterConfig;
use crate::platform::Platform;
use crate::update::compare::{compare_versions, strip_version_prefix};
use crate::update::version::VersionRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;

const USER_AGENT: &str = concat!("urlnav-updater/", env!("CARGO_PKG_VERSION"), " (self-update)");

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseAsset {
    /// Asset filename.
    pub name: String,
    /// Direct download URL.
    pub download_url: String,
    /// Size reported by the registry, 0 if unknown.
    pub size_bytes: u64,
}

/// Why a check could not report an installable update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckFailure {
    PlatformUnsupported,
    Configuration,
    Network,
    NotFound,
    RateLimited,
    HttpStatus,
    Parse,
    NoCompatibleAsset,
}

/// Outcome of one check. Never cached; every check hits the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateAvailability {
    /// Whether the registry has a newer release.
    pub has_update: bool,
    /// The running version.
    pub current_version: String,
    /// The newest release, or the running version when the check failed.
    pub latest_version: String,
    /// Installer for this platform, if one was found.
    pub selected_asset: Option<ReleaseAsset>,
    /// Release body as published.
    pub release_notes: String,
    /// User-facing reason the check could not offer an update.
    pub error_message: Option<String>,
    /// Category of `error_message`.
    pub failure: Option<CheckFailure>,
}

impl UpdateAvailability {
    fn unavailable(current: &str, failure: CheckFailure, message: impl Into<String>) -> Self {
        Self {
            has_update: false,
            current_version: current.to_owned(),
            latest_version: current.to_owned(),
            selected_asset: None,
            release_notes: String::new(),
            error_message: Some(message.into()),
            failure: Some(failure),
        }
    }

    /// Whether the caller may hand `selected_asset` to the updater.
    pub fn is_installable(&self) -> bool {
        self.has_update && self.selected_asset.is_some()
    }

    /// A canned "update available" result for UI work without network access.
    pub fn simulated_available(current: &str) -> Self {
        Self {
            has_update: true,
            current_version: current.to_owned(),
            latest_version: "999.999.999".to_owned(),
            selected_asset: Some(ReleaseAsset {
                name: "URLNavigator-simulated.exe".to_owned(),
                download_url: "https://example.com/test-update.exe".to_owned(),
                size_bytes: 0,
            }),
            release_notes: "Simulated update\n\nNew:\n- Feature one\n- Feature two\n\nFixed:\n- A test issue".to_owned(),
            error_message: None,
            failure: None,
        }
    }

    /// A canned "up to date" result for UI work without network access.
    pub fn simulated_up_to_date(current: &str) -> Self {
        Self {
            has_update: false,
            current_version: current.to_owned(),
            latest_version: current.to_owned(),
            selected_asset: None,
            release_notes: "You are running the latest version".to_owned(),
            error_message: None,
            failure: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseWire {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<AssetWire>,
}

#[derive(Debug, Deserialize)]
struct AssetWire {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
}

impl From<AssetWire> for ReleaseAsset {
    fn from(w: AssetWire) -> Self {
        Self {
            name: w.name,
            download_url: w.browser_download_url,
            size_bytes: w.size,
        }
    }
}

/// Checks the release registry for a newer version.
#[derive(Clone)]
pub struct UpdateChecker {
    agent: ureq::Agent,
    base_url: String,
    platform: Platform,
    app_name: String,
}

impl std::fmt::Debug for UpdateChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateChecker")
            .field("base_url", &self.base_url)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl UpdateChecker {
    /// A checker for the current platform.
    pub fn new(config: &UpdaterConfig) -> Self {
        Self::with_platform(config, Platform::current())
    }

    /// A checker that selects assets for `platform`.
    pub fn with_platform(config: &UpdaterConfig, platform: Platform) -> Self {
        Self {
            agent: http_agent(config.check_timeout()),
            base_url: config.registry_base_url.trim_end_matches('/').to_owned(),
            platform,
            app_name: config.app_name.clone(),
        }
    }

    /// URL of the "latest release" endpoint.
    pub fn latest_release_url(&self, owner: &str, project: &str) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.base_url,
            urlencoding::encode(owner),
            urlencoding::encode(project)
        )
    }

    /// Query the registry and compare against `current`.
    pub fn check(&self, current: &VersionRecord) -> UpdateAvailability {
        let current_version = current.version.as_str();

        if !self.platform.supports_self_update() {
            return UpdateAvailability::unavailable(
                current_version,
                CheckFailure::PlatformUnsupported,
                format!("self-update is not supported on {}", self.platform),
            );
        }

        if !current.has_release_identity() {
            return UpdateAvailability::unavailable(
                current_version,
                CheckFailure::Configuration,
                "release owner/project is not configured; set them before checking for updates",
            );
        }

        let url = self.latest_release_url(&current.release_owner, &current.release_project);
        tracing::debug!(%url, "checking for updates");

        let resp = match self
            .agent
            .get(&url)
            .set("User-Agent", USER_AGENT)
            .set("Accept", "application/vnd.github+json")
            .call()
        {
            Ok(resp) => resp,
            Err(ureq::Error::Status(status, _)) => {
                return self.status_failure(current, status);
            }
            Err(e) => {
                tracing::warn!(error = %e, "update check request failed");
                return UpdateAvailability::unavailable(
                    current_version,
                    CheckFailure::Network,
                    format!("network request failed: {e}"),
                );
            }
        };

        if resp.status() != 200 {
            return self.status_failure(current, resp.status());
        }

        let release: ReleaseWire = match serde_json::from_reader(resp.into_reader()) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "malformed release response");
                return UpdateAvailability::unavailable(
                    current_version,
                    CheckFailure::Parse,
                    format!("could not parse release information: {e}"),
                );
            }
        };

        self.evaluate(current_version, release)
    }

    fn status_failure(&self, current: &VersionRecord, status: u16) -> UpdateAvailability {
        let (failure, message) = match status {
            404 => (
                CheckFailure::NotFound,
                format!(
                    "no repository or releases found for {}/{}",
                    current.release_owner, current.release_project
                ),
            ),
            403 | 429 => (
                CheckFailure::RateLimited,
                "release registry rate-limited the request, retry later".to_owned(),
            ),
            other => (
                CheckFailure::HttpStatus,
                format!("request failed, status {other}"),
            ),
        };
        tracing::warn!(status, "update check rejected by registry");
        UpdateAvailability::unavailable(&current.version, failure, message)
    }

    fn evaluate(&self, current_version: &str, release: ReleaseWire) -> UpdateAvailability {
        let latest = strip_version_prefix(&release.tag_name).to_owned();
        let has_update = compare_versions(current_version, &latest) == Ordering::Less;
        let release_notes = release.body.unwrap_or_default();

        let mut availability = UpdateAvailability {
            has_update,
            current_version: current_version.to_owned(),
            latest_version: latest,
            selected_asset: None,
            release_notes,
            error_message: None,
            failure: None,
        };

        if has_update {
            let assets: Vec<ReleaseAsset> = release.assets.into_iter().map(Into::into).collect();
            match select_asset(&assets, &self.platform, &self.app_name) {
                Some(asset) => availability.selected_asset = Some(asset.clone()),
                None => {
                    availability.error_message = Some(format!(
                        "a new version is available, but no compatible installer was found for {}",
                        self.platform
                    ));
                    availability.failure = Some(CheckFailure::NoCompatibleAsset);
                }
            }
            tracing::info!(
                current = %availability.current_version,
                latest = %availability.latest_version,
                "update available"
            );
        }

        availability
    }
}

/// Pick the asset for `platform`:
///
/// 1. exact `{app}-{os}-{arch}[.exe]` filename
/// 2. any filename containing `{os}-{arch}`
/// 3. any filename containing `{os}`
///
/// Matching in steps 2 and 3 ignores case.
pub fn select_asset<'a>(
    assets: &'a [ReleaseAsset],
    platform: &Platform,
    app_name: &str,
) -> Option<&'a ReleaseAsset> {
    let exact = platform.asset_filename(app_name);
    let ident = platform.identifier().to_lowercase();
    let os = platform.os.to_lowercase();

    assets
        .iter()
        .find(|a| a.name == exact)
        .or_else(|| assets.iter().find(|a| a.name.to_lowercase().contains(&ident)))
        .or_else(|| assets.iter().find(|a| a.name.to_lowercase().contains(&os)))
}

pub(crate) fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10).min(timeout))
        .timeout(timeout)
        .build()
}
