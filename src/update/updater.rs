//! Update orchestration: download, stage, swap, restart.
//!
//! Phases move `Idle -> Downloading -> Installing -> Completed | Failed` and
//! are published through the shared [`ProgressTracker`]. [`Updater::apply`]
//! blocks; run it on a worker via [`Updater::spawn_apply`] and poll
//! [`ProgressTracker::snapshot`] from the UI.

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};
use crate::platform::Platform;
use crate::progress::{
    DownloadMeter, ProgressPhase, ProgressState, ProgressTracker, download_state, instrument,
};
use crate::update::applier::{
    FileReplacer, FsReplacer, ReplacePaths, current_exe_path, discard, replace_executable,
    stage_payload,
};
use crate::update::checker::{ReleaseAsset, http_agent};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

const USER_AGENT: &str = concat!("urlnav-updater/", env!("CARGO_PKG_VERSION"), " (download)");

/// Drives one update attempt at a time. A second [`Updater::apply`] while
/// one is running is rejected with [`UpdateError::InProgress`].
pub struct Updater {
    config: UpdaterConfig,
    in_flight: AtomicBool,
    platform: Platform,
    tracker: Arc<ProgressTracker>,
    agent: ureq::Agent,
    replacer: Arc<dyn FileReplacer>,
    executable: Option<PathBuf>,
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("platform", &self.platform)
            .field("executable", &self.executable)
            .finish_non_exhaustive()
    }
}

impl Updater {
    /// An updater for the running executable on the current platform,
    /// publishing progress to `tracker`.
    pub fn new(config: UpdaterConfig, tracker: Arc<ProgressTracker>) -> Self {
        Self {
            agent: http_agent(config.download_timeout()),
            config,
            in_flight: AtomicBool::new(false),
            platform: Platform::current(),
            tracker,
            replacer: Arc::new(FsReplacer),
            executable: None,
        }
    }

    /// Override the detected platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Replace the filesystem layer used for the swap.
    pub fn with_replacer(mut self, replacer: Arc<dyn FileReplacer>) -> Self {
        self.replacer = replacer;
        self
    }

    /// Target a specific executable instead of the running one.
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    /// The tracker this updater publishes to.
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    fn executable_path(&self) -> Result<PathBuf> {
        match &self.executable {
            Some(p) => Ok(p.clone()),
            None => current_exe_path(),
        }
    }

    /// Download `asset`, replace the executable and schedule a restart.
    ///
    /// Rejected without touching progress when the platform is unsupported,
    /// the asset has no URL, or another attempt is running. Every other
    /// failure ends in `Failed`.
    ///
    /// # Errors
    ///
    /// Returns the failure that ended the attempt. [`UpdateError::Fatal`]
    /// means the executable could not be restored.
    pub fn apply(&self, asset: &ReleaseAsset) -> Result<()> {
        if !self.platform.supports_self_update() {
            return Err(UpdateError::PlatformUnsupported(format!(
                "self-update is not supported on {}",
                self.platform
            )));
        }
        if asset.download_url.trim().is_empty() {
            return Err(UpdateError::InvalidAsset(format!(
                "asset {:?} has no download URL",
                asset.name
            )));
        }

        let Some(_attempt) = AttemptGuard::acquire(&self.in_flight) else {
            return Err(UpdateError::InProgress);
        };

        self.tracker.reset();
        self.tracker.set(ProgressState {
            phase: ProgressPhase::Downloading,
            message: "Preparing download...".to_owned(),
            ..Default::default()
        });
        tracing::info!(asset = %asset.name, url = %asset.download_url, "starting update");

        match self.download_and_install(asset) {
            Ok(exe) => {
                self.tracker.set(ProgressState {
                    phase: ProgressPhase::Completed,
                    percent: 100,
                    message: if self.config.auto_restart {
                        "Update complete, restarting...".to_owned()
                    } else {
                        "Update complete, restart to finish".to_owned()
                    },
                    ..self.tracker.snapshot()
                });
                tracing::info!("update applied");
                if self.config.auto_restart {
                    self.schedule_restart(exe);
                }
                Ok(())
            }
            Err(e) => {
                self.tracker.set(ProgressState::failed(failure_message(&e), e.to_string()));
                if e.is_fatal() {
                    tracing::error!(error = %e, "update failed and could not be rolled back");
                } else {
                    tracing::warn!(error = %e, "update failed");
                }
                Err(e)
            }
        }
    }

    /// Run [`apply`](Self::apply) on a dedicated worker thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn_apply(
        self: Arc<Self>,
        asset: ReleaseAsset,
    ) -> std::io::Result<JoinHandle<Result<()>>> {
        std::thread::Builder::new()
            .name("urlnav-update".to_owned())
            .spawn(move || self.apply(&asset))
    }

    fn download_and_install(&self, asset: &ReleaseAsset) -> Result<PathBuf> {
        let paths = ReplacePaths::for_executable(&self.executable_path()?)?;
        discard(&paths.staged);

        let resp = match self
            .agent
            .get(&asset.download_url)
            .set("User-Agent", USER_AGENT)
            .call()
        {
            Ok(resp) => resp,
            Err(ureq::Error::Status(status, _)) => {
                return Err(UpdateError::HttpStatus { status });
            }
            Err(e) => return Err(UpdateError::Network(format!("download failed: {e}"))),
        };
        if resp.status() != 200 {
            return Err(UpdateError::HttpStatus {
                status: resp.status(),
            });
        }

        let total = resp
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(self.config.fallback_content_length);

        self.tracker.set(ProgressState {
            message: "Downloading update...".to_owned(),
            ..download_state(0, total, Duration::ZERO)
        });

        let meter = DownloadMeter::start();
        let tracker = Arc::clone(&self.tracker);
        let mut body = instrument(resp.into_reader(), total, move |done, total| {
            tracker.set(meter.state(done, total));
        });
        let written = stage_payload(&mut body, &paths.staged)?;
        tracing::info!(bytes = written, "update payload staged");

        self.tracker.set(ProgressState {
            phase: ProgressPhase::Installing,
            percent: 100,
            bytes_downloaded: written,
            bytes_total: total.max(written),
            message: "Installing update...".to_owned(),
            ..Default::default()
        });

        replace_executable(self.replacer.as_ref(), &paths)?;
        Ok(paths.exe)
    }

    fn schedule_restart(&self, exe: PathBuf) {
        let plan = RestartPlan {
            platform: self.platform.clone(),
            exe,
            grace: self.config.exit_grace(),
        };
        let delay = self.config.restart_delay();
        let spawned = std::thread::Builder::new()
            .name("urlnav-restart".to_owned())
            .spawn(move || {
                std::thread::sleep(delay);
                if let Err(e) = plan.run() {
                    tracing::error!(error = %e, "automatic restart failed");
                }
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "cannot schedule restart");
        }
    }

    /// Relaunch the executable and exit this process after the grace delay.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::PlatformUnsupported`] where relaunching is not
    /// available, or the spawn failure.
    pub fn restart(&self) -> Result<()> {
        RestartPlan {
            platform: self.platform.clone(),
            exe: self.executable_path()?,
            grace: self.config.exit_grace(),
        }
        .run()
    }
}

/// Holds the in-flight flag for one attempt and clears it on drop.
struct AttemptGuard<'a>(&'a AtomicBool);

impl<'a> AttemptGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn failure_message(err: &UpdateError) -> &'static str {
    match err {
        UpdateError::HttpStatus { .. } | UpdateError::Network(_) => "Download failed",
        UpdateError::Fatal { .. } => "Update failed and could not be rolled back; reinstall required",
        _ => "Install failed",
    }
}

struct RestartPlan {
    platform: Platform,
    exe: PathBuf,
    grace: Duration,
}

impl RestartPlan {
    fn run(&self) -> Result<()> {
        if !self.platform.supports_restart() {
            return Err(UpdateError::PlatformUnsupported(format!(
                "automatic restart is not supported on {}",
                self.platform
            )));
        }

        let workdir = std::env::current_dir()
            .ok()
            .or_else(|| self.exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        spawn_detached(&self.exe, &workdir)?;
        tracing::info!(exe = %self.exe.display(), "replacement process started");

        let grace = self.grace;
        std::thread::spawn(move || {
            std::thread::sleep(grace);
            tracing::info!("exiting for restart");
            std::process::exit(0);
        });
        Ok(())
    }
}

fn spawn_detached(exe: &Path, workdir: &Path) -> Result<()> {
    let mut cmd = Command::new(exe);
    cmd.current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    cmd.spawn().map_err(|e| {
        UpdateError::Apply(format!("cannot relaunch {}: {e}", exe.display()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn asset(url: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: "URLNavigator-linux-amd64".to_owned(),
            download_url: url.to_owned(),
            size_bytes: 0,
        }
    }

    fn updater() -> Updater {
        let config = UpdaterConfig {
            auto_restart: false,
            ..Default::default()
        };
        Updater::new(config, Arc::new(ProgressTracker::new()))
    }

    #[test]
    fn unsupported_platform_rejected_without_transition() {
        let updater = updater().with_platform(Platform::new("plan9", "386"));
        let err = updater.apply(&asset("https://example.com/a")).unwrap_err();
        assert!(matches!(err, UpdateError::PlatformUnsupported(_)));
        assert_eq!(updater.tracker().snapshot().phase, ProgressPhase::Idle);
    }

    #[test]
    fn empty_url_rejected_without_transition() {
        let updater = updater().with_platform(Platform::new("linux", "amd64"));
        let err = updater.apply(&asset("  ")).unwrap_err();
        assert!(matches!(err, UpdateError::InvalidAsset(_)));
        assert_eq!(updater.tracker().snapshot().phase, ProgressPhase::Idle);
    }

    #[test]
    fn connection_failure_ends_failed_and_leaves_exe() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("urlnav");
        std::fs::write(&exe, "original").unwrap();

        let updater = updater()
            .with_platform(Platform::new("linux", "amd64"))
            .with_executable(&exe);
        // Port 9 (discard) on localhost is almost never listening.
        let err = updater.apply(&asset("http://127.0.0.1:9/urlnav")).unwrap_err();
        assert!(matches!(err, UpdateError::Network(_)));

        let snap = updater.tracker().snapshot();
        assert_eq!(snap.phase, ProgressPhase::Failed);
        assert_eq!(snap.message, "Download failed");
        assert!(snap.error_detail.is_some());
        assert_eq!(std::fs::read_to_string(&exe).unwrap(), "original");
    }

    #[test]
    fn overlapping_attempt_is_rejected_without_transition() {
        let updater = updater().with_platform(Platform::new("linux", "amd64"));
        let held = AttemptGuard::acquire(&updater.in_flight).unwrap();

        let err = updater.apply(&asset("http://127.0.0.1:9/urlnav")).unwrap_err();
        assert!(matches!(err, UpdateError::InProgress));
        assert!(err.is_recoverable());
        assert_eq!(updater.tracker().snapshot().phase, ProgressPhase::Idle);
        drop(held);
    }

    #[test]
    fn finished_attempt_releases_the_updater() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("urlnav");
        std::fs::write(&exe, "original").unwrap();
        let updater = updater()
            .with_platform(Platform::new("linux", "amd64"))
            .with_executable(&exe);

        for _ in 0..2 {
            let err = updater.apply(&asset("http://127.0.0.1:9/urlnav")).unwrap_err();
            assert!(matches!(err, UpdateError::Network(_)));
        }
        assert!(!updater.in_flight.load(Ordering::Acquire));
    }

    #[test]
    fn restart_unsupported_platform_is_explicit_error() {
        let updater = updater()
            .with_platform(Platform::new("plan9", "386"))
            .with_executable("/nonexistent/urlnav");
        let err = updater.restart().unwrap_err();
        assert!(matches!(err, UpdateError::PlatformUnsupported(ref m) if m.contains("restart")));
    }

    #[test]
    fn failure_messages() {
        assert_eq!(failure_message(&UpdateError::HttpStatus { status: 500 }), "Download failed");
        assert_eq!(failure_message(&UpdateError::Apply("x".into())), "Install failed");
        assert!(
            failure_message(&UpdateError::Fatal {
                apply: "a".into(),
                rollback: "b".into()
            })
            .contains("reinstall")
        );
    }
}
