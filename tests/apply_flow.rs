//! End-to-end apply tests: download from a mock asset server, swap a scratch
//! executable, and check rollback behaviour through an injected replacer.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use urlnav_updater::update::{FileReplacer, FsReplacer};
use urlnav_updater::{
    Platform, ProgressPhase, ProgressTracker, ReleaseAsset, UpdateError, Updater, UpdaterConfig,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NEW_BINARY: &[u8] = b"\x7fELF new urlnavigator build with plenty of bytes in it";
const OLD_BINARY: &[u8] = b"\x7fELF old urlnavigator build";

/// Delegates to the real filesystem, failing the steps it is told to fail.
struct FaultyReplacer {
    fail_install: bool,
    fail_restore: bool,
}

impl FileReplacer for FaultyReplacer {
    fn backup(&self, exe: &Path, backup: &Path) -> std::io::Result<()> {
        FsReplacer.backup(exe, backup)
    }

    fn install(&self, staged: &Path, exe: &Path) -> std::io::Result<()> {
        if self.fail_install {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "injected: executable is locked",
            ));
        }
        FsReplacer.install(staged, exe)
    }

    fn restore(&self, backup: &Path, exe: &Path) -> std::io::Result<()> {
        if self.fail_restore {
            return Err(std::io::Error::other("injected: backup unreadable"));
        }
        FsReplacer.restore(backup, exe)
    }
}

fn sha256(path: &Path) -> Vec<u8> {
    let bytes = std::fs::read(path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
    Sha256::digest(bytes).to_vec()
}

fn scratch_exe(dir: &Path) -> PathBuf {
    let exe = dir.join("URLNavigator");
    std::fs::write(&exe, OLD_BINARY).unwrap_or_else(|e| panic!("write exe: {e}"));
    exe
}

fn asset(server: &MockServer) -> ReleaseAsset {
    ReleaseAsset {
        name: "URLNavigator-linux-amd64".to_owned(),
        download_url: format!("{}/download/URLNavigator-linux-amd64", server.uri()),
        size_bytes: NEW_BINARY.len() as u64,
    }
}

async fn serve_binary(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download/URLNavigator-linux-amd64"))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(NEW_BINARY))
        .mount(&server)
        .await;
    server
}

fn updater(exe: &Path, tracker: Arc<ProgressTracker>) -> Updater {
    let config = UpdaterConfig {
        auto_restart: false,
        ..Default::default()
    };
    Updater::new(config, tracker)
        .with_platform(Platform::new("linux", "amd64"))
        .with_executable(exe)
}

async fn run_apply(updater: Updater, asset: ReleaseAsset) -> Result<(), UpdateError> {
    tokio::task::spawn_blocking(move || updater.apply(&asset))
        .await
        .unwrap_or_else(|e| panic!("apply panicked: {e}"))
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_apply_replaces_executable() {
    let server = serve_binary(200).await;
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let exe = scratch_exe(dir.path());
    let tracker = Arc::new(ProgressTracker::new());

    run_apply(updater(&exe, Arc::clone(&tracker)), asset(&server))
        .await
        .unwrap_or_else(|e| panic!("apply failed: {e}"));

    assert_eq!(std::fs::read(&exe).unwrap_or_default(), NEW_BINARY);
    let snap = tracker.snapshot();
    assert_eq!(snap.phase, ProgressPhase::Completed);
    assert_eq!(snap.percent, 100);
    assert_eq!(snap.bytes_downloaded, NEW_BINARY.len() as u64);
    assert!(snap.error_detail.is_none());

    assert!(!dir.path().join(".URLNavigator.new").exists());
    assert!(!dir.path().join("URLNavigator.old").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn non_200_download_fails_without_touching_executable() {
    let server = serve_binary(500).await;
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let exe = scratch_exe(dir.path());
    let before = sha256(&exe);
    let tracker = Arc::new(ProgressTracker::new());

    let err = run_apply(updater(&exe, Arc::clone(&tracker)), asset(&server))
        .await
        .err()
        .unwrap_or_else(|| panic!("expected failure"));

    assert!(matches!(err, UpdateError::HttpStatus { status: 500 }));
    let snap = tracker.snapshot();
    assert_eq!(snap.phase, ProgressPhase::Failed);
    assert!(snap.error_detail.unwrap_or_default().contains("500"));
    assert_eq!(sha256(&exe), before);
    assert!(!dir.path().join(".URLNavigator.new").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_replace_rolls_back_to_original_bytes() {
    let server = serve_binary(200).await;
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let exe = scratch_exe(dir.path());
    let before = sha256(&exe);
    let tracker = Arc::new(ProgressTracker::new());

    let faulty = Arc::new(FaultyReplacer {
        fail_install: true,
        fail_restore: false,
    });
    let err = run_apply(
        updater(&exe, Arc::clone(&tracker)).with_replacer(faulty),
        asset(&server),
    )
    .await
    .err()
    .unwrap_or_else(|| panic!("expected failure"));

    assert!(matches!(err, UpdateError::Apply(_)));
    assert!(err.is_recoverable());
    let snap = tracker.snapshot();
    assert_eq!(snap.phase, ProgressPhase::Failed);
    assert!(snap.error_detail.unwrap_or_default().contains("executable is locked"));
    assert_eq!(sha256(&exe), before);
    assert!(!dir.path().join(".URLNavigator.new").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_replace_and_failed_rollback_is_fatal() {
    let server = serve_binary(200).await;
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let exe = scratch_exe(dir.path());
    let tracker = Arc::new(ProgressTracker::new());

    let faulty = Arc::new(FaultyReplacer {
        fail_install: true,
        fail_restore: true,
    });
    let err = run_apply(
        updater(&exe, Arc::clone(&tracker)).with_replacer(faulty),
        asset(&server),
    )
    .await
    .err()
    .unwrap_or_else(|| panic!("expected failure"));

    assert!(err.is_fatal());
    match &err {
        UpdateError::Fatal { apply, rollback } => {
            assert!(apply.contains("executable is locked"));
            assert!(rollback.contains("backup unreadable"));
        }
        other => panic!("expected fatal error, got {other:?}"),
    }

    let snap = tracker.snapshot();
    assert_eq!(snap.phase, ProgressPhase::Failed);
    assert!(snap.message.contains("reinstall"));
    let detail = snap.error_detail.unwrap_or_default();
    assert!(detail.contains("executable is locked"));
    assert!(detail.contains("backup unreadable"));
}

#[tokio::test(flavor = "multi_thread")]
async fn new_attempt_resets_stale_failure() {
    let server = serve_binary(200).await;
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let exe = scratch_exe(dir.path());
    let tracker = Arc::new(ProgressTracker::new());

    let faulty = Arc::new(FaultyReplacer {
        fail_install: true,
        fail_restore: false,
    });
    let first = run_apply(
        updater(&exe, Arc::clone(&tracker)).with_replacer(faulty),
        asset(&server),
    )
    .await;
    assert!(first.is_err());
    assert_eq!(tracker.snapshot().phase, ProgressPhase::Failed);

    run_apply(updater(&exe, Arc::clone(&tracker)), asset(&server))
        .await
        .unwrap_or_else(|e| panic!("second apply failed: {e}"));
    let snap = tracker.snapshot();
    assert_eq!(snap.phase, ProgressPhase::Completed);
    assert!(snap.error_detail.is_none());
    assert_eq!(std::fs::read(&exe).unwrap_or_default(), NEW_BINARY);
}

#[tokio::test(flavor = "multi_thread")]
async fn polled_phases_never_go_backwards() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download/URLNavigator-linux-amd64"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0x5au8; 512 * 1024])
                .set_delay(std::time::Duration::from_millis(100)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let exe = scratch_exe(dir.path());
    let tracker = Arc::new(ProgressTracker::new());
    let updater = Arc::new(updater(&exe, Arc::clone(&tracker)));
    let asset = asset(&server);

    let observed = tokio::task::spawn_blocking(move || {
        let worker = updater
            .spawn_apply(asset)
            .unwrap_or_else(|e| panic!("spawn: {e}"));
        let mut seen = Vec::new();
        loop {
            let snap = tracker.snapshot();
            seen.push((snap.phase, snap.percent));
            if snap.phase.is_terminal() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let result = worker.join().unwrap_or_else(|_| panic!("worker panicked"));
        assert!(result.is_ok(), "{result:?}");
        seen
    })
    .await
    .unwrap_or_else(|e| panic!("poller panicked: {e}"));

    let rank = |p: ProgressPhase| match p {
        ProgressPhase::Idle => 0,
        ProgressPhase::Downloading => 1,
        ProgressPhase::Installing => 2,
        ProgressPhase::Completed | ProgressPhase::Failed => 3,
    };
    // Skip the Idle snapshots taken before the worker's reset landed.
    let active: Vec<_> = observed
        .into_iter()
        .skip_while(|(p, _)| *p == ProgressPhase::Idle)
        .collect();
    assert!(active.windows(2).all(|w| rank(w[0].0) <= rank(w[1].0)));
    assert!(
        active
            .iter()
            .filter(|(p, _)| *p == ProgressPhase::Downloading)
            .map(|(_, pct)| *pct)
            .collect::<Vec<_>>()
            .windows(2)
            .all(|w| w[0] <= w[1])
    );
    assert_eq!(active.last().map(|s| s.0), Some(ProgressPhase::Completed));
}
