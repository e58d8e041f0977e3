//! Executable replacement with rollback.
//!
//! The new binary is staged next to the running executable (same directory,
//! so the final rename never crosses filesystems), then swapped in:
//!
//! 1. back up the current executable to `<exe>.old`
//! 2. rename the staged file over `<exe>`
//! 3. on failure, restore `<exe>` from the backup
//!
//! Linux/macOS keep `<exe>` in place during the swap (the backup is a copy
//! and the rename replaces the path atomically). Windows cannot rename over
//! a running image, so the current executable is moved aside first.
//!
//! Each filesystem step goes through [`FileReplacer`] so tests can inject
//! failures.

use crate::error::{Result, UpdateError};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Filesystem operations used by the swap. All paths share one directory.
pub trait FileReplacer: Send + Sync {
    /// Preserve `exe` at `backup`.
    fn backup(&self, exe: &Path, backup: &Path) -> std::io::Result<()>;

    /// Atomically move `staged` to `exe`.
    fn install(&self, staged: &Path, exe: &Path) -> std::io::Result<()>;

    /// Put `backup` back at `exe`.
    fn restore(&self, backup: &Path, exe: &Path) -> std::io::Result<()>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsReplacer;

impl FileReplacer for FsReplacer {
    fn backup(&self, exe: &Path, backup: &Path) -> std::io::Result<()> {
        if backup.exists() {
            std::fs::remove_file(backup)?;
        }
        #[cfg(target_os = "windows")]
        {
            std::fs::rename(exe, backup)
        }
        #[cfg(not(target_os = "windows"))]
        {
            std::fs::copy(exe, backup).map(|_| ())
        }
    }

    fn install(&self, staged: &Path, exe: &Path) -> std::io::Result<()> {
        std::fs::rename(staged, exe)
    }

    fn restore(&self, backup: &Path, exe: &Path) -> std::io::Result<()> {
        std::fs::rename(backup, exe)
    }
}

/// Sibling paths used while replacing one executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacePaths {
    /// The executable being replaced.
    pub exe: PathBuf,
    /// Download target next to the executable.
    pub staged: PathBuf,
    /// Copy of the original kept for rollback.
    pub backup: PathBuf,
}

impl ReplacePaths {
    /// `.<name>.new` and `<name>.old` next to `exe`.
    pub fn for_executable(exe: &Path) -> Result<Self> {
        let name = exe
            .file_name()
            .ok_or_else(|| {
                UpdateError::Apply(format!("executable path has no file name: {}", exe.display()))
            })?
            .to_string_lossy()
            .into_owned();
        Ok(Self {
            exe: exe.to_owned(),
            staged: exe.with_file_name(format!(".{name}.new")),
            backup: exe.with_file_name(format!("{name}.old")),
        })
    }
}

/// Returns the path to the currently running executable.
///
/// # Errors
///
/// Returns an error if the path cannot be determined.
pub fn current_exe_path() -> Result<PathBuf> {
    std::env::current_exe().map_err(|e| {
        UpdateError::Apply(format!("cannot determine current executable path: {e}"))
    })
}

/// Stream `payload` into the staging file, returning the bytes written.
///
/// A failed or truncated stream removes the partial file.
///
/// # Errors
///
/// Read failures map to [`UpdateError::Network`], write failures to
/// [`UpdateError::Apply`].
pub fn stage_payload(payload: &mut impl Read, staged: &Path) -> Result<u64> {
    let result = write_staged(payload, staged);
    if result.is_err() {
        discard(staged);
    }
    result
}

fn write_staged(payload: &mut impl Read, staged: &Path) -> Result<u64> {
    let mut file = std::fs::File::create(staged).map_err(|e| {
        UpdateError::Apply(format!("cannot create staging file {}: {e}", staged.display()))
    })?;

    let mut buf = vec![0u8; 64 * 1024];
    let mut written: u64 = 0;
    loop {
        let n = match payload.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(UpdateError::Network(format!("download interrupted: {e}"))),
        };
        file.write_all(&buf[..n])
            .map_err(|e| UpdateError::Apply(format!("cannot write staging file: {e}")))?;
        written += n as u64;
    }
    file.sync_all()
        .map_err(|e| UpdateError::Apply(format!("cannot flush staging file: {e}")))?;

    if written == 0 {
        return Err(UpdateError::Apply("downloaded payload is empty".to_owned()));
    }
    set_executable(staged)?;
    Ok(written)
}

/// Swap the staged binary in, rolling back on failure.
///
/// # Errors
///
/// - [`UpdateError::Apply`] if the swap failed and the original executable
///   was kept or restored.
/// - [`UpdateError::Fatal`] if the swap failed and the restore failed too.
pub fn replace_executable(replacer: &dyn FileReplacer, paths: &ReplacePaths) -> Result<()> {
    if let Err(e) = replacer.backup(&paths.exe, &paths.backup) {
        discard(&paths.staged);
        return Err(UpdateError::Apply(format!(
            "cannot back up current executable {} -> {}: {e}",
            paths.exe.display(),
            paths.backup.display()
        )));
    }

    if let Err(install_err) = replacer.install(&paths.staged, &paths.exe) {
        let apply = format!(
            "cannot install new executable at {}: {install_err}",
            paths.exe.display()
        );
        tracing::error!("{apply}; rolling back");
        discard(&paths.staged);

        return match replacer.restore(&paths.backup, &paths.exe) {
            Ok(()) => {
                tracing::info!("rollback restored {}", paths.exe.display());
                Err(UpdateError::Apply(format!("{apply} (rolled back)")))
            }
            Err(rollback_err) => {
                let rollback = format!(
                    "cannot restore {} from {}: {rollback_err}",
                    paths.exe.display(),
                    paths.backup.display()
                );
                tracing::error!(%apply, %rollback, "rollback failed, installation may be broken");
                Err(UpdateError::Fatal { apply, rollback })
            }
        };
    }

    clear_quarantine(&paths.exe);
    // On Windows the backup is the running image and cannot be removed yet;
    // it is cleared at the start of the next attempt instead.
    if let Err(e) = std::fs::remove_file(&paths.backup) {
        tracing::debug!(error = %e, "backup left in place");
    }
    tracing::info!("executable updated at {}", paths.exe.display());
    Ok(())
}

/// Best-effort removal of a leftover staging or backup file.
pub fn discard(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "cannot remove leftover file");
        }
    }
}

/// Set executable permission on Unix platforms.
fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
            UpdateError::Apply(format!(
                "cannot set executable permission on {}: {e}",
                path.display()
            ))
        })?;
    }
    let _ = path;
    Ok(())
}

fn clear_quarantine(path: &Path) {
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("xattr")
            .args(["-c", &path.to_string_lossy()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
    }
    let _ = path;
}
