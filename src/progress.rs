//! Shared progress state for an in-flight update.
//!
//! The worker driving a download writes through [`ProgressTracker::set`]; the
//! UI polls [`ProgressTracker::snapshot`] at its own cadence and always gets
//! an owned copy. [`ProgressReader`] instruments the response body so every
//! chunk read reports `(downloaded, total)` to a callback.

use serde::Serialize;
use std::io::Read;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Phase of an update attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    #[default]
    Idle,
    Downloading,
    Installing,
    Completed,
    Failed,
}

impl ProgressPhase {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Downloading => 1,
            Self::Installing => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    /// `Completed` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` keeps the attempt monotonic.
    ///
    /// Repeated `Downloading` updates are allowed; nothing leaves a terminal
    /// phase except [`ProgressTracker::reset`].
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank() || (next == self && self == Self::Downloading)
    }
}

/// Snapshot of an update attempt, as shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    /// Current phase of the attempt.
    pub phase: ProgressPhase,
    /// 0 to 100.
    pub percent: u8,
    /// Bytes received so far.
    pub bytes_downloaded: u64,
    /// Declared size, or the configured fallback when the server sent none.
    pub bytes_total: u64,
    /// e.g. `"1.2 MB/s"`. Empty until a rate is known.
    pub speed_label: String,
    /// e.g. `"2m 5s"`. Empty until an estimate is possible.
    pub eta_label: String,
    /// Short status line for the UI.
    pub message: String,
    /// Full error text once the attempt has failed.
    pub error_detail: Option<String>,
}

impl ProgressState {
    /// The state every attempt starts from.
    pub fn idle() -> Self {
        Self {
            message: "Ready".to_owned(),
            ..Default::default()
        }
    }

    /// A failure with a short message and the full error text.
    pub fn failed(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Failed,
            message: message.into(),
            error_detail: Some(detail.into()),
            ..Default::default()
        }
    }
}

/// Owner of the single shared [`ProgressState`].
#[derive(Debug)]
pub struct ProgressTracker {
    state: RwLock<ProgressState>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// A tracker in the `Idle` state.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ProgressState::idle()),
        }
    }

    /// Return to `Idle`. Called at the start of every attempt.
    pub fn reset(&self) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = ProgressState::idle();
    }

    /// Replace the state if the phase transition is monotonic.
    ///
    /// Returns `false` (and leaves the state untouched) for a regression such
    /// as `Installing -> Downloading` or any write after a terminal phase.
    pub fn set(&self, next: ProgressState) -> bool {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !guard.phase.can_advance_to(next.phase) {
            tracing::warn!(
                from = ?guard.phase,
                to = ?next.phase,
                "rejected non-monotonic progress transition"
            );
            return false;
        }
        *guard = next;
        true
    }

    /// An owned copy of the current state.
    pub fn snapshot(&self) -> ProgressState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// A reader that reports cumulative bytes after every chunk.
pub struct ProgressReader<R, F> {
    inner: R,
    total: u64,
    downloaded: u64,
    on_progress: F,
}

/// Wrap `reader` so `on_progress(downloaded, total)` runs after each read.
pub fn instrument<R, F>(reader: R, total: u64, on_progress: F) -> ProgressReader<R, F>
where
    R: Read,
    F: FnMut(u64, u64),
{
    ProgressReader {
        inner: reader,
        total,
        downloaded: 0,
        on_progress,
    }
}

impl<R: Read, F: FnMut(u64, u64)> Read for ProgressReader<R, F> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.downloaded += n as u64;
        (self.on_progress)(self.downloaded, self.total);
        Ok(n)
    }
}

/// Computes download states relative to the start of one attempt.
#[derive(Debug, Clone, Copy)]
pub struct DownloadMeter {
    started: Instant,
}

impl DownloadMeter {
    /// Start the clock for a new attempt.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// The `Downloading` state for `downloaded` of `total` bytes so far.
    pub fn state(&self, downloaded: u64, total: u64) -> ProgressState {
        download_state(downloaded, total, self.started.elapsed())
    }
}

/// `min(100, floor(downloaded * 100 / total))`; 0 when `total` is 0.
pub fn percent_of(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (u128::from(downloaded) * 100) / u128::from(total);
    pct.min(100) as u8
}

/// The `Downloading` state for `downloaded` of `total` bytes after `elapsed`.
pub fn download_state(downloaded: u64, total: u64, elapsed: Duration) -> ProgressState {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        downloaded as f64 / secs
    } else {
        0.0
    };

    let speed_label = if secs > 0.0 {
        format!("{}/s", format_bytes(rate as u64))
    } else {
        String::new()
    };

    let eta_label = if downloaded > 0 && secs > 1.0 && rate > 0.0 {
        let remaining = total.saturating_sub(downloaded) as f64 / rate;
        format_duration(Duration::from_secs(remaining as u64))
    } else {
        String::new()
    };

    ProgressState {
        phase: ProgressPhase::Downloading,
        percent: percent_of(downloaded, total),
        bytes_downloaded: downloaded,
        bytes_total: total,
        speed_label,
        eta_label,
        message: format!(
            "Downloaded {} / {}",
            format_bytes(downloaded),
            format_bytes(total)
        ),
        error_detail: None,
    }
}

/// Binary-unit size with one decimal: `1536 -> "1.5 KB"`, `512 -> "512 B"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const PREFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}B", bytes as f64 / div as f64, PREFIXES[exp])
}

/// `"45s"`, `"2m 5s"` or `"1h 3m"` depending on magnitude.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs / 60) % 60)
    }
}
