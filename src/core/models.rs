//! Core data models shared by the download manager and the playback synchronizer

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::error_handling::{PlaybackError, TransferError};

/// Download lifecycle state

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DownloadState {
    NotStarted,

    Downloading,

    Finished,

    Failed,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Whether `next` is a legal successor of this state.
    ///
    /// `NotStarted -> Finished` is the cache-hit short circuit. Retrying a
    /// failed download starts a fresh task, so `Failed` has no successor.
    pub fn can_transition_to(&self, next: DownloadState) -> bool {
        use DownloadState::*;
        matches!(
            (self, next),
            (NotStarted, Downloading)
                | (NotStarted, Finished)
                | (NotStarted, Failed)
                | (Downloading, Finished)
                | (Downloading, Failed)
        )
    }
}

/// Byte-level progress of one transfer

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DownloadProgress {
    pub bytes_written: u64,

    /// `None` until the server announces a length
    pub bytes_expected: Option<u64>,

    /// Smoothed transfer speed in bytes per second
    pub speed: f64,

    pub eta_seconds: Option<u64>,
}

impl DownloadProgress {
    pub fn new(bytes_written: u64, bytes_expected: Option<u64>) -> Self {
        Self {
            bytes_written,
            bytes_expected,
            speed: 0.0,
            eta_seconds: None,
        }
    }

    /// Fraction in `[0, 1]`; 0 when the expected size is unknown or zero
    pub fn progress(&self) -> f64 {
        match self.bytes_expected {
            Some(expected) if expected > 0 => {
                (self.bytes_written as f64 / expected as f64).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_expected == Some(self.bytes_written)
    }
}

/// Terminal result of a download task

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Finished(PathBuf),

    Failed(TransferError),
}

impl DownloadOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    /// `file://` URI of the cached media, when finished
    pub fn local_uri(&self) -> Option<url::Url> {
        match self {
            Self::Finished(path) => {
                let absolute = std::path::absolute(path).ok()?;
                url::Url::from_file_path(absolute).ok()
            }
            Self::Failed(_) => None,
        }
    }

    pub fn into_result(self) -> Result<PathBuf, TransferError> {
        match self {
            Self::Finished(path) => Ok(path),
            Self::Failed(err) => Err(err),
        }
    }
}

/// Player readiness as reported by its status notifications

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Readiness {
    #[default]
    Idle,

    Loading,

    ReadyToPlay,

    Error,
}

/// Fraction of the timeline covered by `position`, clamped to `[0, 1]`.
///
/// Unknown or zero duration yields 0.
pub fn fraction_complete(position: Duration, duration: Option<Duration>) -> f64 {
    match duration {
        Some(duration) if !duration.is_zero() => {
            (position.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
        }
        _ => 0.0,
    }
}

/// Read-only view into an externally owned player

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerSnapshot {
    pub current_time: Duration,

    pub duration: Option<Duration>,

    pub playing: bool,

    pub readiness: Readiness,
}

impl PlayerSnapshot {
    pub fn fraction_complete(&self) -> f64 {
        fraction_complete(self.current_time, self.duration)
    }
}

/// UI-facing state owned by the playback synchronizer

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedUiState {
    /// Mirrors the player's playing flag (event channel)
    pub is_playing: bool,

    /// Event channel
    pub readiness: Readiness,

    /// Latest sampled position (poll channel)
    pub position: Duration,

    /// Latest sampled duration (poll channel)
    pub duration: Option<Duration>,

    pub last_error: Option<PlaybackError>,
}

impl DerivedUiState {
    pub fn fraction_complete(&self) -> f64 {
        fraction_complete(self.position, self.duration)
    }

    pub fn play_pause_label(&self) -> &'static str {
        if self.is_playing {
            "Pause"
        } else {
            "Play"
        }
    }
}

/// Autoplay behaviour when the player reports `ReadyToPlay`

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutoplayPolicy {
    Disabled,

    /// At most once per player instance
    #[default]
    Once,

    /// On every transition into `ReadyToPlay`
    EveryReady,
}

/// Download configuration

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Overrides the platform cache directory
    pub cache_directory: Option<String>,

    /// Longest silence while waiting for a response or the next body chunk.
    /// Not a deadline for the whole transfer.
    pub timeout_seconds: u64,

    pub connect_timeout_seconds: u64,

    pub user_agent: String,

    pub headers: HashMap<String, String>,

    /// Resume from a `.part` file when the server supports ranges
    pub resume_enabled: bool,

    /// Treat an existing destination file as a complete cached download
    pub reuse_cached_files: bool,

    /// Bytes between resume-record checkpoints
    pub checkpoint_bytes: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            cache_directory: None,

            timeout_seconds: 30,

            connect_timeout_seconds: 10,

            user_agent: crate::utils::network::get_user_agent().to_string(),

            headers: HashMap::new(),

            resume_enabled: true,

            reuse_cached_files: true,

            checkpoint_bytes: 1024 * 1024,
        }
    }
}

/// Playback synchronization configuration

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub poll_interval_ms: u64,

    /// Step used by rewind / fast-forward
    pub seek_step_seconds: f64,

    pub autoplay: AutoplayPolicy,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,

            seek_step_seconds: 5.0,

            autoplay: AutoplayPolicy::Once,
        }
    }
}

impl PlaybackConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn seek_step(&self) -> Duration {
        Duration::from_secs_f64(self.seek_step_seconds.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_complete() {
        let fraction = fraction_complete(
            Duration::from_millis(2500),
            Some(Duration::from_millis(10000)),
        );
        assert!((fraction - 0.25).abs() < f64::EPSILON);

        assert_eq!(fraction_complete(Duration::ZERO, Some(Duration::ZERO)), 0.0);
        assert_eq!(fraction_complete(Duration::from_secs(3), None), 0.0);
        assert_eq!(
            fraction_complete(Duration::from_secs(12), Some(Duration::from_secs(10))),
            1.0
        );
    }

    #[test]
    fn test_download_progress_bounds() {
        assert_eq!(DownloadProgress::new(50, None).progress(), 0.0);
        assert_eq!(DownloadProgress::new(50, Some(0)).progress(), 0.0);
        assert_eq!(DownloadProgress::new(50, Some(100)).progress(), 0.5);
        assert_eq!(DownloadProgress::new(150, Some(100)).progress(), 1.0);
        assert!(DownloadProgress::new(100, Some(100)).is_complete());
    }

    #[test]
    fn test_state_transitions() {
        use DownloadState::*;
        assert!(NotStarted.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Finished));
        assert!(Downloading.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(NotStarted));
        assert!(!Failed.can_transition_to(Downloading));
        assert!(!Finished.can_transition_to(Downloading));
        assert!(!Downloading.can_transition_to(NotStarted));
        assert!(!Finished.can_transition_to(NotStarted));
    }

    #[test]
    fn test_play_pause_label() {
        let mut ui = DerivedUiState::default();
        assert_eq!(ui.play_pause_label(), "Play");
        ui.is_playing = true;
        assert_eq!(ui.play_pause_label(), "Pause");
    }

    #[test]
    fn test_local_uri() {
        let outcome = DownloadOutcome::Finished(PathBuf::from("/tmp/cache/video.mp4"));
        let uri = outcome.local_uri().unwrap();
        assert_eq!(uri.scheme(), "file");
        assert!(uri.path().ends_with("video.mp4"));
        assert!(DownloadOutcome::Failed(TransferError::Cancelled)
            .local_uri()
            .is_none());
    }
}
