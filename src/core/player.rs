//! Player capability consumed by the playback synchronizer
//!
//! The player is owned by the host (a native video view, a decoder pipeline,
//! a test double). This crate never builds or destroys one itself; the
//! session asks a caller-supplied [`PlayerFactory`] when it needs one.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::core::error_handling::PlaybackError;
use crate::core::models::{PlayerSnapshot, Readiness};

/// Push notifications emitted by a player, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StatusChanged {
        status: Readiness,
        /// Set when `status` is `Readiness::Error`
        error: Option<PlaybackError>,
    },
    PlayingChanged(bool),
}

impl PlayerEvent {
    pub fn status(status: Readiness) -> Self {
        Self::StatusChanged {
            status,
            error: None,
        }
    }

    pub fn error(error: PlaybackError) -> Self {
        Self::StatusChanged {
            status: Readiness::Error,
            error: Some(error),
        }
    }
}

/// Externally owned media player.
///
/// All methods take `&self`; implementations keep their mutable state behind
/// interior mutability since the handle is shared between the presentation
/// layer and the synchronizer.
pub trait Player: Send + Sync {
    fn play(&self);

    fn pause(&self);

    fn current_time(&self) -> Duration;

    fn set_current_time(&self, position: Duration);

    /// `None` until the media is loaded
    fn duration(&self) -> Option<Duration>;

    /// Actual playback activity, not the last requested intent
    fn is_playing(&self) -> bool;

    fn status(&self) -> Readiness;

    /// Subscribe to status and playing notifications. Dropping the receiver
    /// unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PlayerEvent>;

    /// Relative seek clamped to `[0, duration]`; ignored while the duration is unknown
    fn seek_by(&self, delta_secs: f64) {
        if let Some(target) = seek_target(self.current_time(), self.duration(), delta_secs) {
            self.set_current_time(target);
        }
    }

    fn enter_fullscreen(&self) {}

    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            current_time: self.current_time(),
            duration: self.duration(),
            playing: self.is_playing(),
            readiness: self.status(),
        }
    }
}

/// Builds a player for a local media file
pub trait PlayerFactory: Send + Sync {
    fn create(&self, source: &Path) -> Result<Arc<dyn Player>, PlaybackError>;
}

impl<F> PlayerFactory for F
where
    F: Fn(&Path) -> Result<Arc<dyn Player>, PlaybackError> + Send + Sync,
{
    fn create(&self, source: &Path) -> Result<Arc<dyn Player>, PlaybackError> {
        self(source)
    }
}

/// Target of a relative seek, clamped to the timeline.
///
/// Returns `None` when the duration is unknown or `delta_secs` is not finite.
pub fn seek_target(position: Duration, duration: Option<Duration>, delta_secs: f64) -> Option<Duration> {
    let duration = duration?;
    if !delta_secs.is_finite() {
        return None;
    }

    let target = (position.as_secs_f64() + delta_secs).clamp(0.0, duration.as_secs_f64());
    Some(Duration::from_secs_f64(target).min(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_back_clamps_to_zero() {
        let target = seek_target(
            Duration::from_secs(3),
            Some(Duration::from_secs(60)),
            -5.0,
        );
        assert_eq!(target, Some(Duration::ZERO));
    }

    #[test]
    fn test_seek_forward_clamps_to_duration() {
        let duration = Duration::from_secs(60);
        let target = seek_target(duration - Duration::from_secs(2), Some(duration), 5.0);
        assert_eq!(target, Some(duration));
    }

    #[test]
    fn test_seek_within_timeline() {
        let target = seek_target(
            Duration::from_secs(10),
            Some(Duration::from_secs(60)),
            5.0,
        );
        assert_eq!(target, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_seek_without_duration_is_ignored() {
        assert_eq!(seek_target(Duration::from_secs(3), None, -5.0), None);
        assert_eq!(
            seek_target(Duration::ZERO, Some(Duration::from_secs(1)), f64::NAN),
            None
        );
    }
}
