//! Transport controls issued by the presentation layer
//!
//! Commands go straight to the player. Readiness comes from the
//! synchronizer's derived state so the UI and the gating agree.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::core::models::{DerivedUiState, Readiness};
use crate::core::player::{seek_target, Player};

#[derive(Clone)]
pub struct TransportControls {
    player: Arc<dyn Player>,
    ui: watch::Receiver<DerivedUiState>,
    seek_step: Duration,
}

impl TransportControls {
    pub fn new(player: Arc<dyn Player>, ui: watch::Receiver<DerivedUiState>, seek_step: Duration) -> Self {
        Self {
            player,
            ui,
            seek_step,
        }
    }

    pub fn seek_step(&self) -> Duration {
        self.seek_step
    }

    fn readiness(&self) -> Readiness {
        self.ui.borrow().readiness
    }

    fn usable(&self, command: &str) -> bool {
        if self.readiness() == Readiness::Error {
            debug!("Ignoring {} on errored player", command);
            return false;
        }
        true
    }

    pub fn play(&self) -> bool {
        if !self.usable("play") {
            return false;
        }
        self.player.play();
        true
    }

    pub fn pause(&self) -> bool {
        if !self.usable("pause") {
            return false;
        }
        self.player.pause();
        true
    }

    /// Pause while playing, play otherwise, judged by the derived playing flag
    pub fn toggle_play_pause(&self) -> bool {
        if self.ui.borrow().is_playing {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Absolute seek, clamped to the duration when it is known
    pub fn seek_to(&self, position: Duration) -> bool {
        if !self.usable("seek") {
            return false;
        }
        let target = match self.player.duration() {
            Some(duration) => position.min(duration),
            None if position.is_zero() => position,
            None => {
                debug!("Ignoring seek to {:?} with unknown duration", position);
                return false;
            }
        };
        self.player.set_current_time(target);
        true
    }

    /// Relative seek; ignored before the player is ready or while the duration is unknown
    pub fn seek_by(&self, delta_secs: f64) -> bool {
        if !self.usable("seek") {
            return false;
        }
        if self.readiness() != Readiness::ReadyToPlay {
            debug!("Ignoring relative seek of {}s before ready", delta_secs);
            return false;
        }
        match seek_target(self.player.current_time(), self.player.duration(), delta_secs) {
            Some(target) => {
                self.player.set_current_time(target);
                true
            }
            None => {
                debug!("Ignoring relative seek of {}s, duration unknown", delta_secs);
                false
            }
        }
    }

    pub fn rewind(&self) -> bool {
        self.seek_by(-self.seek_step.as_secs_f64())
    }

    pub fn fast_forward(&self) -> bool {
        self.seek_by(self.seek_step.as_secs_f64())
    }

    pub fn jump_to_start(&self) -> bool {
        self.seek_to(Duration::ZERO)
    }

    pub fn enter_fullscreen(&self) -> bool {
        if !self.usable("fullscreen") {
            return false;
        }
        self.player.enter_fullscreen();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::FakePlayer;

    fn controls(player: Arc<FakePlayer>, readiness: Readiness) -> (TransportControls, watch::Sender<DerivedUiState>) {
        let (tx, rx) = watch::channel(DerivedUiState {
            readiness,
            ..DerivedUiState::default()
        });
        (
            TransportControls::new(player, rx, Duration::from_secs(5)),
            tx,
        )
    }

    #[test]
    fn test_rewind_and_fast_forward_clamp() {
        let player = Arc::new(FakePlayer::with_status(
            Readiness::ReadyToPlay,
            Some(Duration::from_secs(60)),
        ));
        let (controls, _tx) = controls(player.clone(), Readiness::ReadyToPlay);

        player.set_position(Duration::from_secs(3));
        assert!(controls.rewind());
        assert_eq!(player.current_time(), Duration::ZERO);

        player.set_position(Duration::from_secs(58));
        assert!(controls.fast_forward());
        assert_eq!(player.current_time(), Duration::from_secs(60));
    }

    #[test]
    fn test_relative_seek_before_ready_is_ignored() {
        let player = Arc::new(FakePlayer::with_status(Readiness::Loading, None));
        let (controls, _tx) = controls(player.clone(), Readiness::Loading);

        assert!(!controls.fast_forward());
        assert_eq!(player.current_time(), Duration::ZERO);
        assert!(controls.jump_to_start());
    }

    #[test]
    fn test_errored_player_ignores_commands() {
        let player = Arc::new(FakePlayer::with_status(
            Readiness::ReadyToPlay,
            Some(Duration::from_secs(60)),
        ));
        let (controls, _tx) = controls(player.clone(), Readiness::Error);

        assert!(!controls.play());
        assert!(!controls.pause());
        assert!(!controls.toggle_play_pause());
        assert!(!controls.seek_to(Duration::from_secs(10)));
        assert!(!controls.rewind());
        assert!(!controls.enter_fullscreen());
        assert_eq!(player.play_calls(), 0);
        assert_eq!(player.pause_calls(), 0);
        assert_eq!(player.fullscreen_calls(), 0);
    }

    #[test]
    fn test_toggle_follows_derived_state() {
        let player = Arc::new(FakePlayer::with_status(
            Readiness::ReadyToPlay,
            Some(Duration::from_secs(60)),
        ));
        let (controls, tx) = controls(player.clone(), Readiness::ReadyToPlay);

        assert!(controls.toggle_play_pause());
        assert_eq!(player.play_calls(), 1);

        tx.send_modify(|ui| ui.is_playing = true);
        assert!(controls.toggle_play_pause());
        assert_eq!(player.pause_calls(), 1);
    }

    #[test]
    fn test_seek_to_clamps() {
        let player = Arc::new(FakePlayer::with_status(
            Readiness::ReadyToPlay,
            Some(Duration::from_secs(60)),
        ));
        let (controls, _tx) = controls(player.clone(), Readiness::ReadyToPlay);

        assert!(controls.seek_to(Duration::from_secs(90)));
        assert_eq!(player.current_time(), Duration::from_secs(60));
    }
}
