//! Playback state synchronizer
//!
//! Reconciles an externally owned player with UI-facing derived state over two
//! channels:
//! - the event channel applies readiness and playing notifications in the
//!   order the player emitted them
//! - the poll channel samples position and duration on a fixed interval
//!
//! The synchronizer only reads the player, with one exception: the autoplay
//! `play()` issued when the player becomes ready.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::models::{AutoplayPolicy, DerivedUiState, PlaybackConfig, PlayerSnapshot, Readiness};
use crate::core::player::{Player, PlayerEvent};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    pub autoplay: AutoplayPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&PlaybackConfig::default())
    }
}

impl From<&PlaybackConfig> for SyncConfig {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            autoplay: config.autoplay,
        }
    }
}

/// One poll-channel reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    /// Strictly increasing per synchronizer
    pub seq: u64,
    pub position: Duration,
    pub duration: Option<Duration>,
}

/// Side effect requested by a state update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEffect {
    Autoplay,
}

/// Pure reconciliation state, independent of any runtime
#[derive(Debug, Clone)]
pub struct SyncState {
    ui: DerivedUiState,
    autoplay: AutoplayPolicy,
    autoplay_fired: bool,
    last_sample_seq: Option<u64>,
}

impl SyncState {
    pub fn new(autoplay: AutoplayPolicy) -> Self {
        Self {
            ui: DerivedUiState::default(),
            autoplay,
            autoplay_fired: false,
            last_sample_seq: None,
        }
    }

    pub fn ui(&self) -> &DerivedUiState {
        &self.ui
    }

    pub fn autoplay_fired(&self) -> bool {
        self.autoplay_fired
    }

    /// Adopt the player's current state; a player that is already ready
    /// counts as a transition into `ReadyToPlay`.
    pub fn seed(&mut self, snapshot: &PlayerSnapshot) -> Option<SyncEffect> {
        self.apply_sample(PositionSample {
            seq: 0,
            position: snapshot.current_time,
            duration: snapshot.duration,
        });
        let effect = self.apply_event(&PlayerEvent::status(snapshot.readiness));
        self.apply_event(&PlayerEvent::PlayingChanged(snapshot.playing));
        effect
    }

    pub fn apply_event(&mut self, event: &PlayerEvent) -> Option<SyncEffect> {
        match event {
            PlayerEvent::StatusChanged { status, error } => {
                let previous = self.ui.readiness;
                self.ui.readiness = *status;

                match status {
                    Readiness::Error => {
                        self.ui.is_playing = false;
                        if let Some(error) = error {
                            self.ui.last_error = Some(error.clone());
                        }
                        None
                    }
                    Readiness::ReadyToPlay if previous != Readiness::ReadyToPlay => {
                        self.ui.last_error = None;
                        self.autoplay_effect()
                    }
                    _ => None,
                }
            }
            PlayerEvent::PlayingChanged(playing) => {
                if *playing && self.ui.readiness == Readiness::Error {
                    debug!("Ignoring playing notification from errored player");
                    return None;
                }
                self.ui.is_playing = *playing;
                None
            }
        }
    }

    /// Apply a poll sample; samples older than the last applied one are rejected
    pub fn apply_sample(&mut self, sample: PositionSample) -> bool {
        if let Some(last) = self.last_sample_seq {
            if sample.seq <= last {
                debug!("Discarding stale sample {} (last {})", sample.seq, last);
                return false;
            }
        }
        self.last_sample_seq = Some(sample.seq);
        self.ui.position = sample.position;
        self.ui.duration = sample.duration;
        true
    }

    fn autoplay_effect(&mut self) -> Option<SyncEffect> {
        match self.autoplay {
            AutoplayPolicy::Disabled => None,
            AutoplayPolicy::Once if self.autoplay_fired => None,
            AutoplayPolicy::Once | AutoplayPolicy::EveryReady => {
                self.autoplay_fired = true;
                Some(SyncEffect::Autoplay)
            }
        }
    }
}

struct SyncShared {
    state: Mutex<SyncState>,
    ui: watch::Sender<DerivedUiState>,
    active: AtomicBool,
}

impl SyncShared {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Apply and publish; `None` once the synchronizer has been shut down
    fn update<R>(&self, apply: impl FnOnce(&mut SyncState) -> R) -> Option<R> {
        let mut state = self.state.lock();
        if !self.is_active() {
            return None;
        }
        let result = apply(&mut state);
        let next = state.ui().clone();
        // publish under the lock so readers never see an older state after a newer one
        self.ui.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        Some(result)
    }

    /// Clear the active flag under the state lock, so no update lands after
    /// this returns. Returns false if already inactive.
    fn deactivate(&self) -> bool {
        let _state = self.state.lock();
        self.active.swap(false, Ordering::SeqCst)
    }

    fn handle_event(&self, player: &dyn Player, event: &PlayerEvent) {
        if let Some(Some(SyncEffect::Autoplay)) = self.update(|state| state.apply_event(event)) {
            info!("▶️ Player ready, autoplay");
            player.play();
        }
    }
}

/// Live synchronizer bound to one player instance
pub struct PlaybackSynchronizer {
    player: Arc<dyn Player>,
    shared: Arc<SyncShared>,
    tasks: Vec<JoinHandle<()>>,
}

impl PlaybackSynchronizer {
    /// Subscribe to `player` and start polling it. Must be called within a tokio runtime.
    pub fn attach(player: Arc<dyn Player>, config: SyncConfig) -> Self {
        // subscribe before seeding so no notification falls between the two;
        // anything already queued predates the snapshot
        let mut events = player.subscribe();
        let mut stale = 0usize;
        while events.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Discarded {} notifications queued before the seed", stale);
        }

        let mut state = SyncState::new(config.autoplay);
        let effect = state.seed(&player.snapshot());
        let (ui, _rx) = watch::channel(state.ui().clone());
        let shared = Arc::new(SyncShared {
            state: Mutex::new(state),
            ui,
            active: AtomicBool::new(true),
        });

        info!(
            "🔗 Synchronizer attached (readiness {:?}, poll every {:?})",
            shared.state.lock().ui().readiness,
            config.poll_interval
        );

        if effect == Some(SyncEffect::Autoplay) {
            info!("▶️ Player already ready, autoplay");
            player.play();
        }

        let event_task = tokio::spawn(run_event_channel(
            player.clone(),
            shared.clone(),
            events,
        ));
        let poll_task = tokio::spawn(run_poll_channel(
            player.clone(),
            shared.clone(),
            config.poll_interval,
        ));

        Self {
            player,
            shared,
            tasks: vec![event_task, poll_task],
        }
    }

    pub fn state(&self) -> DerivedUiState {
        self.shared.ui.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DerivedUiState> {
        self.shared.ui.subscribe()
    }

    pub fn player(&self) -> &Arc<dyn Player> {
        &self.player
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    /// Stop the timer and drop the player subscription
    pub fn shutdown(&mut self) {
        if !self.shared.deactivate() {
            return;
        }
        for task in &self.tasks {
            task.abort();
        }
        info!("🛑 Synchronizer detached");
    }

    /// `shutdown` and wait until both channels have been torn down
    pub async fn close(mut self) {
        self.shutdown();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!("Synchronizer task ended abnormally: {}", err);
                }
            }
        }
    }
}

impl Drop for PlaybackSynchronizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_event_channel(
    player: Arc<dyn Player>,
    shared: Arc<SyncShared>,
    mut events: mpsc::UnboundedReceiver<PlayerEvent>,
) {
    while let Some(event) = events.recv().await {
        if !shared.is_active() {
            break;
        }
        debug!("Player event: {:?}", event);
        shared.handle_event(player.as_ref(), &event);
    }
    debug!("Player event channel closed");
}

async fn run_poll_channel(player: Arc<dyn Player>, shared: Arc<SyncShared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut seq = 0u64;
    loop {
        ticker.tick().await;
        if !shared.is_active() {
            break;
        }
        seq += 1;
        let sample = PositionSample {
            seq,
            position: player.current_time(),
            duration: player.duration(),
        };
        if shared.update(|state| state.apply_sample(sample)).is_none() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_handling::PlaybackError;

    fn ready() -> PlayerEvent {
        PlayerEvent::status(Readiness::ReadyToPlay)
    }

    #[test]
    fn test_autoplay_once_per_player() {
        let mut state = SyncState::new(AutoplayPolicy::Once);
        assert_eq!(state.apply_event(&ready()), Some(SyncEffect::Autoplay));
        assert_eq!(state.apply_event(&PlayerEvent::status(Readiness::Loading)), None);
        assert_eq!(state.apply_event(&ready()), None);
        assert!(state.autoplay_fired());
    }

    #[test]
    fn test_autoplay_every_ready() {
        let mut state = SyncState::new(AutoplayPolicy::EveryReady);
        assert_eq!(state.apply_event(&ready()), Some(SyncEffect::Autoplay));
        // a repeated notification is not a transition
        assert_eq!(state.apply_event(&ready()), None);
        state.apply_event(&PlayerEvent::status(Readiness::Loading));
        assert_eq!(state.apply_event(&ready()), Some(SyncEffect::Autoplay));
    }

    #[test]
    fn test_autoplay_disabled() {
        let mut state = SyncState::new(AutoplayPolicy::Disabled);
        assert_eq!(state.apply_event(&ready()), None);
        assert!(!state.autoplay_fired());
    }

    #[test]
    fn test_stale_sample_rejected() {
        let mut state = SyncState::new(AutoplayPolicy::Disabled);
        let sample = |seq, secs| PositionSample {
            seq,
            position: Duration::from_secs(secs),
            duration: Some(Duration::from_secs(10)),
        };

        assert!(state.apply_sample(sample(2, 5)));
        assert!(!state.apply_sample(sample(1, 3)));
        assert_eq!(state.ui().position, Duration::from_secs(5));
        assert!((state.ui().fraction_complete() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_clears_playing() {
        let mut state = SyncState::new(AutoplayPolicy::Disabled);
        state.apply_event(&ready());
        state.apply_event(&PlayerEvent::PlayingChanged(true));
        assert!(state.ui().is_playing);

        let error = PlaybackError::LoadFailed {
            message: "decoder".into(),
        };
        state.apply_event(&PlayerEvent::error(error.clone()));
        assert!(!state.ui().is_playing);
        assert_eq!(state.ui().readiness, Readiness::Error);
        assert_eq!(state.ui().last_error, Some(error));

        state.apply_event(&PlayerEvent::PlayingChanged(true));
        assert!(!state.ui().is_playing);
    }

    #[tokio::test]
    async fn test_no_update_lands_after_shutdown() {
        let player = Arc::new(crate::core::test_support::FakePlayer::with_status(
            Readiness::Loading,
            Some(Duration::from_secs(10)),
        ));
        let mut sync = PlaybackSynchronizer::attach(
            player,
            SyncConfig {
                poll_interval: Duration::from_secs(1),
                autoplay: AutoplayPolicy::Disabled,
            },
        );

        sync.shutdown();
        let applied = sync
            .shared
            .update(|state| state.apply_event(&ready()));
        assert!(applied.is_none());
        assert_eq!(sync.state().readiness, Readiness::Loading);
        assert_eq!(sync.shared.state.lock().ui().readiness, Readiness::Loading);
    }

    #[test]
    fn test_seed_from_ready_player() {
        let mut state = SyncState::new(AutoplayPolicy::Once);
        let snapshot = PlayerSnapshot {
            current_time: Duration::from_millis(2500),
            duration: Some(Duration::from_millis(10000)),
            playing: false,
            readiness: Readiness::ReadyToPlay,
        };
        assert_eq!(state.seed(&snapshot), Some(SyncEffect::Autoplay));
        assert!((state.ui().fraction_complete() - 0.25).abs() < f64::EPSILON);
    }
}
