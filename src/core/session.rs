//! Download-then-play session for one remote video
//!
//! Starts (or joins) the cached download, builds the player once the file is
//! local, and keeps the synchronizer alive until `close`.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::core::controls::TransportControls;
use crate::core::error_handling::SessionError;
use crate::core::manager::{DownloadManager, DownloadTask};
use crate::core::models::{DerivedUiState, DownloadProgress, DownloadState, PlaybackConfig};
use crate::core::player::{Player, PlayerFactory};
use crate::core::synchronizer::{PlaybackSynchronizer, SyncConfig};

pub struct VideoSession {
    manager: DownloadManager,
    task: DownloadTask,
    synchronizer: Option<PlaybackSynchronizer>,
    controls: Option<TransportControls>,
}

impl VideoSession {
    pub fn begin(manager: &DownloadManager, source_url: &str, cache_dir: &Path) -> Self {
        let task = manager.start_cached(source_url, cache_dir);
        info!("🎬 Session for {} ({:?})", source_url, task.state());
        Self {
            manager: manager.clone(),
            task,
            synchronizer: None,
            controls: None,
        }
    }

    pub fn task(&self) -> &DownloadTask {
        &self.task
    }

    pub fn download_state(&self) -> DownloadState {
        self.task.state()
    }

    pub fn download_progress(&self) -> DownloadProgress {
        self.task.progress()
    }

    /// Start a fresh download after a failure; returns false otherwise
    pub fn retry(&mut self) -> bool {
        if self.task.state() != DownloadState::Failed {
            return false;
        }
        let url = self.task.source_url();
        self.task = self.manager.start(&url, self.task.destination());
        true
    }

    /// Wait for the download, then build and attach the player.
    ///
    /// Calling it again returns the controls of the already attached player.
    pub async fn ready(
        &mut self,
        factory: &dyn PlayerFactory,
        config: &PlaybackConfig,
    ) -> Result<TransportControls, SessionError> {
        if let Some(controls) = &self.controls {
            return Ok(controls.clone());
        }

        let path = self.task.result().await.into_result()?;
        let player: Arc<dyn Player> = factory.create(&path)?;
        let synchronizer = PlaybackSynchronizer::attach(player.clone(), SyncConfig::from(config));
        let controls = TransportControls::new(player, synchronizer.subscribe(), config.seek_step());

        self.synchronizer = Some(synchronizer);
        self.controls = Some(controls.clone());
        Ok(controls)
    }

    pub fn synchronizer(&self) -> Option<&PlaybackSynchronizer> {
        self.synchronizer.as_ref()
    }

    pub fn ui_state(&self) -> Option<DerivedUiState> {
        self.synchronizer.as_ref().map(|sync| sync.state())
    }

    /// Tear down playback; the cached file stays on disk
    pub async fn close(mut self) {
        self.controls = None;
        if let Some(synchronizer) = self.synchronizer.take() {
            synchronizer.close().await;
        }
        info!("Session closed: {:?}", self.task.destination());
    }
}
