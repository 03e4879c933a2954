//! Download Manager - task registry and lifecycle for cached media downloads
//!
//! The manager owns at most one in-flight transfer per destination path. A
//! task handle is a cheap clone over shared state; its snapshot is published
//! through a `watch` channel and progress is fanned out to callbacks.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::error_handling::TransferError;
use crate::core::models::{DownloadConfig, DownloadOutcome, DownloadProgress, DownloadState};
use crate::core::resume_downloader::{CancelSignal, ResumeDownloader, ResumeDownloaderConfig};
use crate::core::transport::{HttpTransport, ResumableTransport};
use crate::utils::file_utils::cache_destination;
use crate::utils::validation::validate_url;

pub type ProgressCallback = Arc<dyn Fn(&DownloadProgress) + Send + Sync>;

/// Point-in-time view of a task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub id: String,
    pub source_url: String,
    pub destination: PathBuf,
    pub state: DownloadState,
    pub progress: DownloadProgress,
    pub error: Option<TransferError>,
    pub updated_at: DateTime<Utc>,
}

impl TaskSnapshot {
    /// `None` while the task is still running
    pub fn outcome(&self) -> Option<DownloadOutcome> {
        match self.state {
            DownloadState::Finished => Some(DownloadOutcome::Finished(self.destination.clone())),
            DownloadState::Failed => Some(DownloadOutcome::Failed(
                self.error.clone().unwrap_or(TransferError::Cancelled),
            )),
            DownloadState::NotStarted | DownloadState::Downloading => None,
        }
    }
}

struct TaskShared {
    snapshot: watch::Sender<TaskSnapshot>,
    /// Also serializes progress publication against callback registration
    callbacks: Mutex<Vec<ProgressCallback>>,
    cancel: watch::Sender<bool>,
}

/// Handle to one download task
#[derive(Clone)]
pub struct DownloadTask {
    shared: Arc<TaskShared>,
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DownloadTask").field(&self.snapshot()).finish()
    }
}

impl DownloadTask {
    fn new(source_url: &str, destination: PathBuf) -> Self {
        let snapshot = TaskSnapshot {
            id: Uuid::new_v4().to_string(),
            source_url: source_url.to_string(),
            destination,
            state: DownloadState::NotStarted,
            progress: DownloadProgress::default(),
            error: None,
            updated_at: Utc::now(),
        };
        let (tx, _rx) = watch::channel(snapshot);
        Self {
            shared: Arc::new(TaskShared {
                snapshot: tx,
                callbacks: Mutex::new(Vec::new()),
                cancel: watch::channel(false).0,
            }),
        }
    }

    pub fn id(&self) -> String {
        self.shared.snapshot.borrow().id.clone()
    }

    pub fn source_url(&self) -> String {
        self.shared.snapshot.borrow().source_url.clone()
    }

    pub fn destination(&self) -> PathBuf {
        self.shared.snapshot.borrow().destination.clone()
    }

    pub fn state(&self) -> DownloadState {
        self.shared.snapshot.borrow().state
    }

    pub fn progress(&self) -> DownloadProgress {
        self.shared.snapshot.borrow().progress
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Register a progress callback.
    ///
    /// The callback is called right away with the current progress, then
    /// with every later report, so a task that already finished still
    /// delivers its final `bytes_written == bytes_expected`. Reports of one
    /// task are delivered sequentially. The callback must not register
    /// further callbacks on the same task.
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(&DownloadProgress) + Send + Sync + 'static,
    {
        let mut callbacks = self.shared.callbacks.lock();
        let current = self.progress();
        callback(&current);
        callbacks.push(Arc::new(callback));
    }

    /// Watch every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Resolves once the task is `Finished` or `Failed`
    pub async fn result(&self) -> DownloadOutcome {
        let mut rx = self.shared.snapshot.subscribe();
        let outcome = match rx.wait_for(|s| s.state.is_terminal()).await {
            Ok(snapshot) => snapshot.outcome(),
            Err(_) => self.snapshot().outcome(),
        };
        outcome.unwrap_or(DownloadOutcome::Failed(TransferError::Cancelled))
    }

    /// Request cancellation; returns false when the task already ended
    pub fn cancel(&self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.shared.cancel.send_replace(true);
        info!("🚫 Cancel requested: {:?}", self.destination());
        true
    }

    fn cancel_signal(&self) -> CancelSignal {
        CancelSignal::new(self.shared.cancel.subscribe())
    }

    fn transition(&self, next: DownloadState, error: Option<TransferError>) -> bool {
        let applied = self.shared.snapshot.send_if_modified(|snapshot| {
            if !snapshot.state.can_transition_to(next) {
                return false;
            }
            snapshot.state = next;
            snapshot.error = error;
            snapshot.updated_at = Utc::now();
            true
        });
        if !applied {
            warn!(
                "Ignoring illegal transition {:?} -> {:?} for {:?}",
                self.state(),
                next,
                self.destination()
            );
        }
        applied
    }

    fn fail(&self, error: TransferError) {
        self.transition(DownloadState::Failed, Some(error));
    }

    fn report_progress(&self, progress: DownloadProgress) {
        let callbacks = {
            let callbacks = self.shared.callbacks.lock();
            let accepted = self.shared.snapshot.send_if_modified(|snapshot| {
                if progress.bytes_written < snapshot.progress.bytes_written {
                    return false;
                }
                snapshot.progress = progress;
                snapshot.updated_at = Utc::now();
                true
            });
            if !accepted {
                debug!("Dropping stale progress report {:?}", progress);
                return;
            }
            callbacks.clone()
        };

        for callback in callbacks {
            callback(&progress);
        }
    }
}

/// Main download manager
#[derive(Clone)]
pub struct DownloadManager {
    config: DownloadConfig,
    downloader: Arc<ResumeDownloader>,
    tasks: Arc<DashMap<PathBuf, DownloadTask>>,
}

impl DownloadManager {
    /// Create a manager downloading over HTTP
    pub fn new(config: DownloadConfig) -> Result<Self, TransferError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: DownloadConfig, transport: Arc<dyn ResumableTransport>) -> Self {
        let downloader = ResumeDownloader::new(ResumeDownloaderConfig::from(&config), transport);
        info!(
            "🚀 Download manager ready (resume: {}, reuse cached: {})",
            config.resume_enabled, config.reuse_cached_files
        );
        Self {
            config,
            downloader: Arc::new(downloader),
            tasks: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Start, join, or short-circuit the download of `source_url` into `destination`.
    ///
    /// Must be called within a tokio runtime. While a task for the same
    /// destination is still running its handle is returned unchanged; a
    /// finished or failed earlier task is replaced by a fresh one.
    pub fn start(&self, source_url: &str, destination: impl Into<PathBuf>) -> DownloadTask {
        let destination = destination.into();
        if let Some(task) = self.in_flight(&destination) {
            debug!("Joining in-flight download for {:?}", destination);
            return task;
        }

        // stat outside the registry lock
        let cached_len = self.cached_len(&destination);

        match self.tasks.entry(destination.clone()) {
            Entry::Occupied(entry) if !entry.get().state().is_terminal() => {
                debug!("Joining in-flight download for {:?}", destination);
                entry.get().clone()
            }
            Entry::Occupied(mut entry) => {
                let task = DownloadTask::new(source_url, destination);
                self.launch(&task, cached_len);
                entry.insert(task.clone());
                task
            }
            Entry::Vacant(entry) => {
                let task = DownloadTask::new(source_url, destination);
                self.launch(&task, cached_len);
                entry.insert(task.clone());
                task
            }
        }
    }

    fn in_flight(&self, destination: &Path) -> Option<DownloadTask> {
        self.task(destination)
            .filter(|task| !task.state().is_terminal())
    }

    /// Length of a complete earlier download at `destination`, if reuse is on
    fn cached_len(&self, destination: &Path) -> Option<u64> {
        if !self.config.reuse_cached_files {
            return None;
        }
        std::fs::metadata(destination)
            .ok()
            .filter(|metadata| metadata.is_file())
            .map(|metadata| metadata.len())
    }

    /// `start` into the deterministic cache path of `source_url`
    pub fn start_cached(&self, source_url: &str, cache_dir: &Path) -> DownloadTask {
        self.start(source_url, cache_destination(cache_dir, source_url))
    }

    pub fn task(&self, destination: &Path) -> Option<DownloadTask> {
        self.tasks.get(destination).map(|entry| entry.value().clone())
    }

    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(|entry| entry.value().snapshot()).collect()
    }

    /// Tasks that are not yet terminal
    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| !entry.value().state().is_terminal())
            .count()
    }

    pub fn cancel(&self, destination: &Path) -> bool {
        self.task(destination).is_some_and(|task| task.cancel())
    }

    pub fn cancel_all(&self) -> usize {
        let cancelled = self
            .tasks
            .iter()
            .filter(|entry| entry.value().cancel())
            .count();
        info!("Cancelled {} downloads", cancelled);
        cancelled
    }

    /// Forget finished tasks; the cached files stay on disk
    pub fn clear_completed(&self) -> usize {
        let before = self.tasks.len();
        self.tasks
            .retain(|_, task| task.state() != DownloadState::Finished);
        let removed = before.saturating_sub(self.tasks.len());
        info!("🧹 Cleared {} completed tasks", removed);
        removed
    }

    /// Delete the part file and resume record of an inactive destination
    pub async fn discard_partial(&self, destination: &Path) -> bool {
        if self
            .task(destination)
            .is_some_and(|task| !task.state().is_terminal())
        {
            warn!("Refusing to discard partial data of active download {:?}", destination);
            return false;
        }
        self.downloader.cleanup(destination).await;
        true
    }

    fn launch(&self, task: &DownloadTask, cached_len: Option<u64>) {
        let destination = task.destination();

        let url = match validate_url(&task.source_url()) {
            Ok(url) => url,
            Err(err) => {
                warn!("Rejecting download into {:?}: {}", destination, err);
                task.fail(err);
                return;
            }
        };

        if let Some(len) = cached_len {
            info!("📦 Cache hit: {:?}", destination);
            task.report_progress(DownloadProgress::new(len, Some(len)));
            task.transition(DownloadState::Finished, None);
            return;
        }

        task.transition(DownloadState::Downloading, None);
        info!("🔄 Started download: {} -> {:?}", url, destination);

        let downloader = self.downloader.clone();
        let task = task.clone();
        let cancel = task.cancel_signal();
        tokio::spawn(async move {
            let reporter = task.clone();
            let result = downloader
                .download(
                    &url,
                    &destination,
                    &move |progress| reporter.report_progress(progress),
                    &cancel,
                )
                .await;

            match result {
                Ok(path) => {
                    info!("✅ Download completed: {:?}", path);
                    task.transition(DownloadState::Finished, None);
                }
                Err(err) if err.is_cancelled() => {
                    info!("🚫 Download cancelled: {:?}", destination);
                    task.fail(err);
                }
                Err(err) => {
                    error!("❌ Download failed: {:?}: {}", destination, err);
                    task.fail(err);
                }
            }
        });
    }
}
