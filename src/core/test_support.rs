//! In-memory transport and player doubles shared by unit and integration tests

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::core::error_handling::{PlaybackError, TransferError};
use crate::core::models::Readiness;
use crate::core::player::{Player, PlayerEvent};
use crate::core::transport::{ResourceProbe, ResumableTransport, TransferBody};

/// Serves a fixed payload, optionally failing once part way through
pub struct MemoryTransport {
    data: Bytes,
    supports_ranges: bool,
    honours_ranges: bool,
    range_shift: u64,
    probe_hides_length: bool,
    chunk_size: usize,
    announced_length: Option<u64>,
    fail_after: Option<usize>,
    failed: AtomicBool,
    chunk_delay: Option<Duration>,
    fetch_offsets: Mutex<Vec<u64>>,
    probes: AtomicUsize,
}

impl MemoryTransport {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            supports_ranges: true,
            honours_ranges: true,
            range_shift: 0,
            probe_hides_length: false,
            chunk_size: 16,
            announced_length: None,
            fail_after: None,
            failed: AtomicBool::new(false),
            chunk_delay: None,
            fetch_offsets: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The first fetch yields a network error after `bytes` bytes
    pub fn fail_once_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    pub fn without_ranges(mut self) -> Self {
        self.supports_ranges = false;
        self
    }

    /// Advertise ranges in the probe but answer every fetch from byte 0
    pub fn ignores_range_requests(mut self) -> Self {
        self.honours_ranges = false;
        self
    }

    /// Answer ranged fetches starting `shift` bytes before the requested offset
    pub fn shifting_range_start(mut self, shift: u64) -> Self {
        self.range_shift = shift;
        self
    }

    /// Probe without a content length
    pub fn hiding_length_in_probe(mut self) -> Self {
        self.probe_hides_length = true;
        self
    }

    /// Announce a length different from the payload size
    pub fn announcing_length(mut self, length: u64) -> Self {
        self.announced_length = Some(length);
        self
    }

    /// Sleep before every chunk
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn fetch_offsets(&self) -> Vec<u64> {
        self.fetch_offsets.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_offsets.lock().len()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn total_size(&self) -> u64 {
        self.announced_length.unwrap_or(self.data.len() as u64)
    }
}

#[async_trait]
impl ResumableTransport for MemoryTransport {
    async fn probe(&self, _url: &Url) -> Result<ResourceProbe, TransferError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(ResourceProbe {
            content_length: (!self.probe_hides_length).then(|| self.total_size()),
            supports_ranges: self.supports_ranges,
        })
    }

    async fn fetch(&self, _url: &Url, offset: u64) -> Result<TransferBody, TransferError> {
        self.fetch_offsets.lock().push(offset);

        let ranged = self.supports_ranges && self.honours_ranges;
        if ranged && offset > 0 && offset >= self.total_size() {
            // what a 416 with a matching total turns into
            return Ok(TransferBody::complete(self.total_size()));
        }

        let start = if ranged {
            (offset.saturating_sub(self.range_shift) as usize).min(self.data.len())
        } else {
            0
        };
        let remaining = self.data.slice(start..);

        let fail_at = match self.fail_after {
            Some(bytes) if !self.failed.swap(true, Ordering::SeqCst) => Some(bytes),
            _ => None,
        };

        let mut items = Vec::new();
        let mut sent = 0usize;
        for chunk in remaining.chunks(self.chunk_size) {
            if let Some(limit) = fail_at {
                if sent >= limit {
                    break;
                }
                let take = chunk.len().min(limit - sent);
                items.push(Ok(Bytes::copy_from_slice(&chunk[..take])));
                sent += take;
                continue;
            }
            items.push(Ok(Bytes::copy_from_slice(chunk)));
        }
        if fail_at.is_some() {
            items.push(Err(TransferError::Network {
                message: "connection reset".to_string(),
            }));
        }

        let delay = self.chunk_delay;
        let stream = futures::stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed();

        Ok(TransferBody {
            offset: start as u64,
            total_size: Some(self.total_size()),
            stream,
        })
    }
}

#[derive(Debug, Default)]
struct FakePlayerState {
    current_time: Duration,
    duration: Option<Duration>,
    playing: bool,
    status: Readiness,
}

/// Scriptable player: tests drive readiness and position by hand
#[derive(Default)]
pub struct FakePlayer {
    state: Mutex<FakePlayerState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PlayerEvent>>>,
    backlog: Mutex<Vec<PlayerEvent>>,
    play_calls: AtomicUsize,
    pause_calls: AtomicUsize,
    fullscreen_calls: AtomicUsize,
}

impl FakePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(status: Readiness, duration: Option<Duration>) -> Self {
        let player = Self::new();
        {
            let mut state = player.state.lock();
            state.status = status;
            state.duration = duration;
        }
        player
    }

    /// Events every new subscription starts with, as if emitted just before
    /// the subscriber read the player's state
    pub fn queue_on_subscribe(&self, events: Vec<PlayerEvent>) {
        *self.backlog.lock() = events;
    }

    pub fn emit(&self, event: PlayerEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Change readiness and notify subscribers
    pub fn set_status(&self, status: Readiness) {
        self.state.lock().status = status;
        self.emit(PlayerEvent::status(status));
    }

    pub fn fail(&self, error: PlaybackError) {
        {
            let mut state = self.state.lock();
            state.status = Readiness::Error;
            state.playing = false;
        }
        self.emit(PlayerEvent::error(error));
    }

    /// Move the playhead without notifying, as real playback does
    pub fn set_position(&self, position: Duration) {
        self.state.lock().current_time = position;
    }

    pub fn set_duration(&self, duration: Option<Duration>) {
        self.state.lock().duration = duration;
    }

    pub fn play_calls(&self) -> usize {
        self.play_calls.load(Ordering::SeqCst)
    }

    pub fn pause_calls(&self) -> usize {
        self.pause_calls.load(Ordering::SeqCst)
    }

    pub fn fullscreen_calls(&self) -> usize {
        self.fullscreen_calls.load(Ordering::SeqCst)
    }

    /// Subscribers whose receiver is still alive
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    fn set_playing(&self, playing: bool) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.playing != playing;
            state.playing = playing;
            changed
        };
        if changed {
            self.emit(PlayerEvent::PlayingChanged(playing));
        }
    }
}

impl Player for FakePlayer {
    fn play(&self) {
        self.play_calls.fetch_add(1, Ordering::SeqCst);
        self.set_playing(true);
    }

    fn pause(&self) {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        self.set_playing(false);
    }

    fn current_time(&self) -> Duration {
        self.state.lock().current_time
    }

    fn set_current_time(&self, position: Duration) {
        self.state.lock().current_time = position;
    }

    fn duration(&self) -> Option<Duration> {
        self.state.lock().duration
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn status(&self) -> Readiness {
        self.state.lock().status
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<PlayerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in self.backlog.lock().iter() {
            let _ = tx.send(event.clone());
        }
        self.subscribers.lock().push(tx);
        rx
    }

    fn enter_fullscreen(&self) {
        self.fullscreen_calls.fetch_add(1, Ordering::SeqCst);
    }
}
