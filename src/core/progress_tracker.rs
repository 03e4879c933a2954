//! Progress tracking and speed statistics for a single transfer
//!
//! The tracker only moves forward: byte counts are accumulated from deltas, so
//! every `DownloadProgress` it hands out is non-decreasing.

use std::time::{Duration, Instant};

use crate::core::models::DownloadProgress;

/// Exponential moving average weight of the newest speed sample
const DEFAULT_EMA_ALPHA: f64 = 0.3;

/// Samples closer together than this are folded into the next one
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct ProgressTracker {
    bytes_written: u64,
    bytes_expected: Option<u64>,
    start_offset: u64,
    started_at: Instant,
    last_sample_at: Instant,
    last_sample_bytes: u64,
    smoothed_speed: f64,
    ema_alpha: f64,
}

impl ProgressTracker {
    /// Start tracking at `offset` bytes already on disk
    pub fn new(offset: u64, bytes_expected: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            bytes_written: offset,
            bytes_expected,
            start_offset: offset,
            started_at: now,
            last_sample_at: now,
            last_sample_bytes: offset,
            smoothed_speed: 0.0,
            ema_alpha: DEFAULT_EMA_ALPHA,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn bytes_expected(&self) -> Option<u64> {
        self.bytes_expected
    }

    /// Record `delta` freshly written bytes
    pub fn advance(&mut self, delta: u64) -> DownloadProgress {
        self.bytes_written = self.bytes_written.saturating_add(delta);
        self.sample_speed();
        self.snapshot()
    }

    /// Pin the expected size to what was actually received
    pub fn finish(&mut self) -> DownloadProgress {
        self.bytes_expected = Some(self.bytes_written);
        let mut progress = self.snapshot();
        progress.eta_seconds = Some(0);
        progress
    }

    pub fn average_speed(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.bytes_written - self.start_offset) as f64 / elapsed
    }

    pub fn snapshot(&self) -> DownloadProgress {
        DownloadProgress {
            bytes_written: self.bytes_written,
            bytes_expected: self.bytes_expected,
            speed: self.smoothed_speed,
            eta_seconds: self.eta_seconds(),
        }
    }

    fn eta_seconds(&self) -> Option<u64> {
        let expected = self.bytes_expected?;
        let remaining = expected.saturating_sub(self.bytes_written);
        if remaining == 0 {
            return Some(0);
        }
        if self.smoothed_speed <= f64::EPSILON {
            return None;
        }
        Some((remaining as f64 / self.smoothed_speed).ceil() as u64)
    }

    fn sample_speed(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_sample_at);
        if elapsed < MIN_SAMPLE_INTERVAL {
            return;
        }

        let bytes = self.bytes_written - self.last_sample_bytes;
        let instant_speed = bytes as f64 / elapsed.as_secs_f64();
        self.smoothed_speed = if self.smoothed_speed == 0.0 {
            instant_speed
        } else {
            self.ema_alpha * instant_speed + (1.0 - self.ema_alpha) * self.smoothed_speed
        };

        self.last_sample_at = now;
        self.last_sample_bytes = self.bytes_written;
    }
}
