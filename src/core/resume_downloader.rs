//! 断点续传下载器
//!
//! One transfer of one resource into one destination:
//! - bytes go to `<dest>.part`, never to the destination itself
//! - a JSON resume record `<dest>.part.json` tracks how far the part got
//! - on restart the transfer continues from the recorded offset when the
//!   server honours ranges, otherwise the part is truncated and rewritten
//! - only a complete part is renamed onto the destination

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::watch;
use url::Url;

use crate::core::error_handling::TransferError;
use crate::core::models::{DownloadConfig, DownloadProgress};
use crate::core::progress_tracker::ProgressTracker;
use crate::core::transport::{ResourceProbe, ResumableTransport, TransferBody};
use crate::utils::file_utils::{part_path, resume_info_path};

/// Resume record persisted next to the part file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeInfo {
    pub source_url: String,
    pub destination: String,
    /// Size announced by the server when the part was started
    pub total_size: Option<u64>,
    /// Bytes flushed to the part file at the last checkpoint
    pub bytes_written: u64,
    pub supports_ranges: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResumeInfo {
    pub fn new(source_url: &Url, destination: &Path, probe: &ResourceProbe) -> Self {
        let now = Utc::now();
        Self {
            source_url: source_url.to_string(),
            destination: destination.to_string_lossy().to_string(),
            total_size: probe.content_length,
            bytes_written: 0,
            supports_ranges: probe.supports_ranges,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a part described by this record can be continued for `url`
    pub fn matches(&self, url: &Url, probe: &ResourceProbe) -> bool {
        if self.source_url != url.as_str() {
            return false;
        }
        match (self.total_size, probe.content_length) {
            (Some(recorded), Some(current)) => recorded == current,
            _ => true,
        }
    }

    /// 计算下载进度 (0.0 - 1.0)
    pub fn progress(&self) -> f64 {
        DownloadProgress::new(self.bytes_written, self.total_size).progress()
    }
}

/// Cancellation signal of one transfer, observed at every await point
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if it never can be
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// 断点续传下载器配置
#[derive(Debug, Clone)]
pub struct ResumeDownloaderConfig {
    /// 是否启用断点续传
    pub resume_enabled: bool,
    /// Bytes between resume-record checkpoints
    pub checkpoint_bytes: u64,
    /// Longest wait for a response or the next chunk before giving up
    pub stall_timeout: Duration,
}

impl Default for ResumeDownloaderConfig {
    fn default() -> Self {
        Self {
            resume_enabled: true,
            checkpoint_bytes: 1024 * 1024,
            stall_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&DownloadConfig> for ResumeDownloaderConfig {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            resume_enabled: config.resume_enabled,
            checkpoint_bytes: config.checkpoint_bytes.max(1),
            stall_timeout: Duration::from_secs(config.timeout_seconds.max(1)),
        }
    }
}

pub struct ResumeDownloader {
    config: ResumeDownloaderConfig,
    transport: Arc<dyn ResumableTransport>,
}

impl ResumeDownloader {
    pub fn new(config: ResumeDownloaderConfig, transport: Arc<dyn ResumableTransport>) -> Self {
        Self { config, transport }
    }

    /// 开始或恢复下载
    ///
    /// `on_progress` is called after every written chunk with a non-decreasing
    /// byte count, and once more with `bytes_written == bytes_expected` right
    /// before the part is promoted.
    pub async fn download(
        &self,
        url: &Url,
        destination: &Path,
        on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
        cancel: &CancelSignal,
    ) -> Result<PathBuf, TransferError> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(TransferError::io_at(parent))?;
            }
        }

        let part = part_path(destination);
        let probe = self.guarded(cancel, self.transport.probe(url)).await?;

        let mut info = self.load_resume_info(destination).await;
        let resume_from = self.resume_offset(url, &part, &probe, info.as_ref()).await;
        if resume_from == 0 {
            info = None;
        }
        let mut info = info.unwrap_or_else(|| ResumeInfo::new(url, destination, &probe));

        let body = if probe.content_length == Some(resume_from) && resume_from > 0 {
            tracing::info!("Part file already complete: {:?}", part);
            TransferBody::complete(resume_from)
        } else {
            self.guarded(cancel, self.transport.fetch(url, resume_from))
                .await?
        };

        let body = if body.offset != resume_from && body.offset != 0 {
            tracing::warn!(
                "Server answered range {} with offset {}, refetching {} from start",
                resume_from,
                body.offset,
                url
            );
            self.guarded(cancel, self.transport.fetch(url, 0)).await?
        } else {
            body
        };
        if resume_from > 0 && body.offset != resume_from {
            tracing::warn!(
                "Server ignored range request for {} (wanted {}), restarting",
                url,
                resume_from
            );
        }
        let offset = if body.offset == resume_from { resume_from } else { 0 };
        let expected = body.total_size.or(probe.content_length);

        info.total_size = expected;
        info.supports_ranges = probe.supports_ranges;
        info.bytes_written = offset;

        let mut file = open_part_file(&part, offset).await?;
        let mut tracker = ProgressTracker::new(offset, expected);
        on_progress(tracker.snapshot());

        tracing::info!(
            "Transfer {} -> {:?} from offset {} (expected {:?})",
            url,
            destination,
            offset,
            expected
        );

        let mut stream = body.stream;
        let mut since_checkpoint = 0u64;
        let streamed: Result<(), TransferError> = async {
            loop {
                let next = self.guarded(cancel, async { Ok(stream.next().await) }).await?;
                let Some(chunk) = next else {
                    break;
                };
                let chunk = chunk?;
                file.write_all(&chunk).await.map_err(TransferError::io_at(&part))?;

                let progress = tracker.advance(chunk.len() as u64);
                if let Some(expected) = expected {
                    if progress.bytes_written > expected {
                        return Err(TransferError::LengthMismatch {
                            expected,
                            actual: progress.bytes_written,
                        });
                    }
                }
                on_progress(progress);

                since_checkpoint += chunk.len() as u64;
                if since_checkpoint >= self.config.checkpoint_bytes {
                    since_checkpoint = 0;
                    file.flush().await.map_err(TransferError::io_at(&part))?;
                    info.bytes_written = tracker.bytes_written();
                    self.save_resume_info(destination, &mut info).await;
                }
            }
            check_cancelled(cancel)
        }
        .await;

        let flushed = flush_part(&mut file, &part).await;
        drop(file);

        if let Err(err) = streamed.and(flushed) {
            // 保存当前进度，保证后续能继续
            info.bytes_written = tracker.bytes_written();
            self.save_resume_info(destination, &mut info).await;
            return Err(err);
        }

        let written = tracker.bytes_written();
        if let Some(expected) = expected {
            if written != expected {
                info.bytes_written = written;
                self.save_resume_info(destination, &mut info).await;
                return Err(TransferError::LengthMismatch {
                    expected,
                    actual: written,
                });
            }
        }
        on_progress(tracker.finish());

        tokio::fs::rename(&part, destination)
            .await
            .map_err(TransferError::io_at(destination))?;
        if let Err(err) = tokio::fs::remove_file(resume_info_path(destination)).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove resume record for {:?}: {}", destination, err);
            }
        }

        tracing::info!(
            "Transfer complete: {:?} ({} bytes, avg {:.0} B/s)",
            destination,
            written,
            tracker.average_speed()
        );
        Ok(destination.to_path_buf())
    }

    /// Await `fut` unless cancellation fires first or it stalls past the timeout
    async fn guarded<T>(
        &self,
        cancel: &CancelSignal,
        fut: impl Future<Output = Result<T, TransferError>>,
    ) -> Result<T, TransferError> {
        check_cancelled(cancel)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = tokio::time::timeout(self.config.stall_timeout, fut) => match result {
                Ok(result) => result,
                Err(_) => Err(TransferError::Stalled {
                    seconds: self.config.stall_timeout.as_secs(),
                }),
            },
        }
    }

    /// Offset to continue from, truncating nothing; 0 means start over
    async fn resume_offset(
        &self,
        url: &Url,
        part: &Path,
        probe: &ResourceProbe,
        info: Option<&ResumeInfo>,
    ) -> u64 {
        if !self.config.resume_enabled || !probe.supports_ranges {
            return 0;
        }
        let Some(info) = info else {
            return 0;
        };
        if !info.matches(url, probe) {
            tracing::info!("Resume record for {:?} is stale, restarting", part);
            return 0;
        }

        let part_len = match tokio::fs::metadata(part).await {
            Ok(metadata) => metadata.len(),
            Err(_) => return 0,
        };

        let mut offset = part_len.min(info.bytes_written);
        if let Some(total) = probe.content_length {
            offset = offset.min(total);
        }
        if offset > 0 {
            tracing::info!(
                "Resuming {} at byte {} ({:.1}%)",
                url,
                offset,
                info.progress() * 100.0
            );
        }
        offset
    }

    /// 加载断点续传信息
    pub async fn load_resume_info(&self, destination: &Path) -> Option<ResumeInfo> {
        let path = resume_info_path(destination);
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<ResumeInfo>(&content) {
            Ok(info) => Some(info),
            Err(err) => {
                tracing::warn!("解析断点续传信息失败 {:?}: {}", path, err);
                None
            }
        }
    }

    /// 保存断点续传信息 (best effort; a missing record only costs a restart)
    async fn save_resume_info(&self, destination: &Path, info: &mut ResumeInfo) {
        info.updated_at = Utc::now();
        let path = resume_info_path(destination);
        let result = match serde_json::to_string_pretty(info) {
            Ok(content) => tokio::fs::write(&path, content)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(err) = result {
            tracing::warn!("Failed to save resume record {:?}: {}", path, err);
        }
    }

    /// 清理任务的临时文件和断点信息
    pub async fn cleanup(&self, destination: &Path) {
        for path in [part_path(destination), resume_info_path(destination)] {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove {:?}: {}", path, err);
                }
            }
        }
    }
}

fn check_cancelled(cancel: &CancelSignal) -> Result<(), TransferError> {
    if cancel.is_cancelled() {
        Err(TransferError::Cancelled)
    } else {
        Ok(())
    }
}

/// 打开分片文件，截断到 `offset` 并定位到末尾
async fn open_part_file(path: &Path, offset: u64) -> Result<File, TransferError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(TransferError::io_at(path))?;

    file.set_len(offset).await.map_err(TransferError::io_at(path))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(TransferError::io_at(path))?;
    Ok(file)
}

async fn flush_part(file: &mut File, path: &Path) -> Result<(), TransferError> {
    file.flush().await.map_err(TransferError::io_at(path))?;
    file.sync_all().await.map_err(TransferError::io_at(path))
}
