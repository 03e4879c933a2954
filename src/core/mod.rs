//! Core business logic module
//!
//! This module contains the download manager, the playback synchronizer and
//! the domain models they share.

pub mod config;
pub mod controls;
pub mod error_handling;
pub mod manager;
pub mod models;
pub mod player;
pub mod progress_tracker;
pub mod resume_downloader;
pub mod session;
pub mod synchronizer;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;



// Re-export commonly used types
pub use config::AppConfig;
pub use manager::{DownloadManager, DownloadTask};
pub use session::VideoSession;
pub use synchronizer::PlaybackSynchronizer;
