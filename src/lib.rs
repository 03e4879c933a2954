//! Video Cache Player - Core Library
//!
//! Downloads a remote video once into a local cache (resumable, with progress)
//! and keeps UI-facing playback state in sync with an externally owned player.

pub mod core;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    config::AppConfig,
    controls::TransportControls,
    error_handling::{PlaybackError, SessionError, TransferError},
    manager::{DownloadManager, DownloadTask, TaskSnapshot},
    models::{
        AutoplayPolicy, DerivedUiState, DownloadConfig, DownloadOutcome, DownloadProgress,
        DownloadState, PlaybackConfig, Readiness,
    },
    player::{Player, PlayerEvent, PlayerFactory},
    session::VideoSession,
    synchronizer::{PlaybackSynchronizer, SyncConfig},
    transport::{HttpTransport, ResumableTransport},
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize the library with default settings
pub fn init() -> anyhow::Result<()> {
    // 初始化日志系统（重复初始化会被忽略）
    utils::logging::init_tracing();
    tracing::info!("📚 {} v{} initialized", NAME, VERSION);
    Ok(())
}

/// Initialize logging from the `advanced` section of a loaded configuration
pub fn init_with_config(config: &AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    utils::logging::init_tracing_with(
        &config.log_directive(),
        config.advanced.enable_file_logging,
    );
    tracing::info!(
        "📚 {} v{} initialized (log level {})",
        NAME,
        VERSION,
        config.advanced.log_level
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        assert!(init().is_ok());
        assert!(init_with_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert!(!NAME.is_empty());
    }
}
