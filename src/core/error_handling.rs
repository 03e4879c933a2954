//! Error taxonomy for transfers and playback
//!
//! Transfer errors are captured at the download manager boundary and surfaced
//! as a terminal `Failed` state; playback errors travel through the player's
//! readiness notifications. Neither is fatal to the process.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

/// Coarse error categories, mostly for logging and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// DNS, connection, timeout, body stream errors
    Network,
    /// Unexpected HTTP status or malformed response
    Protocol,
    /// Generic file system IO
    FileSystem,
    /// The cache location is not writable
    Permission,
    /// No space left on the device
    DiskFull,
    /// Invalid caller input
    Input,
    /// Caller cancelled the transfer
    Cancelled,
}

/// Failure of a single transfer
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Server responded with HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("File system error at {path}: {message}")]
    FileSystem { path: String, message: String },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Disk full while writing {path}")]
    DiskFull { path: String },

    #[error("Invalid source URL: {message}")]
    InvalidUrl { message: String },

    #[error("Received {actual} bytes, server announced {expected}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("No data received for {seconds} s")]
    Stalled { seconds: u64 },

    #[error("Download cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } | Self::Stalled { .. } => ErrorCategory::Network,
            Self::HttpStatus { .. } | Self::LengthMismatch { .. } => ErrorCategory::Protocol,
            Self::FileSystem { .. } => ErrorCategory::FileSystem,
            Self::PermissionDenied { .. } => ErrorCategory::Permission,
            Self::DiskFull { .. } => ErrorCategory::DiskFull,
            Self::InvalidUrl { .. } => ErrorCategory::Input,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Classify an IO error raised while touching `path`
    pub fn from_io(err: &io::Error, path: &Path) -> Self {
        let path = path.display().to_string();

        if err.kind() == io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied { path };
        }

        // ENOSPC on unix, ERROR_DISK_FULL / ERROR_HANDLE_DISK_FULL on windows
        if err.kind() == io::ErrorKind::StorageFull
            || err.raw_os_error().is_some_and(is_disk_full_code)
        {
            return Self::DiskFull { path };
        }

        Self::FileSystem {
            path,
            message: err.to_string(),
        }
    }

    /// Closure adapter for `map_err`
    pub fn io_at(path: &Path) -> impl Fn(io::Error) -> Self + '_ {
        move |err| Self::from_io(&err, path)
    }
}

#[cfg(windows)]
const DISK_FULL_OS_CODE: i32 = 112;
#[cfg(not(windows))]
const DISK_FULL_OS_CODE: i32 = 28;

fn is_disk_full_code(code: i32) -> bool {
    code == DISK_FULL_OS_CODE || (cfg!(windows) && code == 39)
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::HttpStatus {
                status: status.as_u16(),
            },
            None => Self::Network {
                message: err.to_string(),
            },
        }
    }
}

/// Failure reported by, or while building, a player
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackError {
    #[error("Player failed to load media: {message}")]
    LoadFailed { message: String },

    #[error("Player construction failed: {message}")]
    Construction { message: String },
}

/// Error of the download-then-play session flow
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}
