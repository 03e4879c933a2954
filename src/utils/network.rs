//! Network utilities and helpers

use reqwest::Client;
use std::time::Duration;

use crate::core::error_handling::TransferError;
use crate::core::models::DownloadConfig;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Get user agent string
pub fn get_user_agent() -> &'static str {
    concat!("VideoCachePlayer/", env!("CARGO_PKG_VERSION"))
}

/// Build the shared HTTP client from download settings.
///
/// Only connecting is bounded here. A body may take arbitrarily long as long
/// as it keeps flowing; stalls are detected per await by the downloader.
pub fn build_client(config: &DownloadConfig) -> Result<Client, TransferError> {
    let connect_timeout = if config.connect_timeout_seconds == 0 {
        DEFAULT_CONNECT_TIMEOUT
    } else {
        Duration::from_secs(config.connect_timeout_seconds)
    };

    let user_agent = if config.user_agent.is_empty() {
        get_user_agent().to_string()
    } else {
        config.user_agent.clone()
    };

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in &config.headers {
        match (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("Ignoring invalid header from config: {}", name),
        }
    }

    Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(user_agent)
        .default_headers(headers)
        .build()
        .map_err(TransferError::from)
}
