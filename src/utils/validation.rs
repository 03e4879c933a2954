//! URL and input validation utilities

use url::Url;

use crate::core::error_handling::TransferError;

/// Parse a source URL, accepting only http(s)
pub fn validate_url(url: &str) -> Result<Url, TransferError> {
    let parsed = Url::parse(url).map_err(|e| TransferError::InvalidUrl {
        message: format!("{}: {}", url, e),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(TransferError::InvalidUrl {
            message: format!("unsupported scheme '{}' in {}", other, url),
        }),
    }
}

/// Check if URL is a valid media URL
pub fn is_valid_media_url(url: &str) -> bool {
    validate_url(url).is_ok()
}
