//! File system utilities

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix of the temporary file a transfer writes into
pub const PART_SUFFIX: &str = ".part";

/// Suffix of the resume record stored next to the part file
pub const RESUME_INFO_SUFFIX: &str = ".part.json";

/// Ensure directory exists
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| anyhow!("Failed to create directory {}: {}", path.display(), e))?;
    }
    Ok(())
}

/// Sanitize filename for filesystem
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// `<destination>.part`
pub fn part_path(destination: &Path) -> PathBuf {
    with_suffix(destination, PART_SUFFIX)
}

/// `<destination>.part.json`
pub fn resume_info_path(destination: &Path) -> PathBuf {
    with_suffix(destination, RESUME_INFO_SUFFIX)
}

/// Stable cache file name for a source URL.
///
/// The name is `<first 16 hex chars of sha256(url)>-<last path segment>`, so the
/// same URL always maps to the same file while distinct URLs sharing a file
/// name do not collide.
pub fn cache_file_name(source_url: &str) -> String {
    let digest = Sha256::digest(source_url.as_bytes());
    let prefix = &hex::encode(digest)[..16];

    let segment = url::Url::parse(source_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "media".to_string());

    format!("{}-{}", prefix, sanitize_filename(&segment))
}

/// Deterministic destination for `source_url` inside the cache directory
pub fn cache_destination(cache_dir: &Path, source_url: &str) -> PathBuf {
    cache_dir.join(cache_file_name(source_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_and_resume_paths() {
        let dest = Path::new("/tmp/cache/video.mp4");
        assert_eq!(part_path(dest), PathBuf::from("/tmp/cache/video.mp4.part"));
        assert_eq!(
            resume_info_path(dest),
            PathBuf::from("/tmp/cache/video.mp4.part.json")
        );
    }

    #[test]
    fn test_cache_file_name_is_stable() {
        let url = "https://cdn.example.com/media/big_buck_bunny.mp4";
        let first = cache_file_name(url);
        assert_eq!(first, cache_file_name(url));
        assert!(first.ends_with("-big_buck_bunny.mp4"));
        assert_eq!(first.len(), 16 + 1 + "big_buck_bunny.mp4".len());
    }

    #[test]
    fn test_cache_file_name_distinguishes_hosts() {
        let a = cache_file_name("https://a.example.com/small.mp4");
        let b = cache_file_name("https://b.example.com/small.mp4");
        assert_ne!(a, b);
        assert!(a.ends_with("-small.mp4") && b.ends_with("-small.mp4"));
    }

    #[test]
    fn test_cache_file_name_without_segment() {
        assert!(cache_file_name("https://example.com/").ends_with("-media"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a:b?c.mp4"), "a_b_c.mp4");
    }
}
