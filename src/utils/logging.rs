use std::path::PathBuf;

pub const DEFAULT_LOG_FILTER: &str = "video_cache_player=info";

pub fn local_logging_enabled() -> bool {
    cfg!(feature = "local-logging")
}

pub fn resolve_log_dir() -> Result<PathBuf, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Failed to resolve current directory: {e}"))?;
    Ok(cwd.join("log"))
}

/// Build the filter from `RUST_LOG`, falling back to `default_directive`.
pub fn env_filter(default_directive: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive))
}

pub fn init_tracing() {
    init_tracing_with(DEFAULT_LOG_FILTER, local_logging_enabled());
}

/// Install the global subscriber; repeated calls are ignored.
///
/// `to_file` only takes effect with the `local-logging` feature, writing to
/// `log/backend.log` under the working directory.
pub fn init_tracing_with(default_directive: &str, to_file: bool) {
    let filter = env_filter(default_directive);

    #[cfg(feature = "local-logging")]
    {
        if to_file {
            init_file_logging(filter);
            return;
        }
    }

    #[cfg(not(feature = "local-logging"))]
    {
        if to_file {
            eprintln!("File logging requested but the local-logging feature is disabled");
        }
    }

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(feature = "local-logging")]
fn init_file_logging(filter: tracing_subscriber::EnvFilter) {
    use std::sync::OnceLock;
    use tracing_appender::non_blocking::WorkerGuard;

    static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    let log_dir = match resolve_log_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("{err}");
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
            return;
        }
    };

    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory: {err}");
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        return;
    }

    let file_appender = tracing_appender::rolling::never(&log_dir, "backend.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_under_cwd() {
        let dir = resolve_log_dir().unwrap();
        assert!(dir.ends_with("log"));
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_tracing_with("video_cache_player=debug", false);
        init_tracing();
    }
}
