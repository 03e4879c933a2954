use std::env;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use video_cache_player::core::models::DownloadProgress;
use video_cache_player::utils::validation::is_valid_media_url;
use video_cache_player::{AppConfig, DownloadManager, DownloadOutcome};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: fetch-cli <url> [destination]");
        std::process::exit(1);
    }

    let url = args[1].clone();
    if !is_valid_media_url(&url) {
        eprintln!("Error: not an http(s) URL: {url}");
        std::process::exit(1);
    }
    let destination = args.get(2).map(PathBuf::from);

    match run(&url, destination).await {
        Ok(path) => println!("Saved to {}", path.display()),
        Err(error) => {
            eprintln!("Error: {error:#}");
            std::process::exit(1);
        }
    }
}

async fn run(url: &str, destination: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let config = AppConfig::load_layered(AppConfig::get_config_path().ok().as_deref())?;
    video_cache_player::init_with_config(&config)?;

    let manager =
        DownloadManager::new(config.download.clone()).context("Failed to create HTTP client")?;
    let task = match destination {
        Some(path) => manager.start(url, path),
        None => {
            let cache_dir = config.resolve_cache_dir()?;
            manager.start_cached(url, &cache_dir)
        }
    };

    task.on_progress(print_progress);

    let outcome = task.result().await;
    println!();
    match outcome {
        DownloadOutcome::Finished(path) => Ok(path),
        DownloadOutcome::Failed(err) => {
            Err(anyhow::Error::new(err).context(format!("Download of {url} failed")))
        }
    }
}

fn print_progress(progress: &DownloadProgress) {
    let expected = progress
        .bytes_expected
        .map(|b| b.to_string())
        .unwrap_or_else(|| "?".to_string());
    print!(
        "\r{:>6.1}%  {} / {} bytes  {:.0} B/s",
        progress.progress() * 100.0,
        progress.bytes_written,
        expected,
        progress.speed
    );
    let _ = std::io::stdout().flush();
}
