//! CLI entry point for the frame worker
//!
//! Launched by `frame-monitor` with the volume path and the refresh interval.
//! Runs until SIGTERM or SIGINT, then clears the panel and exits.

use clap::Parser;
use epaper_frame::config::CONFIG_PATH_ENV;
use epaper_frame::{run_worker, spawn_stop_listener, FrameConfig, HeadlessPanel, WorkerRequest};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// E-paper photo frame worker
#[derive(Parser, Debug)]
#[command(name = "frame-worker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Mounted volume holding the source photos
    volume_path: PathBuf,

    /// Seconds between image changes
    refresh_seconds: u64,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    info!(
        volume = %args.volume_path.display(),
        refresh_secs = args.refresh_seconds,
        "Frame worker received volume"
    );

    let config = match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) => match FrameConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = ?path, error = %e, "Failed to load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => FrameConfig::from_env(),
    };

    let stop = Arc::new(AtomicBool::new(false));
    if let Err(e) = spawn_stop_listener(Arc::clone(&stop)) {
        error!(error = %e, "Failed to install signal handlers");
        return ExitCode::FAILURE;
    }

    let request = WorkerRequest {
        volume: args.volume_path,
        refresh: Duration::from_secs(args.refresh_seconds),
    };
    let panel = HeadlessPanel::new(
        config.panel.width,
        config.panel.height,
        config.panel.preview_path.clone(),
    );

    let result =
        tokio::task::spawn_blocking(move || run_worker(panel, &request, &config, stop)).await;

    match result {
        Ok(Ok(report)) => {
            info!(final_state = ?report.final_state, "Frame worker exiting");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!(error = %e, "Frame worker failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "Frame worker task panicked");
            ExitCode::FAILURE
        }
    }
}
