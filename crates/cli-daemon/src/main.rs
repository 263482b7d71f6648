//! CLI entry point for the storage monitor
//!
//! Cleans up stale mount points, then watches the mount root and keeps one
//! `frame-worker` running for the inserted volume.

use clap::Parser;
use epaper_frame::{
    cleanup_stale_mounts, shutdown_signal, FrameConfig, ProcessLauncher, StorageMonitor,
    SudoRemover,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// E-paper photo frame storage monitor
#[derive(Parser, Debug)]
#[command(name = "frame-monitor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a configuration file (TOML); also forwarded to the worker
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory whose subdirectories are removable volumes
    #[arg(long)]
    mount_root: Option<PathBuf>,

    /// Worker executable to launch for each volume
    #[arg(long)]
    worker_binary: Option<PathBuf>,

    /// Do not remove inaccessible mount directories at startup
    #[arg(long, default_value = "false")]
    skip_cleanup: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// `frame-worker` next to the running executable.
fn sibling_worker_binary() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join("frame-worker"))
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match FrameConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => FrameConfig::from_env(),
    };

    let mount_root = args
        .mount_root
        .clone()
        .unwrap_or_else(|| config.resolved_mount_root());
    let Some(worker_binary) = args
        .worker_binary
        .clone()
        .or_else(|| config.monitor.worker_binary.clone())
        .or_else(sibling_worker_binary)
    else {
        error!("Could not locate the frame-worker executable; pass --worker-binary");
        return ExitCode::FAILURE;
    };

    info!(
        mount_root = %mount_root.display(),
        worker = %worker_binary.display(),
        "Starting storage monitor..."
    );

    if args.skip_cleanup || !config.monitor.cleanup_stale_mounts {
        warn!("Skipping stale mount cleanup");
    } else {
        match cleanup_stale_mounts(&mount_root, &SudoRemover) {
            Ok(summary) => info!(
                removed = summary.removed.len(),
                failed = summary.failed.len(),
                "Stale mount cleanup finished"
            ),
            Err(e) => warn!(error = %e, "Stale mount cleanup skipped"),
        }
    }

    let launcher = ProcessLauncher::new(worker_binary).with_config_path(args.config.clone());
    let mut monitor = StorageMonitor::new(mount_root, launcher);

    let shutdown = async {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Failed to install signal handlers");
            std::future::pending::<()>().await;
        }
    };

    match monitor.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Failed to stop worker during shutdown");
            ExitCode::FAILURE
        }
    }
}
