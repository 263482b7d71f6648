//! Process signal handling shared by the monitor and the worker.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Resolves on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() -> io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received SIGINT");
        }
        _ = terminate.recv() => {
            info!("Received SIGTERM");
        }
    }
    Ok(())
}

/// Sets `stop` once a shutdown signal arrives.
///
/// The listeners are registered before this returns, so a signal delivered
/// right after the call is not lost.
pub fn spawn_stop_listener(stop: Arc<AtomicBool>) -> io::Result<tokio::task::JoinHandle<()>> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT, stopping"),
            _ = terminate.recv() => info!("Received SIGTERM, stopping"),
        }
        stop.store(true, Ordering::SeqCst);
    }))
}
