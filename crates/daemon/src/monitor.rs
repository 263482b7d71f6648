//! Storage monitor main loop
//!
//! Polls the mount root on a fixed interval and feeds each listing to the
//! [`ProcessSupervisor`]. Poll failures are logged and treated as "no change".

use crate::mounts::list_volumes;
use crate::supervisor::{ProcessSupervisor, StorageTransition, SupervisorError, WorkerLauncher};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Time between two looks at the mount root.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct StorageMonitor<L: WorkerLauncher> {
    mount_root: PathBuf,
    supervisor: ProcessSupervisor<L>,
    poll_interval: Duration,
}

impl<L: WorkerLauncher> StorageMonitor<L> {
    pub fn new(mount_root: PathBuf, launcher: L) -> Self {
        Self {
            mount_root,
            supervisor: ProcessSupervisor::new(launcher),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    pub fn supervisor(&self) -> &ProcessSupervisor<L> {
        &self.supervisor
    }

    /// Run a single poll.
    pub async fn poll_once(&mut self) -> Option<StorageTransition> {
        let volumes = match list_volumes(&self.mount_root) {
            Ok(volumes) => volumes,
            Err(e) => {
                warn!(
                    mount_root = %self.mount_root.display(),
                    error = %e,
                    "Failed to list mount root"
                );
                return None;
            }
        };

        match self.supervisor.observe(&volumes).await {
            Ok(transition) => transition,
            Err(e) => {
                error!(error = %e, "Failed to handle storage change, retrying at next poll");
                None
            }
        }
    }

    /// Poll until `shutdown` resolves, then stop the worker.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()>,
    {
        info!(
            mount_root = %self.mount_root.display(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "Storage monitor started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        info!("Storage monitor shutting down");
        self.supervisor.stop_worker().await
    }
}
