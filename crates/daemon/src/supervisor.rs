//! Worker process supervision.
//!
//! The supervisor turns successive volume listings into insertion and removal
//! edges and owns the single worker process. A worker keeps running across a
//! removal; it is replaced only when a volume reappears after a removal was
//! observed.

use epaper_frame_config::{RefreshConfig, CONFIG_PATH_ENV};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Error types for worker supervision
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to launch worker {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal worker: {0}")]
    Signal(#[from] nix::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether a volume was present at the last poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    NoVolume,
    VolumePresent,
}

/// An edge observed between two polls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTransition {
    /// A volume appeared and no removal had been seen before.
    Inserted(PathBuf),
    /// A volume appeared after a removal; the worker was replaced.
    Reinserted(PathBuf),
    Removed,
}

/// A running worker the supervisor can query and stop.
pub trait WorkerHandle: Send {
    /// Non-blocking liveness check.
    fn is_running(&mut self) -> Result<bool, SupervisorError>;

    /// Ask the worker to exit and wait until it has.
    fn terminate(&mut self) -> impl Future<Output = Result<(), SupervisorError>> + Send;
}

/// Starts workers for a volume.
pub trait WorkerLauncher {
    type Handle: WorkerHandle;

    fn launch(
        &mut self,
        volume: &Path,
        refresh: RefreshConfig,
    ) -> Result<Self::Handle, SupervisorError>;
}

/// Build the worker command line
///
/// The worker takes the volume path and refresh interval as positional
/// arguments. Standard streams are inherited so worker logs land in the same
/// journal as the monitor's.
pub fn build_worker_command(
    binary: &Path,
    volume: &Path,
    refresh_seconds: u64,
    config_path: Option<&Path>,
) -> Command {
    let mut cmd = Command::new(binary);
    cmd.arg(volume)
        .arg(refresh_seconds.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    if let Some(path) = config_path {
        cmd.env(CONFIG_PATH_ENV, path);
    }

    cmd
}

/// Worker running as a child process.
#[derive(Debug)]
pub struct ChildWorker {
    child: Child,
}

impl ChildWorker {
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

impl WorkerHandle for ChildWorker {
    fn is_running(&mut self) -> Result<bool, SupervisorError> {
        Ok(self.child.try_wait()?.is_none())
    }

    async fn terminate(&mut self) -> Result<(), SupervisorError> {
        if let Some(pid) = self.child.id() {
            signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)?;
        }
        let status = self.child.wait().await?;
        info!(%status, "Worker exited");
        Ok(())
    }
}

/// Launches the worker binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    worker_binary: PathBuf,
    config_path: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(worker_binary: PathBuf) -> Self {
        Self {
            worker_binary,
            config_path: None,
        }
    }

    /// Forward a configuration file to every worker.
    pub fn with_config_path(mut self, config_path: Option<PathBuf>) -> Self {
        self.config_path = config_path;
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    type Handle = ChildWorker;

    fn launch(
        &mut self,
        volume: &Path,
        refresh: RefreshConfig,
    ) -> Result<Self::Handle, SupervisorError> {
        let mut cmd = build_worker_command(
            &self.worker_binary,
            volume,
            refresh.seconds,
            self.config_path.as_deref(),
        );
        let child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            binary: self.worker_binary.clone(),
            source,
        })?;
        info!(
            pid = child.id(),
            volume = %volume.display(),
            refresh_secs = refresh.seconds,
            "Worker started"
        );
        Ok(ChildWorker::new(child))
    }
}

/// Tracks storage state and the worker it owns.
pub struct ProcessSupervisor<L: WorkerLauncher> {
    launcher: L,
    worker: Option<L::Handle>,
    state: StorageState,
    volume_was_removed: bool,
}

impl<L: WorkerLauncher> ProcessSupervisor<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            worker: None,
            state: StorageState::NoVolume,
            volume_was_removed: false,
        }
    }

    pub fn state(&self) -> StorageState {
        self.state
    }

    pub fn volume_was_removed(&self) -> bool {
        self.volume_was_removed
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Feed one poll's volume listing into the state machine.
    ///
    /// Only the first volume is used. On error the storage state is left as
    /// it was, so the same edge is detected again at the next poll.
    pub async fn observe(
        &mut self,
        volumes: &[PathBuf],
    ) -> Result<Option<StorageTransition>, SupervisorError> {
        match (self.state, volumes.first()) {
            (StorageState::NoVolume, Some(volume)) => {
                let reinserted = self.volume_was_removed;
                if reinserted {
                    info!(volume = %volume.display(), "Volume reinserted, restarting worker");
                } else {
                    info!(volume = %volume.display(), "Volume inserted");
                }

                self.start_worker(volume).await?;
                self.state = StorageState::VolumePresent;
                self.volume_was_removed = false;

                Ok(Some(if reinserted {
                    StorageTransition::Reinserted(volume.clone())
                } else {
                    StorageTransition::Inserted(volume.clone())
                }))
            }
            (StorageState::VolumePresent, None) => {
                info!("Volume removed");
                self.state = StorageState::NoVolume;
                self.volume_was_removed = true;
                Ok(Some(StorageTransition::Removed))
            }
            _ => Ok(None),
        }
    }

    /// Start a worker for `volume`, stopping any live one first.
    pub async fn start_worker(&mut self, volume: &Path) -> Result<(), SupervisorError> {
        self.stop_worker().await?;

        let refresh = RefreshConfig::read_from_volume(volume);
        let handle = self.launcher.launch(volume, refresh)?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Stop the worker if it is still running.
    ///
    /// The handle is kept when termination fails.
    pub async fn stop_worker(&mut self) -> Result<(), SupervisorError> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(());
        };

        if worker.is_running()? {
            info!("Stopping existing worker");
            if let Err(e) = worker.terminate().await {
                warn!(error = %e, "Failed to stop worker");
                return Err(e);
            }
        }

        self.worker = None;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum WorkerEvent {
        Launched { id: usize, volume: PathBuf, refresh_secs: u64 },
        Terminated { id: usize },
    }

    /// Shared log and knobs for fake workers.
    #[derive(Debug, Default)]
    pub struct FakeState {
        pub events: Vec<WorkerEvent>,
        pub live: Vec<usize>,
        pub fail_terminate: bool,
        pub fail_launch: bool,
    }

    #[derive(Debug, Clone, Default)]
    pub struct FakeLauncher {
        pub state: Arc<Mutex<FakeState>>,
        next_id: usize,
    }

    impl FakeLauncher {
        pub fn events(&self) -> Vec<WorkerEvent> {
            self.state.lock().unwrap().events.clone()
        }

        pub fn live(&self) -> Vec<usize> {
            self.state.lock().unwrap().live.clone()
        }

        /// Simulate the worker exiting on its own.
        pub fn exit_worker(&self, id: usize) {
            self.state.lock().unwrap().live.retain(|&l| l != id);
        }
    }

    pub struct FakeWorker {
        id: usize,
        state: Arc<Mutex<FakeState>>,
    }

    impl WorkerHandle for FakeWorker {
        fn is_running(&mut self) -> Result<bool, SupervisorError> {
            Ok(self.state.lock().unwrap().live.contains(&self.id))
        }

        async fn terminate(&mut self) -> Result<(), SupervisorError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_terminate {
                return Err(SupervisorError::Signal(nix::Error::EPERM));
            }
            state.live.retain(|&l| l != self.id);
            state.events.push(WorkerEvent::Terminated { id: self.id });
            Ok(())
        }
    }

    impl WorkerLauncher for FakeLauncher {
        type Handle = FakeWorker;

        fn launch(
            &mut self,
            volume: &Path,
            refresh: RefreshConfig,
        ) -> Result<Self::Handle, SupervisorError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_launch {
                return Err(SupervisorError::Spawn {
                    binary: PathBuf::from("frame-worker"),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            let id = self.next_id;
            self.next_id += 1;
            state.live.push(id);
            state.events.push(WorkerEvent::Launched {
                id,
                volume: volume.to_path_buf(),
                refresh_secs: refresh.seconds,
            });
            Ok(FakeWorker {
                id,
                state: Arc::clone(&self.state),
            })
        }
    }
}
