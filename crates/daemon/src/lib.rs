//! E-paper photo frame
//!
//! A storage monitor that watches for removable media and supervises one
//! worker process per inserted volume. The worker converts the volume's photos
//! for the panel and rotates through them on a timer.

pub mod convert;
pub mod monitor;
pub mod mounts;
pub mod panel;
pub mod rotation;
pub mod scan;
pub mod signals;
pub mod supervisor;
pub mod worker;

pub use epaper_frame_config as config;
pub use epaper_frame_config::FrameConfig;
pub use convert::{
    convert_image, plan_resize, process_all_images, ConversionSummary, ConvertError, TargetCanvas,
};
pub use monitor::{StorageMonitor, POLL_INTERVAL};
pub use mounts::{
    cleanup_stale_mounts, list_volumes, CleanupError, CleanupSummary, MountRemover, SudoRemover,
};
pub use panel::{HeadlessPanel, Panel, PanelError};
pub use rotation::{
    select_image, MessageAsset, RotationController, RotationError, RotationSettings,
    RotationState,
};
pub use scan::scan_source_images;
pub use signals::{shutdown_signal, spawn_stop_listener};
pub use supervisor::{
    build_worker_command, ProcessLauncher, ProcessSupervisor, StorageState, StorageTransition,
    SupervisorError,
};
pub use worker::{prepare_processed_dir, run_worker, WorkerError, WorkerReport, WorkerRequest};
