//! One worker run against a single volume
//!
//! Sequence: bring up the panel, reset the processed-image directory, show the
//! startup message, convert the volume's photos, then rotate through them
//! until stopped. The panel is cleared and put to sleep on the way out,
//! whichever way the run ends.

use crate::convert::{process_all_images, ConversionSummary, TargetCanvas};
use crate::panel::Panel;
use crate::rotation::{
    MessageAsset, RotationController, RotationError, RotationSettings, RotationState, TICK,
};
use epaper_frame_config::FrameConfig;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Fatal worker errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to prepare processed directory {path}: {source}")]
    ProcessedDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Display setup failed: {0}")]
    Display(#[from] RotationError),
}

/// Parameters handed to the worker by the monitor
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub volume: PathBuf,
    pub refresh: Duration,
}

/// How a worker run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// `None` if the batch could not start (unreadable volume)
    pub conversion: Option<ConversionSummary>,
    pub final_state: RotationState,
}

/// Empties `dir`, creating it if needed.
///
/// Anything else found at `dir` (a file or a symlink) is removed and replaced
/// by an empty directory.
pub fn prepare_processed_dir(dir: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(dir)?,
        Ok(_) => {
            warn!(path = %dir.display(), "Processed path is not a directory, replacing it");
            std::fs::remove_file(dir)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(dir)
}

/// Run the full worker sequence on `panel`.
///
/// Blocks until `stop` is set. Conversion problems are logged and never end
/// the run; only panel bring-up and the processed directory are fatal.
pub fn run_worker<P: Panel>(
    panel: P,
    request: &WorkerRequest,
    config: &FrameConfig,
    stop: Arc<AtomicBool>,
) -> Result<WorkerReport, WorkerError> {
    info!(
        volume = %request.volume.display(),
        refresh_secs = request.refresh.as_secs(),
        "Worker starting"
    );

    let settings = RotationSettings {
        image_dir: config.paths.processed_dir.clone(),
        messages_dir: config.paths.messages_dir.clone(),
        refresh: request.refresh,
        rotation: config.panel.rotation,
        tick: TICK,
    };
    let mut controller = RotationController::new(panel, settings, Arc::clone(&stop))?;

    let processed_dir = &config.paths.processed_dir;
    prepare_processed_dir(processed_dir).map_err(|source| WorkerError::ProcessedDir {
        path: processed_dir.clone(),
        source,
    })?;

    controller.show_message(MessageAsset::Startup);

    let canvas = TargetCanvas::new(config.panel.width, config.panel.height);
    let conversion = match process_all_images(&request.volume, processed_dir, canvas, &stop) {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!(volume = %request.volume.display(), error = %e, "Could not read volume");
            None
        }
    };

    if stop.load(Ordering::SeqCst) {
        info!("Stop requested before display loop");
        return Ok(WorkerReport {
            conversion,
            final_state: RotationState::Stopped,
        });
    }

    let mut final_state = controller.run();
    if final_state == RotationState::NoImagesAvailable {
        controller.idle_until_stopped();
        final_state = controller.state();
    }

    info!(?final_state, "Worker finished");
    Ok(WorkerReport {
        conversion,
        final_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{HeadlessPanel, PanelError};
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        volume: PathBuf,
        preview: PathBuf,
        config: FrameConfig,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let volume = root.path().join("CARD");
        let messages = root.path().join("messages");
        fs::create_dir(&volume).unwrap();
        fs::create_dir(&messages).unwrap();
        RgbImage::from_pixel(800, 480, Rgb([0, 0, 0]))
            .save(messages.join("start.jpg"))
            .unwrap();
        RgbImage::from_pixel(800, 480, Rgb([255, 0, 0]))
            .save(messages.join("no_valid_images.jpg"))
            .unwrap();

        let mut config = FrameConfig::default();
        config.paths.processed_dir = root.path().join("pic");
        config.paths.messages_dir = messages;
        let preview = root.path().join("frame.png");

        Fixture {
            _root: root,
            volume,
            preview,
            config,
        }
    }

    fn request(fixture: &Fixture) -> WorkerRequest {
        WorkerRequest {
            volume: fixture.volume.clone(),
            refresh: Duration::from_secs(600),
        }
    }

    /// Headless panel that keeps every framebuffer and raises the stop flag
    /// once a given number of frames has been displayed.
    struct StopAfterPanel {
        inner: HeadlessPanel,
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        stop: Arc<AtomicBool>,
        stop_after: usize,
    }

    impl StopAfterPanel {
        fn new(fixture: &Fixture, stop: &Arc<AtomicBool>, stop_after: usize) -> Self {
            Self {
                inner: HeadlessPanel::new(800, 480, fixture.preview.clone()),
                frames: Arc::new(Mutex::new(Vec::new())),
                stop: Arc::clone(stop),
                stop_after,
            }
        }
    }

    impl Panel for StopAfterPanel {
        fn width(&self) -> u32 {
            self.inner.width()
        }

        fn height(&self) -> u32 {
            self.inner.height()
        }

        fn init(&mut self) -> Result<(), PanelError> {
            self.inner.init()
        }

        fn display(&mut self, buffer: &[u8]) -> Result<(), PanelError> {
            self.inner.display(buffer)?;
            let mut frames = self.frames.lock().unwrap();
            frames.push(buffer.to_vec());
            if frames.len() >= self.stop_after {
                self.stop.store(true, Ordering::SeqCst);
            }
            Ok(())
        }

        fn clear(&mut self) -> Result<(), PanelError> {
            self.inner.clear()
        }

        fn sleep(&mut self) -> Result<(), PanelError> {
            self.inner.sleep()
        }
    }

    fn solid_frame(index: u8) -> Vec<u8> {
        vec![(index << 4) | index; crate::panel::buffer_len(800, 480)]
    }

    #[test]
    fn test_prepare_processed_dir_wipes_previous_run() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("pic");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("old.jpg"), b"stale").unwrap();

        prepare_processed_dir(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_prepare_processed_dir_creates_missing() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("a").join("pic");
        prepare_processed_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_worker_converts_and_rotates_until_stopped() {
        let fixture = fixture();
        RgbImage::from_pixel(1600, 1200, Rgb([10, 200, 30]))
            .save(fixture.volume.join("garden.png"))
            .unwrap();
        fs::write(fixture.volume.join("broken.jpg"), b"not an image").unwrap();
        fs::create_dir_all(&fixture.config.paths.processed_dir).unwrap();
        fs::write(fixture.config.paths.processed_dir.join("leftover.png"), b"x").unwrap();

        // Frame 1 is the startup message, frame 2 the first photo.
        let stop = Arc::new(AtomicBool::new(false));
        let panel = StopAfterPanel::new(&fixture, &stop, 2);
        let frames = Arc::clone(&panel.frames);
        let report = run_worker(panel, &request(&fixture), &fixture.config, stop).unwrap();

        assert_eq!(report.final_state, RotationState::Stopped);
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], solid_frame(0));
        assert_eq!(frames[1], solid_frame(2));
        let summary = report.conversion.unwrap();
        assert_eq!(summary.converted, 1);
        assert_eq!(summary.failed, 1);

        let processed = &fixture.config.paths.processed_dir;
        assert!(!processed.join("leftover.png").exists());
        let converted = image::open(processed.join("garden.png")).unwrap();
        assert_eq!((converted.width(), converted.height()), (800, 480));

        // Teardown leaves a cleared (white) frame behind.
        let preview = image::open(&fixture.preview).unwrap().to_rgb8();
        assert!(preview.pixels().all(|p| *p == Rgb([255, 255, 255])));
    }

    #[test]
    fn test_worker_with_empty_volume_waits_on_message() {
        let fixture = fixture();
        let stop = Arc::new(AtomicBool::new(false));
        let panel = StopAfterPanel::new(&fixture, &stop, 2);
        let frames = Arc::clone(&panel.frames);

        let report = run_worker(panel, &request(&fixture), &fixture.config, stop).unwrap();

        assert_eq!(report.conversion.map(|s| s.converted), Some(0));
        assert_eq!(report.final_state, RotationState::Stopped);
        // Startup message (black), then the red no-images message.
        let frames = frames.lock().unwrap();
        assert_eq!(*frames, vec![solid_frame(0), solid_frame(4)]);
    }

    #[test]
    fn test_worker_survives_unreadable_volume() {
        let mut fixture = fixture();
        fixture.volume = fixture.volume.join("missing");
        let stop = Arc::new(AtomicBool::new(true));
        let panel = HeadlessPanel::new(800, 480, fixture.preview.clone());

        let report = run_worker(panel, &request(&fixture), &fixture.config, stop).unwrap();

        assert_eq!(report.conversion, None);
        assert_eq!(report.final_state, RotationState::Stopped);
    }

    #[test]
    fn test_prepare_processed_dir_replaces_file() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("pic");
        fs::write(&dir, b"not a directory").unwrap();

        prepare_processed_dir(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_worker_fails_when_processed_dir_parent_is_a_file() {
        let fixture = fixture();
        let blocker = fixture.config.paths.processed_dir.clone();
        fs::write(&blocker, b"file").unwrap();
        let mut config = fixture.config.clone();
        config.paths.processed_dir = blocker.join("pic");

        let panel = HeadlessPanel::new(800, 480, fixture.preview.clone());
        let result = run_worker(
            panel,
            &request(&fixture),
            &config,
            Arc::new(AtomicBool::new(true)),
        );

        assert!(matches!(result, Err(WorkerError::ProcessedDir { .. })));
    }
}
