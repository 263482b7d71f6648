//! Display rotation loop.
//!
//! Picks a random converted photo (never the one currently on screen when
//! there is a choice), renders it, and repeats every refresh interval until a
//! stop is requested. Dropping the controller clears the panel and puts it to
//! sleep.

use crate::panel::{apply_rotation, Panel, PanelError};
use crate::scan::list_file_names;
use epaper_frame_config::Rotation;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How often the loop wakes to check the stop flag and the refresh deadline.
pub const TICK: Duration = Duration::from_secs(1);

/// Error type for rendering operations
#[derive(Debug, Error)]
pub enum RotationError {
    /// IO error reading an image
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Decoding the image failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// The panel refused the frame
    #[error("Panel error: {0}")]
    Panel(#[from] PanelError),
}

/// Lifecycle of the rotation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    /// Created, loop not started
    Idle,
    /// Cycling through converted photos
    ShowingImage,
    /// Nothing to show; the fallback message is on screen
    NoImagesAvailable,
    /// Stop observed, loop exited
    Stopped,
}

/// Fixed message images rendered without conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAsset {
    /// Shown while the photos are being converted
    Startup,
    /// Shown when the volume yielded no usable photos
    NoImages,
}

impl MessageAsset {
    pub fn file_name(self) -> &'static str {
        match self {
            MessageAsset::Startup => "start.jpg",
            MessageAsset::NoImages => "no_valid_images.jpg",
        }
    }
}

/// What the loop last put on screen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayState {
    pub last_selected_image: Option<String>,
    pub last_display_time: Option<Instant>,
}

/// Static settings for one rotation run
#[derive(Debug, Clone)]
pub struct RotationSettings {
    /// Directory of converted photos
    pub image_dir: PathBuf,
    /// Directory of message assets
    pub messages_dir: PathBuf,
    /// Minimum time between image changes
    pub refresh: Duration,
    /// Rotation applied before every render
    pub rotation: Rotation,
    /// Loop wake-up period
    pub tick: Duration,
}

/// Picks the next image to show.
///
/// Returns `None` only for an empty list. With more than one candidate the
/// previous pick is never returned.
pub fn select_image<'a, R: Rng + ?Sized>(
    images: &'a [String],
    last_selected: Option<&str>,
    rng: &mut R,
) -> Option<&'a str> {
    if images.len() <= 1 {
        return images.first().map(String::as_str);
    }

    let available: Vec<&String> = images
        .iter()
        .filter(|image| Some(image.as_str()) != last_selected)
        .collect();

    // Only reachable if every entry equals the previous pick.
    if available.is_empty() {
        return images.choose(rng).map(String::as_str);
    }

    available.choose(rng).copied().map(String::as_str)
}

/// Owns the panel for the lifetime of a worker run.
pub struct RotationController<P: Panel> {
    panel: P,
    settings: RotationSettings,
    state: RotationState,
    display: DisplayState,
    stop: Arc<AtomicBool>,
    rng: StdRng,
}

impl<P: Panel> RotationController<P> {
    /// Initializes the panel and returns an idle controller.
    pub fn new(
        mut panel: P,
        settings: RotationSettings,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, RotationError> {
        panel.init()?;
        Ok(Self {
            panel,
            settings,
            state: RotationState::Idle,
            display: DisplayState::default(),
            stop,
            rng: StdRng::from_os_rng(),
        })
    }

    /// Replaces the random source, for reproducible selection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    pub fn display_state(&self) -> &DisplayState {
        &self.display
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Lists the converted photos currently on disk.
    pub fn fetch_image_files(&self) -> std::io::Result<Vec<String>> {
        list_file_names(&self.settings.image_dir)
    }

    fn render_file(&mut self, path: &Path) -> Result<(), RotationError> {
        let image = image::open(path)?.to_rgb8();
        let rotated = apply_rotation(&image, self.settings.rotation);
        let buffer = self.panel.getbuffer(&rotated);
        self.panel.display(&buffer)?;
        Ok(())
    }

    /// Renders one photo from the image directory and records it as shown.
    pub fn render(&mut self, name: &str) -> Result<(), RotationError> {
        let path = self.settings.image_dir.join(name);
        self.render_file(&path)?;
        self.display.last_selected_image = Some(name.to_string());
        self.display.last_display_time = Some(Instant::now());
        Ok(())
    }

    /// Renders a message asset verbatim. A missing asset is only a warning.
    pub fn show_message(&mut self, asset: MessageAsset) -> bool {
        let path = self.settings.messages_dir.join(asset.file_name());
        if !path.is_file() {
            warn!(path = %path.display(), "Message file not found");
            return false;
        }
        match self.render_file(&path) {
            Ok(()) => {
                info!("Displayed message: {}", asset.file_name());
                true
            }
            Err(e) => {
                warn!(error = %e, "Error displaying message {}", asset.file_name());
                false
            }
        }
    }

    /// Selects and renders the next photo from `images`.
    ///
    /// Failures are logged and leave the display state untouched so the next
    /// tick tries again.
    fn show_next(&mut self, images: &[String]) {
        let last = self.display.last_selected_image.clone();
        let Some(name) = select_image(images, last.as_deref(), &mut self.rng).map(str::to_string)
        else {
            warn!("No images available to display, retrying next tick");
            return;
        };

        match self.render(&name) {
            Ok(()) => info!("Displaying image: {}", name),
            Err(e) => warn!(image = %name, error = %e, "Render failed, retrying next tick"),
        }
    }

    fn refresh_due(&self) -> bool {
        match self.display.last_display_time {
            Some(shown_at) => shown_at.elapsed() >= self.settings.refresh,
            None => true,
        }
    }

    /// Runs the rotation loop until a stop is requested.
    ///
    /// Returns `NoImagesAvailable` straight away if the image directory is
    /// empty, after rendering the fallback message; otherwise returns `Stopped`.
    pub fn run(&mut self) -> RotationState {
        self.state = RotationState::Idle;

        let images = self.fetch_image_files().unwrap_or_else(|e| {
            warn!(error = %e, "Could not list processed images");
            Vec::new()
        });

        if images.is_empty() {
            info!("No images found, displaying default message.");
            self.show_message(MessageAsset::NoImages);
            self.state = RotationState::NoImagesAvailable;
            return self.state;
        }

        self.state = RotationState::ShowingImage;
        self.show_next(&images);

        loop {
            if self.stop_requested() {
                info!("Stop requested, leaving display loop");
                self.state = RotationState::Stopped;
                return self.state;
            }

            if self.refresh_due() {
                match self.fetch_image_files() {
                    Ok(images) => self.show_next(&images),
                    Err(e) => warn!(error = %e, "Could not list processed images, retrying next tick"),
                }
            }

            std::thread::sleep(self.settings.tick);
        }
    }

    /// Blocks until a stop is requested, leaving the current frame on screen.
    pub fn idle_until_stopped(&mut self) {
        while !self.stop_requested() {
            std::thread::sleep(self.settings.tick);
        }
        self.state = RotationState::Stopped;
    }

    fn teardown(&mut self) {
        debug!("Clearing panel before exit");
        if let Err(e) = self.panel.clear() {
            warn!(error = %e, "Failed to clear panel");
        }
        if let Err(e) = self.panel.sleep() {
            warn!(error = %e, "Failed to put panel to sleep");
        }
    }
}

impl<P: Panel> Drop for RotationController<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}
