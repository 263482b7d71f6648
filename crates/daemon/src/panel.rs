//! Panel port for the e-paper display.
//!
//! The hardware driver lives outside this crate; everything here talks to it
//! through [`Panel`]. The default framebuffer layout is the one used by the
//! 7-colour 7.3" panels: one palette index per pixel, two pixels per byte,
//! high nibble first.

use epaper_frame_config::Rotation;
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

/// Colours the panel can show, in framebuffer index order.
pub const PALETTE: [[u8; 3]; 7] = [
    [0, 0, 0],       // black
    [255, 255, 255], // white
    [0, 255, 0],     // green
    [0, 0, 255],     // blue
    [255, 0, 0],     // red
    [255, 255, 0],   // yellow
    [255, 128, 0],   // orange
];

/// Palette index of white, used for cleared frames.
pub const WHITE_INDEX: u8 = 1;

/// Error type for panel operations
#[derive(Debug, Error)]
pub enum PanelError {
    /// Panel used before `init` or after `sleep`
    #[error("Panel not initialized")]
    NotInitialized,

    /// Framebuffer length does not match the panel geometry
    #[error("Framebuffer has {actual} bytes, panel expects {expected}")]
    BufferSize { expected: usize, actual: usize },

    /// IO error talking to the device or preview file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding the preview failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Operations the rotation loop needs from a display.
pub trait Panel {
    /// Panel width in pixels
    fn width(&self) -> u32;

    /// Panel height in pixels
    fn height(&self) -> u32;

    /// Wake the panel and prepare it for drawing
    fn init(&mut self) -> Result<(), PanelError>;

    /// Convert an RGB frame into this panel's framebuffer layout
    fn getbuffer(&self, image: &RgbImage) -> Vec<u8> {
        pack_palette_buffer(image, self.width(), self.height())
    }

    /// Push a framebuffer produced by [`Panel::getbuffer`]
    fn display(&mut self, buffer: &[u8]) -> Result<(), PanelError>;

    /// Blank the panel to white
    fn clear(&mut self) -> Result<(), PanelError>;

    /// Enter low-power sleep; `init` is required before drawing again
    fn sleep(&mut self) -> Result<(), PanelError>;
}

/// Framebuffer length in bytes for a panel of the given size.
pub fn buffer_len(width: u32, height: u32) -> usize {
    (width as usize * height as usize).div_ceil(2)
}

/// Applies the deployment's counter-clockwise rotation.
///
/// The output keeps the input's dimensions: a quarter turn is centred on the
/// original canvas, cropping the overhang and filling the uncovered margins
/// with black.
pub fn apply_rotation(image: &RgbImage, rotation: Rotation) -> RgbImage {
    let turned = match rotation {
        Rotation::Deg0 => return image.clone(),
        Rotation::Deg180 => return imageops::rotate180(image),
        Rotation::Deg90 => imageops::rotate270(image),
        Rotation::Deg270 => imageops::rotate90(image),
    };

    let (width, height) = image.dimensions();
    let mut canvas = RgbImage::from_pixel(width, height, Rgb(PALETTE[0]));
    let x = (width as i64 - turned.width() as i64) / 2;
    let y = (height as i64 - turned.height() as i64) / 2;
    imageops::overlay(&mut canvas, &turned, x, y);
    canvas
}

/// Index of the palette colour closest to `pixel`.
pub fn nearest_palette_index(pixel: &Rgb<u8>) -> u8 {
    let mut best = 0;
    let mut best_distance = u32::MAX;
    for (index, colour) in PALETTE.iter().enumerate() {
        let distance: u32 = pixel
            .0
            .iter()
            .zip(colour.iter())
            .map(|(&a, &b)| {
                let d = a as i32 - b as i32;
                (d * d) as u32
            })
            .sum();
        if distance < best_distance {
            best = index as u8;
            best_distance = distance;
        }
    }
    best
}

/// Quantizes and packs `image` for a `width x height` panel.
///
/// Portrait frames for a landscape panel are turned a quarter counter-clockwise;
/// any other size mismatch is resized to fit with a warning.
pub fn pack_palette_buffer(image: &RgbImage, width: u32, height: u32) -> Vec<u8> {
    let frame = if image.dimensions() == (width, height) {
        None
    } else if image.dimensions() == (height, width) {
        Some(imageops::rotate270(image))
    } else {
        warn!(
            got_width = image.width(),
            got_height = image.height(),
            width,
            height,
            "Frame does not match panel geometry, resizing"
        );
        Some(imageops::resize(image, width, height, FilterType::Triangle))
    };
    let frame = frame.as_ref().unwrap_or(image);

    let mut buffer = vec![0u8; buffer_len(width, height)];
    for (i, pixel) in frame.pixels().enumerate() {
        let index = nearest_palette_index(pixel);
        let byte = &mut buffer[i / 2];
        if i % 2 == 0 {
            *byte |= index << 4;
        } else {
            *byte |= index;
        }
    }
    buffer
}

/// Expands a packed framebuffer back into palette colours.
pub fn unpack_palette_buffer(buffer: &[u8], width: u32, height: u32) -> Result<RgbImage, PanelError> {
    let expected = buffer_len(width, height);
    if buffer.len() != expected {
        return Err(PanelError::BufferSize {
            expected,
            actual: buffer.len(),
        });
    }

    Ok(RgbImage::from_fn(width, height, |x, y| {
        let i = (y * width + x) as usize;
        let byte = buffer[i / 2];
        let index = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        let colour = PALETTE
            .get(index as usize)
            .copied()
            .unwrap_or(PALETTE[WHITE_INDEX as usize]);
        Rgb(colour)
    }))
}

/// Panel stand-in that renders each frame to a PNG file.
///
/// Lets the frame run on a machine without the display attached; the preview
/// shows exactly the colours the real panel would.
pub struct HeadlessPanel {
    width: u32,
    height: u32,
    preview_path: PathBuf,
    initialized: bool,
    frames_shown: u64,
}

impl HeadlessPanel {
    pub fn new(width: u32, height: u32, preview_path: PathBuf) -> Self {
        Self {
            width,
            height,
            preview_path,
            initialized: false,
            frames_shown: 0,
        }
    }

    /// Number of frames pushed through `display`
    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn write_preview(&self, frame: &RgbImage) -> Result<(), PanelError> {
        frame.save_with_format(&self.preview_path, ImageFormat::Png)?;
        Ok(())
    }
}

impl Panel for HeadlessPanel {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn init(&mut self) -> Result<(), PanelError> {
        if let Some(parent) = self.preview_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.initialized = true;
        debug!(preview = %self.preview_path.display(), "Headless panel initialized");
        Ok(())
    }

    fn display(&mut self, buffer: &[u8]) -> Result<(), PanelError> {
        if !self.initialized {
            return Err(PanelError::NotInitialized);
        }
        let frame = unpack_palette_buffer(buffer, self.width, self.height)?;
        self.write_preview(&frame)?;
        self.frames_shown += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), PanelError> {
        if !self.initialized {
            return Err(PanelError::NotInitialized);
        }
        let white = RgbImage::from_pixel(self.width, self.height, Rgb(PALETTE[WHITE_INDEX as usize]));
        self.write_preview(&white)
    }

    fn sleep(&mut self) -> Result<(), PanelError> {
        self.initialized = false;
        debug!("Headless panel asleep");
        Ok(())
    }
}
