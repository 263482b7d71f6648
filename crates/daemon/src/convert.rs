//! Conversion pipeline from arbitrary photos to the panel's canvas.
//!
//! Each photo is orientation-normalized, scaled so it covers the canvas while
//! keeping its aspect ratio, center-cropped to the exact canvas size, then has
//! saturation and contrast boosted for the limited e-paper palette.

use crate::scan::scan_source_images;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageDecoder, ImageReader, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Saturation boost applied to every converted photo.
pub const SATURATION_FACTOR: f32 = 1.5;

/// Contrast boost applied after saturation.
pub const CONTRAST_FACTOR: f32 = 1.5;

/// Error type for conversion operations
#[derive(Debug, Error)]
pub enum ConvertError {
    /// IO error reading the source or writing the output
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Decode or encode failure in the codec
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Source decoded to an image without pixels
    #[error("Image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// Scaled geometry does not fit in u32
    #[error("Scaled size for {width}x{height} source overflows")]
    TooLarge { width: u32, height: u32 },

    /// Source path has no file name to reuse for the output
    #[error("Source path has no file name: {0}")]
    NoFileName(PathBuf),
}

/// Fixed pixel geometry the panel expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetCanvas {
    pub width: u32,
    pub height: u32,
}

impl TargetCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Scaled size and crop offsets for one source image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub crop_x: u32,
    pub crop_y: u32,
}

/// Computes how a `width x height` image is scaled and cropped onto `canvas`.
///
/// A source relatively wider than the canvas is scaled to the canvas height
/// and loses columns on both sides; otherwise it is scaled to the canvas width
/// and loses rows at the top and bottom. All arithmetic is integer so the
/// scaled image always covers the canvas.
pub fn plan_resize(width: u32, height: u32, canvas: TargetCanvas) -> Result<ResizePlan, ConvertError> {
    if width == 0 || height == 0 {
        return Err(ConvertError::EmptyImage { width, height });
    }

    let (w, h) = (width as u64, height as u64);
    let (tw, th) = (canvas.width as u64, canvas.height as u64);

    // source is wider than the canvas when w / h > tw / th
    let (scaled_w, scaled_h) = if w * th > tw * h {
        (th * w / h, th)
    } else {
        (tw, tw * h / w)
    };

    let overflow = || ConvertError::TooLarge { width, height };
    let scaled_width = u32::try_from(scaled_w).map_err(|_| overflow())?;
    let scaled_height = u32::try_from(scaled_h).map_err(|_| overflow())?;

    Ok(ResizePlan {
        scaled_width,
        scaled_height,
        crop_x: (scaled_width - canvas.width) / 2,
        crop_y: (scaled_height - canvas.height) / 2,
    })
}

/// Decodes `path` and applies its EXIF orientation, if any.
///
/// Animated formats yield their first frame.
pub fn load_oriented(path: &Path) -> Result<DynamicImage, ConvertError> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Scales `image` to cover `canvas` and crops the center.
pub fn fit_and_crop(image: &RgbImage, canvas: TargetCanvas) -> Result<RgbImage, ConvertError> {
    let plan = plan_resize(image.width(), image.height(), canvas)?;

    let resized = if plan.scaled_width == image.width() && plan.scaled_height == image.height() {
        image.clone()
    } else {
        imageops::resize(image, plan.scaled_width, plan.scaled_height, FilterType::Lanczos3)
    };

    Ok(imageops::crop_imm(&resized, plan.crop_x, plan.crop_y, canvas.width, canvas.height).to_image())
}

/// ITU-R 601 luma in 16-bit fixed point, as used for greyscale conversion.
fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

/// Interpolates from `degenerate` towards `value` by `factor` (extrapolates above 1).
fn blend(degenerate: f32, value: u8, factor: f32) -> u8 {
    (degenerate + factor * (value as f32 - degenerate))
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Pushes every pixel away from its own grey level.
pub fn enhance_saturation(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        let grey = luma(pixel) as f32;
        for channel in pixel.0.iter_mut() {
            *channel = blend(grey, *channel, factor);
        }
    }
}

/// Pushes every channel away from the image's mean grey level.
pub fn enhance_contrast(image: &mut RgbImage, factor: f32) {
    let mean = mean_luma(image);
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = blend(mean, *channel, factor);
        }
    }
}

/// Mean luma rounded to the nearest integer level.
fn mean_luma(image: &RgbImage) -> f32 {
    let count = image.width() as u64 * image.height() as u64;
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = image.pixels().map(|p| luma(p) as u64).sum();
    (sum as f64 / count as f64 + 0.5).floor() as f32
}

/// Runs the in-memory part of the pipeline: fit, crop, saturation, contrast.
pub fn convert_buffer(image: &RgbImage, canvas: TargetCanvas) -> Result<RgbImage, ConvertError> {
    let mut out = fit_and_crop(image, canvas)?;
    enhance_saturation(&mut out, SATURATION_FACTOR);
    enhance_contrast(&mut out, CONTRAST_FACTOR);
    Ok(out)
}

/// Converts one photo and writes it to `output_dir` under the same file name.
///
/// The output format follows the file extension; the pixels are always
/// single-frame 8-bit RGB.
pub fn convert_image(
    source: &Path,
    output_dir: &Path,
    canvas: TargetCanvas,
) -> Result<PathBuf, ConvertError> {
    let file_name = source
        .file_name()
        .ok_or_else(|| ConvertError::NoFileName(source.to_path_buf()))?;

    debug!(source = %source.display(), "Decoding image");
    let decoded = load_oriented(source)?.to_rgb8();
    let converted = convert_buffer(&decoded, canvas)?;

    let output_path = output_dir.join(file_name);
    converted.save(&output_path)?;
    Ok(output_path)
}

/// Outcome counts for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Photos written to the output directory
    pub converted: usize,
    /// Photos that failed to decode, convert or save
    pub failed: usize,
    /// Photos not attempted because a stop was requested
    pub skipped: usize,
}

/// Converts every photo on `volume` into `output_dir`.
///
/// A failing photo is logged and counted; it never aborts the batch. The stop
/// flag is checked between photos.
pub fn process_all_images(
    volume: &Path,
    output_dir: &Path,
    canvas: TargetCanvas,
    stop: &AtomicBool,
) -> Result<ConversionSummary, ConvertError> {
    let sources = scan_source_images(volume)?;
    info!(
        volume = %volume.display(),
        count = sources.len(),
        "Processing images, please wait..."
    );

    let mut summary = ConversionSummary::default();
    for (index, source) in sources.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            summary.skipped = sources.len() - index;
            info!(skipped = summary.skipped, "Stop requested, abandoning conversion batch");
            break;
        }

        match convert_image(source, output_dir, canvas) {
            Ok(output) => {
                summary.converted += 1;
                info!(output = %output.display(), "Converted image");
            }
            Err(e) => {
                summary.failed += 1;
                warn!(source = %source.display(), error = %e, "Skipping image");
            }
        }
    }

    info!(
        converted = summary.converted,
        failed = summary.failed,
        "Image processing finished"
    );
    Ok(summary)
}
