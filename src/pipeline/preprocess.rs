//! Raster cleanup before recognition: denoise and deskew.
//!
//! Both steps are opt-in through [`PreprocessOptions`]. With both off the
//! raster passes through untouched. Deskew reports the angle it applied so
//! the compositor can rotate recognized boxes back onto the original page.

use crate::config::PreprocessOptions;
use crate::error::EngineError;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::hough::{detect_lines, LineDetectionOptions};
use tracing::debug;

/// Largest skew deskew will correct, in degrees.
const MAX_SKEW_DEGREES: i32 = 5;
/// Line detection runs on a copy scaled down to this longest edge.
const DETECTION_EDGE: u32 = 1200;
const INK_THRESHOLD: u8 = 128;

/// A cleaned raster plus the rotation that was applied to it.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub image: DynamicImage,
    /// Clockwise rotation applied by deskew, in degrees. Zero when none.
    pub rotation_degrees: f32,
}

impl Preprocessed {
    pub fn unchanged(image: DynamicImage) -> Self {
        Self {
            image,
            rotation_degrees: 0.0,
        }
    }
}

/// Capability: raster image → cleaned raster image.
pub trait Preprocessor: Send + Sync {
    fn clean(
        &self,
        image: DynamicImage,
        options: PreprocessOptions,
    ) -> Result<Preprocessed, EngineError>;
}

/// Preprocessor built on `image` and `imageproc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePreprocessor;

impl Preprocessor for ImagePreprocessor {
    fn clean(
        &self,
        image: DynamicImage,
        options: PreprocessOptions,
    ) -> Result<Preprocessed, EngineError> {
        if !options.is_enabled() {
            return Ok(Preprocessed::unchanged(image));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(EngineError::permanent("cannot preprocess an empty raster"));
        }

        let mut gray = image.into_luma8();
        if options.denoise {
            gray = median_filter(&gray, 1, 1);
        }

        let mut rotation_degrees = 0.0;
        if options.deskew {
            let skew = estimate_skew(&gray);
            if skew != 0.0 {
                gray = rotate_about_center(
                    &gray,
                    skew.to_radians(),
                    Interpolation::Bilinear,
                    Luma([255u8]),
                );
                rotation_degrees = skew;
            }
            debug!(skew, applied = rotation_degrees, "Deskew");
        }

        Ok(Preprocessed {
            image: DynamicImage::ImageLuma8(gray),
            rotation_degrees,
        })
    }
}

/// Find the clockwise rotation, in whole degrees, that brings text lines
/// back to horizontal.
///
/// Ink pixels vote in a Hough accumulator; each detected line within
/// `MAX_SKEW_DEGREES` of horizontal contributes its tilt and the median
/// wins. A horizontal line has its normal at 90°.
pub fn estimate_skew(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    let longest = w.max(h);
    let sample = if longest > DETECTION_EDGE {
        let scale = DETECTION_EDGE as f32 / longest as f32;
        let sw = ((w as f32 * scale).round() as u32).max(1);
        let sh = ((h as f32 * scale).round() as u32).max(1);
        imageops::resize(gray, sw, sh, FilterType::Triangle)
    } else {
        gray.clone()
    };

    // The accumulator counts non-zero pixels, so ink becomes foreground.
    let ink = GrayImage::from_fn(sample.width(), sample.height(), |x, y| {
        if sample.get_pixel(x, y).0[0] < INK_THRESHOLD {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    if ink.pixels().filter(|p| p.0[0] > 0).count() < 32 {
        return 0.0;
    }

    let options = LineDetectionOptions {
        vote_threshold: (ink.width() / 8).max(16),
        suppression_radius: 8,
    };
    let mut tilts: Vec<i32> = detect_lines(&ink, options)
        .into_iter()
        .map(|line| 90 - line.angle_in_degrees as i32)
        .filter(|tilt| tilt.abs() <= MAX_SKEW_DEGREES)
        .collect();
    if tilts.is_empty() {
        return 0.0;
    }
    tilts.sort_unstable();
    tilts[tilts.len() / 2] as f32
}
