//! Halftoning algorithms for converting grayscale rasters to 1-bit bitmaps.
//!
//! Three modes are supported:
//! - Ordered dithering with a 4x4 Bayer matrix (stateless, per pixel)
//! - Floyd-Steinberg error diffusion (sequential, row by row)
//! - Plain threshold (no dithering, for logos and text)
//!
//! All modes read the stored gray value as luminance, so callers must
//! grayscale the image first (see [`crate::preprocess`]).

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::ImageError;
use crate::raster::{BitBitmap, RasterImage};

/// Default cutoff for Floyd-Steinberg and threshold modes.
pub const DEFAULT_THRESHOLD: u8 = 128;

/// 4x4 Bayer threshold matrix, indexed `[y % 4][x % 4]`.
pub const BAYER4: [[u8; 4]; 4] = [
    [0, 8, 2, 10],
    [12, 4, 14, 6],
    [3, 11, 1, 9],
    [15, 7, 13, 5],
];

/// Scale from a Bayer cell value to a 0-255 threshold.
const BAYER_SCALE: f32 = 255.0 / 16.0;

/// Halftoning algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DitherMode {
    /// Bayer ordered dithering. Fast, used for previews.
    Ordered,
    /// Floyd-Steinberg error diffusion. Used for print composites.
    #[default]
    FloydSteinberg,
    /// Single global cutoff.
    Threshold,
}

impl FromStr for DitherMode {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ordered" | "bayer" => Ok(Self::Ordered),
            "floyd-steinberg" | "floyd_steinberg" | "floydsteinberg" | "fs" => {
                Ok(Self::FloydSteinberg)
            }
            "threshold" | "none" => Ok(Self::Threshold),
            other => Err(ImageError::UnknownDitherMode(other.to_string())),
        }
    }
}

impl fmt::Display for DitherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ordered => "ordered",
            Self::FloydSteinberg => "floyd-steinberg",
            Self::Threshold => "threshold",
        };
        f.write_str(name)
    }
}

/// Tunables shared by the threshold-based modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DitherParams {
    /// Values strictly below this become black.
    pub threshold: u8,
}

impl Default for DitherParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Halftone `image` into a 1-bit bitmap.
///
/// The raster is consumed in place: on return its buffer holds the
/// quantized levels (0 or 255), which can be shown as a preview.
pub fn dither(image: &mut RasterImage, mode: DitherMode, params: DitherParams) -> BitBitmap {
    let (width, height) = (image.width(), image.height());
    debug!(width, height, %mode, threshold = params.threshold, "Dithering raster");

    let bits = match mode {
        DitherMode::Ordered => ordered_bits(image),
        DitherMode::FloydSteinberg => floyd_steinberg_bits(image, params.threshold),
        DitherMode::Threshold => threshold_bits(image, params.threshold),
    };

    for (px, &bit) in image.pixels_mut().iter_mut().zip(&bits) {
        *px = if bit != 0 { 0 } else { 255 };
    }

    BitBitmap::from_raw(width, height, bits)
}

/// Threshold for pixel (x, y) under the 4x4 Bayer matrix.
#[inline]
pub fn bayer_threshold(x: u32, y: u32) -> f32 {
    f32::from(BAYER4[(y % 4) as usize][(x % 4) as usize]) * BAYER_SCALE
}

fn ordered_bits(image: &RasterImage) -> Vec<u8> {
    let width = image.width() as usize;
    image
        .pixels()
        .iter()
        .enumerate()
        .map(|(i, &lum)| {
            let x = (i % width) as u32;
            let y = (i / width) as u32;
            u8::from(f32::from(lum) < bayer_threshold(x, y))
        })
        .collect()
}

fn threshold_bits(image: &RasterImage, threshold: u8) -> Vec<u8> {
    image
        .pixels()
        .iter()
        .map(|&lum| u8::from(lum < threshold))
        .collect()
}

/// Floyd-Steinberg error diffusion.
///
/// Carried error lives in two row buffers (current and next). Shares that
/// would land outside the canvas are dropped.
fn floyd_steinberg_bits(image: &RasterImage, threshold: u8) -> Vec<u8> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let src = image.pixels();
    let threshold = f32::from(threshold);

    let mut bits = vec![0u8; width * height];
    let mut current = vec![0f32; width];
    let mut next = vec![0f32; width];

    for y in 0..height {
        let has_next_row = y + 1 < height;
        for x in 0..width {
            let value = (f32::from(src[y * width + x]) + current[x]).clamp(0.0, 255.0);
            let quantized = if value < threshold {
                bits[y * width + x] = 1;
                0.0
            } else {
                255.0
            };
            let error = value - quantized;

            // Right: 7/16
            if x + 1 < width {
                current[x + 1] += error * 7.0 / 16.0;
            }
            if has_next_row {
                // Bottom-left: 3/16
                if x > 0 {
                    next[x - 1] += error * 3.0 / 16.0;
                }
                // Bottom: 5/16
                next[x] += error * 5.0 / 16.0;
                // Bottom-right: 1/16
                if x + 1 < width {
                    next[x + 1] += error / 16.0;
                }
            }
        }
        std::mem::swap(&mut current, &mut next);
        next.fill(0.0);
    }

    bits
}
