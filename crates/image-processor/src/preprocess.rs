//! Image preparation before halftoning.
//!
//! Decodes data URLs, orients and resizes to the printer width, flattens
//! transparency onto white paper, converts to grayscale and optionally
//! sharpens and gamma-corrects the result.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, RgbaImage};
use tracing::debug;

use crate::raster::RasterImage;
use crate::{ImageError, PAPER_WIDTH, Result};

/// Options controlling [`preprocess`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessOptions {
    /// Output width in pixels; height follows the aspect ratio.
    pub target_width: u32,
    /// Unsharp-mask blur radius. `None` disables sharpening.
    pub sharpen_sigma: Option<f32>,
    /// Unsharp-mask difference threshold.
    pub sharpen_threshold: i32,
    /// Gamma exponent applied as `255 * (v / 255) ^ gamma`.
    pub gamma: Option<f32>,
    /// Rotate landscape input to portrait for better resolution.
    pub auto_rotate: bool,
    /// Rotate the result 180 degrees (for upside-down printers).
    pub rotate_180: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            target_width: PAPER_WIDTH,
            sharpen_sigma: None,
            sharpen_threshold: 0,
            gamma: None,
            auto_rotate: false,
            rotate_180: false,
        }
    }
}

impl PreprocessOptions {
    pub fn new(target_width: u32) -> Self {
        Self {
            target_width,
            ..Self::default()
        }
    }

    /// Builder: enable unsharp-mask sharpening.
    pub fn with_sharpen(mut self, sigma: f32, threshold: i32) -> Self {
        self.sharpen_sigma = (sigma > 0.0).then_some(sigma);
        self.sharpen_threshold = threshold;
        self
    }

    /// Builder: set gamma. A value of 1.0 disables correction.
    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = (gamma > 0.0 && (gamma - 1.0).abs() > f32::EPSILON).then_some(gamma);
        self
    }

    /// Builder: set auto-rotate flag.
    pub fn with_auto_rotate(mut self, val: bool) -> Self {
        self.auto_rotate = val;
        self
    }

    /// Builder: set 180-degree rotation flag.
    pub fn with_rotate_180(mut self, val: bool) -> Self {
        self.rotate_180 = val;
        self
    }
}

/// Decode a `data:<mime>;base64,<payload>` URL (or bare base64) into an image.
pub fn decode_data_url(url: &str) -> Result<DynamicImage> {
    let payload = match url.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| ImageError::InvalidDataUrl("missing ',' separator".into()))?;
            if !header.ends_with(";base64") {
                return Err(ImageError::InvalidDataUrl(format!(
                    "unsupported encoding in header '{header}'"
                )));
            }
            data
        }
        None => url,
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ImageError::InvalidDataUrl(e.to_string()))?;
    decode_bytes(&bytes)
}

/// Decode an encoded image file (PNG, JPEG, ...) from memory.
pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage> {
    let img = image::load_from_memory(bytes)?;
    debug!(
        width = img.width(),
        height = img.height(),
        "Decoded image"
    );
    Ok(img)
}

/// Convert an arbitrary image into a grayscale raster ready for dithering.
pub fn preprocess(img: &DynamicImage, options: &PreprocessOptions) -> Result<RasterImage> {
    if img.width() == 0 || img.height() == 0 || options.target_width == 0 {
        return Err(ImageError::Empty);
    }

    let oriented = if options.auto_rotate && img.width() > img.height() {
        debug!(w = img.width(), h = img.height(), "Landscape input, rotating to portrait");
        img.rotate90()
    } else {
        img.clone()
    };

    let resized = resize_to_width(&oriented, options.target_width);
    let mut gray = flatten_to_gray(&resized.to_rgba8());

    if let Some(sigma) = options.sharpen_sigma {
        debug!(sigma, threshold = options.sharpen_threshold, "Sharpening");
        gray = image::imageops::unsharpen(&gray, sigma, options.sharpen_threshold);
    }

    if let Some(gamma) = options.gamma {
        apply_gamma(&mut gray, gamma);
    }

    if options.rotate_180 {
        image::imageops::rotate180_in_place(&mut gray);
    }

    Ok(RasterImage::from_gray(&gray))
}

/// Resize to `width` keeping the aspect ratio. Skips work when already there.
fn resize_to_width(img: &DynamicImage, width: u32) -> DynamicImage {
    let (orig_w, orig_h) = (img.width(), img.height());
    if orig_w == width {
        return img.clone();
    }

    let ratio = f64::from(width) / f64::from(orig_w);
    let new_height = ((f64::from(orig_h) * ratio).round() as u32).max(1);
    debug!(orig_w, orig_h, width, new_height, "Resizing to printer width");
    img.resize_exact(width, new_height, FilterType::Lanczos3)
}

/// Composite onto white paper and convert to Rec.601 luma.
fn flatten_to_gray(rgba: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = f32::from(a) / 255.0;
        let blend = |c: u8| f32::from(c) * alpha + 255.0 * (1.0 - alpha);
        let luma = 0.299 * blend(r) + 0.587 * blend(g) + 0.114 * blend(b);
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

fn apply_gamma(gray: &mut GrayImage, gamma: f32) {
    let lut: Vec<u8> = (0..=255u16)
        .map(|v| {
            let normalized = f32::from(v) / 255.0;
            (normalized.powf(gamma) * 255.0).round().clamp(0.0, 255.0) as u8
        })
        .collect();
    for px in gray.pixels_mut() {
        px.0[0] = lut[px.0[0] as usize];
    }
}
