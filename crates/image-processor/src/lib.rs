//! Image processing for thermal printer output.
//!
//! Turns an arbitrary RGBA image into a grayscale [`RasterImage`] at the
//! printer's pixel width, then halftones it into a 1-bit [`BitBitmap`]
//! using ordered (Bayer), Floyd-Steinberg or plain threshold conversion.

pub mod dither;
pub mod preprocess;
pub mod raster;

// Re-exports for convenience
pub use dither::{DitherMode, DitherParams, dither};
pub use preprocess::{PreprocessOptions, decode_bytes, decode_data_url, preprocess};
pub use raster::{BitBitmap, RasterImage};

/// Standard 58mm thermal paper width in pixels (203 DPI).
pub const PAPER_WIDTH: u32 = 384;

/// Errors that can occur while preparing an image for printing.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Buffer length mismatch: expected {expected} bytes for {width}x{height}, got {actual}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Image has no pixels")]
    Empty,

    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Unknown dither mode: {0}")]
    UnknownDitherMode(String),
}

/// Result type alias for image-processor operations.
pub type Result<T> = std::result::Result<T, ImageError>;
