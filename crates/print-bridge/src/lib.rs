//! Message bridge between a UI client and the printer session.
//!
//! The client speaks `{type, data}` JSON envelopes. Large dithered bitmaps
//! travel base64-encoded in 5,000-character chunks and are reassembled by
//! sequence number before printing. [`BridgeHost`] dispatches requests to a
//! [`thermal_printer::PrinterDevice`] and publishes results and session
//! events back as [`BridgeEvent`]s.

pub mod chunked;
pub mod host;
pub mod message;

// Re-exports for convenience
pub use chunked::{CHUNK_CHARS, CHUNK_STAGGER, Reassembler, decode_bitmap, encode_bitmap, split_payload};
pub use host::{BridgeHost, ImagePipeline};
pub use message::{BridgeEvent, BridgeRequest, ErrorReport};

use image_processor::ImageError;
use thermal_printer::PrinterError;

/// Errors raised while decoding or reassembling bridge traffic.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Invalid bridge message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Chunk {index} is out of range for a {total}-chunk transfer")]
    ChunkOutOfRange { index: usize, total: usize },

    #[error("Last chunk index {last} does not match total chunk count {total}")]
    ChunkCountMismatch { last: usize, total: usize },

    #[error("Bitmap has zero size ({width}x{height})")]
    EmptyBitmap { width: u32, height: u32 },

    #[error("Bitmap payload is {actual} bytes; expected {unpacked} (one per pixel) or {packed} (packed rows) for {width}x{height}")]
    PayloadLength {
        width: u32,
        height: u32,
        unpacked: usize,
        packed: usize,
        actual: usize,
    },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Printer(#[from] PrinterError),

    #[error("Image task failed: {0}")]
    Task(String),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
