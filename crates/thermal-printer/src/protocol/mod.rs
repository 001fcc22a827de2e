//! Printer command protocol definitions.
//!
//! All supported printers speak the ESC/POS raster image command family.
//! Per-model differences (paper width, feed length, cutter) are captured
//! in the [`models`] table and applied as overrides on [`EscPosProtocol`].

pub mod escpos;
pub mod models;

pub use escpos::EscPosProtocol;
pub use models::{CANDIDATE_SERVICES, KNOWN_MODELS, PrinterModel, find_model};

use image_processor::BitBitmap;

use crate::{PrinterError, Result};

/// Rows covered by one raster block.
pub const BLOCK_ROWS: u32 = 8;

/// Trait defining the interface for printer command encoders.
pub trait PrinterProtocol: Send + Sync {
    /// Human-readable protocol name.
    fn name(&self) -> &str;

    /// Commands sent once before the first raster block.
    fn build_init_sequence(&self) -> Vec<u8>;

    /// Encode the 8-row block starting at row `y`, including its header
    /// and trailing line feed.
    fn encode_block(&self, bitmap: &BitBitmap, y: u32) -> Vec<u8>;

    /// Commands sent after the last raster block (feed, cut).
    fn build_finish_sequence(&self) -> Vec<u8>;

    /// Encode a whole bitmap into a printer command stream.
    fn encode(&self, bitmap: &BitBitmap) -> Result<Vec<u8>> {
        if bitmap.width() == 0 || bitmap.height() == 0 {
            return Err(PrinterError::InvalidBitmap("bitmap is empty".into()));
        }
        if bitmap.width() > u32::from(u16::MAX) {
            return Err(PrinterError::InvalidBitmap(format!(
                "width {} exceeds the 16-bit raster width field",
                bitmap.width()
            )));
        }

        let mut out = self.build_init_sequence();
        let mut y = 0;
        while y < bitmap.height() {
            out.extend_from_slice(&self.encode_block(bitmap, y));
            y += BLOCK_ROWS;
        }
        out.extend_from_slice(&self.build_finish_sequence());

        tracing::debug!(
            protocol = self.name(),
            width = bitmap.width(),
            height = bitmap.height(),
            bytes = out.len(),
            "Encoded raster command stream"
        );
        Ok(out)
    }
}
