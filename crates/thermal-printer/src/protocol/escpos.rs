//! ESC/POS bit-image raster encoder.
//!
//! Uses `ESC *` in 8-dot single-density mode: each column of an 8-row
//! block is one byte, MSB = top row.
//!
//! Stream layout:
//! `ESC @` | `ESC a 1` | (`ESC * 0 wL wH` + W bytes + LF) per block | LF x3 | `GS V 0`

use image_processor::BitBitmap;

use super::{BLOCK_ROWS, PrinterModel, PrinterProtocol};

// -- Command bytes --
pub const CMD_INIT: [u8; 2] = [0x1b, 0x40];
pub const CMD_ALIGN_CENTER: [u8; 3] = [0x1b, 0x61, 0x01];
/// `ESC *` with mode 0x00 (8-dot single density).
pub const CMD_RASTER_HEADER: [u8; 3] = [0x1b, 0x2a, 0x00];
pub const LF: u8 = 0x0a;
pub const CMD_CUT: [u8; 3] = [0x1d, 0x56, 0x00];

/// Line feeds emitted before the cut.
pub const DEFAULT_FEED_LINES: u8 = 3;

/// ESC/POS raster encoder with per-model overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscPosProtocol {
    /// Line feeds after the last block (2-3 for the supported models).
    pub feed_lines: u8,
    /// Emit the cut command. Printers without a cutter ignore it, but some
    /// firmware prints garbage for unknown commands.
    pub cut: bool,
}

impl Default for EscPosProtocol {
    fn default() -> Self {
        Self {
            feed_lines: DEFAULT_FEED_LINES,
            cut: true,
        }
    }
}

impl EscPosProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoder configured for a known printer model.
    pub fn for_model(model: &PrinterModel) -> Self {
        Self {
            feed_lines: model.feed_lines,
            cut: model.cut,
        }
    }

    /// Size in bytes of one encoded block for a bitmap of `width` pixels.
    pub fn block_len(width: u32) -> usize {
        CMD_RASTER_HEADER.len() + 2 + width as usize + 1
    }

    /// Total encoded size for a `width` x `height` bitmap.
    pub fn encoded_len(&self, width: u32, height: u32) -> usize {
        let blocks = height.div_ceil(BLOCK_ROWS) as usize;
        let finish = self.feed_lines as usize + if self.cut { CMD_CUT.len() } else { 0 };
        CMD_INIT.len() + CMD_ALIGN_CENTER.len() + blocks * Self::block_len(width) + finish
    }
}

/// Pack rows `y..y+8` of column `x` into one byte, MSB = row `y`.
/// Rows past the bottom edge are white.
pub fn pack_column(bitmap: &BitBitmap, x: u32, y: u32) -> u8 {
    let mut byte = 0u8;
    for bit in 0..BLOCK_ROWS {
        let row = y + bit;
        if row < bitmap.height() && bitmap.get(x, row) != 0 {
            byte |= 0x80 >> bit;
        }
    }
    byte
}

impl PrinterProtocol for EscPosProtocol {
    fn name(&self) -> &str {
        "ESC/POS"
    }

    fn build_init_sequence(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CMD_INIT.len() + CMD_ALIGN_CENTER.len());
        out.extend_from_slice(&CMD_INIT);
        out.extend_from_slice(&CMD_ALIGN_CENTER);
        out
    }

    fn encode_block(&self, bitmap: &BitBitmap, y: u32) -> Vec<u8> {
        let width = bitmap.width();
        let mut out = Vec::with_capacity(Self::block_len(width));
        out.extend_from_slice(&CMD_RASTER_HEADER);
        out.extend_from_slice(&(width as u16).to_le_bytes());
        out.extend((0..width).map(|x| pack_column(bitmap, x, y)));
        out.push(LF);
        out
    }

    fn build_finish_sequence(&self) -> Vec<u8> {
        let mut out = vec![LF; self.feed_lines as usize];
        if self.cut {
            out.extend_from_slice(&CMD_CUT);
        }
        out
    }
}
