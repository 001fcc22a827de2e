//! Chunked bitmap transfer.
//!
//! A dithered bitmap is base64-encoded and split into [`CHUNK_CHARS`]
//! character chunks. Chunk 0 rides in the START frame together with the
//! dimensions; the rest follow as CHUNK frames. The receiver buffers chunks
//! by index, so frames may arrive in any order (CHUNK before START
//! included), and decodes once the last chunk and every index before it
//! are present.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image_processor::BitBitmap;

use crate::message::{BitmapChunk, BitmapStart, BridgeRequest};
use crate::{BridgeError, Result};

/// Base64 characters per frame.
pub const CHUNK_CHARS: usize = 5000;

/// Sender-side delay between consecutive frames.
pub const CHUNK_STAGGER: Duration = Duration::from_millis(10);

/// Split `s` into pieces of at most `n` characters.
fn split_chars(s: &str, n: usize) -> Vec<&str> {
    let n = n.max(1);
    let mut out = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let end = rest.char_indices().nth(n).map_or(rest.len(), |(i, _)| i);
        let (head, tail) = rest.split_at(end);
        out.push(head);
        rest = tail;
    }
    out
}

/// Frame a base64 payload as START + CHUNK requests.
pub fn split_payload(width: u32, height: u32, payload_base64: &str) -> Vec<BridgeRequest> {
    let mut pieces = split_chars(payload_base64, CHUNK_CHARS);
    if pieces.is_empty() {
        pieces.push("");
    }
    let total_chunks = pieces.len();

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let is_last = index + 1 == total_chunks;
            if index == 0 {
                BridgeRequest::PrintDitheredBitmapStart(BitmapStart {
                    width,
                    height,
                    total_chunks,
                    chunk_index: 0,
                    bitmap_base64: piece.to_string(),
                    is_last,
                })
            } else {
                BridgeRequest::PrintDitheredBitmapChunk(BitmapChunk {
                    bitmap_base64: piece.to_string(),
                    chunk_index: index,
                    is_last,
                })
            }
        })
        .collect()
}

/// Frame a bitmap for transfer using the packed-row payload.
pub fn encode_bitmap(bitmap: &BitBitmap) -> Vec<BridgeRequest> {
    let payload = BASE64.encode(bitmap.to_packed_rows());
    split_payload(bitmap.width(), bitmap.height(), &payload)
}

/// Decode a reassembled payload. Accepts one byte per pixel (nonzero is
/// black) or MSB-first packed rows.
pub fn decode_bitmap(width: u32, height: u32, payload_base64: &str) -> Result<BitBitmap> {
    if width == 0 || height == 0 {
        return Err(BridgeError::EmptyBitmap { width, height });
    }

    let bytes = BASE64.decode(payload_base64.trim())?;
    let unpacked = width as usize * height as usize;
    let packed = BitBitmap::packed_stride(width) * height as usize;

    if bytes.len() == unpacked {
        Ok(BitBitmap::new(width, height, bytes)?)
    } else if bytes.len() == packed {
        Ok(BitBitmap::from_packed_rows(width, height, &bytes)?)
    } else {
        Err(BridgeError::PayloadLength {
            width,
            height,
            unpacked,
            packed,
            actual: bytes.len(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    width: u32,
    height: u32,
    total_chunks: usize,
}

/// Receiver-side reassembly of one transfer at a time.
#[derive(Debug, Default)]
pub struct Reassembler {
    header: Option<Header>,
    chunks: BTreeMap<usize, String>,
    last_index: Option<usize>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transfer has started or has buffered chunks.
    pub fn in_progress(&self) -> bool {
        self.header.is_some() || !self.chunks.is_empty()
    }

    pub fn reset(&mut self) {
        self.header = None;
        self.chunks.clear();
        self.last_index = None;
    }

    /// Feed a START frame. Returns the bitmap once the transfer is complete.
    pub fn start(&mut self, start: BitmapStart) -> Result<Option<BitBitmap>> {
        if self.header.is_some() {
            tracing::warn!(
                buffered = self.chunks.len(),
                "New bitmap transfer started before the previous one completed"
            );
            self.reset();
        }

        self.header = Some(Header {
            width: start.width,
            height: start.height,
            total_chunks: start.total_chunks.max(1),
        });
        // Drop anything buffered ahead of this START that cannot belong to it.
        let total = start.total_chunks.max(1);
        self.chunks.retain(|&i, _| i < total);
        if self.last_index.is_some_and(|i| i >= total) {
            self.last_index = None;
        }

        tracing::debug!(
            width = start.width,
            height = start.height,
            total_chunks = start.total_chunks,
            "Bitmap transfer started"
        );
        self.feed(start.chunk_index, start.bitmap_base64, start.is_last)
    }

    /// Feed a CHUNK frame. Returns the bitmap once the transfer is complete.
    pub fn chunk(&mut self, chunk: BitmapChunk) -> Result<Option<BitBitmap>> {
        self.feed(chunk.chunk_index, chunk.bitmap_base64, chunk.is_last)
    }

    fn feed(&mut self, index: usize, data: String, is_last: bool) -> Result<Option<BitBitmap>> {
        if let Some(header) = self.header
            && index >= header.total_chunks
        {
            self.reset();
            return Err(BridgeError::ChunkOutOfRange {
                index,
                total: header.total_chunks,
            });
        }

        if self.chunks.insert(index, data).is_some() {
            tracing::debug!(index, "Duplicate bitmap chunk replaced");
        }
        if is_last {
            self.last_index = Some(index);
        }

        let result = self.try_complete();
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn try_complete(&mut self) -> Result<Option<BitBitmap>> {
        let (Some(header), Some(last)) = (self.header, self.last_index) else {
            return Ok(None);
        };
        if last + 1 != header.total_chunks {
            return Err(BridgeError::ChunkCountMismatch {
                last,
                total: header.total_chunks,
            });
        }
        if (0..header.total_chunks).any(|i| !self.chunks.contains_key(&i)) {
            return Ok(None);
        }

        let payload: String = std::mem::take(&mut self.chunks).into_values().collect();
        self.reset();
        tracing::debug!(
            chunks = header.total_chunks,
            chars = payload.len(),
            "Bitmap transfer complete"
        );
        decode_bitmap(header.width, header.height, &payload).map(Some)
    }
}
