//! Paced chunk writer.
//!
//! Cheap thermal printers have tiny receive buffers and drop or corrupt
//! data under back-to-back writes, so every payload is split to the
//! per-write limit and a delay is inserted between writes. Smaller chunks
//! get a longer delay.

use std::time::Duration;

use crate::transport::{BleTransport, CharacteristicInfo, WriteMode};
use crate::{PrinterError, Result};

/// Pacing delay for chunks at or above [`FAST_CHUNK_BYTES`].
pub const MIN_PACING: Duration = Duration::from_millis(20);
/// Pacing delay for chunks at or below [`SLOW_CHUNK_BYTES`].
pub const MAX_PACING: Duration = Duration::from_millis(50);

const SLOW_CHUNK_BYTES: usize = 20;
const FAST_CHUNK_BYTES: usize = 512;

/// Delay between writes for a given chunk size.
pub fn pacing_delay(chunk_size: usize) -> Duration {
    if chunk_size <= SLOW_CHUNK_BYTES {
        return MAX_PACING;
    }
    if chunk_size >= FAST_CHUNK_BYTES {
        return MIN_PACING;
    }
    let span_ms = (MAX_PACING - MIN_PACING).as_millis() as usize;
    let over = chunk_size - SLOW_CHUNK_BYTES;
    let range = FAST_CHUNK_BYTES - SLOW_CHUNK_BYTES;
    let reduce = span_ms * over / range;
    MAX_PACING - Duration::from_millis(reduce as u64)
}

/// Split `payload` into ordered chunks of at most `limit` bytes.
pub fn split(payload: &[u8], limit: usize) -> Vec<&[u8]> {
    payload.chunks(limit.max(1)).collect()
}

/// Where a paced write currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteProgress {
    pub chunks_written: usize,
    pub chunk_count: usize,
    pub bytes_written: usize,
    pub total_bytes: usize,
}

/// Write `data` to a characteristic in chunks of `chunk_size`, pacing the
/// writes and reporting progress after each chunk.
///
/// Chunks already written are not rolled back when a later write fails.
pub async fn write_paced<F>(
    transport: &dyn BleTransport,
    device_id: &str,
    characteristic: &CharacteristicInfo,
    mode: WriteMode,
    data: &[u8],
    chunk_size: usize,
    mut on_progress: F,
) -> Result<()>
where
    F: FnMut(WriteProgress) + Send,
{
    let chunks = split(data, chunk_size);
    let delay = pacing_delay(chunk_size);
    tracing::debug!(
        chunk_count = chunks.len(),
        chunk_size,
        total_bytes = data.len(),
        delay_ms = delay.as_millis() as u64,
        "Writing data in chunks"
    );

    let mut bytes_written = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(delay).await;
        }
        transport
            .write(device_id, characteristic, chunk, mode)
            .await
            .map_err(|e| {
                let reason = match e {
                    PrinterError::BleWrite(msg) => msg,
                    other => other.to_string(),
                };
                PrinterError::BleWrite(format!("chunk {}/{}: {reason}", i + 1, chunks.len()))
            })?;
        bytes_written += chunk.len();
        on_progress(WriteProgress {
            chunks_written: i + 1,
            chunk_count: chunks.len(),
            bytes_written,
            total_bytes: data.len(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_curve() {
        assert_eq!(pacing_delay(1), MAX_PACING);
        assert_eq!(pacing_delay(20), MAX_PACING);
        assert_eq!(pacing_delay(512), MIN_PACING);
        assert_eq!(pacing_delay(4096), MIN_PACING);

        let mid = pacing_delay(266);
        assert!(mid > MIN_PACING && mid < MAX_PACING);
        assert!(pacing_delay(100) >= pacing_delay(200));
    }

    #[test]
    fn test_split_full_and_partial_chunks() {
        let payload: Vec<u8> = (0..45).collect();
        let chunks = split(&payload, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(chunks[2].len(), 5);
        assert_eq!(chunks.concat(), payload);
    }

    #[test]
    fn test_split_zero_limit_does_not_panic() {
        assert_eq!(split(&[1, 2], 0).len(), 2);
    }
}
