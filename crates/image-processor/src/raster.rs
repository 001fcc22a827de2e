//! Pixel buffers passed between the preprocessing, halftone and encoding stages.

use image::{GrayImage, Luma};

use crate::{ImageError, Result};

/// Grayscale raster, one intensity byte per pixel (0 = black, 255 = white).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterImage {
    /// Wrap a row-major grayscale buffer. The buffer must hold exactly
    /// `width * height` bytes.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        check_len(width, height, pixels.len())?;
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A raster with every pixel set to `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width as usize * height as usize],
        }
    }

    pub fn from_gray(img: &GrayImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            pixels: img.as_raw().clone(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        let idx = y as usize * self.width as usize + x as usize;
        self.pixels[idx] = value;
    }
}

/// 1-bit bitmap stored one byte per pixel (1 = black, 0 = white).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBitmap {
    width: u32,
    height: u32,
    bits: Vec<u8>,
}

impl BitBitmap {
    /// Build a bitmap from one byte per pixel. Any nonzero byte is black.
    pub fn new(width: u32, height: u32, bits: Vec<u8>) -> Result<Self> {
        check_len(width, height, bits.len())?;
        let bits = bits.into_iter().map(|b| u8::from(b != 0)).collect();
        Ok(Self {
            width,
            height,
            bits,
        })
    }

    /// Caller guarantees `bits.len() == width * height` and values in {0, 1}.
    pub(crate) fn from_raw(width: u32, height: u32, bits: Vec<u8>) -> Self {
        debug_assert_eq!(bits.len(), width as usize * height as usize);
        Self {
            width,
            height,
            bits,
        }
    }

    /// An all-white bitmap.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![0; width as usize * height as usize],
        }
    }

    /// Unpack rows of MSB-first packed bits (`ceil(width / 8)` bytes per row).
    pub fn from_packed_rows(width: u32, height: u32, packed: &[u8]) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ImageError::Empty);
        }
        let stride = Self::packed_stride(width);
        let expected = stride * height as usize;
        if packed.len() != expected {
            return Err(ImageError::BufferSize {
                width,
                height,
                expected,
                actual: packed.len(),
            });
        }

        let mut out = Self::blank(width, height);
        for (y, row) in packed.chunks(stride).enumerate() {
            for x in 0..width as usize {
                let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
                out.bits[y * width as usize + x] = bit;
            }
        }
        Ok(out)
    }

    /// Pack rows MSB-first, padding the last byte of each row with white.
    pub fn to_packed_rows(&self) -> Vec<u8> {
        let stride = Self::packed_stride(self.width);
        let mut out = vec![0u8; stride * self.height as usize];
        for y in 0..self.height as usize {
            for x in 0..self.width as usize {
                if self.bits[y * self.width as usize + x] != 0 {
                    out[y * stride + x / 8] |= 0x80 >> (x % 8);
                }
            }
        }
        out
    }

    /// Bytes per packed row.
    pub fn packed_stride(width: u32) -> usize {
        (width as usize).div_ceil(8)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    /// Pixel value at (x, y); 1 = black.
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.bits[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, black: bool) {
        let idx = y as usize * self.width as usize + x as usize;
        self.bits[idx] = u8::from(black);
    }

    pub fn black_count(&self) -> usize {
        self.bits.iter().filter(|&&b| b != 0).count()
    }

    /// Rotate 180 degrees, for printers that feed paper upside down.
    pub fn rotate_180(&self) -> Self {
        let mut bits = self.bits.clone();
        bits.reverse();
        Self {
            width: self.width,
            height: self.height,
            bits,
        }
    }

    /// Render as a black/white grayscale image for previews.
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) != 0 { 0 } else { 255 }])
        })
    }
}

fn check_len(width: u32, height: u32, actual: usize) -> Result<()> {
    let expected = width as usize * height as usize;
    if actual != expected {
        return Err(ImageError::BufferSize {
            width,
            height,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_rejects_wrong_length() {
        let err = RasterImage::new(4, 4, vec![0; 15]).unwrap_err();
        assert!(matches!(
            err,
            ImageError::BufferSize {
                expected: 16,
                actual: 15,
                ..
            }
        ));
    }

    #[test]
    fn test_bitmap_normalizes_nonzero_to_black() {
        let bmp = BitBitmap::new(3, 1, vec![0, 255, 7]).unwrap();
        assert_eq!(bmp.bits(), &[0, 1, 1]);
    }

    #[test]
    fn test_packed_rows_msb_first() {
        let mut bmp = BitBitmap::blank(10, 2);
        bmp.set(0, 0, true);
        bmp.set(9, 1, true);

        let packed = bmp.to_packed_rows();
        assert_eq!(packed, vec![0x80, 0x00, 0x00, 0x40]);

        let unpacked = BitBitmap::from_packed_rows(10, 2, &packed).unwrap();
        assert_eq!(unpacked, bmp);
    }

    #[test]
    fn test_from_packed_rows_rejects_short_buffer() {
        assert!(BitBitmap::from_packed_rows(16, 2, &[0, 0, 0]).is_err());
    }

    #[test]
    fn test_from_packed_rows_rejects_zero_dimensions() {
        assert!(matches!(
            BitBitmap::from_packed_rows(0, 4, &[]),
            Err(ImageError::Empty)
        ));
        assert!(matches!(
            BitBitmap::from_packed_rows(8, 0, &[]),
            Err(ImageError::Empty)
        ));
    }

    #[test]
    fn test_rotate_180_moves_corner() {
        let mut bmp = BitBitmap::blank(3, 2);
        bmp.set(0, 0, true);
        let rotated = bmp.rotate_180();
        assert_eq!(rotated.get(2, 1), 1);
        assert_eq!(rotated.get(0, 0), 0);
        assert_eq!(rotated.black_count(), 1);
    }

    #[test]
    fn test_to_gray_image_maps_black_to_zero() {
        let bmp = BitBitmap::new(2, 1, vec![1, 0]).unwrap();
        let img = bmp.to_gray_image();
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(1, 0).0[0], 255);
    }
}
