//! Uncompressed images produced by frame sources

use crate::{Result, StreamError};

/// Pixel layout of a raw image buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit grayscale
    Mono8,
    /// Packed 8-bit red, green, blue
    Rgb8,
    /// Packed 8-bit blue, green, red (what most camera converters emit)
    Bgr8,
}

impl PixelFormat {
    /// Bytes used by one pixel
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

/// Uncompressed image handed from a frame source to the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl RawImage {
    /// Create a raw image, checking the buffer matches the dimensions
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if width == 0 || height == 0 {
            return Err(StreamError::InvalidImage {
                details: format!("zero-sized image {}x{}", width, height),
            });
        }
        if data.len() != expected {
            return Err(StreamError::InvalidImage {
                details: format!(
                    "{}x{} {:?} needs {} bytes, got {}",
                    width,
                    height,
                    format,
                    expected,
                    data.len()
                ),
            });
        }

        Ok(Self { width, height, format, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the image, returning the pixel buffer
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
