//! Raw image to encoded payload conversion

use bytes::Bytes;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;

use crate::types::{EncodedFrame, PixelFormat, RawImage};
use crate::{Result, StreamError};

/// Converts raw images into the payload viewers receive
///
/// Encoding is CPU bound; the acquisition loop calls it on a blocking thread.
pub trait FrameEncoder: Send + Sync + 'static {
    /// Encode one image
    fn encode(&self, image: &RawImage) -> Result<Bytes>;

    /// MIME type of the encoded payload
    fn content_type(&self) -> &'static str {
        "image/jpeg"
    }

    /// Encode and wrap into an unpublished frame
    fn encode_frame(&self, image: &RawImage) -> Result<EncodedFrame> {
        let data = self.encode(image)?;
        Ok(EncodedFrame::new(data, image.width(), image.height()))
    }
}

/// Baseline JPEG encoder backed by the `image` crate
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    /// Create an encoder with the given quality (clamped to 1-100)
    pub fn new(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(85)
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, image: &RawImage) -> Result<Bytes> {
        let (pixels, color) = match image.format() {
            PixelFormat::Mono8 => (image.data().to_vec(), ExtendedColorType::L8),
            PixelFormat::Rgb8 => (image.data().to_vec(), ExtendedColorType::Rgb8),
            PixelFormat::Bgr8 => {
                let mut rgb = image.data().to_vec();
                for px in rgb.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
                (rgb, ExtendedColorType::Rgb8)
            }
        };

        let mut jpeg = Vec::with_capacity(pixels.len() / 8);
        ImageJpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode(&pixels, image.width(), image.height(), color)
            .map_err(|e| StreamError::encode_error(e.to_string()))?;

        Ok(Bytes::from(jpeg))
    }
}
