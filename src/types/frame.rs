//! Encoded frame type shared with viewers

use std::time::Instant;

use bytes::Bytes;

/// Encoded frame ready to be forwarded to viewers
///
/// This is the unit that flows from the acquisition loop through the frame
/// slot to every stream session. Cloning is cheap: the payload is reference
/// counted, so all viewers share one allocation.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Encoded payload (JPEG for the bundled encoder)
    pub data: Bytes,

    /// Slot version this frame was published under, strictly increasing
    pub version: u64,

    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// When the raw image was handed to the encoder
    pub captured_at: Instant,
}

impl EncodedFrame {
    /// Create an unpublished frame
    ///
    /// The version is assigned by the frame slot when the frame is published.
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self { data: data.into(), version: 0, width, height, captured_at: Instant::now() }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
