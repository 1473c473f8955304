//! Frame source trait for image producers

use serde::Serialize;

use crate::Result;
use crate::types::RawImage;

/// Which kind of producer backs a frame source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceKind {
    /// Live camera
    Device,
    /// Looping video file
    File,
    /// Anything else (test doubles, synthetic generators)
    Other,
}

/// Trait for raw image producers
///
/// Sources abstract over live cameras and looping files and handle their own
/// pacing: a camera blocks until the sensor delivers, a file sleeps until the
/// next frame is due. A source is owned by exactly one acquisition loop.
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    /// Prepare the source for `next_raw_image`
    async fn start(&mut self) -> Result<()>;

    /// Get the next raw image
    ///
    /// Returns:
    /// - `Ok(Some(image))` - New image available
    /// - `Ok(None)` - Nothing this time (grab failed, not grabbing yet)
    /// - `Err(e)` - The attempt failed
    ///
    /// Neither `Ok(None)` nor `Err` means the source is gone; only
    /// [`is_available`](Self::is_available) decides that.
    async fn next_raw_image(&mut self) -> Result<Option<RawImage>>;

    /// Whether the source can still produce images
    fn is_available(&self) -> bool;

    /// Release the underlying device or file
    async fn stop(&mut self);

    /// What backs this source
    fn kind(&self) -> SourceKind {
        SourceKind::Other
    }

    /// Native frame rate in Hz, if known
    fn frame_rate(&self) -> Option<f64> {
        None
    }
}

#[async_trait::async_trait]
impl FrameSource for Box<dyn FrameSource> {
    async fn start(&mut self) -> Result<()> {
        (**self).start().await
    }

    async fn next_raw_image(&mut self) -> Result<Option<RawImage>> {
        (**self).next_raw_image().await
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    async fn stop(&mut self) {
        (**self).stop().await
    }

    fn kind(&self) -> SourceKind {
        (**self).kind()
    }

    fn frame_rate(&self) -> Option<f64> {
        (**self).frame_rate()
    }
}
