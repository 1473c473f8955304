//! Video decoder over a directory of still images

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::file::VideoDecoder;
use crate::types::{PixelFormat, RawImage};
use crate::{Result, StreamError};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Plays the images of a directory in file name order
///
/// Each file is one frame; decoding goes through the `image` crate.
#[derive(Debug)]
pub struct ImageSequenceDecoder {
    frames: Vec<PathBuf>,
    position: usize,
    frame_rate: Option<f64>,
    open: bool,
}

impl ImageSequenceDecoder {
    /// Index the images in `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let entries =
            std::fs::read_dir(dir).map_err(|e| StreamError::file_error(dir.to_path_buf(), e))?;

        let mut frames = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StreamError::file_error(dir.to_path_buf(), e))?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if is_image {
                frames.push(path);
            }
        }

        if frames.is_empty() {
            return Err(StreamError::decode_error(format!("no images in {}", dir.display())));
        }
        frames.sort();

        info!(dir = %dir.display(), frames = frames.len(), "Opened image sequence");
        Ok(Self { frames, position: 0, frame_rate: None, open: true })
    }

    /// Play back at `fps` instead of the fallback rate
    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    /// Number of frames in the sequence
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl VideoDecoder for ImageSequenceDecoder {
    fn read_frame(&mut self) -> Result<Option<RawImage>> {
        if !self.open {
            return Ok(None);
        }
        let Some(path) = self.frames.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;

        let decoded = image::open(path)
            .map_err(|e| StreamError::decode_error(format!("{}: {}", path.display(), e)))?
            .into_rgb8();
        let (width, height) = decoded.dimensions();
        debug!(path = %path.display(), width, height, "Decoded frame");

        RawImage::new(width, height, PixelFormat::Rgb8, decoded.into_raw()).map(Some)
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.open {
            return Err(StreamError::decode_error("image sequence was released"));
        }
        self.position = 0;
        Ok(())
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn release(&mut self) {
        self.open = false;
        self.frames.clear();
    }
}
