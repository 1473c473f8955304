//! Frame source selection
//!
//! An uploaded video wins over the camera; with neither there is no source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{AcquisitionSettings, GrabStrategy, StreamerConfig};
use crate::source::FrameSource;
use crate::sources::{CameraDevice, DeviceSource, ImageSequenceDecoder, LoopingFileSource, VideoDecoder};
use crate::types::RawImage;
use crate::{Result, StreamError};

/// Opens the concrete decoder and camera bindings
pub trait SourceBackends: Send + Sync + 'static {
    type Decoder: VideoDecoder;
    type Camera: CameraDevice;

    /// Open the video at `path`
    fn open_video(&self, path: &Path) -> Result<Self::Decoder>;

    /// Find and bind the camera, without opening it
    fn open_camera(&self) -> Result<Self::Camera>;
}

/// Builds the preferred frame source
#[derive(Debug, Clone)]
pub struct SourceFactory<B> {
    upload_path: PathBuf,
    settings: AcquisitionSettings,
    retrieve_timeout: Duration,
    backends: B,
}

impl<B: SourceBackends> SourceFactory<B> {
    pub fn new(
        upload_path: impl Into<PathBuf>,
        settings: AcquisitionSettings,
        retrieve_timeout: Duration,
        backends: B,
    ) -> Self {
        Self { upload_path: upload_path.into(), settings, retrieve_timeout, backends }
    }

    /// Factory for the upload path and camera settings in `config`
    pub fn from_config(config: &StreamerConfig, backends: B) -> Self {
        Self::new(config.upload_path(), config.acquisition.clone(), config.wait_timeout(), backends)
    }

    pub fn upload_path(&self) -> &Path {
        &self.upload_path
    }

    /// Pick a source: uploaded video, then camera, else `None`
    ///
    /// The returned source is not started; the acquisition loop starts it.
    pub fn create(&self) -> Option<Box<dyn FrameSource>> {
        if let Some(source) = self.upload_source() {
            return Some(source);
        }

        match self.backends.open_camera() {
            Ok(camera) => {
                info!(camera = %camera.name(), "Using camera source");
                Some(Box::new(DeviceSource::new(camera, self.settings.clone(), self.retrieve_timeout)))
            }
            Err(e) => {
                warn!("No frame source available, camera unusable: {}", e);
                None
            }
        }
    }

    fn upload_source(&self) -> Option<Box<dyn FrameSource>> {
        let path = &self.upload_path;
        if !path.exists() {
            return None;
        }

        match self.backends.open_video(path) {
            Ok(decoder) if decoder.is_open() => {
                info!(path = %path.display(), "Using uploaded video");
                Some(Box::new(LoopingFileSource::new(path, decoder)))
            }
            Ok(_) => {
                warn!(path = %path.display(), "Uploaded video did not open, trying camera");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), "Cannot open uploaded video, trying camera: {}", e);
                None
            }
        }
    }
}

/// Backends with no camera, where the upload path is a directory of images
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageSequenceBackends;

/// Camera type for backends without camera support
#[derive(Debug)]
pub enum NoCamera {}

impl CameraDevice for NoCamera {
    fn open(&mut self) -> Result<()> {
        match *self {}
    }

    fn configure(&mut self, _settings: &AcquisitionSettings) -> Result<()> {
        match *self {}
    }

    fn start_grabbing(&mut self, _strategy: GrabStrategy) -> Result<()> {
        match *self {}
    }

    fn retrieve(&mut self, _timeout: Duration) -> Result<Option<RawImage>> {
        match *self {}
    }

    fn is_open(&self) -> bool {
        match *self {}
    }

    fn is_grabbing(&self) -> bool {
        match *self {}
    }

    fn stop_grabbing(&mut self) {
        match *self {}
    }

    fn close(&mut self) {
        match *self {}
    }
}

impl SourceBackends for ImageSequenceBackends {
    type Decoder = ImageSequenceDecoder;
    type Camera = NoCamera;

    fn open_video(&self, path: &Path) -> Result<ImageSequenceDecoder> {
        ImageSequenceDecoder::open(path)
    }

    fn open_camera(&self) -> Result<NoCamera> {
        Err(StreamError::SourceUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceKind;
    use crate::test_utils::{MockCamera, MockDecoder, solid_image};
    use tempfile::TempDir;

    struct TestBackends {
        video_opens: bool,
        camera_present: bool,
    }

    impl SourceBackends for TestBackends {
        type Decoder = MockDecoder;
        type Camera = MockCamera;

        fn open_video(&self, _path: &Path) -> Result<MockDecoder> {
            if !self.video_opens {
                return Err(StreamError::decode_error("unsupported container"));
            }
            Ok(MockDecoder::new(vec![solid_image(2, 2, 1)], Some(25.0)))
        }

        fn open_camera(&self) -> Result<MockCamera> {
            if !self.camera_present {
                return Err(StreamError::SourceUnavailable);
            }
            Ok(MockCamera::new(vec![]))
        }
    }

    fn factory(dir: &TempDir, video_opens: bool, camera_present: bool) -> SourceFactory<TestBackends> {
        let config = StreamerConfig::default().upload_dir(dir.path());
        SourceFactory::from_config(&config, TestBackends { video_opens, camera_present })
    }

    #[test]
    fn prefers_uploaded_video() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("current_video.mp4"), b"video").unwrap();

        let source = factory(&dir, true, true).create().unwrap();
        assert_eq!(source.kind(), SourceKind::File);
        assert_eq!(source.frame_rate(), Some(25.0));
    }

    #[test]
    fn falls_back_to_camera_without_upload() {
        let dir = tempfile::tempdir().unwrap();

        let source = factory(&dir, true, true).create().unwrap();
        assert_eq!(source.kind(), SourceKind::Device);
    }

    #[test]
    fn falls_back_to_camera_when_video_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("current_video.mp4"), b"junk").unwrap();

        let source = factory(&dir, false, true).create().unwrap();
        assert_eq!(source.kind(), SourceKind::Device);
    }

    #[test]
    fn nothing_available() {
        let dir = tempfile::tempdir().unwrap();
        assert!(factory(&dir, true, false).create().is_none());
    }

    #[test]
    fn image_sequence_backends_play_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let upload = dir.path().join("current_video.mp4");
        std::fs::create_dir(&upload).unwrap();
        image::RgbImage::from_pixel(2, 2, image::Rgb([5, 5, 5])).save(upload.join("0001.png")).unwrap();

        let config = StreamerConfig::default().upload_dir(dir.path());
        let factory = SourceFactory::from_config(&config, ImageSequenceBackends);
        assert_eq!(factory.create().unwrap().kind(), SourceKind::File);

        std::fs::remove_dir_all(&upload).unwrap();
        assert!(factory.create().is_none());
    }
}
