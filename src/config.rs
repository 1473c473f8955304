//! Streamer configuration
//!
//! Settings are supplied once at start and are read-only afterwards. They can
//! be built in code or loaded from YAML:
//!
//! ```rust
//! use framecast::StreamerConfig;
//!
//! let config = StreamerConfig::from_yaml_str(
//!     "viewer_limit: 4\nboundary: cam0\nacquisition:\n  exposure_auto: false\n  exposure_time_us: 8000.0\n",
//! )
//! .unwrap();
//! assert_eq!(config.viewer_limit, 4);
//! assert_eq!(config.acquisition.exposure_time_us, 8000.0);
//! assert_eq!(config.target_fps, 30.0);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mjpeg;
use crate::{Result, StreamError};

/// Frame rate assumed when neither the source nor the config says otherwise
pub const DEFAULT_TARGET_FPS: f64 = 30.0;

/// How the camera hands grabbed images to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GrabStrategy {
    /// Images are delivered in acquisition order
    OneByOne,
    /// Only the newest image is kept, older ones are discarded
    #[default]
    LatestImageOnly,
    /// A bounded number of the newest images is kept
    LatestImages,
    /// Images are queued on the host side
    UpcomingImage,
}

/// Camera acquisition settings applied before grabbing starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Vendor acquisition mode (e.g. "Continuous")
    pub acquisition_mode: String,

    /// Whether the camera enforces `frame_rate`
    pub frame_rate_enable: bool,

    /// Acquisition frame rate in Hz when enabled
    pub frame_rate: f64,

    /// Let the camera choose exposure
    pub exposure_auto: bool,

    /// Exposure time in microseconds, used when auto exposure is off
    pub exposure_time_us: f64,

    /// Let the camera choose gain
    pub gain_auto: bool,

    /// Gain in dB, used when auto gain is off
    pub gain_db: f64,

    /// Grab strategy used when grabbing starts
    pub grab_strategy: GrabStrategy,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            acquisition_mode: "Continuous".to_string(),
            frame_rate_enable: true,
            frame_rate: 30.0,
            exposure_auto: true,
            exposure_time_us: 10_000.0,
            gain_auto: true,
            gain_db: 0.0,
            grab_strategy: GrabStrategy::LatestImageOnly,
        }
    }
}

/// Streamer configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Maximum concurrent viewers
    pub viewer_limit: usize,

    /// How long a viewer waits for a frame before checking availability again,
    /// also the camera retrieve timeout
    pub wait_timeout_ms: u64,

    /// Frame rate the streamer aims for
    pub target_fps: f64,

    /// Multipart boundary token
    pub boundary: String,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// Directory holding the uploaded video
    pub upload_dir: PathBuf,

    /// File name of the uploaded video inside `upload_dir`
    pub upload_file_name: String,

    /// Camera settings
    pub acquisition: AcquisitionSettings,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            viewer_limit: 10,
            wait_timeout_ms: 1000,
            target_fps: DEFAULT_TARGET_FPS,
            boundary: "frame".to_string(),
            jpeg_quality: 85,
            upload_dir: PathBuf::from("uploads"),
            upload_file_name: "current_video.mp4".to_string(),
            acquisition: AcquisitionSettings::default(),
        }
    }
}

impl StreamerConfig {
    /// Parse a YAML document, filling missing fields with defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| StreamError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Check values that would make the streamer misbehave
    pub fn validate(&self) -> Result<()> {
        if self.viewer_limit == 0 {
            return Err(StreamError::config_error("viewer_limit must be at least 1"));
        }
        if self.wait_timeout_ms == 0 {
            return Err(StreamError::config_error("wait_timeout_ms must be positive"));
        }
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            return Err(StreamError::config_error("target_fps must be a positive number"));
        }
        if !mjpeg::is_valid_boundary(&self.boundary) {
            return Err(StreamError::config_error(
                "boundary must be 1 to 70 characters from [A-Za-z0-9'()+_,-./:=? ] without a trailing space",
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(StreamError::config_error("jpeg_quality must be between 1 and 100"));
        }
        Ok(())
    }

    /// Viewer wait timeout
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Full path of the uploaded video
    pub fn upload_path(&self) -> PathBuf {
        self.upload_dir.join(&self.upload_file_name)
    }

    /// Set the viewer limit
    pub fn viewer_limit(mut self, limit: usize) -> Self {
        self.viewer_limit = limit;
        self
    }

    /// Set the viewer wait timeout
    pub fn wait_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.wait_timeout_ms = timeout_ms;
        self
    }

    /// Set the target frame rate
    pub fn target_fps(mut self, fps: f64) -> Self {
        self.target_fps = fps;
        self
    }

    /// Set the multipart boundary token
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    /// Set the JPEG quality, clamped to 1-100
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Set the upload directory
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }
}
