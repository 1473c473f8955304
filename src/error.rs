//! Error types for frame acquisition and distribution.
//!
//! All errors implement `std::error::Error` and carry enough context to
//! decide whether the failing operation is worth retrying.
//!
//! ## Error Categories
//!
//! - **Source Errors**: a frame source failed to produce an image
//! - **Device Errors**: the camera binding rejected an operation
//! - **Codec Errors**: decoding a file frame or encoding a JPEG failed
//! - **Admission Errors**: the viewer limit has been reached
//! - **Configuration Errors**: settings could not be loaded or are invalid
//!
//! ## Recovery and Retry
//!
//! The acquisition loop uses [`StreamError::is_retryable`] to separate a
//! momentary glitch from a condition that will not go away on its own:
//!
//! ```rust
//! use framecast::StreamError;
//!
//! let error = StreamError::source_failed("grab timed out");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for streaming operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Frame source failed: {reason}")]
    Source {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Frame source is no longer available")]
    SourceUnavailable,

    #[error("Camera operation failed: {operation}")]
    Device {
        operation: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to decode frame: {details}")]
    Decode { details: String },

    #[error("Failed to encode frame: {details}")]
    Encode { details: String },

    #[error("Invalid image: {details}")]
    InvalidImage { details: String },

    #[error("Viewer limit reached ({limit} active)")]
    AdmissionRefused { limit: usize },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl StreamError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Source { .. } => true,
            StreamError::Decode { .. } => true,
            StreamError::Encode { .. } => true,
            StreamError::Timeout { .. } => true,
            StreamError::AdmissionRefused { .. } => true,
            StreamError::Device { .. } => true,
            StreamError::SourceUnavailable => false,
            StreamError::InvalidImage { .. } => false,
            StreamError::File { .. } => false,
            StreamError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::Source { .. } => vec![
                "Check the camera cable or video file",
                "Increase the retrieve timeout",
                "Wait for the next frame",
            ],
            StreamError::SourceUnavailable => vec![
                "Reconnect the camera",
                "Upload a new video file",
                "Restart the streamer",
            ],
            StreamError::Device { .. } => vec![
                "Verify the camera is connected and powered",
                "Check that no other process holds the device",
                "Verify the vendor SDK is installed",
            ],
            StreamError::Decode { .. } => vec![
                "Check the video file is not truncated",
                "Re-encode the file in a supported format",
            ],
            StreamError::Encode { .. } => vec![
                "Check the image dimensions and pixel format",
                "Lower the JPEG quality setting",
            ],
            StreamError::InvalidImage { .. } => vec![
                "Check the pixel buffer length matches width, height and format",
            ],
            StreamError::AdmissionRefused { .. } => vec![
                "Retry after another viewer disconnects",
                "Raise the viewer limit",
            ],
            StreamError::Timeout { .. } => vec![
                "Increase timeout duration",
                "Check the source frame rate",
            ],
            StreamError::File { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
            ],
            StreamError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare values against the documented defaults",
            ],
        }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        StreamError::File { path, source }
    }

    /// Helper constructor for transient source failures.
    pub fn source_failed(reason: impl Into<String>) -> Self {
        StreamError::Source { reason: reason.into(), source: None }
    }

    /// Helper constructor for source failures with an underlying cause.
    pub fn source_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Source { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for camera binding errors.
    pub fn device_error(operation: impl Into<String>) -> Self {
        StreamError::Device { operation: operation.into(), source: None }
    }

    /// Helper constructor for decode errors.
    pub fn decode_error(details: impl Into<String>) -> Self {
        StreamError::Decode { details: details.into() }
    }

    /// Helper constructor for encode errors.
    pub fn encode_error(details: impl Into<String>) -> Self {
        StreamError::Encode { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(reason: impl Into<String>) -> Self {
        StreamError::Config { reason: reason.into() }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<image::ImageError> for StreamError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Decoding(e) => StreamError::Decode { details: e.to_string() },
            image::ImageError::Encoding(e) => StreamError::Encode { details: e.to_string() },
            image::ImageError::IoError(e) => e.into(),
            other => StreamError::InvalidImage { details: other.to_string() },
        }
    }
}

impl From<serde_yaml_ng::Error> for StreamError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        StreamError::Config { reason: err.to_string() }
    }
}
