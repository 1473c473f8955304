//! Live frame distribution for camera-to-MJPEG streaming.
//!
//! Framecast pulls images from a camera or a looping video file, encodes them
//! as JPEG and hands the newest frame to every connected viewer. Acquisition
//! runs at source speed and viewers drain at network speed; a slow viewer
//! skips frames instead of slowing anyone else down.
//!
//! # Features
//!
//! - **Latest-frame slot**: one frame retained, broadcast wake, no stale re-delivery
//! - **Bounded admission**: a fixed number of concurrent viewers, released on any exit
//! - **Resilient acquisition**: glitches drop frames, only source loss stops the loop
//! - **Source swap**: switch between file and camera without reconnecting viewers
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use framecast::{ImageSequenceBackends, SourceFactory, Streamer, StreamerConfig, UpdateRate};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     framecast::logging::init("framecast=info")?;
//!
//!     let config = StreamerConfig::from_yaml_file("framecast.yaml")?;
//!     let streamer = Streamer::new(config.clone())?;
//!     streamer.start_with(&SourceFactory::from_config(&config, ImageSequenceBackends)).await?;
//!
//!     let mut frames = streamer.open_session()?.into_stream(UpdateRate::Max(10));
//!     while let Some(frame) = frames.next().await {
//!         println!("frame {} ({} bytes)", frame.version, frame.len());
//!     }
//!     Ok(())
//! }
//! ```

mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Distribution core
pub mod acquisition;
pub mod admission;
pub mod session;
pub mod slot;
pub mod stats;
pub mod streamer;

// Sources and encoding
pub mod encoder;
pub mod factory;
pub mod source;
pub mod sources;

// Viewer output
pub mod mjpeg;
pub mod sink;
pub mod stream;

pub mod config;
pub mod logging;

// Core exports
pub use error::*;
pub use types::*;

pub use acquisition::{AcquisitionHandle, AcquisitionLoop, AcquisitionReport, LoopExit, SourceState};
pub use admission::{AdmissionGate, AdmissionPermit};
pub use config::{AcquisitionSettings, GrabStrategy, StreamerConfig};
pub use encoder::{FrameEncoder, JpegEncoder};
pub use factory::{ImageSequenceBackends, SourceBackends, SourceFactory};
pub use session::{SessionEnd, SessionSummary, StreamSession};
pub use sink::{FrameSink, MultipartSink, SinkClosed};
pub use slot::{FrameSlot, SlotPublisher, SlotSubscriber};
pub use source::{FrameSource, SourceKind};
pub use stats::RateTracker;
pub use streamer::{Streamer, StreamerStatus};
