//! Frame source implementations

pub mod device;
pub mod file;
pub mod image_sequence;

pub use device::{CameraDevice, DeviceSource};
pub use file::{FALLBACK_FRAME_RATE, LoopingFileSource, VideoDecoder};
pub use image_sequence::ImageSequenceDecoder;
