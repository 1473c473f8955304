//! Core types for frames flowing through the streamer.
//!
//! - [`RawImage`] is what a frame source hands to the encoder: an uncompressed
//!   pixel buffer with its dimensions and [`PixelFormat`]
//! - [`EncodedFrame`] is what viewers receive: an encoded payload shared by
//!   reference count, stamped with the slot version it was published under
//! - [`UpdateRate`] lets a viewer ask for fewer frames than the source produces
//!
//! ## Usage Example
//!
//! ```rust
//! use framecast::types::{PixelFormat, RawImage};
//!
//! let image = RawImage::new(2, 1, PixelFormat::Rgb8, vec![255, 0, 0, 0, 255, 0]).unwrap();
//! assert_eq!(image.stride(), 6);
//! assert!(RawImage::new(2, 2, PixelFormat::Rgb8, vec![0; 5]).is_err());
//! ```

mod frame;
mod raw;
mod update_rate;

pub use frame::EncodedFrame;
pub use raw::{PixelFormat, RawImage};
pub use update_rate::UpdateRate;

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_raw_image_accepts_exact_buffer_lengths(
            width in 1u32..64,
            height in 1u32..64,
            format in prop::sample::select(vec![PixelFormat::Mono8, PixelFormat::Rgb8, PixelFormat::Bgr8]),
        ) {
            let len = width as usize * height as usize * format.bytes_per_pixel();
            let image = RawImage::new(width, height, format, vec![0; len]);
            prop_assert!(image.is_ok());

            let short = RawImage::new(width, height, format, vec![0; len - 1]);
            prop_assert!(short.is_err());
        }

        #[test]
        fn prop_update_rate_never_exceeds_source(source_hz in 1.0f64..240.0, hz in 1u32..500) {
            match UpdateRate::Max(hz).against_source(source_hz) {
                UpdateRate::Native => prop_assert!(hz as f64 >= source_hz),
                UpdateRate::Max(effective) => prop_assert!((effective as f64) < source_hz),
            }
        }
    }
}
