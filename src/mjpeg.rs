//! Multipart MJPEG framing
//!
//! Browsers render `multipart/x-mixed-replace` natively: each part replaces
//! the previous image. A part is laid out as
//!
//! ```text
//! --{boundary}\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: {n}\r\n
//! \r\n
//! {payload}\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::types::EncodedFrame;

/// Boundary token used when none is configured
pub const DEFAULT_BOUNDARY: &str = "frame";

/// Longest boundary RFC 2046 allows
pub const MAX_BOUNDARY_LEN: usize = 70;

/// Whether `boundary` can delimit parts without corrupting the body
///
/// RFC 2046 limits boundaries to 1..=70 `bchars` (alphanumerics, space and
/// `'()+_,-./:=?`) with no trailing space.
pub fn is_valid_boundary(boundary: &str) -> bool {
    (1..=MAX_BOUNDARY_LEN).contains(&boundary.len())
        && !boundary.ends_with(' ')
        && boundary.bytes().all(|b| b.is_ascii_alphanumeric() || b" '()+_,-./:=?".contains(&b))
}

/// Value for the response `Content-Type` header
///
/// The boundary is quoted when it holds characters that are not allowed in
/// a bare header parameter.
pub fn content_type(boundary: &str) -> String {
    if boundary.bytes().any(|b| b" '(),/:=?".contains(&b)) {
        format!("multipart/x-mixed-replace; boundary=\"{boundary}\"")
    } else {
        format!("multipart/x-mixed-replace; boundary={boundary}")
    }
}

/// Headers preceding a payload of `len` bytes
pub fn part_header(boundary: &str, len: usize) -> String {
    format!(
        "--{boundary}\r\n\
         Content-Type: image/jpeg\r\n\
         Content-Length: {len}\r\n\
         \r\n"
    )
}

/// One complete part for `frame`
pub fn encode_part(boundary: &str, frame: &EncodedFrame) -> Bytes {
    let header = part_header(boundary, frame.len());

    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(&frame.data);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Delimiter that ends the multipart body
pub fn closing_delimiter(boundary: &str) -> Bytes {
    Bytes::from(format!("--{boundary}--\r\n"))
}

/// Map a frame stream to body chunks, one part per frame
pub fn into_parts<S>(frames: S, boundary: impl Into<String>) -> impl Stream<Item = Bytes>
where
    S: Stream<Item = EncodedFrame>,
{
    let boundary = boundary.into();
    frames.map(move |frame| encode_part(&boundary, &frame))
}
