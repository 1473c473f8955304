//! Viewer output channels

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::mjpeg;
use crate::types::EncodedFrame;

/// The viewer is gone; the session should end
#[derive(Debug, Error)]
#[error("viewer output closed")]
pub struct SinkClosed {
    #[source]
    source: Option<std::io::Error>,
}

impl SinkClosed {
    pub fn new() -> Self {
        Self { source: None }
    }

    /// Closed because of a write failure
    pub fn io(source: std::io::Error) -> Self {
        Self { source: Some(source) }
    }
}

impl Default for SinkClosed {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a session forwards frames
///
/// `send_frame` may wait on network backpressure; that only delays the one
/// viewer behind this sink.
#[async_trait::async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), SinkClosed>;
}

#[async_trait::async_trait]
impl FrameSink for mpsc::Sender<EncodedFrame> {
    async fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), SinkClosed> {
        self.send(frame.clone()).await.map_err(|_| SinkClosed::new())
    }
}

/// Writes frames as multipart MJPEG parts to a byte stream
#[derive(Debug)]
pub struct MultipartSink<W> {
    writer: W,
    boundary: String,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin + Send> MultipartSink<W> {
    pub fn new(writer: W, boundary: impl Into<String>) -> Self {
        Self { writer, boundary: boundary.into(), bytes_written: 0 }
    }

    /// Total bytes written, headers included
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write the closing delimiter and hand back the writer
    pub async fn finish(mut self) -> std::io::Result<W> {
        self.writer.write_all(&mjpeg::closing_delimiter(&self.boundary)).await?;
        self.writer.flush().await?;
        Ok(self.writer)
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for MultipartSink<W> {
    async fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), SinkClosed> {
        let part = mjpeg::encode_part(&self.boundary, frame);
        self.writer.write_all(&part).await.map_err(SinkClosed::io)?;
        self.writer.flush().await.map_err(SinkClosed::io)?;
        self.bytes_written += part.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_reports_closed_receiver() {
        let (mut tx, mut rx) = mpsc::channel(1);
        let frame = EncodedFrame::new(vec![1, 2], 1, 1);

        tx.send_frame(&frame).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().data, frame.data);

        drop(rx);
        assert!(tx.send_frame(&frame).await.is_err());
    }

    #[tokio::test]
    async fn multipart_sink_writes_parts() {
        let mut sink = MultipartSink::new(Vec::new(), "frame");
        sink.send_frame(&EncodedFrame::new(vec![9u8; 3], 1, 1)).await.unwrap();
        assert!(sink.bytes_written() > 3);

        let written = sink.finish().await.unwrap();
        let text = String::from_utf8_lossy(&written);
        assert!(text.starts_with("--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\n"));
        assert!(text.ends_with("\r\n--frame--\r\n"));
    }

    #[tokio::test]
    async fn multipart_sink_closes_on_broken_pipe() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);

        let mut sink = MultipartSink::new(client, "frame");
        let err = sink.send_frame(&EncodedFrame::new(vec![0u8; 16], 1, 1)).await.unwrap_err();
        assert!(std::error::Error::source(&err).is_some());
    }
}
