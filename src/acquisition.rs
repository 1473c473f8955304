//! Acquisition loop: pulls raw images from a source, encodes and publishes them

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::encoder::FrameEncoder;
use crate::slot::SlotPublisher;
use crate::source::{FrameSource, SourceKind};
use crate::stats::RateTracker;
use crate::types::{EncodedFrame, RawImage};
use crate::{Result, StreamError};

/// Base delay after a failed fetch, doubled per consecutive failure
const BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Cap on the backoff exponent (50ms * 2^5 = 1.6s)
const BACKOFF_MAX_SHIFT: u32 = 5;

/// Lifecycle of the active frame source as seen by viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceState {
    /// No source has been started
    Idle,
    /// A source was handed to a loop that has not started it yet
    Starting,
    /// The loop is producing frames
    Running,
    /// The source reported it can no longer produce frames
    Lost,
    /// The streamer was shut down
    Stopped,
}

impl SourceState {
    /// Whether viewers should keep waiting for frames
    pub fn is_live(self) -> bool {
        matches!(self, SourceState::Starting | SourceState::Running)
    }
}

/// Why an acquisition loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopExit {
    /// Stopped through its handle
    Cancelled,
    /// The source reported permanent unavailability
    SourceLost,
    /// `start()` failed
    StartFailed,
    /// The slot was reset for another source
    Superseded,
}

/// Counters reported when a loop ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AcquisitionReport {
    pub frames_published: u64,
    pub frames_dropped: u64,
    pub source_errors: u64,
    pub exit: LoopExit,
}

/// Background task owning one frame source
pub struct AcquisitionLoop<S: FrameSource> {
    source: S,
    encoder: Arc<dyn FrameEncoder>,
    publisher: SlotPublisher,
    rate: Arc<RateTracker>,
    state: Arc<watch::Sender<SourceState>>,
    cancel: CancellationToken,
    frames_published: u64,
    frames_dropped: u64,
    source_errors: u64,
}

impl<S: FrameSource> AcquisitionLoop<S> {
    /// Spawn a loop for `source` publishing through `publisher`
    ///
    /// The source is started inside the task. The returned handle stops the
    /// loop when dropped.
    pub fn spawn(
        source: S,
        encoder: Arc<dyn FrameEncoder>,
        publisher: SlotPublisher,
        rate: Arc<RateTracker>,
        state: Arc<watch::Sender<SourceState>>,
    ) -> AcquisitionHandle {
        let cancel = CancellationToken::new();
        let kind = source.kind();

        let acquisition = Self {
            source,
            encoder,
            publisher,
            rate,
            state,
            cancel: cancel.clone(),
            frames_published: 0,
            frames_dropped: 0,
            source_errors: 0,
        };

        let task = tokio::spawn(acquisition.run());
        AcquisitionHandle { cancel, task: Some(task), kind }
    }

    async fn run(mut self) -> AcquisitionReport {
        let epoch = self.publisher.epoch();
        info!(epoch, kind = ?self.source.kind(), "Acquisition loop started");

        let exit = match self.start_source().await {
            Ok(()) => self.acquire().await,
            Err(exit) => exit,
        };

        self.source.stop().await;

        let report = AcquisitionReport {
            frames_published: self.frames_published,
            frames_dropped: self.frames_dropped,
            source_errors: self.source_errors,
            exit,
        };
        info!(
            epoch,
            published = report.frames_published,
            dropped = report.frames_dropped,
            errors = report.source_errors,
            exit = ?report.exit,
            "Acquisition loop ended"
        );
        report
    }

    async fn start_source(&mut self) -> std::result::Result<(), LoopExit> {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(LoopExit::Cancelled),
            result = self.source.start() => result,
        };

        match result {
            Ok(()) if self.publisher.is_stale() => Err(LoopExit::Superseded),
            Ok(()) => {
                self.state.send_replace(SourceState::Running);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start frame source: {}", e);
                if !self.publisher.is_stale() {
                    self.state.send_replace(SourceState::Lost);
                }
                Err(LoopExit::StartFailed)
            }
        }
    }

    async fn acquire(&mut self) -> LoopExit {
        let mut failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return LoopExit::Cancelled,
                result = self.source.next_raw_image() => result,
            };

            let image = match result {
                Ok(Some(image)) => image,
                Ok(None) => {
                    failures += 1;
                    debug!(failures, "Source returned no image");
                    if let Some(exit) = self.after_failure(failures).await {
                        return exit;
                    }
                    continue;
                }
                Err(e) => {
                    failures += 1;
                    self.source_errors += 1;
                    warn!(failures, retryable = e.is_retryable(), "Source error: {}", e);
                    if let Some(exit) = self.after_failure(failures).await {
                        return exit;
                    }
                    continue;
                }
            };
            failures = 0;

            let frame = match Self::encode(Arc::clone(&self.encoder), image).await {
                Ok(frame) => frame,
                Err(e) => {
                    self.frames_dropped += 1;
                    warn!(dropped = self.frames_dropped, "Dropping frame that failed to encode: {}", e);
                    continue;
                }
            };

            let size = frame.len();
            if !self.publisher.publish(frame) {
                return LoopExit::Superseded;
            }
            self.frames_published += 1;
            self.rate.record_frame();
            trace!(published = self.frames_published, bytes = size, "Frame published");
        }
    }

    /// Decide whether a failed fetch ends the loop, backing off if not
    async fn after_failure(&mut self, failures: u32) -> Option<LoopExit> {
        if !self.source.is_available() {
            warn!(failures, "Frame source is no longer available");
            if self.publisher.is_stale() {
                return Some(LoopExit::Superseded);
            }
            self.state.send_replace(SourceState::Lost);
            return Some(LoopExit::SourceLost);
        }

        let backoff = BACKOFF_BASE * (1 << failures.min(BACKOFF_MAX_SHIFT));
        tokio::select! {
            _ = self.cancel.cancelled() => Some(LoopExit::Cancelled),
            _ = tokio::time::sleep(backoff) => None,
        }
    }

    async fn encode(encoder: Arc<dyn FrameEncoder>, image: RawImage) -> Result<EncodedFrame> {
        tokio::task::spawn_blocking(move || encoder.encode_frame(&image))
            .await
            .map_err(|e| StreamError::encode_error(format!("encoder task failed: {}", e)))?
    }
}

/// Handle to a running acquisition loop
pub struct AcquisitionHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<AcquisitionReport>>,
    kind: SourceKind,
}

impl AcquisitionHandle {
    /// Cancel the loop and wait until its source is stopped
    ///
    /// Returns `None` if the loop was already joined or panicked.
    pub async fn stop(&mut self) -> Option<AcquisitionReport> {
        self.cancel.cancel();
        let task = self.task.take()?;
        match task.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Acquisition task failed: {}", e);
                None
            }
        }
    }

    /// Whether the loop has exited on its own or been stopped
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Kind of the source this loop owns
    pub fn kind(&self) -> SourceKind {
        self.kind
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
