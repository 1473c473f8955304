//! Streaming core tying the slot, gate, loop and rate tracker together
//!
//! One [`Streamer`] is built at process start and shared by reference with
//! whatever serves viewers:
//!
//! ```text
//!   FrameSource ─► AcquisitionLoop ─► FrameSlot ─┬─► StreamSession ─► viewer
//!                        │                       ├─► StreamSession ─► viewer
//!                        ▼                       └─► ...  (≤ viewer_limit)
//!                   RateTracker
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::acquisition::{AcquisitionHandle, AcquisitionLoop, SourceState};
use crate::admission::AdmissionGate;
use crate::config::StreamerConfig;
use crate::encoder::{FrameEncoder, JpegEncoder};
use crate::factory::{SourceBackends, SourceFactory};
use crate::mjpeg;
use crate::session::{SessionSummary, StreamSession};
use crate::sink::MultipartSink;
use crate::slot::FrameSlot;
use crate::source::{FrameSource, SourceKind};
use crate::stats::RateTracker;
use crate::{Result, StreamError};

/// Snapshot reported by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamerStatus {
    pub state: SourceState,
    pub source_kind: Option<SourceKind>,
    pub active_viewers: usize,
    pub viewer_limit: usize,
    pub fps: f64,
    pub frame_count: u64,
    pub latest_version: u64,
    pub uptime_secs: f64,
}

#[derive(Debug, Clone, Copy)]
struct ActiveSource {
    kind: SourceKind,
    frame_rate: f64,
}

/// Live frame distribution core
pub struct Streamer {
    config: StreamerConfig,
    slot: Arc<FrameSlot>,
    gate: Arc<AdmissionGate>,
    rate: Arc<RateTracker>,
    state: Arc<watch::Sender<SourceState>>,
    encoder: Arc<dyn FrameEncoder>,
    acquisition: tokio::sync::Mutex<Option<AcquisitionHandle>>,
    active_source: Mutex<Option<ActiveSource>>,
    next_session_id: AtomicU64,
    started_at: Instant,
}

impl Streamer {
    /// Create an idle streamer encoding JPEG at the configured quality
    pub fn new(config: StreamerConfig) -> Result<Self> {
        let encoder = Arc::new(JpegEncoder::new(config.jpeg_quality));
        Self::with_encoder(config, encoder)
    }

    /// Create an idle streamer with a custom encoder
    pub fn with_encoder(config: StreamerConfig, encoder: Arc<dyn FrameEncoder>) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(SourceState::Idle);

        info!(
            viewer_limit = config.viewer_limit,
            wait_timeout_ms = config.wait_timeout_ms,
            boundary = %config.boundary,
            "Streamer created"
        );

        Ok(Self {
            gate: Arc::new(AdmissionGate::new(config.viewer_limit)),
            slot: Arc::new(FrameSlot::new()),
            rate: Arc::new(RateTracker::new()),
            state: Arc::new(state),
            encoder,
            acquisition: tokio::sync::Mutex::new(None),
            active_source: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
            started_at: Instant::now(),
            config,
        })
    }

    /// Start acquiring from whatever source `factory` picks
    pub async fn start_with<B: SourceBackends>(&self, factory: &SourceFactory<B>) -> Result<SourceKind> {
        let source = factory.create().ok_or(StreamError::SourceUnavailable)?;
        let kind = source.kind();
        self.swap_source(source).await;
        Ok(kind)
    }

    /// Replace the active source, or start the first one
    ///
    /// The old loop is stopped and joined before the slot is emptied, so no
    /// frame of the old source can be seen after this returns. Sessions stay
    /// connected and receive the new source's frames.
    pub async fn swap_source<S: FrameSource>(&self, source: S) {
        let mut acquisition = self.acquisition.lock().await;

        if let Some(mut previous) = acquisition.take() {
            let kind = previous.kind();
            match previous.stop().await {
                Some(report) => debug!(
                    kind = ?kind,
                    exit = ?report.exit,
                    published = report.frames_published,
                    "Previous source stopped"
                ),
                None => warn!(kind = ?kind, "Previous acquisition loop did not report"),
            }
        }

        self.slot.reset();
        self.rate.reset();

        let kind = source.kind();
        let frame_rate = source
            .frame_rate()
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(self.config.target_fps);
        *self.lock_active_source() = Some(ActiveSource { kind, frame_rate });

        self.state.send_replace(SourceState::Starting);
        *acquisition = Some(AcquisitionLoop::spawn(
            source,
            Arc::clone(&self.encoder),
            self.slot.publisher(),
            Arc::clone(&self.rate),
            Arc::clone(&self.state),
        ));

        info!(kind = ?kind, fps = frame_rate, epoch = self.slot.epoch(), "Frame source started");
    }

    /// Stop acquisition and end every session
    pub async fn shutdown(&self) {
        let mut acquisition = self.acquisition.lock().await;
        if let Some(mut handle) = acquisition.take() {
            handle.stop().await;
        }

        self.state.send_replace(SourceState::Stopped);
        self.slot.reset();
        *self.lock_active_source() = None;
        info!(active_viewers = self.gate.count(), "Streamer shut down");
    }

    /// Admit a new viewer
    pub fn open_session(&self) -> Result<StreamSession> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        match StreamSession::admit(
            id,
            &self.gate,
            &self.slot,
            self.state.subscribe(),
            self.config.wait_timeout(),
        ) {
            Ok(session) => Ok(session.with_source_rate(self.source_frame_rate())),
            Err(e) => {
                warn!(session = id, limit = self.gate.limit(), "Viewer refused: {}", e);
                Err(e)
            }
        }
    }

    /// Serve one viewer as a multipart MJPEG body written to `writer`
    ///
    /// Returns once the viewer disconnects or the source goes away. The
    /// closing delimiter is written only if the writer is still usable.
    pub async fn stream_to<W>(&self, writer: W) -> Result<SessionSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let session = self.open_session()?;
        let mut sink = MultipartSink::new(writer, self.config.boundary.clone());
        let summary = session.run(&mut sink).await;

        if let Err(e) = sink.finish().await {
            debug!(session = summary.id, "Could not close multipart body: {}", e);
        }
        Ok(summary)
    }

    /// Current source state
    pub fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    /// Whether a source is producing frames
    pub fn is_available(&self) -> bool {
        self.state() == SourceState::Running
    }

    /// Stream of source state changes, starting with the current one
    pub fn status_updates(&self) -> WatchStream<SourceState> {
        WatchStream::new(self.state.subscribe())
    }

    pub fn status(&self) -> StreamerStatus {
        StreamerStatus {
            state: self.state(),
            source_kind: self.lock_active_source().map(|source| source.kind),
            active_viewers: self.gate.count(),
            viewer_limit: self.gate.limit(),
            fps: self.rate.current_fps(),
            frame_count: self.rate.frame_count(),
            latest_version: self.slot.version(),
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }

    /// `Content-Type` of the multipart body
    pub fn content_type(&self) -> String {
        mjpeg::content_type(&self.config.boundary)
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    pub fn rate(&self) -> &Arc<RateTracker> {
        &self.rate
    }

    fn source_frame_rate(&self) -> f64 {
        self.lock_active_source()
            .map(|source| source.frame_rate)
            .unwrap_or(self.config.target_fps)
    }

    fn lock_active_source(&self) -> MutexGuard<'_, Option<ActiveSource>> {
        self.active_source.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedSource, solid_image};
    use std::time::Duration;

    fn streamer(limit: usize) -> Streamer {
        Streamer::new(StreamerConfig::default().viewer_limit(limit).wait_timeout_ms(50)).unwrap()
    }

    async fn wait_for(streamer: &Streamer, expected: SourceState) {
        let mut rx = streamer.state.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == expected))
            .await
            .expect("state change timed out")
            .unwrap();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = StreamerConfig::default().viewer_limit(0);
        assert!(matches!(Streamer::new(config), Err(StreamError::Config { .. })));
    }

    #[tokio::test]
    async fn idle_status() {
        let streamer = streamer(4);
        let status = streamer.status();

        assert_eq!(status.state, SourceState::Idle);
        assert_eq!(status.source_kind, None);
        assert_eq!(status.active_viewers, 0);
        assert_eq!(status.viewer_limit, 4);
        assert_eq!(status.frame_count, 0);
        assert_eq!(streamer.content_type(), "multipart/x-mixed-replace; boundary=frame");
    }

    #[tokio::test]
    async fn viewers_receive_frames() {
        let streamer = streamer(2);
        streamer.swap_source(ScriptedSource::endless(solid_image(8, 8, 3))).await;
        wait_for(&streamer, SourceState::Running).await;

        let mut session = streamer.open_session().unwrap();
        let first = session.next_frame().await.unwrap();
        let second = session.next_frame().await.unwrap();
        assert!(second.version > first.version);

        let status = streamer.status();
        assert_eq!(status.active_viewers, 1);
        assert_eq!(status.source_kind, Some(SourceKind::Other));
        assert!(status.frame_count >= 2);
        assert!(streamer.is_available());
    }

    #[tokio::test]
    async fn full_streamer_refuses_viewer() {
        let streamer = streamer(1);
        let _viewer = streamer.open_session().unwrap();

        let err = streamer.open_session().unwrap_err();
        assert!(matches!(err, StreamError::AdmissionRefused { limit: 1 }));
    }

    #[tokio::test]
    async fn permanent_loss_ends_all_sessions() {
        let streamer = Arc::new(streamer(3));
        let source = ScriptedSource::endless(solid_image(4, 4, 1));
        let controls = source.controls();
        streamer.swap_source(source).await;
        wait_for(&streamer, SourceState::Running).await;

        let mut viewers = Vec::new();
        for _ in 0..3 {
            let session = streamer.open_session().unwrap();
            viewers.push(tokio::spawn(async move {
                let mut session = session;
                let mut received = 0;
                while session.next_frame().await.is_some() {
                    received += 1;
                }
                received
            }));
        }
        assert_eq!(streamer.gate().count(), 3);

        tokio::time::sleep(Duration::from_millis(30)).await;
        controls.disconnect();

        for viewer in viewers {
            tokio::time::timeout(Duration::from_secs(2), viewer).await.unwrap().unwrap();
        }
        assert_eq!(streamer.state(), SourceState::Lost);
        assert_eq!(streamer.gate().count(), 0);
        assert!(streamer.open_session().is_ok());
    }

    #[tokio::test]
    async fn swap_never_delivers_old_frames() {
        let streamer = streamer(1);
        streamer.swap_source(ScriptedSource::endless(solid_image(4, 4, 1))).await;
        wait_for(&streamer, SourceState::Running).await;

        let mut session = streamer.open_session().unwrap();
        let old = session.next_frame().await.unwrap();
        assert_eq!(old.width, 4);

        // The new source stalls for a while before its first frame
        let new_source = ScriptedSource::endless(solid_image(6, 6, 2)).paced(Duration::from_millis(100));
        streamer.swap_source(new_source).await;
        assert!(streamer.slot().is_empty());
        assert_eq!(streamer.rate().frame_count(), 0);

        let next = session.next_frame().await.unwrap();
        assert_eq!(next.width, 6, "old source frame leaked across swap");
        assert!(next.version > old.version);
    }

    #[tokio::test]
    async fn shutdown_ends_sessions() {
        let streamer = streamer(2);
        let source = ScriptedSource::endless(solid_image(4, 4, 1));
        let controls = source.controls();
        streamer.swap_source(source).await;
        wait_for(&streamer, SourceState::Running).await;

        let mut session = streamer.open_session().unwrap();
        streamer.shutdown().await;

        assert!(controls.was_stopped());
        assert!(session.next_frame().await.is_none());
        assert_eq!(streamer.status().state, SourceState::Stopped);
    }

    #[tokio::test]
    async fn stream_to_writes_multipart_body() {
        let streamer = streamer(1);
        let source = ScriptedSource::new(vec![Ok(Some(solid_image(4, 4, 9)))]).then_disconnect();
        streamer.swap_source(source).await;

        let (client, mut server) = tokio::io::duplex(1 << 16);
        let summary = streamer.stream_to(client).await.unwrap();
        assert_eq!(summary.ended, crate::session::SessionEnd::SourceUnavailable);

        let mut body = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut body).await.unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.ends_with("--frame--\r\n"));
        assert_eq!(streamer.gate().count(), 0);
    }
}
