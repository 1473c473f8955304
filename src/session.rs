//! Per-viewer streaming session

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::acquisition::SourceState;
use crate::admission::{AdmissionGate, AdmissionPermit};
use crate::sink::FrameSink;
use crate::slot::{FrameSlot, SlotSubscriber};
use crate::stream::ThrottleExt;
use crate::types::{EncodedFrame, UpdateRate};
use crate::{Result, StreamError};

/// Why a session stopped forwarding frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionEnd {
    /// The source was lost, swapped out for nothing, or the streamer stopped
    SourceUnavailable,
    /// The viewer's output closed
    ViewerClosed,
}

/// Outcome of [`StreamSession::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: u64,
    pub frames_sent: u64,
    pub ended: SessionEnd,
}

/// One admitted viewer
///
/// Holds an admission permit for its whole lifetime; dropping the session,
/// however that happens, frees the slot.
#[derive(Debug)]
pub struct StreamSession {
    id: u64,
    _permit: AdmissionPermit,
    frames: SlotSubscriber,
    state: watch::Receiver<SourceState>,
    wait_timeout: Duration,
    source_hz: f64,
}

impl StreamSession {
    /// Admit a viewer through `gate` and subscribe it to `slot`
    ///
    /// Fails with [`StreamError::AdmissionRefused`] when the gate is full.
    pub fn admit(
        id: u64,
        gate: &Arc<AdmissionGate>,
        slot: &FrameSlot,
        state: watch::Receiver<SourceState>,
        wait_timeout: Duration,
    ) -> Result<Self> {
        let permit = gate.admit().ok_or(StreamError::AdmissionRefused { limit: gate.limit() })?;
        debug!(session = id, active = gate.count(), limit = gate.limit(), "Viewer admitted");

        Ok(Self {
            id,
            _permit: permit,
            frames: slot.subscribe(),
            state,
            wait_timeout,
            source_hz: crate::config::DEFAULT_TARGET_FPS,
        })
    }

    /// Rate the source produces at, used to normalize [`UpdateRate`]
    pub fn with_source_rate(mut self, hz: f64) -> Self {
        self.source_hz = hz;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Version of the last frame this viewer received
    pub fn last_version(&self) -> u64 {
        self.frames.last_seen()
    }

    /// Wait for the next unseen frame
    ///
    /// Returns `None` once the source is no longer live. Wait timeouts are
    /// absorbed here; they only mean the source is slow.
    pub async fn next_frame(&mut self) -> Option<EncodedFrame> {
        let timeout = self.wait_timeout;

        loop {
            if !self.state.borrow_and_update().is_live() {
                return None;
            }

            tokio::select! {
                frame = self.frames.wait_next(timeout) => match frame {
                    Some(frame) => return Some(frame),
                    None => trace!(session = self.id, "No frame within wait timeout"),
                },
                changed = self.state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Forward frames to `sink` until the viewer leaves or the source goes away
    pub async fn run<K>(mut self, sink: &mut K) -> SessionSummary
    where
        K: FrameSink + ?Sized,
    {
        let mut frames_sent = 0u64;

        let ended = loop {
            let Some(frame) = self.next_frame().await else {
                break SessionEnd::SourceUnavailable;
            };

            if let Err(e) = sink.send_frame(&frame).await {
                debug!(session = self.id, "Viewer output closed: {}", e);
                break SessionEnd::ViewerClosed;
            }
            frames_sent += 1;
        };

        info!(session = self.id, frames_sent, ended = ?ended, "Viewer session finished");
        SessionSummary { id: self.id, frames_sent, ended }
    }

    /// Turn the session into a frame stream
    ///
    /// The stream owns the session, so dropping it releases admission.
    /// `UpdateRate::Max` throttles with latest-wins semantics.
    pub fn into_stream(self, rate: UpdateRate) -> BoxStream<'static, EncodedFrame> {
        let throttle = rate.frame_interval(self.source_hz);
        let frames = futures::stream::unfold(self, |mut session| async move {
            let frame = session.next_frame().await?;
            Some((frame, session))
        });

        match throttle {
            Some(period) => frames.throttle(period).boxed(),
            None => frames.boxed(),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        debug!(session = self.id, last_version = self.frames.last_seen(), "Viewer session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkClosed;
    use tokio::sync::mpsc;

    struct Fixture {
        gate: Arc<AdmissionGate>,
        slot: Arc<FrameSlot>,
        state: watch::Sender<SourceState>,
    }

    impl Fixture {
        fn new(limit: usize) -> Self {
            Self {
                gate: Arc::new(AdmissionGate::new(limit)),
                slot: Arc::new(FrameSlot::new()),
                state: watch::channel(SourceState::Running).0,
            }
        }

        fn session(&self, id: u64) -> Result<StreamSession> {
            StreamSession::admit(
                id,
                &self.gate,
                &self.slot,
                self.state.subscribe(),
                Duration::from_millis(20),
            )
        }
    }

    fn frame(tag: u8) -> EncodedFrame {
        EncodedFrame::new(vec![tag], 1, 1)
    }

    #[tokio::test]
    async fn refused_when_full() {
        let fx = Fixture::new(1);
        let _first = fx.session(1).unwrap();

        match fx.session(2) {
            Err(StreamError::AdmissionRefused { limit }) => assert_eq!(limit, 1),
            other => panic!("expected refusal, got {:?}", other.map(|s| s.id())),
        }
        assert_eq!(fx.gate.count(), 1);
    }

    #[tokio::test]
    async fn timeouts_do_not_end_session() {
        let fx = Fixture::new(1);
        let mut session = fx.session(1).unwrap();

        let slot = Arc::clone(&fx.slot);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            slot.publish(frame(4));
        });

        // Several 20ms wait timeouts elapse before the frame arrives
        let got = session.next_frame().await.unwrap();
        assert_eq!(got.data.as_ref(), &[4]);
        assert_eq!(session.last_version(), 1);
    }

    #[tokio::test]
    async fn blocked_session_gets_latest_frame() {
        let fx = Fixture::new(1);
        fx.slot.publish(frame(1));

        let mut session = fx.session(1).unwrap();
        assert_eq!(session.next_frame().await.unwrap().version, 1);

        fx.slot.publish(frame(2));
        fx.slot.publish(frame(3));
        let got = session.next_frame().await.unwrap();
        assert_eq!(got.version, 3);
        assert_eq!(got.data.as_ref(), &[3]);
    }

    #[tokio::test]
    async fn source_loss_ends_waiting_session() {
        let fx = Fixture::new(1);
        let mut session = fx.session(1).unwrap();

        let state = fx.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            state.send_replace(SourceState::Lost);
        });

        assert!(session.next_frame().await.is_none());
        drop(session);
        assert_eq!(fx.gate.count(), 0);
    }

    #[tokio::test]
    async fn run_stops_when_viewer_closes() {
        let fx = Fixture::new(2);
        let session = fx.session(7).unwrap();
        fx.slot.publish(frame(1));

        let (mut tx, rx) = mpsc::channel::<EncodedFrame>(1);
        drop(rx);

        let summary = session.run(&mut tx).await;
        assert_eq!(summary, SessionSummary { id: 7, frames_sent: 0, ended: SessionEnd::ViewerClosed });
        assert_eq!(fx.gate.count(), 0);
    }

    struct CountingSink {
        received: Vec<u64>,
        close_after: usize,
    }

    #[async_trait::async_trait]
    impl FrameSink for CountingSink {
        async fn send_frame(&mut self, frame: &EncodedFrame) -> std::result::Result<(), SinkClosed> {
            if self.received.len() == self.close_after {
                return Err(SinkClosed::new());
            }
            self.received.push(frame.version);
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_forwards_increasing_versions() {
        let fx = Fixture::new(1);
        let session = fx.session(1).unwrap();

        let slot = Arc::clone(&fx.slot);
        let producer = tokio::spawn(async move {
            for i in 0..50u8 {
                slot.publish(frame(i));
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        let mut sink = CountingSink { received: Vec::new(), close_after: 5 };
        let summary = session.run(&mut sink).await;
        producer.await.unwrap();

        assert_eq!(summary.frames_sent, 5);
        assert_eq!(summary.ended, SessionEnd::ViewerClosed);
        assert!(sink.received.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn dropping_stream_releases_admission() {
        let fx = Fixture::new(1);
        fx.slot.publish(frame(1));

        let mut stream = fx.session(1).unwrap().into_stream(UpdateRate::Native);
        assert_eq!(stream.next().await.unwrap().version, 1);
        assert_eq!(fx.gate.count(), 1);

        drop(stream);
        assert_eq!(fx.gate.count(), 0);
        assert!(fx.session(2).is_ok());
    }

    #[tokio::test]
    async fn stream_ends_when_source_stops() {
        let fx = Fixture::new(1);
        fx.slot.publish(frame(1));

        let stream = fx.session(1).unwrap().with_source_rate(30.0).into_stream(UpdateRate::Max(10));
        fx.state.send_replace(SourceState::Stopped);

        let frames: Vec<EncodedFrame> = stream.collect().await;
        assert!(frames.is_empty());
        assert_eq!(fx.gate.count(), 0);
    }
}
