//! Scripted sources, devices and decoders for tests and benchmarks
//!
//! Every double here is deterministic: it replays a script handed to it at
//! construction and exposes shared handles so a test can observe calls or
//! flip availability while the double is owned by an acquisition loop.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::config::{AcquisitionSettings, GrabStrategy};
use crate::encoder::{FrameEncoder, JpegEncoder};
use crate::source::{FrameSource, SourceKind};
use crate::sources::{CameraDevice, VideoDecoder};
use crate::types::{PixelFormat, RawImage};
use crate::{Result, StreamError};

/// Uniform RGB image where every byte is `shade`
pub fn solid_image(width: u32, height: u32, shade: u8) -> RawImage {
    let len = width as usize * height as usize * PixelFormat::Rgb8.bytes_per_pixel();
    RawImage::new(width, height, PixelFormat::Rgb8, vec![shade; len])
        .expect("solid image dimensions are consistent")
}

/// Shared switches for a [`ScriptedSource`] owned by a loop
#[derive(Debug, Clone)]
pub struct SourceControls {
    connected: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    fetches: Arc<AtomicU64>,
}

impl SourceControls {
    fn new() -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
            fetches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make the source report permanent unavailability
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Whether the owning loop called `stop()`
    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Number of `next_raw_image` calls so far
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

/// Frame source replaying a fixed script of results
///
/// Once the script is exhausted the source repeats its endless image, returns
/// `Ok(None)`, or disconnects, depending on how it was built.
#[derive(Debug)]
pub struct ScriptedSource {
    script: VecDeque<Result<Option<RawImage>>>,
    repeat: Option<RawImage>,
    pace: Duration,
    fail_start: bool,
    disconnect_when_done: bool,
    kind: SourceKind,
    controls: SourceControls,
}

impl ScriptedSource {
    /// Replay `script`, then keep returning `Ok(None)` while available
    pub fn new(script: Vec<Result<Option<RawImage>>>) -> Self {
        Self {
            script: script.into(),
            repeat: None,
            pace: Duration::from_millis(1),
            fail_start: false,
            disconnect_when_done: false,
            kind: SourceKind::Other,
            controls: SourceControls::new(),
        }
    }

    /// Produce `image` forever, one every 5ms
    pub fn endless(image: RawImage) -> Self {
        let mut source = Self::new(Vec::new());
        source.repeat = Some(image);
        source.pace = Duration::from_millis(5);
        source
    }

    /// Source whose `start()` fails
    pub fn failing_start() -> Self {
        let mut source = Self::new(Vec::new());
        source.fail_start = true;
        source
    }

    /// Report permanent loss once the script is exhausted
    pub fn then_disconnect(mut self) -> Self {
        self.disconnect_when_done = true;
        self
    }

    /// Delay before each fetch returns
    pub fn paced(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Handle that stays valid after the source is moved into a loop
    pub fn controls(&self) -> SourceControls {
        self.controls.clone()
    }
}

#[async_trait::async_trait]
impl FrameSource for ScriptedSource {
    async fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(StreamError::device_error("open"));
        }
        Ok(())
    }

    async fn next_raw_image(&mut self) -> Result<Option<RawImage>> {
        self.controls.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.is_available() {
            return Ok(None);
        }

        tokio::time::sleep(self.pace).await;

        if let Some(item) = self.script.pop_front() {
            return item;
        }
        if self.disconnect_when_done {
            self.controls.disconnect();
            return Ok(None);
        }
        Ok(self.repeat.clone())
    }

    fn is_available(&self) -> bool {
        self.controls.connected.load(Ordering::SeqCst) && !self.controls.was_stopped()
    }

    async fn stop(&mut self) {
        self.controls.stopped.store(true, Ordering::SeqCst);
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }
}

/// Encoder that fails on every `n`-th call and JPEG-encodes otherwise
#[derive(Debug)]
pub struct FailingEncoder {
    every: usize,
    calls: AtomicUsize,
    inner: JpegEncoder,
}

impl FailingEncoder {
    /// Fail every `n`-th call; `every(1)` fails all of them
    pub fn every(n: usize) -> Self {
        Self { every: n.max(1), calls: AtomicUsize::new(0), inner: JpegEncoder::default() }
    }
}

impl FrameEncoder for FailingEncoder {
    fn encode(&self, image: &RawImage) -> Result<Bytes> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.every == 0 {
            return Err(StreamError::encode_error(format!("scripted failure on call {}", call)));
        }
        self.inner.encode(image)
    }
}

/// Camera binding that replays scripted grab results
#[derive(Debug)]
pub struct MockCamera {
    grabs: VecDeque<Result<Option<RawImage>>>,
    open: bool,
    grabbing: bool,
    fail_open: bool,
    stall: Duration,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl MockCamera {
    pub fn new(grabs: Vec<Result<Option<RawImage>>>) -> Self {
        Self {
            grabs: grabs.into(),
            open: false,
            grabbing: false,
            fail_open: false,
            stall: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every retrieve blocks for `stall` before answering
    pub fn stalling(mut self, stall: Duration) -> Self {
        self.stall = stall;
        self
    }

    /// Camera that cannot be opened
    pub fn failing_open() -> Self {
        let mut camera = Self::new(Vec::new());
        camera.fail_open = true;
        camera
    }

    /// Names of the binding calls made so far
    pub fn calls(&self) -> Arc<Mutex<Vec<&'static str>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(call);
    }
}

impl CameraDevice for MockCamera {
    fn open(&mut self) -> Result<()> {
        self.record("open");
        if self.fail_open {
            return Err(StreamError::device_error("open"));
        }
        self.open = true;
        Ok(())
    }

    fn configure(&mut self, _settings: &AcquisitionSettings) -> Result<()> {
        self.record("configure");
        Ok(())
    }

    fn start_grabbing(&mut self, _strategy: GrabStrategy) -> Result<()> {
        self.record("start_grabbing");
        self.grabbing = true;
        Ok(())
    }

    fn retrieve(&mut self, _timeout: Duration) -> Result<Option<RawImage>> {
        if !self.stall.is_zero() {
            std::thread::sleep(self.stall);
        }
        self.grabs.pop_front().unwrap_or(Ok(None))
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_grabbing(&self) -> bool {
        self.grabbing
    }

    fn stop_grabbing(&mut self) {
        self.record("stop_grabbing");
        self.grabbing = false;
    }

    fn close(&mut self) {
        self.record("close");
        self.open = false;
    }

    fn name(&self) -> String {
        "mock-camera".to_string()
    }
}

/// In-memory video decoder
#[derive(Debug)]
pub struct MockDecoder {
    frames: Vec<RawImage>,
    position: usize,
    frame_rate: Option<f64>,
    can_rewind: bool,
    open: bool,
}

impl MockDecoder {
    pub fn new(frames: Vec<RawImage>, frame_rate: Option<f64>) -> Self {
        Self { frames, position: 0, frame_rate, can_rewind: true, open: true }
    }

    /// Make `rewind` fail, as for a truncated file
    pub fn without_rewind(mut self) -> Self {
        self.can_rewind = false;
        self
    }
}

impl VideoDecoder for MockDecoder {
    fn read_frame(&mut self) -> Result<Option<RawImage>> {
        if !self.open {
            return Ok(None);
        }
        let frame = self.frames.get(self.position).cloned();
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.can_rewind {
            return Err(StreamError::decode_error("seek to first frame failed"));
        }
        self.position = 0;
        Ok(())
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn release(&mut self) {
        self.open = false;
    }
}
