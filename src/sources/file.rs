//! Looping file source paced to the file's frame rate

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::{Duration, Interval, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{Result, StreamError};
use crate::source::{FrameSource, SourceKind};
use crate::types::RawImage;

/// Frame rate assumed when the file does not report one
pub const FALLBACK_FRAME_RATE: f64 = 30.0;

/// Blocking video file reader
///
/// Implemented over an external decoder. The bundled
/// [`ImageSequenceDecoder`](super::ImageSequenceDecoder) reads a directory of
/// still images.
pub trait VideoDecoder: Send + 'static {
    /// Read the next frame, `Ok(None)` at end of file
    fn read_frame(&mut self) -> Result<Option<RawImage>>;

    /// Seek back to the first frame
    fn rewind(&mut self) -> Result<()>;

    /// Frame rate stored in the file, if any
    fn frame_rate(&self) -> Option<f64>;

    fn is_open(&self) -> bool;

    /// Close the file
    fn release(&mut self);
}

/// File source that plays a video in an endless loop
///
/// Decoder calls run on the blocking thread pool; only the pacing interval
/// lives on the runtime.
pub struct LoopingFileSource<V: VideoDecoder> {
    path: PathBuf,
    decoder: Arc<Mutex<V>>,
    open: Arc<AtomicBool>,
    frame_rate: f64,
    interval: Option<Interval>,
    loops: u64,
}

impl<V: VideoDecoder> LoopingFileSource<V> {
    /// Wrap an opened decoder
    pub fn new(path: impl AsRef<Path>, decoder: V) -> Self {
        let frame_rate = decoder
            .frame_rate()
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(FALLBACK_FRAME_RATE);
        let open = Arc::new(AtomicBool::new(decoder.is_open()));

        Self {
            path: path.as_ref().to_path_buf(),
            decoder: Arc::new(Mutex::new(decoder)),
            open,
            frame_rate,
            interval: None,
            loops: 0,
        }
    }

    /// Path of the file being played
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How many times playback wrapped back to the start
    pub fn loops(&self) -> u64 {
        self.loops
    }

    fn lock(decoder: &Mutex<V>) -> MutexGuard<'_, V> {
        decoder.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against the decoder on the blocking pool, then refresh the open flag
    async fn blocking<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut V) -> Result<T> + Send + 'static,
    {
        let decoder = Arc::clone(&self.decoder);
        let open = Arc::clone(&self.open);
        tokio::task::spawn_blocking(move || {
            let mut decoder = Self::lock(&decoder);
            let result = f(&mut decoder);
            open.store(decoder.is_open(), Ordering::Release);
            result
        })
        .await
        .map_err(|e| StreamError::source_failed_with_source(format!("video {} task failed", operation), Box::new(e)))?
    }

    /// Read the next frame, seeking back to the start at end of file
    ///
    /// Returns the frame and whether playback wrapped.
    fn read_looping(decoder: &mut V, path: &Path) -> Result<(Option<RawImage>, bool)> {
        if let Some(image) = decoder.read_frame()? {
            return Ok((Some(image), false));
        }

        if let Err(e) = decoder.rewind() {
            warn!(path = %path.display(), "Cannot rewind video, releasing it: {}", e);
            decoder.release();
            return Err(e);
        }

        Ok((decoder.read_frame()?, true))
    }
}

#[async_trait::async_trait]
impl<V: VideoDecoder> FrameSource for LoopingFileSource<V> {
    async fn start(&mut self) -> Result<()> {
        let mut pacing = interval(Duration::from_secs_f64(1.0 / self.frame_rate));
        pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(pacing);

        info!(path = %self.path.display(), fps = self.frame_rate, "Video file playback started");
        Ok(())
    }

    async fn next_raw_image(&mut self) -> Result<Option<RawImage>> {
        if !self.is_available() {
            return Ok(None);
        }

        if let Some(pacing) = self.interval.as_mut() {
            pacing.tick().await;
        }

        let path = self.path.clone();
        let (image, wrapped) = self.blocking("read", move |decoder| Self::read_looping(decoder, &path)).await?;
        if wrapped {
            self.loops += 1;
            debug!(path = %self.path.display(), loops = self.loops, "Video restarted from the beginning");
        }
        Ok(image)
    }

    fn is_available(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn stop(&mut self) {
        if !self.is_available() {
            return;
        }

        let result = self
            .blocking("release", |decoder| {
                decoder.release();
                Ok(())
            })
            .await;

        match result {
            Ok(()) => info!(path = %self.path.display(), loops = self.loops, "Video file released"),
            Err(e) => warn!(path = %self.path.display(), "Failed to release video: {}", e),
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(self.frame_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockDecoder, solid_image};

    /// Decoder whose every read takes `delay` of wall time
    struct SlowDecoder {
        delay: std::time::Duration,
        open: bool,
    }

    impl VideoDecoder for SlowDecoder {
        fn read_frame(&mut self) -> Result<Option<RawImage>> {
            std::thread::sleep(self.delay);
            Ok(Some(solid_image(2, 2, 9)))
        }

        fn rewind(&mut self) -> Result<()> {
            Ok(())
        }

        fn frame_rate(&self) -> Option<f64> {
            Some(1000.0)
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn release(&mut self) {
            self.open = false;
        }
    }

    #[tokio::test]
    async fn wraps_to_start_at_end_of_file() {
        let frames = vec![solid_image(2, 2, 1), solid_image(2, 2, 2)];
        let mut source = LoopingFileSource::new("clip.mp4", MockDecoder::new(frames, Some(200.0)));
        source.start().await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..5 {
            let image = source.next_raw_image().await.unwrap().unwrap();
            seen.push(image.data()[0]);
        }

        assert_eq!(seen, vec![1, 2, 1, 2, 1]);
        assert_eq!(source.loops(), 2);
        assert!(source.is_available());
    }

    #[tokio::test]
    async fn missing_frame_rate_falls_back() {
        let source = LoopingFileSource::new("clip.mp4", MockDecoder::new(vec![], None));
        assert_eq!(source.frame_rate(), Some(FALLBACK_FRAME_RATE));
        assert_eq!(source.kind(), SourceKind::File);

        let source = LoopingFileSource::new("clip.mp4", MockDecoder::new(vec![], Some(0.0)));
        assert_eq!(source.frame_rate(), Some(FALLBACK_FRAME_RATE));
    }

    #[tokio::test]
    async fn failed_rewind_makes_source_unavailable() {
        let decoder = MockDecoder::new(vec![solid_image(2, 2, 1)], Some(200.0)).without_rewind();
        let mut source = LoopingFileSource::new("clip.mp4", decoder);
        source.start().await.unwrap();

        assert!(source.next_raw_image().await.unwrap().is_some());
        assert!(source.next_raw_image().await.is_err());
        assert!(!source.is_available());
        assert!(source.next_raw_image().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn playback_is_paced() {
        let frames = (0..4).map(|i| solid_image(2, 2, i)).collect();
        let mut source = LoopingFileSource::new("clip.mp4", MockDecoder::new(frames, Some(50.0)));
        source.start().await.unwrap();

        let start = std::time::Instant::now();
        for _ in 0..4 {
            source.next_raw_image().await.unwrap();
        }

        // First tick is immediate, three more at 20ms each
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[tokio::test]
    async fn stop_releases_decoder() {
        let mut source = LoopingFileSource::new("clip.mp4", MockDecoder::new(vec![], None));
        source.start().await.unwrap();
        assert!(source.is_available());

        source.stop().await;
        assert!(!source.is_available());
    }

    #[tokio::test]
    async fn slow_decode_leaves_runtime_free() {
        let decoder = SlowDecoder { delay: Duration::from_millis(300), open: true };
        let mut source = LoopingFileSource::new("clip.mp4", decoder);
        source.start().await.unwrap();

        let started = std::time::Instant::now();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            started.elapsed()
        });

        assert!(source.next_raw_image().await.unwrap().is_some());
        let fired_after = timer.await.unwrap();
        assert!(fired_after < Duration::from_millis(200), "timer stalled for {:?}", fired_after);
    }
}
