//! Live camera source over a vendor SDK binding

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::{AcquisitionSettings, GrabStrategy};
use crate::source::{FrameSource, SourceKind};
use crate::types::RawImage;
use crate::{Result, StreamError};

/// Blocking camera binding
///
/// Implemented over the vendor SDK. Every call may block, so [`DeviceSource`]
/// only invokes it from the blocking thread pool. `retrieve` is expected to
/// return images already converted to a packed pixel format.
pub trait CameraDevice: Send + 'static {
    /// Open the device
    fn open(&mut self) -> Result<()>;

    /// Apply acquisition settings; called after `open`
    fn configure(&mut self, settings: &AcquisitionSettings) -> Result<()>;

    /// Start continuous grabbing
    fn start_grabbing(&mut self, strategy: GrabStrategy) -> Result<()>;

    /// Wait up to `timeout` for the next grabbed image
    ///
    /// `Ok(None)` means the grab did not succeed (incomplete, dropped).
    fn retrieve(&mut self, timeout: Duration) -> Result<Option<RawImage>>;

    fn is_open(&self) -> bool;

    fn is_grabbing(&self) -> bool;

    fn stop_grabbing(&mut self);

    fn close(&mut self);

    /// Human readable device name for logs
    fn name(&self) -> String {
        "camera".to_string()
    }
}

/// Extra wait on top of the retrieve timeout before a grab counts as hung
pub const RETRIEVE_GRACE: Duration = Duration::from_millis(250);

/// Live source that grabs from a camera
///
/// Availability is mirrored into an atomic after every SDK call so that
/// `is_available` never waits on a grab in progress.
pub struct DeviceSource<D: CameraDevice> {
    device: Arc<Mutex<D>>,
    available: Arc<AtomicBool>,
    settings: AcquisitionSettings,
    retrieve_timeout: Duration,
}

impl<D: CameraDevice> DeviceSource<D> {
    /// Wrap an unopened device
    pub fn new(device: D, settings: AcquisitionSettings, retrieve_timeout: Duration) -> Self {
        let available = Arc::new(AtomicBool::new(device.is_open() && device.is_grabbing()));
        Self { device: Arc::new(Mutex::new(device)), available, settings, retrieve_timeout }
    }

    /// Acquisition settings applied on start
    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    fn lock(device: &Mutex<D>) -> MutexGuard<'_, D> {
        // A panicking SDK call leaves the device in whatever state the SDK left it
        device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn blocking<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut D) -> Result<T> + Send + 'static,
    {
        let device = Arc::clone(&self.device);
        let available = Arc::clone(&self.available);
        tokio::task::spawn_blocking(move || {
            let mut device = Self::lock(&device);
            let result = f(&mut device);
            available.store(device.is_open() && device.is_grabbing(), Ordering::Release);
            result
        })
        .await
        .map_err(|e| StreamError::Device { operation: operation.to_string(), source: Some(Box::new(e)) })?
    }
}

#[async_trait::async_trait]
impl<D: CameraDevice> FrameSource for DeviceSource<D> {
    async fn start(&mut self) -> Result<()> {
        let settings = self.settings.clone();

        let name = self
            .blocking("start", move |device| {
                if !device.is_open() {
                    device.open()?;
                }
                device.configure(&settings)?;
                device.start_grabbing(settings.grab_strategy)?;
                Ok(device.name())
            })
            .await?;

        info!(
            device = %name,
            mode = %self.settings.acquisition_mode,
            frame_rate = self.settings.frame_rate,
            strategy = ?self.settings.grab_strategy,
            "Camera grabbing started"
        );
        Ok(())
    }

    async fn next_raw_image(&mut self) -> Result<Option<RawImage>> {
        let timeout = self.retrieve_timeout;
        let deadline = timeout + RETRIEVE_GRACE;

        let grab = self.blocking("retrieve", move |device| {
            if !device.is_grabbing() {
                trace!("Camera not grabbing");
                return Ok(None);
            }

            let image = device.retrieve(timeout)?;
            if image.is_none() {
                debug!("Grab did not succeed");
            }
            Ok(image)
        });

        // A hung SDK call keeps its blocking thread; the next grab queues behind it
        match tokio::time::timeout(deadline, grab).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = deadline.as_millis() as u64, "Camera retrieve did not return in time");
                Err(StreamError::Timeout { duration: deadline })
            }
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    async fn stop(&mut self) {
        let result = self
            .blocking("stop", |device| {
                if device.is_grabbing() {
                    device.stop_grabbing();
                }
                if device.is_open() {
                    device.close();
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) => info!("Camera closed"),
            Err(e) => warn!("Failed to close camera: {}", e),
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Device
    }

    fn frame_rate(&self) -> Option<f64> {
        self.settings.frame_rate_enable.then_some(self.settings.frame_rate)
    }
}
