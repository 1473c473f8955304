//! Latest-frame slot with wake-on-arrival semantics
//!
//! The slot keeps exactly one frame: the most recent one. Acquisition runs at
//! source speed while viewers drain at network speed, so instead of queueing
//! the slot overwrites. A slow viewer skips frames, it never falls behind.
//!
//! ```text
//!   AcquisitionLoop ──publish()──► FrameSlot { frame, version, epoch }
//!                                      │ watch (broadcast wake)
//!                   ┌──────────────────┼──────────────────┐
//!                   ▼                  ▼                  ▼
//!             SlotSubscriber     SlotSubscriber     SlotSubscriber
//!             last_seen = 7      last_seen = 9      last_seen = 4
//! ```
//!
//! Each subscriber remembers the last version it consumed, so a wake for a
//! frame it already has is ignored and it never sees a version twice.
//!
//! Resetting the slot (source swap) clears the frame and advances the epoch.
//! Publishers are bound to the epoch they were created in, so a publisher
//! left over from the previous source cannot put a stale frame back.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::types::EncodedFrame;

#[derive(Debug, Default)]
struct SlotState {
    frame: Option<EncodedFrame>,
    version: u64,
    epoch: u64,
}

/// Single-frame broadcast buffer
#[derive(Debug)]
pub struct FrameSlot {
    state: watch::Sender<SlotState>,
}

impl FrameSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        let (state, _) = watch::channel(SlotState::default());
        Self { state }
    }

    /// Replace the current frame and wake all waiters
    ///
    /// Returns the version assigned to the frame.
    pub fn publish(&self, mut frame: EncodedFrame) -> u64 {
        let mut version = 0;
        self.state.send_modify(|state| {
            state.version += 1;
            version = state.version;
            frame.version = version;
            state.frame = Some(frame);
        });
        trace!(version, "Frame published");
        version
    }

    /// Clear the frame and invalidate publishers bound to the previous epoch
    ///
    /// The version counter keeps increasing across resets so subscribers that
    /// observed an old frame still accept the first frame of the new source.
    pub fn reset(&self) {
        self.state.send_modify(|state| {
            state.frame = None;
            state.epoch += 1;
            debug!(epoch = state.epoch, version = state.version, "Frame slot reset");
        });
    }

    /// Create a publisher bound to the current epoch
    pub fn publisher(self: &Arc<Self>) -> SlotPublisher {
        SlotPublisher { slot: Arc::clone(self), epoch: self.state.borrow().epoch }
    }

    /// Create a subscriber that has not observed any frame yet
    ///
    /// Its first wait returns the current frame immediately, if there is one.
    pub fn subscribe(&self) -> SlotSubscriber {
        self.subscribe_from(0)
    }

    /// Create a subscriber that has already observed `version`
    pub fn subscribe_from(&self, version: u64) -> SlotSubscriber {
        SlotSubscriber { rx: self.state.subscribe(), last_seen: version }
    }

    /// Latest frame, if any
    pub fn latest(&self) -> Option<EncodedFrame> {
        self.state.borrow().frame.clone()
    }

    /// Version of the most recent publish (0 before the first)
    pub fn version(&self) -> u64 {
        self.state.borrow().version
    }

    /// Current epoch (number of resets)
    pub fn epoch(&self) -> u64 {
        self.state.borrow().epoch
    }

    /// Whether the slot currently holds no frame
    pub fn is_empty(&self) -> bool {
        self.state.borrow().frame.is_none()
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishing handle owned by one acquisition loop
#[derive(Debug, Clone)]
pub struct SlotPublisher {
    slot: Arc<FrameSlot>,
    epoch: u64,
}

impl SlotPublisher {
    /// Publish a frame unless the slot has been reset since this handle was made
    ///
    /// Returns `false` when the frame was dropped as stale.
    pub fn publish(&self, mut frame: EncodedFrame) -> bool {
        let mut accepted = false;
        self.slot.state.send_if_modified(|state| {
            if state.epoch != self.epoch {
                return false;
            }
            state.version += 1;
            frame.version = state.version;
            state.frame = Some(frame);
            accepted = true;
            true
        });

        if !accepted {
            debug!(epoch = self.epoch, "Dropped frame from stale publisher");
        }
        accepted
    }

    /// Epoch this publisher is bound to
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether a reset has made this publisher stale
    pub fn is_stale(&self) -> bool {
        self.slot.epoch() != self.epoch
    }
}

/// Per-viewer view of the slot
#[derive(Debug)]
pub struct SlotSubscriber {
    rx: watch::Receiver<SlotState>,
    last_seen: u64,
}

impl SlotSubscriber {
    /// Wait for a frame newer than the last one this subscriber observed
    ///
    /// Returns `None` if no such frame arrives within `timeout`. A timeout is
    /// not a disconnect; callers simply wait again.
    pub async fn wait_next(&mut self, timeout: Duration) -> Option<EncodedFrame> {
        let last_seen = self.last_seen;
        let rx = &mut self.rx;

        let wait = async {
            loop {
                {
                    let state = rx.borrow_and_update();
                    if let Some(frame) = state.frame.as_ref().filter(|f| f.version > last_seen) {
                        return Some(frame.clone());
                    }
                }

                // The slot owns the sender, so this only fails once the slot is gone
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };

        let frame = tokio::time::timeout(timeout, wait).await.ok().flatten()?;
        self.last_seen = frame.version;
        Some(frame)
    }

    /// Version of the last frame this subscriber received
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }
}
