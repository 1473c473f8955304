//! Bounded admission of concurrent viewers

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

/// Counter of active viewers with a hard upper limit
///
/// Admission is a single compare-and-swap, so concurrent callers can never
/// push the count past the limit.
#[derive(Debug)]
pub struct AdmissionGate {
    active: AtomicUsize,
    limit: usize,
}

impl AdmissionGate {
    /// Create a gate admitting at most `limit` viewers (at least one)
    pub fn new(limit: usize) -> Self {
        Self { active: AtomicUsize::new(0), limit: limit.max(1) }
    }

    /// Admit one viewer if below the limit
    pub fn try_acquire(&self) -> bool {
        let admitted = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.limit).then_some(active + 1)
            })
            .is_ok();

        if !admitted {
            debug!(limit = self.limit, "Admission refused");
        }
        admitted
    }

    /// Release one admitted viewer
    ///
    /// Releasing more often than admitting leaves the count at zero.
    pub fn release(&self) {
        if self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| active.checked_sub(1))
            .is_err()
        {
            warn!("Admission released with no active viewers");
        }
    }

    /// Admit one viewer, returning a permit that releases on drop
    pub fn admit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        self.try_acquire().then(|| AdmissionPermit { gate: Arc::clone(self) })
    }

    /// Number of admitted viewers (advisory, may be stale immediately)
    pub fn count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Maximum number of concurrent viewers
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Proof of admission; releases its slot exactly once when dropped
#[derive(Debug)]
pub struct AdmissionPermit {
    gate: Arc<AdmissionGate>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
