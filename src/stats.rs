//! Frame rate tracking for status reporting

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Number of inter-frame intervals kept for the rolling rate
pub const RATE_WINDOW: usize = 30;

#[derive(Debug)]
struct RateState {
    started_at: Instant,
    last_frame_at: Option<Instant>,
    frame_count: u64,
    intervals: VecDeque<Duration>,
    interval_sum: Duration,
}

impl RateState {
    fn new(now: Instant) -> Self {
        Self {
            started_at: now,
            last_frame_at: None,
            frame_count: 0,
            intervals: VecDeque::with_capacity(RATE_WINDOW),
            interval_sum: Duration::ZERO,
        }
    }
}

/// Rolling frame rate over the most recent intervals
///
/// Only the acquisition loop records; status readers take a short lock.
#[derive(Debug)]
pub struct RateTracker {
    state: Mutex<RateState>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self { state: Mutex::new(RateState::new(Instant::now())) }
    }

    /// Record a published frame now
    pub fn record_frame(&self) {
        self.record_frame_at(Instant::now());
    }

    /// Record a published frame at `now`
    ///
    /// The first frame's interval is measured from the tracker's start.
    pub fn record_frame_at(&self, now: Instant) {
        let mut state = self.lock();
        let previous = state.last_frame_at.unwrap_or(state.started_at);
        let interval = now.saturating_duration_since(previous);

        if state.intervals.len() == RATE_WINDOW {
            if let Some(oldest) = state.intervals.pop_front() {
                state.interval_sum = state.interval_sum.saturating_sub(oldest);
            }
        }
        state.intervals.push_back(interval);
        state.interval_sum += interval;
        state.last_frame_at = Some(now);
        state.frame_count += 1;
    }

    /// Frames per second over the rolling window, 0 with fewer than two samples
    pub fn current_fps(&self) -> f64 {
        let state = self.lock();
        if state.intervals.len() < 2 {
            return 0.0;
        }

        let total = state.interval_sum.as_secs_f64();
        if total > 0.0 { state.intervals.len() as f64 / total } else { 0.0 }
    }

    /// Frames per second since the tracker started
    pub fn average_fps(&self) -> f64 {
        let state = self.lock();
        let secs = state.started_at.elapsed().as_secs_f64();
        if secs > 0.0 { state.frame_count as f64 / secs } else { 0.0 }
    }

    /// Total frames recorded since start (or the last reset)
    pub fn frame_count(&self) -> u64 {
        self.lock().frame_count
    }

    /// Number of interval samples currently held
    pub fn sample_count(&self) -> usize {
        self.lock().intervals.len()
    }

    /// Time since start (or the last reset)
    pub fn uptime(&self) -> Duration {
        self.lock().started_at.elapsed()
    }

    /// Forget all samples and restart the clock
    pub fn reset(&self) {
        *self.lock() = RateState::new(Instant::now());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateState> {
        // A panic while holding this lock cannot leave the counters inconsistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn start_of(tracker: &RateTracker) -> Instant {
        tracker.lock().started_at
    }

    #[test]
    fn no_rate_before_two_samples() {
        let tracker = RateTracker::new();
        assert_eq!(tracker.current_fps(), 0.0);

        let start = start_of(&tracker);
        tracker.record_frame_at(start + Duration::from_millis(40));
        assert_eq!(tracker.frame_count(), 1);
        assert_eq!(tracker.current_fps(), 0.0);
    }

    #[test]
    fn two_frames_average_both_intervals() {
        let tracker = RateTracker::new();
        let start = start_of(&tracker);

        // i1 = 100ms from start, i2 = 150ms between frames
        tracker.record_frame_at(start + Duration::from_millis(100));
        tracker.record_frame_at(start + Duration::from_millis(250));

        let expected = 2.0 / 0.25;
        assert!((tracker.current_fps() - expected).abs() < 1e-9);
    }

    #[test]
    fn steady_rate_is_reported() {
        let tracker = RateTracker::new();
        let start = start_of(&tracker);

        for i in 1..=100u64 {
            tracker.record_frame_at(start + Duration::from_millis(40 * i));
        }

        assert_eq!(tracker.frame_count(), 100);
        assert_eq!(tracker.sample_count(), RATE_WINDOW);
        assert!((tracker.current_fps() - 25.0).abs() < 1e-6);
    }

    #[test]
    fn reset_clears_samples() {
        let tracker = RateTracker::new();
        tracker.record_frame();
        tracker.record_frame();
        tracker.reset();

        assert_eq!(tracker.frame_count(), 0);
        assert_eq!(tracker.sample_count(), 0);
        assert_eq!(tracker.current_fps(), 0.0);
    }

    proptest! {
        #[test]
        fn prop_window_is_bounded(gaps in prop::collection::vec(1u64..200, 0..120)) {
            let tracker = RateTracker::new();
            let mut at = start_of(&tracker);

            for gap in &gaps {
                at += Duration::from_millis(*gap);
                tracker.record_frame_at(at);
                prop_assert!(tracker.sample_count() <= RATE_WINDOW);
            }

            prop_assert_eq!(tracker.frame_count(), gaps.len() as u64);
            prop_assert_eq!(tracker.sample_count(), gaps.len().min(RATE_WINDOW));

            if gaps.len() >= 2 {
                let recent = &gaps[gaps.len().saturating_sub(RATE_WINDOW)..];
                let sum: u64 = recent.iter().sum();
                let expected = recent.len() as f64 / (sum as f64 / 1000.0);
                prop_assert!((tracker.current_fps() - expected).abs() < 1e-6 * expected.max(1.0));
            }
        }
    }
}
