//! Monotonic clock shared by loops, stages and timers
//!
//! One `Clock` is calibrated at process start and handed to every component
//! through a [`RuntimeContext`]; timer queues and event headers all speak the
//! same epoch, so timestamps taken on different threads are comparable.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic clock anchored at construction time.
#[derive(Debug)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// The instant all readings are relative to.
    #[inline]
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Milliseconds since the epoch.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Microseconds since the epoch.
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }

    /// Convert a reading in milliseconds back to an `Instant`.
    #[inline]
    pub fn instant_at_ms(&self, ms: u64) -> Instant {
        self.epoch + Duration::from_millis(ms)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide services passed explicitly to loops and stages.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub clock: Arc<Clock>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Clock::new()),
        }
    }

    pub fn with_clock(clock: Arc<Clock>) -> Self {
        Self { clock }
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}
