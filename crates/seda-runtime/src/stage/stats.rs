//! Per-thread stage counters

use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one stage thread, written only by that thread.
#[derive(Debug, Default)]
pub(crate) struct ThreadStats {
    events: AtomicU64,
    timers_fired: AtomicU64,
    idle_calls: AtomicU64,
    waits: AtomicU64,
    wakeups: AtomicU64,
}

impl ThreadStats {
    #[inline]
    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_timers(&self, n: usize) {
        self.timers_fired.fetch_add(n as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_idle(&self) {
        self.idle_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// One bounded wait; `signaled` when it ended on a producer's signal
    /// rather than the timeout.
    #[inline]
    pub fn record_wait(&self, signaled: bool) {
        self.waits.fetch_add(1, Ordering::Relaxed);
        if signaled {
            self.wakeups.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StageStats {
        StageStats {
            events: self.events.load(Ordering::Relaxed),
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            idle_calls: self.idle_calls.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of stage thread counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Events handed to `handle_event` (quit events excluded)
    pub events: u64,
    pub timers_fired: u64,
    pub idle_calls: u64,
    /// Bounded condition-variable waits entered
    pub waits: u64,
    /// Waits ended by a signal
    pub wakeups: u64,
}

impl AddAssign for StageStats {
    fn add_assign(&mut self, rhs: StageStats) {
        self.events += rhs.events;
        self.timers_fired += rhs.timers_fired;
        self.idle_calls += rhs.idle_calls;
        self.waits += rhs.waits;
        self.wakeups += rhs.wakeups;
    }
}
