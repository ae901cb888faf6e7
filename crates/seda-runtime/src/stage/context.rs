//! Callback context of a stage thread

use seda_core::error::Result;
use seda_core::timer::TimerHandle;

use super::thread::StageShared;

/// Handed to every [`StageHandler`](super::StageHandler) callback.
///
/// Timer operations act on the calling thread's own timer queues.
pub struct StageContext<'a> {
    shared: &'a StageShared,
    index: usize,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(shared: &'a StageShared, index: usize) -> Self {
        Self { shared, index }
    }

    #[inline]
    pub fn thread_index(&self) -> usize {
        self.index
    }

    pub fn stage_name(&self) -> &str {
        &self.shared.name
    }

    pub fn stage_type(&self) -> u32 {
        self.shared.stage_type
    }

    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.shared.clock.now_ms()
    }

    #[inline]
    pub fn now_us(&self) -> u64 {
        self.shared.clock.now_us()
    }

    pub fn set_timer(&mut self, interval_ms: u64, param: u64, cyclic: bool) -> Result<TimerHandle> {
        let now = self.now_ms();
        self.shared
            .lock_timers(self.index)?
            .set(interval_ms, param, cyclic, now)
    }

    pub fn cancel_timer(&mut self, handle: TimerHandle) -> Result<u64> {
        self.shared.lock_timers(self.index)?.queue.cancel_timer(handle)
    }

    pub fn update_timer(&mut self, handle: TimerHandle) -> Result<()> {
        let now = self.now_ms();
        self.shared
            .lock_timers(self.index)?
            .queue
            .update_timer(handle, now)
    }

    pub fn set_lru_timer(&mut self, slot: usize, param: u64) -> Result<TimerHandle> {
        let now = self.now_ms();
        self.shared
            .lock_timers(self.index)?
            .lru_mut(slot)?
            .set_timer(param, false, now)
    }

    /// Touch an LRU timer, moving it to the back of its slot.
    pub fn update_lru_timer(&mut self, slot: usize, handle: TimerHandle) -> Result<()> {
        let now = self.now_ms();
        self.shared
            .lock_timers(self.index)?
            .lru_mut(slot)?
            .update_timer(handle, now)
    }

    pub fn cancel_lru_timer(&mut self, slot: usize, handle: TimerHandle) -> Result<u64> {
        self.shared
            .lock_timers(self.index)?
            .lru_mut(slot)?
            .cancel_timer(handle)
    }
}
