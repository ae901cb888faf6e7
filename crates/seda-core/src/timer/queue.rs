//! Interval-bucketed timer queue

use std::collections::BTreeMap;

use super::list::{ListHead, TimerHandle, TimerPool};
use crate::error::{Result, SedaError};

/// Timers grouped by interval.
///
/// Within one bucket every timer shares the same interval, so insertion
/// order is expiry order and each bucket is consumed from the front.
/// `expire` walks buckets smallest interval first.
///
/// All times are milliseconds on the caller's clock; the queue never reads a
/// clock itself.
pub struct TimerQueue<P> {
    pool: TimerPool<P>,
    buckets: BTreeMap<u64, ListHead>,
}

impl<P> TimerQueue<P> {
    /// A queue able to hold `capacity` armed timers.
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            pool: TimerPool::new(capacity)?,
            buckets: BTreeMap::new(),
        })
    }

    /// Arm a timer firing at `now + interval`, and every `interval` after
    /// that when `cyclic`.
    pub fn set_timer(&mut self, interval: u64, param: P, cyclic: bool, now: u64) -> Result<TimerHandle> {
        if cyclic && interval == 0 {
            return Err(SedaError::InvalidArgument("cyclic timer needs a non-zero interval"));
        }
        let index = self
            .pool
            .acquire(param, interval, now.saturating_add(interval), cyclic)?;
        let list = self.buckets.entry(interval).or_insert_with(ListHead::new);
        self.pool.push_back(list, index);
        Ok(self.pool.handle(index))
    }

    /// Disarm a timer, returning its parameter.
    pub fn cancel_timer(&mut self, handle: TimerHandle) -> Result<P> {
        let index = self.pool.resolve(handle)?;
        let interval = self.pool.node(index).interval;
        self.unlink(interval, index);
        self.pool.release(index).ok_or(SedaError::TimerNotFound)
    }

    /// Restart a timer's countdown from `now`.
    pub fn update_timer(&mut self, handle: TimerHandle, now: u64) -> Result<()> {
        let index = self.pool.resolve(handle)?;
        let interval = self.pool.node(index).interval;
        let list = self
            .buckets
            .get_mut(&interval)
            .ok_or(SedaError::TimerNotFound)?;
        self.pool.unlink(list, index);
        self.pool.node_mut(index).expire_at = now.saturating_add(interval);
        self.pool.push_back(list, index);
        Ok(())
    }

    /// Whether `handle` still refers to an armed timer.
    #[inline]
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pool.resolve(handle).is_ok()
    }

    /// Absolute expiry of a pending timer.
    pub fn expire_time(&self, handle: TimerHandle) -> Option<u64> {
        let index = self.pool.resolve(handle).ok()?;
        Some(self.pool.node(index).expire_at)
    }

    /// Fire every timer whose expiry is `<= now`, calling `f` for each.
    ///
    /// One-shot timers are released after `f` returns; cyclic timers are
    /// re-armed at `now + interval`. Returns the number fired.
    pub fn expire<F>(&mut self, now: u64, mut f: F) -> usize
    where
        F: FnMut(TimerHandle, &P),
    {
        let mut fired = 0;
        let mut emptied = false;
        for list in self.buckets.values_mut() {
            fired += self.pool.expire_list(list, now, &mut f);
            emptied |= list.is_empty();
        }
        if emptied {
            self.buckets.retain(|_, list| !list.is_empty());
        }
        #[cfg(feature = "debug-assertions")]
        for list in self.buckets.values() {
            self.pool.check_list(list);
        }
        fired
    }

    /// Earliest expiry across all buckets.
    pub fn next_expire_time(&self) -> Option<u64> {
        self.buckets
            .values()
            .filter_map(|list| list.front())
            .map(|index| self.pool.node(index).expire_at)
            .min()
    }

    /// Armed timers.
    #[inline]
    pub fn len(&self) -> usize {
        self.pool.capacity() - self.pool.available()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Timers that can still be armed.
    #[inline]
    pub fn available(&self) -> usize {
        self.pool.available()
    }

    fn unlink(&mut self, interval: u64, index: u32) {
        if let Some(list) = self.buckets.get_mut(&interval) {
            self.pool.unlink(list, index);
            if list.is_empty() {
                self.buckets.remove(&interval);
            }
        }
    }
}

impl<P> std::fmt::Debug for TimerQueue<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fired_at(q: &mut TimerQueue<&'static str>, now: u64) -> Vec<&'static str> {
        let mut out = Vec::new();
        q.expire(now, |_, p| out.push(*p));
        out
    }

    #[test]
    fn test_interval_buckets_fire_in_order() {
        let mut q = TimerQueue::new(8).unwrap();
        q.set_timer(100, "t100", false, 0).unwrap();
        q.set_timer(50, "t50", false, 0).unwrap();
        let t200 = q.set_timer(200, "t200", false, 0).unwrap();

        assert_eq!(q.next_expire_time(), Some(50));
        assert_eq!(fired_at(&mut q, 60), vec!["t50"]);
        assert_eq!(fired_at(&mut q, 110), vec!["t100"]);
        assert!(q.is_pending(t200));
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_expire_time(), Some(200));
    }

    #[test]
    fn test_same_bucket_insertion_order() {
        let mut q = TimerQueue::new(8).unwrap();
        q.set_timer(10, "a", false, 0).unwrap();
        q.set_timer(10, "b", false, 1).unwrap();
        q.set_timer(10, "c", false, 2).unwrap();
        assert_eq!(fired_at(&mut q, 11), vec!["a", "b"]);
        assert_eq!(fired_at(&mut q, 12), vec!["c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_cyclic_rearms() {
        let mut q = TimerQueue::new(2).unwrap();
        let h = q.set_timer(10, "tick", true, 0).unwrap();
        assert_eq!(fired_at(&mut q, 10), vec!["tick"]);
        assert_eq!(q.expire_time(h), Some(20));
        assert!(fired_at(&mut q, 15).is_empty());
        // late check fires once, re-arms from the check time
        assert_eq!(fired_at(&mut q, 45), vec!["tick"]);
        assert_eq!(q.expire_time(h), Some(55));
        assert_eq!(q.cancel_timer(h).unwrap(), "tick");
        assert!(q.is_empty());
    }

    #[test]
    fn test_cancel_and_stale_handle() {
        let mut q = TimerQueue::new(1).unwrap();
        let h = q.set_timer(5, "x", false, 0).unwrap();
        assert_eq!(q.cancel_timer(h).unwrap(), "x");
        assert!(matches!(q.cancel_timer(h), Err(SedaError::TimerNotFound)));
        assert!(fired_at(&mut q, 100).is_empty());

        // node reuse does not resurrect the old handle
        let h2 = q.set_timer(5, "y", false, 0).unwrap();
        assert_eq!(h2.index(), h.index());
        assert!(!q.is_pending(h));
        assert!(q.is_pending(h2));
    }

    #[test]
    fn test_update_moves_to_back() {
        let mut q = TimerQueue::new(4).unwrap();
        let a = q.set_timer(10, "a", false, 0).unwrap();
        q.set_timer(10, "b", false, 2).unwrap();
        q.update_timer(a, 5).unwrap();
        assert_eq!(fired_at(&mut q, 12), vec!["b"]);
        assert_eq!(fired_at(&mut q, 15), vec!["a"]);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut q = TimerQueue::new(2).unwrap();
        q.set_timer(1, "a", false, 0).unwrap();
        q.set_timer(2, "b", false, 0).unwrap();
        assert!(matches!(
            q.set_timer(3, "c", false, 0),
            Err(SedaError::TimerPoolExhausted)
        ));
        assert_eq!(q.available(), 0);
        assert_eq!(fired_at(&mut q, 1), vec!["a"]);
        assert_eq!(q.available(), 1);
        q.set_timer(3, "c", false, 1).unwrap();
    }

    #[test]
    fn test_zero_interval_cyclic_rejected() {
        let mut q: TimerQueue<()> = TimerQueue::new(1).unwrap();
        assert!(matches!(
            q.set_timer(0, (), true, 0),
            Err(SedaError::InvalidArgument(_))
        ));
        assert_eq!(q.available(), 1);
    }
}
