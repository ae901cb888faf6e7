//! Fixed-interval LRU timer queue

use super::list::{ListHead, TimerHandle, TimerPool};
use crate::error::{Result, SedaError};

/// Every timer shares one interval, so the single active list is already
/// ordered by expiry and both insert and expire are O(1) per timer.
///
/// Touching a timer with [`update_timer`](Self::update_timer) moves it to the
/// tail, which makes idle-timeout tracking a matter of calling `update_timer`
/// on every bit of activity.
pub struct LruTimerQueue<P> {
    pool: TimerPool<P>,
    list: ListHead,
    interval: u64,
}

impl<P> LruTimerQueue<P> {
    pub fn new(capacity: usize, interval: u64) -> Result<Self> {
        if interval == 0 {
            return Err(SedaError::InvalidArgument("lru interval must be > 0"));
        }
        Ok(Self {
            pool: TimerPool::new(capacity)?,
            list: ListHead::new(),
            interval,
        })
    }

    #[inline]
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Append a timer expiring at `now + interval`.
    pub fn set_timer(&mut self, param: P, cyclic: bool, now: u64) -> Result<TimerHandle> {
        let index = self
            .pool
            .acquire(param, self.interval, now.saturating_add(self.interval), cyclic)?;
        self.pool.push_back(&mut self.list, index);
        Ok(self.pool.handle(index))
    }

    /// Move a timer to the tail with a fresh expiry.
    pub fn update_timer(&mut self, handle: TimerHandle, now: u64) -> Result<()> {
        let index = self.pool.resolve(handle)?;
        self.pool.unlink(&mut self.list, index);
        self.pool.node_mut(index).expire_at = now.saturating_add(self.interval);
        self.pool.push_back(&mut self.list, index);
        Ok(())
    }

    pub fn cancel_timer(&mut self, handle: TimerHandle) -> Result<P> {
        let index = self.pool.resolve(handle)?;
        self.pool.unlink(&mut self.list, index);
        self.pool.release(index).ok_or(SedaError::TimerNotFound)
    }

    #[inline]
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pool.resolve(handle).is_ok()
    }

    /// Pop from the head while expired.
    pub fn expire<F>(&mut self, now: u64, mut f: F) -> usize
    where
        F: FnMut(TimerHandle, &P),
    {
        let fired = self.pool.expire_list(&mut self.list, now, &mut f);
        #[cfg(feature = "debug-assertions")]
        self.pool.check_list(&self.list);
        fired
    }

    pub fn next_expire_time(&self) -> Option<u64> {
        self.list.front().map(|index| self.pool.node(index).expire_at)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.pool.available()
    }
}

impl<P> std::fmt::Debug for LruTimerQueue<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruTimerQueue")
            .field("interval", &self.interval)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_reorders() {
        let mut q = LruTimerQueue::new(4, 100).unwrap();
        let a = q.set_timer('A', false, 0).unwrap();
        q.set_timer('B', false, 0).unwrap();
        q.set_timer('C', false, 0).unwrap();
        q.update_timer(a, 0).unwrap();

        let mut order = Vec::new();
        assert_eq!(q.expire(100, |_, p| order.push(*p)), 3);
        assert_eq!(order, vec!['B', 'C', 'A']);
        assert!(q.is_empty());
    }

    #[test]
    fn test_touch_defers_expiry() {
        let mut q = LruTimerQueue::new(2, 30).unwrap();
        let conn = q.set_timer(7u32, false, 0).unwrap();
        q.update_timer(conn, 20).unwrap();
        assert_eq!(q.expire(30, |_, _| {}), 0);
        assert_eq!(q.next_expire_time(), Some(50));
        assert_eq!(q.expire(50, |_, _| {}), 1);
        assert!(!q.is_pending(conn));
        assert!(q.update_timer(conn, 60).is_err());
    }

    #[test]
    fn test_cancel_returns_param() {
        let mut q = LruTimerQueue::new(1, 10).unwrap();
        let h = q.set_timer(String::from("idle"), false, 0).unwrap();
        assert!(matches!(
            q.set_timer(String::new(), false, 0),
            Err(SedaError::TimerPoolExhausted)
        ));
        assert_eq!(q.cancel_timer(h).unwrap(), "idle");
        assert_eq!(q.available(), 1);
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(LruTimerQueue::<()>::new(4, 0).is_err());
    }
}
