//! Handler sources: where closed handlers go

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;
use seda_core::log_warn;

use super::handler::IoHandler;

/// Owner that takes a handler back after the loop has closed it.
pub trait EventSource: Send + Sync {
    fn reclaim(&self, handler: Box<dyn IoHandler>);
}

/// A handler that can be returned to a pool and handed out again.
pub trait Reusable {
    /// Release per-connection state (including the descriptor).
    fn reset(&mut self);
}

/// Bounded free list of reset handlers of one concrete type.
///
/// Reclaimed handlers beyond the pool's capacity are dropped.
pub struct PooledSource<H> {
    free: ArrayQueue<Box<H>>,
    make: Box<dyn Fn() -> H + Send + Sync>,
    created: AtomicU64,
    reused: AtomicU64,
}

impl<H: IoHandler + Reusable> PooledSource<H> {
    pub fn new<F>(capacity: usize, make: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
    {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            make: Box::new(make),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// A pooled handler, or a fresh one when the pool is empty.
    pub fn acquire(&self) -> Box<H> {
        match self.free.pop() {
            Some(h) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                h
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Box::new((self.make)())
            }
        }
    }

    /// Handlers currently parked in the pool.
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }
}

impl<H: IoHandler + Reusable> EventSource for PooledSource<H> {
    fn reclaim(&self, handler: Box<dyn IoHandler>) {
        match handler.into_any().downcast::<H>() {
            Ok(mut h) => {
                h.reset();
                let _ = self.free.push(h);
            }
            Err(_) => log_warn!("pooled source: reclaimed handler of foreign type dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::RawFd;

    struct Conn {
        fd: RawFd,
        bytes: usize,
    }

    impl IoHandler for Conn {
        fn fd(&self) -> RawFd {
            self.fd
        }
    }

    impl Reusable for Conn {
        fn reset(&mut self) {
            self.fd = -1;
            self.bytes = 0;
        }
    }

    struct Other;

    impl IoHandler for Other {
        fn fd(&self) -> RawFd {
            -1
        }
    }

    #[test]
    fn test_reclaim_resets_and_reuses() {
        let pool = PooledSource::new(2, || Conn { fd: -1, bytes: 0 });
        let mut c = pool.acquire();
        c.fd = 5;
        c.bytes = 100;
        assert_eq!(pool.created(), 1);

        pool.reclaim(c);
        assert_eq!(pool.idle(), 1);

        let c = pool.acquire();
        assert_eq!(c.fd, -1);
        assert_eq!(c.bytes, 0);
        assert_eq!(pool.reused(), 1);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_overflow_and_foreign_dropped() {
        let pool = PooledSource::new(1, || Conn { fd: -1, bytes: 0 });
        let a = pool.acquire();
        let b = pool.acquire();
        pool.reclaim(a);
        pool.reclaim(b);
        assert_eq!(pool.idle(), 1);

        pool.reclaim(Box::new(Other));
        assert_eq!(pool.idle(), 1);
    }
}
