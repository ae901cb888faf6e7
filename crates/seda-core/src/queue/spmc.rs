//! Single-producer multi-consumer ring

use core::sync::atomic::{AtomicU64, Ordering};

use super::{publish_in_order, Arena, CachePadded, EventQueue, QueueKind, MAX_SPIN};
use crate::error::{Result, SedaError};
use crate::event::RawEvent;

/// SPMC ring: the lone producer publishes `write` directly, consumers
/// reserve with a CAS on `read` and release in order through `released`.
///
/// # Contract
///
/// At most one thread pushes at a time; any number may pop.
pub struct SpmcQueue {
    arena: Arena,
    write: CachePadded<AtomicU64>,
    read: CachePadded<AtomicU64>,
    released: CachePadded<AtomicU64>,
}

// Safety: the single producer writes only released slots; consumers read
// only slots they reserved below `write`.
unsafe impl Sync for SpmcQueue {}

impl SpmcQueue {
    pub fn new(capacity: usize, record_size: usize) -> Result<Self> {
        Ok(Self {
            arena: Arena::new(capacity, record_size)?,
            write: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(0)),
            released: CachePadded::new(AtomicU64::new(0)),
        })
    }
}

impl EventQueue for SpmcQueue {
    fn push(&self, bytes: &[u8]) -> Result<()> {
        self.arena.check(bytes)?;
        let w = self.write.load(Ordering::Relaxed);
        if w - self.released.load(Ordering::Acquire) >= self.arena.capacity() as u64 {
            return Err(SedaError::QueueFull);
        }
        // Safety: only producer; slot w released by all consumers
        unsafe { self.arena.write(w, bytes) };
        self.write.store(w + 1, Ordering::Release);
        Ok(())
    }

    fn pop_with<F>(&self, f: F) -> bool
    where
        F: FnOnce(RawEvent<'_>),
    {
        let mut spins = 0;
        let r = loop {
            let r = self.read.load(Ordering::Relaxed);
            if r >= self.write.load(Ordering::Acquire) {
                return false;
            }
            if self
                .read
                .compare_exchange_weak(r, r + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break r;
            }
            spins += 1;
            if spins >= MAX_SPIN {
                return false;
            }
            core::hint::spin_loop();
        };
        // Safety: slot r is published and reserved by this consumer
        if let Some(ev) = RawEvent::new(unsafe { self.arena.slot(r) }) {
            f(ev);
        }
        publish_in_order(&self.released, r);
        true
    }

    #[inline]
    fn len(&self) -> usize {
        let r = self.read.load(Ordering::Acquire);
        let w = self.write.load(Ordering::Acquire);
        w.saturating_sub(r) as usize
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    #[inline]
    fn slot_size(&self) -> usize {
        self.arena.slot_size()
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Spmc
    }
}
