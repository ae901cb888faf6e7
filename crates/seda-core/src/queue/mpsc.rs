//! Multi-producer single-consumer ring

use core::sync::atomic::{AtomicU64, Ordering};

use super::{publish_in_order, Arena, CachePadded, EventQueue, QueueKind, MAX_SPIN};
use crate::error::{Result, SedaError};
use crate::event::RawEvent;

/// MPSC ring: producers reserve a slot with a CAS on `write`, copy into it,
/// then publish in reservation order through `max_read`.
///
/// ```text
///   read ≤ max_read ≤ write
///   [read, max_read)   published, consumer may read
///   [max_read, write)  reserved, producers still copying
/// ```
///
/// # Contract
///
/// Any number of threads may push; at most one thread pops at a time.
pub struct MpscQueue {
    arena: Arena,
    write: CachePadded<AtomicU64>,
    max_read: CachePadded<AtomicU64>,
    read: CachePadded<AtomicU64>,
}

// Safety: producers only write slots they reserved via CAS; the single
// consumer only reads slots below `max_read`.
unsafe impl Sync for MpscQueue {}

impl MpscQueue {
    pub fn new(capacity: usize, record_size: usize) -> Result<Self> {
        Ok(Self {
            arena: Arena::new(capacity, record_size)?,
            write: CachePadded::new(AtomicU64::new(0)),
            max_read: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(0)),
        })
    }

    fn reserve(&self) -> Result<u64> {
        let cap = self.arena.capacity() as u64;
        let mut spins = 0;
        loop {
            let w = self.write.load(Ordering::Relaxed);
            if w.wrapping_sub(self.read.load(Ordering::Acquire)) >= cap {
                return Err(SedaError::QueueFull);
            }
            if self
                .write
                .compare_exchange_weak(w, w + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(w);
            }
            spins += 1;
            if spins >= MAX_SPIN {
                return Err(SedaError::QueueFull);
            }
            core::hint::spin_loop();
        }
    }
}

impl EventQueue for MpscQueue {
    fn push(&self, bytes: &[u8]) -> Result<()> {
        self.arena.check(bytes)?;
        let w = self.reserve()?;
        // Safety: slot w is reserved by this thread and already released by
        // the consumer (fullness check above)
        unsafe { self.arena.write(w, bytes) };
        publish_in_order(&self.max_read, w);
        Ok(())
    }

    fn pop_with<F>(&self, f: F) -> bool
    where
        F: FnOnce(RawEvent<'_>),
    {
        let r = self.read.load(Ordering::Relaxed);
        if r >= self.max_read.load(Ordering::Acquire) {
            return false;
        }
        // Safety: slot r is published; producers wait for read to pass it
        if let Some(ev) = RawEvent::new(unsafe { self.arena.slot(r) }) {
            f(ev);
        }
        self.read.store(r + 1, Ordering::Release);
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
        QueueKind::Mpsc
    }
}
