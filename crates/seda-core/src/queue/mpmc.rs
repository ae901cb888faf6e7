//! Multi-producer multi-consumer ring

use core::sync::atomic::{AtomicU64, Ordering};

use super::{publish_in_order, Arena, CachePadded, EventQueue, QueueKind, MAX_SPIN};
use crate::error::{Result, SedaError};
use crate::event::RawEvent;

/// MPMC ring: both sides use the reserve/copy/publish protocol.
///
/// ```text
///   released ≤ read ≤ max_read ≤ write
///   [released, read)   reserved by consumers, still being read
///   [read, max_read)   published, free to reserve for reading
///   [max_read, write)  reserved by producers, still being written
/// ```
///
/// Producers test fullness against `released`, so a slot is never
/// overwritten while a slow consumer is still looking at it.
pub struct MpmcQueue {
    arena: Arena,
    write: CachePadded<AtomicU64>,
    max_read: CachePadded<AtomicU64>,
    read: CachePadded<AtomicU64>,
    released: CachePadded<AtomicU64>,
}

// Safety: every slot access is bracketed by a CAS reservation and an
// in-order publish (see type docs).
unsafe impl Sync for MpmcQueue {}

impl MpmcQueue {
    pub fn new(capacity: usize, record_size: usize) -> Result<Self> {
        Ok(Self {
            arena: Arena::new(capacity, record_size)?,
            write: CachePadded::new(AtomicU64::new(0)),
            max_read: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(0)),
            released: CachePadded::new(AtomicU64::new(0)),
        })
    }

    fn reserve_write(&self) -> Result<u64> {
        let cap = self.arena.capacity() as u64;
        let mut spins = 0;
        loop {
            let w = self.write.load(Ordering::Relaxed);
            if w.wrapping_sub(self.released.load(Ordering::Acquire)) >= cap {
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

    fn reserve_read(&self) -> Option<u64> {
        let mut spins = 0;
        loop {
            let r = self.read.load(Ordering::Relaxed);
            if r >= self.max_read.load(Ordering::Acquire) {
                return None;
            }
            if self
                .read
                .compare_exchange_weak(r, r + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(r);
            }
            spins += 1;
            if spins >= MAX_SPIN {
                return None;
            }
            core::hint::spin_loop();
        }
    }
}

impl EventQueue for MpmcQueue {
    fn push(&self, bytes: &[u8]) -> Result<()> {
        self.arena.check(bytes)?;
        let w = self.reserve_write()?;
        // Safety: slot w is reserved and released by every consumer
        unsafe { self.arena.write(w, bytes) };
        publish_in_order(&self.max_read, w);
        Ok(())
    }

    fn pop_with<F>(&self, f: F) -> bool
    where
        F: FnOnce(RawEvent<'_>),
    {
        let Some(r) = self.reserve_read() else {
            return false;
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
        QueueKind::Mpmc
    }
}
