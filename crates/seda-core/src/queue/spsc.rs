//! Single-producer single-consumer rings

use core::cell::Cell;
use core::sync::atomic::{AtomicU64, Ordering};

use super::{Arena, CachePadded, EventQueue, QueueKind};
use crate::error::{Result, SedaError};
use crate::event::RawEvent;

/// SPSC ring with plain indices.
///
/// `!Sync`: push and pop must happen on one thread at a time. The queue may
/// move between threads as long as the hand-off is externally synchronized.
pub struct SpscNaiveQueue {
    arena: Arena,
    write: Cell<u64>,
    read: Cell<u64>,
}

impl SpscNaiveQueue {
    pub fn new(capacity: usize, record_size: usize) -> Result<Self> {
        Ok(Self {
            arena: Arena::new(capacity, record_size)?,
            write: Cell::new(0),
            read: Cell::new(0),
        })
    }
}

impl EventQueue for SpscNaiveQueue {
    fn push(&self, bytes: &[u8]) -> Result<()> {
        self.arena.check(bytes)?;
        let w = self.write.get();
        if w - self.read.get() >= self.arena.capacity() as u64 {
            return Err(SedaError::QueueFull);
        }
        // Safety: single thread owns every slot
        unsafe { self.arena.write(w, bytes) };
        self.write.set(w + 1);
        Ok(())
    }

    fn pop_with<F>(&self, f: F) -> bool
    where
        F: FnOnce(RawEvent<'_>),
    {
        let r = self.read.get();
        if r == self.write.get() {
            return false;
        }
        // Safety: single thread owns every slot
        if let Some(ev) = RawEvent::new(unsafe { self.arena.slot(r) }) {
            f(ev);
        }
        self.read.set(r + 1);
        true
    }

    #[inline]
    fn len(&self) -> usize {
        (self.write.get() - self.read.get()) as usize
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
        QueueKind::SpscNaive
    }
}

/// SPSC ring with atomic indices, safe across one producer and one consumer
/// thread.
///
/// The producer owns `write`, the consumer owns `read`; each side publishes
/// its index with a release store and reads the other's with an acquire load,
/// which is what makes the copied slot bytes visible to the other thread.
///
/// # Contract
///
/// At most one thread pushes and at most one thread pops at any time.
pub struct SpscQueue {
    arena: Arena,
    write: CachePadded<AtomicU64>,
    read: CachePadded<AtomicU64>,
}

// Safety: index ownership is split between exactly one producer and one
// consumer (see type docs); slots are only touched by the index owner.
unsafe impl Sync for SpscQueue {}

impl SpscQueue {
    pub fn new(capacity: usize, record_size: usize) -> Result<Self> {
        Ok(Self {
            arena: Arena::new(capacity, record_size)?,
            write: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(0)),
        })
    }
}

impl EventQueue for SpscQueue {
    fn push(&self, bytes: &[u8]) -> Result<()> {
        self.arena.check(bytes)?;
        let w = self.write.load(Ordering::Relaxed);
        let r = self.read.load(Ordering::Acquire);
        if w - r >= self.arena.capacity() as u64 {
            return Err(SedaError::QueueFull);
        }
        // Safety: slot w is behind the consumer's read index
        unsafe { self.arena.write(w, bytes) };
        self.write.store(w + 1, Ordering::Release);
        Ok(())
    }

    fn pop_with<F>(&self, f: F) -> bool
    where
        F: FnOnce(RawEvent<'_>),
    {
        let r = self.read.load(Ordering::Relaxed);
        if r == self.write.load(Ordering::Acquire) {
            return false;
        }
        // Safety: slot r is published and the producer cannot reuse it until
        // read moves past it
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
        QueueKind::Spsc
    }
}
