//! Double-buffered multi-producer single-consumer queue

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Arena, EventQueue, QueueKind};
use crate::error::{Result, SedaError};
use crate::event::RawEvent;

/// Plain ring; never shared without external exclusion.
struct Ring {
    arena: Arena,
    write: u64,
    read: u64,
}

impl Ring {
    fn new(capacity: usize, record_size: usize) -> Result<Self> {
        Ok(Self {
            arena: Arena::new(capacity, record_size)?,
            write: 0,
            read: 0,
        })
    }

    #[inline]
    fn len(&self) -> usize {
        (self.write - self.read) as usize
    }
}

/// Producers append to a mutex-guarded standby ring; the consumer drains a
/// private active ring and swaps the two only when the active one is empty.
///
/// The lock is held only for one copy (push) or one pointer swap (pop), and
/// the consumer never takes it while it still has buffered work.
///
/// `capacity()` reports both rings together: up to `per_buffer` records wait
/// in standby while up to `per_buffer` more are being drained.
///
/// # Contract
///
/// Any number of threads may push; at most one thread pops at a time.
pub struct DoubleBufferQueue {
    standby: Mutex<Box<Ring>>,
    active: UnsafeCell<Box<Ring>>,
    standby_len: AtomicUsize,
    pending: AtomicUsize,
    per_buffer: usize,
    slot_size: usize,
}

// Safety: `standby` is behind a mutex; `active` is touched only by the single
// consumer (see type docs).
unsafe impl Sync for DoubleBufferQueue {}

impl DoubleBufferQueue {
    /// `capacity` is per buffer.
    pub fn new(capacity: usize, record_size: usize) -> Result<Self> {
        let standby = Box::new(Ring::new(capacity, record_size)?);
        let active = Box::new(Ring::new(capacity, record_size)?);
        let per_buffer = standby.arena.capacity();
        let slot_size = standby.arena.slot_size();
        Ok(Self {
            standby: Mutex::new(standby),
            active: UnsafeCell::new(active),
            standby_len: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            per_buffer,
            slot_size,
        })
    }

    /// Records accepted by the standby ring between swaps.
    #[inline]
    pub fn per_buffer_capacity(&self) -> usize {
        self.per_buffer
    }

    /// Exchange rings if the standby ring has anything. Consumer only.
    fn swap(&self) -> bool {
        if self.standby_len.load(Ordering::Acquire) == 0 {
            return false;
        }
        let mut standby = match self.standby.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if standby.len() == 0 {
            return false;
        }
        // Safety: consumer-only access, active ring is empty
        let active = unsafe { &mut *self.active.get() };
        std::mem::swap(&mut *standby, active);
        standby.read = 0;
        standby.write = 0;
        self.standby_len.store(0, Ordering::Release);
        true
    }
}

impl EventQueue for DoubleBufferQueue {
    fn push(&self, bytes: &[u8]) -> Result<()> {
        let mut standby = match self.standby.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        standby.arena.check(bytes)?;
        if standby.len() >= self.per_buffer {
            return Err(SedaError::QueueFull);
        }
        let w = standby.write;
        // Safety: the mutex gives exclusive access to the standby ring
        unsafe { standby.arena.write(w, bytes) };
        standby.write = w + 1;
        self.pending.fetch_add(1, Ordering::Release);
        self.standby_len.store(standby.len(), Ordering::Release);
        Ok(())
    }

    fn pop_with<F>(&self, f: F) -> bool
    where
        F: FnOnce(RawEvent<'_>),
    {
        let active = self.active.get();
        // Safety: consumer-only; no reference into the ring outlives the
        // statements below
        let empty = unsafe { (*active).len() == 0 };
        if empty && !self.swap() {
            return false;
        }
        let (r, slot) = unsafe {
            let ring = &**active;
            (ring.read, ring.arena.slot(ring.read))
        };
        if let Some(ev) = RawEvent::new(slot) {
            f(ev);
        }
        // Safety: consumer-only
        unsafe { (**active).read = r + 1 };
        self.pending.fetch_sub(1, Ordering::Release);
        true
    }

    #[inline]
    fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.per_buffer * 2
    }

    #[inline]
    fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn kind(&self) -> QueueKind {
        QueueKind::DoubleBuffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::test_support::{assert_bytes_round_trip, patterned, Seq};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_standby_fills_then_swaps() {
        let q = DoubleBufferQueue::new(2, 32).unwrap();
        assert_eq!(q.capacity(), 4);
        q.push_event(&Seq::new(0, 0)).unwrap();
        q.push_event(&Seq::new(0, 1)).unwrap();
        assert!(matches!(q.push_event(&Seq::new(0, 2)), Err(SedaError::QueueFull)));

        // first pop swaps; standby is free again
        let mut first = None;
        assert!(q.pop_with(|ev| first = ev.decode::<Seq>()));
        assert_eq!(first.unwrap().seq, 0);
        q.push_event(&Seq::new(0, 2)).unwrap();
        q.push_event(&Seq::new(0, 3)).unwrap();
        assert_eq!(q.len(), 3);

        let mut seqs = Vec::new();
        q.drain(usize::MAX, |ev| seqs.push(ev.decode::<Seq>().unwrap().seq));
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_every_record_length_round_trips() {
        assert_bytes_round_trip(&DoubleBufferQueue::new(4, 128).unwrap());
    }

    #[test]
    fn test_records_survive_swap_byte_for_byte() {
        let q = DoubleBufferQueue::new(4, 128).unwrap();
        let recs: Vec<Vec<u8>> = [128usize, 17, 64, 33, 100, 16]
            .into_iter()
            .enumerate()
            .map(|(salt, len)| patterned(len, salt as u8))
            .collect();

        for rec in &recs[..4] {
            q.push(rec).unwrap();
        }
        let mut out = Vec::new();
        assert!(q.pop_into(&mut out));
        assert_eq!(out, recs[0]);
        // lands in the standby ring while the active one still drains
        q.push(&recs[4]).unwrap();
        q.push(&recs[5]).unwrap();

        for rec in &recs[1..] {
            assert!(q.pop_into(&mut out));
            assert_eq!(&out, rec);
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let q = DoubleBufferQueue::new(4, 32).unwrap();
        let mut i = 0;
        while q.push_event(&Seq::new(0, i)).is_ok() {
            i += 1;
        }
        assert!(q.pop_with(|_| {}));
        while q.push_event(&Seq::new(0, i)).is_ok() {
            i += 1;
        }
        assert_eq!(q.len(), 7);
        assert!(q.len() <= q.capacity());
    }

    #[test]
    fn test_concurrent_producers() {
        const PRODUCERS: u64 = 4;
        const PER: u64 = 5_000;
        let q = Arc::new(DoubleBufferQueue::new(64, 32).unwrap());

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    let mut i = 0;
                    while i < PER {
                        if q.push_event(&Seq::new(p, i)).is_ok() {
                            i += 1;
                        } else {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut next = vec![0u64; PRODUCERS as usize];
        let mut total = 0;
        while total < PRODUCERS * PER {
            let mut got = None;
            if q.pop_with(|ev| got = ev.decode::<Seq>()) {
                let s = got.unwrap();
                assert_eq!(s.seq, next[s.producer as usize]);
                next[s.producer as usize] += 1;
                total += 1;
            } else {
                thread::yield_now();
            }
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
