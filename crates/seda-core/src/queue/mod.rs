//! Event-type queues
//!
//! Fixed-capacity ring buffers over raw byte slots, one variant per
//! producer/consumer cardinality. All variants store records in a single
//! contiguous [`Arena`] of `capacity × slot_size` bytes; capacity is rounded
//! to a power of two so wraparound is a mask, and read/write indices are
//! monotonically increasing `u64` counters that are never reset.
//!
//! ```text
//!   variant         producers  consumers  sync on push          sync on pop
//!   ─────────────   ─────────  ─────────  ────────────────────  ─────────────────
//!   SpscNaiveQueue      1          1      none (same thread)    none
//!   SpscQueue           1          1      release store         release store
//!   MpscQueue           N          1      CAS + publish index   release store
//!   SpmcQueue           1          N      release store         CAS + publish index
//!   MpmcQueue           N          N      CAS + publish index   CAS + publish index
//!   DoubleBufferQueue   N          1      short mutex           none (swap when empty)
//! ```
//!
//! Picking a variant whose cardinality does not match the real callers is a
//! logic error; only `SpscNaiveQueue` is enforced by the type system (it is
//! `!Sync`).
//!
//! Every push is non-blocking: a full queue returns [`SedaError::QueueFull`]
//! and CAS contention gives up after [`MAX_SPIN`] attempts. Retry policy is
//! left to the caller.

mod arena;
mod double_buffer;
mod mpmc;
mod mpsc;
mod spmc;
mod spsc;

pub use arena::Arena;
pub use double_buffer::DoubleBufferQueue;
pub use mpmc::MpmcQueue;
pub use mpsc::MpscQueue;
pub use spmc::SpmcQueue;
pub use spsc::{SpscNaiveQueue, SpscQueue};

use core::ops::Deref;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::event::{EventRecord, RawEvent};

/// CAS attempts before a contended push/pop reports failure.
pub const MAX_SPIN: u32 = 1024;

/// Publish-wait iterations before the waiter starts yielding its time slice.
const PUBLISH_SPINS_BEFORE_YIELD: u32 = 64;

/// Which concurrency discipline a queue implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    SpscNaive,
    Spsc,
    Mpsc,
    Spmc,
    Mpmc,
    DoubleBuffer,
}

impl QueueKind {
    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::SpscNaive => "spsc_naive",
            QueueKind::Spsc => "spsc",
            QueueKind::Mpsc => "mpsc",
            QueueKind::Spmc => "spmc",
            QueueKind::Mpmc => "mpmc",
            QueueKind::DoubleBuffer => "double_buffer",
        }
    }

    /// Whether more than one thread may push concurrently.
    pub fn multi_producer(&self) -> bool {
        matches!(self, QueueKind::Mpsc | QueueKind::Mpmc | QueueKind::DoubleBuffer)
    }

    /// Whether more than one thread may pop concurrently.
    pub fn multi_consumer(&self) -> bool {
        matches!(self, QueueKind::Spmc | QueueKind::Mpmc)
    }
}

/// Common contract of every ring-buffer variant.
pub trait EventQueue: Send {
    /// Copy `bytes` (a full record, header first) into the next free slot.
    ///
    /// Never blocks. Fails with `QueueFull` when no slot is free.
    fn push(&self, bytes: &[u8]) -> Result<()>;

    /// Pop the oldest record and hand it to `f` while it still sits in its
    /// slot. Returns `false` if the queue was empty.
    ///
    /// `f` must not pop from the same queue.
    fn pop_with<F>(&self, f: F) -> bool
    where
        F: FnOnce(RawEvent<'_>),
        Self: Sized;

    /// Number of records pushed but not yet popped (`write - read`).
    fn len(&self) -> usize;

    /// Maximum number of records the queue holds.
    fn capacity(&self) -> usize;

    /// Bytes per slot.
    fn slot_size(&self) -> usize;

    fn kind(&self) -> QueueKind;

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    #[inline]
    fn push_event<E: EventRecord>(&self, event: &E) -> Result<()>
    where
        Self: Sized,
    {
        self.push(event.as_bytes())
    }

    /// Pop into an owned buffer.
    fn pop_into(&self, out: &mut Vec<u8>) -> bool
    where
        Self: Sized,
    {
        self.pop_with(|ev| {
            out.clear();
            out.extend_from_slice(ev.bytes());
        })
    }

    /// Pop up to `max` records, returning how many were handled.
    fn drain<F>(&self, max: usize, mut f: F) -> usize
    where
        F: FnMut(RawEvent<'_>),
        Self: Sized,
    {
        let mut n = 0;
        while n < max && self.pop_with(&mut f) {
            n += 1;
        }
        n
    }
}

/// Keeps reader-owned and writer-owned fields on separate cache lines.
///
/// 128 bytes covers adjacent-line prefetch on x86_64 and the 128-byte lines
/// of Apple aarch64 parts.
#[repr(align(128))]
#[derive(Debug, Default)]
pub struct CachePadded<T>(pub T);

impl<T> CachePadded<T> {
    pub const fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

/// Spin until `index` reaches `expected`, then move it one past.
///
/// This is the publish half of the reserve/write/publish protocol: the
/// thread that reserved slot `expected` waits for every earlier reservation
/// to publish first, so the published index never skips an unwritten slot.
#[inline]
pub(crate) fn publish_in_order(index: &AtomicU64, expected: u64) {
    let mut spins = 0u32;
    while index.load(Ordering::Acquire) != expected {
        if spins < PUBLISH_SPINS_BEFORE_YIELD {
            spins += 1;
            core::hint::spin_loop();
        } else {
            std::thread::yield_now();
        }
    }
    index.store(expected.wrapping_add(1), Ordering::Release);
}
