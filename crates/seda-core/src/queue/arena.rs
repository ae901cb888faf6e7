//! Contiguous slot storage shared by every queue variant

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::constants::CACHE_LINE_SIZE;
use crate::error::{Result, SedaError};
use crate::event::{slot_size_for, EventHeader, HEADER_SIZE};

/// `capacity × slot_size` zeroed bytes, cache-line aligned.
///
/// The arena does no synchronization of its own; each queue decides which
/// thread may touch which slot.
pub struct Arena {
    ptr: NonNull<u8>,
    layout: Layout,
    capacity: usize,
    slot_size: usize,
    mask: u64,
}

// Safety: the arena is plain memory; access discipline is enforced by the
// owning queue's index protocol.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocate room for `capacity` records of up to `record_size` bytes.
    ///
    /// `capacity` is rounded up to a power of two and `record_size` up to a
    /// power-of-two slot of at least 32 bytes.
    pub fn new(capacity: usize, record_size: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SedaError::InvalidArgument("queue capacity must be > 0"));
        }
        let capacity = capacity
            .checked_next_power_of_two()
            .ok_or(SedaError::InvalidArgument("queue capacity too large"))?;
        let slot_size = slot_size_for(record_size);
        let bytes = capacity
            .checked_mul(slot_size)
            .ok_or(SedaError::InvalidArgument("queue arena too large"))?;
        let layout = Layout::from_size_align(bytes, CACHE_LINE_SIZE)
            .map_err(|_| SedaError::InvalidArgument("queue arena layout"))?;

        // Safety: layout has non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(SedaError::AllocationFailed)?;

        Ok(Self {
            ptr,
            layout,
            capacity,
            slot_size,
            mask: capacity as u64 - 1,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Reject records the slots cannot hold or whose header lies about
    /// their length.
    #[inline]
    pub fn check(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() < HEADER_SIZE {
            return Err(SedaError::EventTooSmall);
        }
        if bytes.len() > self.slot_size {
            return Err(SedaError::EventTooLarge {
                len: bytes.len(),
                slot: self.slot_size,
            });
        }
        // Safety: length checked above
        let header = unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const EventHeader) };
        if header.byte_length as usize != bytes.len() {
            return Err(SedaError::InvalidArgument("header byte_length mismatch"));
        }
        Ok(())
    }

    #[inline]
    fn slot_ptr(&self, index: u64) -> *mut u8 {
        let offset = (index & self.mask) as usize * self.slot_size;
        // Safety: offset < capacity * slot_size
        unsafe { self.ptr.as_ptr().add(offset) }
    }

    /// Copy `bytes` into the slot for `index`.
    ///
    /// # Safety
    ///
    /// The caller must own slot `index` (no concurrent reader or writer) and
    /// `bytes` must have passed [`Arena::check`].
    #[inline]
    pub unsafe fn write(&self, index: u64, bytes: &[u8]) {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.slot_ptr(index), bytes.len());
    }

    /// Borrow the slot for `index`.
    ///
    /// # Safety
    ///
    /// No writer may touch slot `index` while the returned slice lives.
    #[inline]
    pub unsafe fn slot(&self, index: u64) -> &[u8] {
        std::slice::from_raw_parts(self.slot_ptr(index), self.slot_size)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // Safety: allocated in `new` with the same layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity)
            .field("slot_size", &self.slot_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::encode_raw;

    #[test]
    fn test_rounding() {
        let a = Arena::new(5, 40).unwrap();
        assert_eq!(a.capacity(), 8);
        assert_eq!(a.slot_size(), 64);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            Arena::new(0, 32),
            Err(SedaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_check_bounds() {
        let a = Arena::new(4, 32).unwrap();
        assert!(matches!(a.check(&[0u8; 8]), Err(SedaError::EventTooSmall)));

        let mut rec = Vec::new();
        encode_raw(1, 0, &[0u8; 40], &mut rec);
        assert!(matches!(
            a.check(&rec),
            Err(SedaError::EventTooLarge { len: 56, slot: 32 })
        ));

        encode_raw(1, 0, &[1, 2, 3], &mut rec);
        assert!(a.check(&rec).is_ok());

        rec.push(0); // byte_length no longer matches
        assert!(matches!(a.check(&rec), Err(SedaError::InvalidArgument(_))));
    }

    #[test]
    fn test_wraparound_slots() {
        let a = Arena::new(4, 32).unwrap();
        let mut rec = Vec::new();
        encode_raw(9, 1, b"abc", &mut rec);
        unsafe {
            a.write(6, &rec);
            assert_eq!(&a.slot(2)[..rec.len()], &rec[..]);
        }
    }
}
