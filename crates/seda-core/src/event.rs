//! Fixed-layout event records
//!
//! An event is a `#[repr(C)]` struct whose first field is an [`EventHeader`].
//! Queues copy the record's bytes into a slot of their arena; nothing is
//! shared by pointer between producer and consumer, so the record outlives
//! the call that produced it without a per-event allocation.
//!
//! ```ignore
//! #[repr(C)]
//! #[derive(Clone, Copy)]
//! struct Tick { header: EventHeader, seq: u64 }
//!
//! unsafe impl EventRecord for Tick { const TYPE_ID: u32 = 7; }
//!
//! let tick = Tick { header: EventHeader::for_record::<Tick>(clock.now_us()), seq: 1 };
//! queue.push_event(&tick)?;
//! ```

use core::mem::size_of;
use core::ptr;

/// Size of [`EventHeader`] on the wire.
pub const HEADER_SIZE: usize = size_of::<EventHeader>();

/// Smallest slot a queue will hand out.
pub const MIN_SLOT_SIZE: usize = 32;

/// Type ids at or above this value are reserved for the framework.
pub const RESERVED_TYPE_BASE: u32 = 0xFFFF_0000;

/// Stops the stage thread that pops it.
pub const QUIT_EVENT_TYPE: u32 = 0xFFFF_FFFF;

/// Carries no work; only forces a consumer to spin once.
pub const WAKE_EVENT_TYPE: u32 = 0xFFFF_FFFE;

/// Header shared by every event record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventHeader {
    /// Total record length in bytes, header included
    pub byte_length: u32,
    /// Structural identity of the record
    pub type_id: u32,
    /// Creation time in microseconds (clock epoch)
    pub timestamp: u64,
}

impl EventHeader {
    #[inline]
    pub fn new(type_id: u32, byte_length: u32, timestamp: u64) -> Self {
        Self {
            byte_length,
            type_id,
            timestamp,
        }
    }

    /// Header for a full `E` record.
    #[inline]
    pub fn for_record<E: EventRecord>(timestamp: u64) -> Self {
        Self::new(E::TYPE_ID, size_of::<E>() as u32, timestamp)
    }

    #[inline]
    pub fn is_reserved(&self) -> bool {
        self.type_id >= RESERVED_TYPE_BASE
    }
}

/// A plain-data event record.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, begin with an [`EventHeader`], contain
/// no padding bytes, no pointers or references, and be valid for every bit
/// pattern. Records are moved between threads as raw bytes.
pub unsafe trait EventRecord: Copy + Send + 'static {
    const TYPE_ID: u32;

    #[inline]
    fn header(&self) -> &EventHeader {
        // Safety: trait contract puts the header at offset 0
        unsafe { &*(self as *const Self as *const EventHeader) }
    }

    #[inline]
    fn as_bytes(&self) -> &[u8] {
        // Safety: trait contract guarantees no padding
        unsafe { core::slice::from_raw_parts(self as *const Self as *const u8, size_of::<Self>()) }
    }
}

/// The quit record recognised by stage threads.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuitEvent {
    pub header: EventHeader,
}

unsafe impl EventRecord for QuitEvent {
    const TYPE_ID: u32 = QUIT_EVENT_TYPE;
}

impl QuitEvent {
    pub fn new(timestamp: u64) -> Self {
        Self {
            header: EventHeader::for_record::<Self>(timestamp),
        }
    }
}

/// Borrowed view over one event stored in a queue slot.
#[derive(Clone, Copy)]
pub struct RawEvent<'a> {
    bytes: &'a [u8],
}

impl<'a> RawEvent<'a> {
    /// Wrap a byte slice that starts with an [`EventHeader`].
    ///
    /// Returns `None` if the slice is shorter than the header. The view is
    /// trimmed to the header's `byte_length` when that is shorter.
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        // Safety: length checked above; slots carry no alignment guarantee
        let header = unsafe { ptr::read_unaligned(bytes.as_ptr() as *const EventHeader) };
        let len = (header.byte_length as usize).clamp(HEADER_SIZE, bytes.len());
        Some(Self {
            bytes: &bytes[..len],
        })
    }

    #[inline]
    pub fn header(&self) -> EventHeader {
        unsafe { ptr::read_unaligned(self.bytes.as_ptr() as *const EventHeader) }
    }

    #[inline]
    pub fn type_id(&self) -> u32 {
        self.header().type_id
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.header().timestamp
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.len() == HEADER_SIZE
    }

    /// Whole record, header included.
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Bytes following the header.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[HEADER_SIZE..]
    }

    #[inline]
    pub fn is<E: EventRecord>(&self) -> bool {
        self.type_id() == E::TYPE_ID && self.bytes.len() >= size_of::<E>()
    }

    #[inline]
    pub fn is_quit(&self) -> bool {
        self.type_id() == QUIT_EVENT_TYPE
    }

    /// Copy the record out as `E` if the type id and length match.
    pub fn decode<E: EventRecord>(&self) -> Option<E> {
        if !self.is::<E>() {
            return None;
        }
        // Safety: length checked; EventRecord is valid for any bit pattern
        Some(unsafe { ptr::read_unaligned(self.bytes.as_ptr() as *const E) })
    }
}

impl core::fmt::Debug for RawEvent<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let h = self.header();
        f.debug_struct("RawEvent")
            .field("type_id", &h.type_id)
            .field("byte_length", &h.byte_length)
            .field("timestamp", &h.timestamp)
            .finish()
    }
}

/// Build a variable-length record: header followed by `payload`.
///
/// `out` is cleared first; the header's `byte_length` covers the payload.
pub fn encode_raw(type_id: u32, timestamp: u64, payload: &[u8], out: &mut Vec<u8>) {
    let header = EventHeader::new(type_id, (HEADER_SIZE + payload.len()) as u32, timestamp);
    out.clear();
    out.reserve(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.byte_length.to_ne_bytes());
    out.extend_from_slice(&header.type_id.to_ne_bytes());
    out.extend_from_slice(&header.timestamp.to_ne_bytes());
    out.extend_from_slice(payload);
}

/// Slot size for records of up to `record_size` bytes: the next power of two,
/// never below [`MIN_SLOT_SIZE`].
#[inline]
pub fn slot_size_for(record_size: usize) -> usize {
    record_size.max(MIN_SLOT_SIZE).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Sample {
        header: EventHeader,
        a: u64,
        b: u32,
        c: u32,
    }

    unsafe impl EventRecord for Sample {
        const TYPE_ID: u32 = 11;
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER_SIZE, 16);
        let h = EventHeader::for_record::<Sample>(99);
        assert_eq!(h.byte_length as usize, size_of::<Sample>());
        assert_eq!(h.type_id, 11);
        assert!(!h.is_reserved());
        assert!(QuitEvent::new(0).header.is_reserved());
    }

    #[test]
    fn test_decode_matching_type() {
        let s = Sample {
            header: EventHeader::for_record::<Sample>(5),
            a: 0xDEAD_BEEF,
            b: 7,
            c: 9,
        };
        let view = RawEvent::new(s.as_bytes()).unwrap();
        assert_eq!(view.type_id(), 11);
        assert_eq!(view.timestamp(), 5);
        assert_eq!(view.decode::<Sample>(), Some(s));
        assert!(view.decode::<QuitEvent>().is_none());
    }

    #[test]
    fn test_view_trims_to_byte_length() {
        let mut buf = Vec::new();
        encode_raw(3, 1, b"hello", &mut buf);
        buf.extend_from_slice(&[0xAA; 11]); // slot tail garbage
        let view = RawEvent::new(&buf).unwrap();
        assert_eq!(view.len(), HEADER_SIZE + 5);
        assert_eq!(view.payload(), b"hello");
    }

    #[test]
    fn test_short_slice_rejected() {
        assert!(RawEvent::new(&[0u8; 8]).is_none());
    }

    #[test]
    fn test_slot_size_rounding() {
        assert_eq!(slot_size_for(1), 32);
        assert_eq!(slot_size_for(32), 32);
        assert_eq!(slot_size_for(33), 64);
        assert_eq!(slot_size_for(size_of::<Sample>()), 32);
        assert_eq!(slot_size_for(1000), 1024);
    }
}
