//! Error types for the SEDA core and runtime
//!
//! Every error maps to a stable negative code (see [`SedaError::code`]) so
//! callbacks and dispatch loops can react uniformly without unwinding.
//! Would-block conditions never show up here; they are absorbed where they
//! happen and treated as "try again later".

use core::fmt;

/// Result type for SEDA operations
pub type Result<T> = std::result::Result<T, SedaError>;

/// Errors that can occur in queue, timer, reactor and stage operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SedaError {
    // ── Capacity exhaustion (-1 .. -9) ──
    /// Ring buffer has no free slot (backpressure)
    QueueFull,

    /// Event record does not fit in the queue's slot
    EventTooLarge { len: usize, slot: usize },

    /// Event record is shorter than its header
    EventTooSmall,

    /// Fixed-size timer pool has no free timer
    TimerPoolExhausted,

    /// Handler table already holds `max_handles` entries
    HandlerTableFull,

    // ── Registration conflicts (-10 .. -19) ──
    /// Handler (or descriptor) is already registered
    AlreadyRegistered,

    /// Handler is not registered, or was already removed
    NotRegistered,

    /// Timer handle is stale or unknown
    TimerNotFound,

    // ── Usage errors (-20 .. -29) ──
    /// Argument out of range
    InvalidArgument(&'static str),

    /// Object used before `open()`
    NotOpened,

    /// `open()` called twice
    AlreadyOpened,

    /// Framed message exceeds the decoder's limit
    FrameTooLong { len: usize, max: usize },

    // ── Fatal initialization (-30 ..) ──
    /// Arena allocation failed
    AllocationFailed,

    /// Failed to spawn a worker thread
    SpawnFailed,

    /// OS error with errno
    Os(i32),
}

impl SedaError {
    /// Stable negative code for this error.
    pub fn code(&self) -> i32 {
        match self {
            SedaError::QueueFull => -1,
            SedaError::EventTooLarge { .. } => -2,
            SedaError::EventTooSmall => -3,
            SedaError::TimerPoolExhausted => -4,
            SedaError::HandlerTableFull => -5,
            SedaError::AlreadyRegistered => -10,
            SedaError::NotRegistered => -11,
            SedaError::TimerNotFound => -12,
            SedaError::InvalidArgument(_) => -20,
            SedaError::NotOpened => -21,
            SedaError::AlreadyOpened => -22,
            SedaError::FrameTooLong { .. } => -23,
            SedaError::AllocationFailed => -30,
            SedaError::SpawnFailed => -31,
            SedaError::Os(_) => -32,
        }
    }

    /// Capacity exhaustion: the caller should retry later or shed load.
    #[inline]
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            SedaError::QueueFull | SedaError::TimerPoolExhausted | SedaError::HandlerTableFull
        )
    }

    /// Registration conflict: no side effect took place.
    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SedaError::AlreadyRegistered | SedaError::NotRegistered | SedaError::TimerNotFound
        )
    }

    /// Capture the calling thread's errno.
    #[cfg(unix)]
    pub fn last_os_error() -> Self {
        SedaError::Os(nix::errno::Errno::last_raw())
    }

    #[cfg(not(unix))]
    pub fn last_os_error() -> Self {
        SedaError::Os(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }
}

impl fmt::Display for SedaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SedaError::QueueFull => write!(f, "queue full"),
            SedaError::EventTooLarge { len, slot } => {
                write!(f, "event of {} bytes exceeds slot size {}", len, slot)
            }
            SedaError::EventTooSmall => write!(f, "event shorter than its header"),
            SedaError::TimerPoolExhausted => write!(f, "timer pool exhausted"),
            SedaError::HandlerTableFull => write!(f, "handler table full"),
            SedaError::AlreadyRegistered => write!(f, "handler already registered"),
            SedaError::NotRegistered => write!(f, "handler not registered"),
            SedaError::TimerNotFound => write!(f, "timer not found"),
            SedaError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            SedaError::NotOpened => write!(f, "not opened"),
            SedaError::AlreadyOpened => write!(f, "already opened"),
            SedaError::FrameTooLong { len, max } => {
                write!(f, "frame of {} bytes exceeds max {}", len, max)
            }
            SedaError::AllocationFailed => write!(f, "arena allocation failed"),
            SedaError::SpawnFailed => write!(f, "failed to spawn worker thread"),
            SedaError::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for SedaError {}

#[cfg(unix)]
impl From<nix::errno::Errno> for SedaError {
    fn from(e: nix::errno::Errno) -> Self {
        SedaError::Os(e as i32)
    }
}
