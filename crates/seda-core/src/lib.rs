//! # seda-core
//!
//! Core types for the SEDA framework.
//!
//! This crate is platform-agnostic and performs no I/O. The reactor,
//! stages and everything OS-facing live in `seda-runtime`.
//!
//! ## Modules
//!
//! - `event` - Fixed-layout event records and borrowed slot views
//! - `queue` - Ring-buffer event queues, one per producer/consumer cardinality
//! - `timer` - Interval-bucketed and fixed-interval (LRU) timer queues
//! - `clock` - Monotonic clock and the runtime context that carries it
//! - `error` - Error type with stable negative codes
//! - `log` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod clock;
pub mod env;
pub mod error;
pub mod event;
pub mod log;
pub mod queue;
pub mod timer;

// Re-exports for convenience
pub use clock::{Clock, RuntimeContext};
pub use env::{env_get, env_get_bool, env_get_ms, env_get_opt, env_get_us};
pub use error::{Result, SedaError};
pub use event::{
    encode_raw, slot_size_for, EventHeader, EventRecord, QuitEvent, RawEvent, HEADER_SIZE,
    QUIT_EVENT_TYPE, RESERVED_TYPE_BASE, WAKE_EVENT_TYPE,
};
pub use log::LogLevel;
pub use queue::{
    DoubleBufferQueue, EventQueue, MpmcQueue, MpscQueue, QueueKind, SpmcQueue, SpscNaiveQueue,
    SpscQueue,
};
pub use timer::{LruTimerQueue, TimerHandle, TimerQueue};

/// Constants for memory layout
pub mod constants {
    cfg_if::cfg_if! {
        if #[cfg(all(target_arch = "aarch64", target_os = "macos"))] {
            /// Cache line size for alignment
            pub const CACHE_LINE_SIZE: usize = 128;
        } else {
            /// Cache line size for alignment
            pub const CACHE_LINE_SIZE: usize = 64;
        }
    }

    /// Default slot count for a queue
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

    /// Default record size a queue is sized for
    pub const DEFAULT_EVENT_SIZE: usize = 64;
}
