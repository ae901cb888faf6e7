//! Timer queues
//!
//! Two pooled timer queues share one node layout: [`TimerQueue`] groups
//! arbitrary intervals into per-interval buckets, [`LruTimerQueue`] holds a
//! single interval and doubles as an LRU list. Neither performs syscalls or
//! allocates after construction (bucket map nodes aside); the owner decides
//! when to call `expire`.

mod list;
mod lru;
mod queue;

pub use list::{TimerHandle, NONE};
pub use lru::LruTimerQueue;
pub use queue::TimerQueue;
