//! Readiness multiplexer backends
//!
//! The event loop is generic over [`Poller`]; the backend is fixed at
//! compile time so the hot poll path has no dynamic dispatch.
//!
//! | Backend          | Selected when                                   |
//! |------------------|-------------------------------------------------|
//! | [`EpollPoller`]  | Linux/Android, `select` feature off (default)   |
//! | [`SelectPoller`] | other unix targets, or the `select` feature     |

use std::os::unix::io::RawFd;
use std::time::Duration;

use seda_core::error::Result;

use super::interest::{Interest, PollEvent};

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll;
        pub use epoll::EpollPoller;
    }
}

mod select;
pub use select::SelectPoller;

cfg_if::cfg_if! {
    if #[cfg(all(any(target_os = "linux", target_os = "android"), not(feature = "select")))] {
        /// Backend used by `EventLoop` unless another is named.
        pub type DefaultPoller = EpollPoller;
    } else {
        /// Backend used by `EventLoop` unless another is named.
        pub type DefaultPoller = SelectPoller;
    }
}

/// OS readiness notification facility.
///
/// Tokens are opaque to the poller and handed back verbatim in
/// [`PollEvent::token`]. Interrupted waits return `Ok(0)`.
pub trait Poller: Send + Sized {
    const NAME: &'static str;

    /// `max_fds` bounds registrations; `edge_triggered` is a hint that
    /// backends without edge semantics ignore.
    fn new(max_fds: usize, edge_triggered: bool) -> Result<Self>;

    fn register(&mut self, fd: RawFd, token: u64, interest: Interest) -> Result<()>;

    fn reregister(&mut self, fd: RawFd, token: u64, interest: Interest) -> Result<()>;

    fn deregister(&mut self, fd: RawFd) -> Result<()>;

    /// Wait up to `timeout` (forever when `None`) and append at most `max`
    /// reports to `events`. Returns the number appended.
    fn poll(
        &mut self,
        events: &mut Vec<PollEvent>,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<usize>;
}

/// Poll timeout in whole milliseconds, rounding sub-millisecond waits up so
/// a pending timer is not busy-polled.
#[inline]
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) if d.is_zero() => 0,
        Some(d) => {
            let ms = d.as_millis().max(1);
            ms.min(i32::MAX as u128) as i32
        }
    }
}
