//! # Reactor
//!
//! A single-threaded event loop over an OS readiness multiplexer.
//!
//! ```text
//!   other threads                      loop thread
//!   ─────────────                      ───────────
//!   LoopHandle::push_event ──► inject (MPSC ring) ──┐
//!   LoopHandle::add_handler ─► commands (ArrayQueue)┤
//!   LoopHandle::wakeup ──────► Waker (eventfd) ─────┤
//!                                                   ▼
//!                         EventLoop::run_once: poll → dispatch → commands
//!                                              → injected → timers
//! ```
//!
//! Registration state is only ever touched on the loop thread. Structural
//! changes requested from inside a callback (close, add, interest change)
//! go through [`LoopContext`] and are applied once the callback returns.

mod context;
mod event_loop;
mod handler;
mod interest;
pub mod poller;
mod source;
mod waker;

pub use context::{LoopContext, LoopEventHandler, NoopLoopHandler, TimerTarget};
pub use event_loop::{EventLoop, LoopHandle, LoopStats};
pub use handler::{AsAnyBox, HandlerState, IoHandler, NewHandler, Token, WAKER_TOKEN};
pub use interest::{Interest, PollEvent};
pub use poller::{DefaultPoller, Poller};
pub use source::{EventSource, PooledSource, Reusable};
pub use waker::Waker;
