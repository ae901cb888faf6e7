//! # seda-runtime
//!
//! OS-facing half of the SEDA framework.
//!
//! This crate provides:
//! - The reactor: a single-threaded event loop multiplexing descriptors,
//!   timers and injected events (`reactor`)
//! - Poller backends: epoll on Linux, select(2) elsewhere (`reactor::poller`)
//! - SEDA stages: thread pools each draining their own event queue (`stage`)
//! - Length-prefixed message framing for byte streams (`framing`)
//! - Compile-time defaults with environment overrides (`config`)

pub mod config;
pub mod framing;
pub mod reactor;
pub mod stage;

// Re-exports
pub use config::{ConfigError, LoopConfig, LoopFlags, LruSlotConfig, StageConfig};
pub use framing::{DecoderConfig, LengthFieldDecoder};
pub use reactor::{
    DefaultPoller, EventLoop, EventSource, HandlerState, Interest, IoHandler, LoopContext,
    LoopEventHandler, LoopHandle, LoopStats, NewHandler, PollEvent, Poller, PooledSource,
    Reusable, TimerTarget, Token, Waker,
};
pub use stage::{Priority, Stage, StageContext, StageHandler, StageStats};
