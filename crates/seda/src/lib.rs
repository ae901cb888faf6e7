//! # seda - Staged Event-Driven Architecture
//!
//! Event queues, timers, a reactor and thread-pool stages for building
//! servers as pipelines of stages connected by bounded queues.
//!
//! ## Features
//!
//! - **Event queues**: fixed-slot ring buffers for every producer/consumer
//!   cardinality (SPSC, MPSC, SPMC, MPMC, double buffer)
//! - **Timers**: bucketed interval timer queue and fixed-interval LRU queue
//! - **Reactor**: single-threaded event loop over epoll or select(2) with
//!   generation-checked handler tokens and a coalescing waker
//! - **Stages**: named thread pools with optional priority, shared queue,
//!   idle and timer dispatch
//! - **Framing**: length-field message decoder for byte streams
//!
//! ## Quick Start
//!
//! ```ignore
//! use seda::{EventRecord, EventHeader, RawEvent, RuntimeContext};
//! use seda::{Stage, StageConfig, StageContext, StageHandler};
//!
//! #[repr(C)]
//! #[derive(Clone, Copy)]
//! struct Request { header: EventHeader, id: u64 }
//! unsafe impl EventRecord for Request { const TYPE_ID: u32 = 1; }
//!
//! struct Worker;
//! impl StageHandler for Worker {
//!     fn handle_event(&mut self, ev: RawEvent<'_>, _ctx: &mut StageContext<'_>) {
//!         if let Some(req) = ev.decode::<Request>() {
//!             println!("request {}", req.id);
//!         }
//!     }
//! }
//!
//! let rt = RuntimeContext::new();
//! let stage = Stage::open(StageConfig::new("work").thread_count(4), &rt, |_| Worker)?;
//! stage.push_event(&Request { header: EventHeader::for_record::<Request>(rt.clock.now_us()), id: 7 })?;
//! stage.close();
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   sockets ──► EventLoop (reactor thread) ── push_event ──► Stage A ──► Stage B
//!                  ▲    │                                      │
//!                  │    └── timers, injected events            │
//!                  └──────────── LoopHandle::push_event ───────┘
//! ```

// Re-export core types
pub use seda_core::{
    encode_raw, slot_size_for, Clock, DoubleBufferQueue, EventHeader, EventQueue, EventRecord,
    LruTimerQueue, MpmcQueue, MpscQueue, QueueKind, QuitEvent, RawEvent, Result,
    RuntimeContext, SedaError, SpmcQueue, SpscNaiveQueue, SpscQueue, TimerHandle, TimerQueue,
    HEADER_SIZE, QUIT_EVENT_TYPE, RESERVED_TYPE_BASE, WAKE_EVENT_TYPE,
};

// Re-export log macros
pub use seda_core::{log_debug, log_error, log_info, log_print, log_trace, log_warn};
pub use seda_core::log::{init as init_logging, set_log_level, LogLevel};

// Re-export env utilities
pub use seda_core::env::{env_get, env_get_bool, env_get_ms, env_get_opt, env_get_us};

// Re-export runtime
pub use seda_runtime::config;
pub use seda_runtime::framing;
pub use seda_runtime::reactor;
pub use seda_runtime::stage;
pub use seda_runtime::{
    ConfigError, DecoderConfig, DefaultPoller, EventLoop, EventSource, HandlerState, Interest,
    IoHandler, LengthFieldDecoder, LoopConfig, LoopContext, LoopEventHandler, LoopFlags,
    LoopHandle, LoopStats, LruSlotConfig, NewHandler, PollEvent, Poller, PooledSource, Priority,
    Reusable, Stage, StageConfig, StageContext, StageHandler, StageStats, TimerTarget, Token,
    Waker,
};
