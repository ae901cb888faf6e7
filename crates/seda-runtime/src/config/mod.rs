//! SEDA Configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls on the config value
//! 2. Environment variables (runtime)
//! 3. User's config file named by `SEDA_CONFIG_RS` (compile-time)
//! 4. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use seda_runtime::config::{LoopConfig, StageConfig, LruSlotConfig};
//!
//! let loop_cfg = LoopConfig::from_env().max_handles(4096);
//!
//! let stage_cfg = StageConfig::from_env("decode")
//!     .thread_count(2)
//!     .idle_enabled(true)
//!     .lru_slot(LruSlotConfig::new(1024, 30_000));
//! ```

pub mod defaults;

use std::time::Duration;

use seda_core::env::{env_get, env_get_bool};
use seda_core::event::{HEADER_SIZE, MIN_SLOT_SIZE};
use seda_core::log_print;

/// Event loop behaviour flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopFlags(u32);

impl LoopFlags {
    pub const NONE: LoopFlags = LoopFlags(0);
    /// Register descriptors edge-triggered (epoll only)
    pub const EDGE_TRIGGERED: LoopFlags = LoopFlags(1 << 0);

    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(&self, other: LoopFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for LoopFlags {
    type Output = LoopFlags;

    fn bitor(self, rhs: LoopFlags) -> LoopFlags {
        LoopFlags(self.0 | rhs.0)
    }
}

/// Event loop configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum registered handlers
    pub max_handles: usize,
    /// Maximum ready events taken per poll
    pub io_vector_count: usize,
    /// Upper bound on one poll wait
    pub max_timeout: Duration,
    pub flags: LoopFlags,
    /// Loop timer pool size
    pub timer_capacity: usize,
    /// Cross-thread injected event queue slots
    pub inject_capacity: usize,
    /// Largest injected event record
    pub inject_event_size: usize,
    /// Cross-thread command queue slots
    pub command_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LoopConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SEDA_LOOP_MAX_HANDLES` - Maximum registered handlers
    /// - `SEDA_LOOP_IO_VECTORS` - Ready events per poll
    /// - `SEDA_LOOP_MAX_TIMEOUT_MS` - Poll wait ceiling in milliseconds
    /// - `SEDA_LOOP_EDGE_TRIGGERED` - Edge-triggered registration (0/1)
    /// - `SEDA_LOOP_TIMER_CAPACITY` - Timer pool size
    /// - `SEDA_LOOP_INJECT_CAPACITY` - Injected event queue slots
    /// - `SEDA_LOOP_INJECT_EVENT_SIZE` - Largest injected record
    /// - `SEDA_LOOP_COMMAND_CAPACITY` - Command queue slots
    pub fn from_env() -> Self {
        let edge = env_get_bool("SEDA_LOOP_EDGE_TRIGGERED", defaults::LOOP_EDGE_TRIGGERED);
        Self {
            max_handles: env_get("SEDA_LOOP_MAX_HANDLES", defaults::LOOP_MAX_HANDLES),
            io_vector_count: env_get("SEDA_LOOP_IO_VECTORS", defaults::LOOP_IO_VECTORS),
            max_timeout: Duration::from_millis(env_get(
                "SEDA_LOOP_MAX_TIMEOUT_MS",
                defaults::LOOP_MAX_TIMEOUT_MS,
            )),
            flags: if edge {
                LoopFlags::EDGE_TRIGGERED
            } else {
                LoopFlags::NONE
            },
            timer_capacity: env_get("SEDA_LOOP_TIMER_CAPACITY", defaults::LOOP_TIMER_CAPACITY),
            inject_capacity: env_get(
                "SEDA_LOOP_INJECT_CAPACITY",
                defaults::LOOP_INJECT_CAPACITY,
            ),
            inject_event_size: env_get(
                "SEDA_LOOP_INJECT_EVENT_SIZE",
                defaults::LOOP_INJECT_EVENT_SIZE,
            ),
            command_capacity: env_get(
                "SEDA_LOOP_COMMAND_CAPACITY",
                defaults::LOOP_COMMAND_CAPACITY,
            ),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            max_handles: defaults::LOOP_MAX_HANDLES,
            io_vector_count: defaults::LOOP_IO_VECTORS,
            max_timeout: Duration::from_millis(defaults::LOOP_MAX_TIMEOUT_MS),
            flags: if defaults::LOOP_EDGE_TRIGGERED {
                LoopFlags::EDGE_TRIGGERED
            } else {
                LoopFlags::NONE
            },
            timer_capacity: defaults::LOOP_TIMER_CAPACITY,
            inject_capacity: defaults::LOOP_INJECT_CAPACITY,
            inject_event_size: defaults::LOOP_INJECT_EVENT_SIZE,
            command_capacity: defaults::LOOP_COMMAND_CAPACITY,
        }
    }

    // Builder methods

    pub fn max_handles(mut self, n: usize) -> Self {
        self.max_handles = n;
        self
    }

    pub fn io_vector_count(mut self, n: usize) -> Self {
        self.io_vector_count = n;
        self
    }

    pub fn max_timeout(mut self, d: Duration) -> Self {
        self.max_timeout = d;
        self
    }

    pub fn flags(mut self, flags: LoopFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn timer_capacity(mut self, n: usize) -> Self {
        self.timer_capacity = n;
        self
    }

    pub fn inject_capacity(mut self, n: usize) -> Self {
        self.inject_capacity = n;
        self
    }

    pub fn inject_event_size(mut self, n: usize) -> Self {
        self.inject_event_size = n;
        self
    }

    pub fn command_capacity(mut self, n: usize) -> Self {
        self.command_capacity = n;
        self
    }

    #[inline]
    pub fn edge_triggered(&self) -> bool {
        self.flags.contains(LoopFlags::EDGE_TRIGGERED)
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_handles == 0 {
            return Err(ConfigError::InvalidValue("max_handles must be > 0"));
        }
        if self.max_handles >= u32::MAX as usize {
            return Err(ConfigError::InvalidValue("max_handles must fit in u32"));
        }
        if self.io_vector_count == 0 {
            return Err(ConfigError::InvalidValue("io_vector_count must be > 0"));
        }
        if self.timer_capacity == 0 {
            return Err(ConfigError::InvalidValue("timer_capacity must be > 0"));
        }
        if self.inject_capacity == 0 {
            return Err(ConfigError::InvalidValue("inject_capacity must be > 0"));
        }
        if self.inject_event_size < HEADER_SIZE {
            return Err(ConfigError::InvalidValue(
                "inject_event_size must hold an event header",
            ));
        }
        if self.command_capacity == 0 {
            return Err(ConfigError::InvalidValue("command_capacity must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        log_print!("Event Loop Configuration:\n");
        log_print!("  max_handles:        {}\n", self.max_handles);
        log_print!("  io_vector_count:    {}\n", self.io_vector_count);
        log_print!("  max_timeout:        {:?}\n", self.max_timeout);
        log_print!("  edge_triggered:     {}\n", self.edge_triggered());
        log_print!("  timer_capacity:     {}\n", self.timer_capacity);
        log_print!("  inject_capacity:    {}\n", self.inject_capacity);
        log_print!("  inject_event_size:  {}\n", self.inject_event_size);
        log_print!("  command_capacity:   {}\n", self.command_capacity);
    }
}

/// One fixed-interval LRU timer slot of a stage thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LruSlotConfig {
    /// Timers the slot can hold
    pub capacity: usize,
    /// Shared interval in milliseconds
    pub interval_ms: u64,
}

impl LruSlotConfig {
    pub fn new(capacity: usize, interval_ms: u64) -> Self {
        Self {
            capacity,
            interval_ms,
        }
    }
}

/// Stage configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Stage name, used for thread names and logs
    pub name: String,
    /// Worker threads
    pub thread_count: usize,
    /// Slots per event buffer
    pub queue_capacity: usize,
    /// Largest event record the stage accepts
    pub event_record_size: usize,
    /// Bounded wait when a thread's queue is empty
    pub timedwait_interval: Duration,
    /// Signal the waiting thread on push (else rely on the timed wait)
    pub timedwait_signal_enabled: bool,
    /// Application tag, opaque to the framework
    pub stage_type: u32,
    /// Events between timer checks under load
    pub batch_size: usize,
    /// Give each thread a high-priority queue drained first
    pub priority_enabled: bool,
    /// One queue shared by all threads instead of one per thread
    pub shared_queue_enabled: bool,
    /// Call `handle_idle` when a thread's queue drains
    pub idle_enabled: bool,
    /// Check timers in the dispatch loop
    pub timer_enabled: bool,
    /// General timer pool size per thread
    pub timer_capacity: usize,
    /// Fixed-interval LRU timer slots per thread
    pub lru_slots: Vec<LruSlotConfig>,
}

impl StageConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SEDA_STAGE_THREADS` - Worker threads per stage
    /// - `SEDA_STAGE_QUEUE_CAPACITY` - Slots per event buffer
    /// - `SEDA_STAGE_EVENT_SIZE` - Largest event record
    /// - `SEDA_STAGE_TIMEDWAIT_US` - Idle wait in microseconds
    /// - `SEDA_STAGE_TIMEDWAIT_SIGNAL` - Signal waiting threads on push (0/1)
    /// - `SEDA_STAGE_BATCH_SIZE` - Events between timer checks
    /// - `SEDA_STAGE_PRIORITY` - High-priority queues (0/1)
    /// - `SEDA_STAGE_SHARED_QUEUE` - One queue for all threads (0/1)
    /// - `SEDA_STAGE_IDLE` - Idle callbacks (0/1)
    /// - `SEDA_STAGE_TIMER` - Timer checks (0/1)
    /// - `SEDA_STAGE_TIMER_CAPACITY` - Timer pool per thread
    pub fn from_env(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            thread_count: env_get("SEDA_STAGE_THREADS", defaults::STAGE_THREADS),
            queue_capacity: env_get(
                "SEDA_STAGE_QUEUE_CAPACITY",
                defaults::STAGE_QUEUE_CAPACITY,
            ),
            event_record_size: env_get("SEDA_STAGE_EVENT_SIZE", defaults::STAGE_EVENT_SIZE),
            timedwait_interval: Duration::from_micros(env_get(
                "SEDA_STAGE_TIMEDWAIT_US",
                defaults::STAGE_TIMEDWAIT_US,
            )),
            timedwait_signal_enabled: env_get_bool(
                "SEDA_STAGE_TIMEDWAIT_SIGNAL",
                defaults::STAGE_TIMEDWAIT_SIGNAL,
            ),
            stage_type: 0,
            batch_size: env_get("SEDA_STAGE_BATCH_SIZE", defaults::STAGE_BATCH_SIZE),
            priority_enabled: env_get_bool("SEDA_STAGE_PRIORITY", defaults::STAGE_PRIORITY),
            shared_queue_enabled: env_get_bool(
                "SEDA_STAGE_SHARED_QUEUE",
                defaults::STAGE_SHARED_QUEUE,
            ),
            idle_enabled: env_get_bool("SEDA_STAGE_IDLE", defaults::STAGE_IDLE),
            timer_enabled: env_get_bool("SEDA_STAGE_TIMER", defaults::STAGE_TIMER),
            timer_capacity: env_get(
                "SEDA_STAGE_TIMER_CAPACITY",
                defaults::STAGE_TIMER_CAPACITY,
            ),
            lru_slots: Vec::new(),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            thread_count: defaults::STAGE_THREADS,
            queue_capacity: defaults::STAGE_QUEUE_CAPACITY,
            event_record_size: defaults::STAGE_EVENT_SIZE,
            timedwait_interval: Duration::from_micros(defaults::STAGE_TIMEDWAIT_US),
            timedwait_signal_enabled: defaults::STAGE_TIMEDWAIT_SIGNAL,
            stage_type: 0,
            batch_size: defaults::STAGE_BATCH_SIZE,
            priority_enabled: defaults::STAGE_PRIORITY,
            shared_queue_enabled: defaults::STAGE_SHARED_QUEUE,
            idle_enabled: defaults::STAGE_IDLE,
            timer_enabled: defaults::STAGE_TIMER,
            timer_capacity: defaults::STAGE_TIMER_CAPACITY,
            lru_slots: Vec::new(),
        }
    }

    // Builder methods

    pub fn thread_count(mut self, n: usize) -> Self {
        self.thread_count = n;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    pub fn event_record_size(mut self, n: usize) -> Self {
        self.event_record_size = n;
        self
    }

    pub fn timedwait_interval(mut self, d: Duration) -> Self {
        self.timedwait_interval = d;
        self
    }

    pub fn timedwait_signal_enabled(mut self, enable: bool) -> Self {
        self.timedwait_signal_enabled = enable;
        self
    }

    pub fn stage_type(mut self, tag: u32) -> Self {
        self.stage_type = tag;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn priority_enabled(mut self, enable: bool) -> Self {
        self.priority_enabled = enable;
        self
    }

    pub fn shared_queue_enabled(mut self, enable: bool) -> Self {
        self.shared_queue_enabled = enable;
        self
    }

    pub fn idle_enabled(mut self, enable: bool) -> Self {
        self.idle_enabled = enable;
        self
    }

    pub fn timer_enabled(mut self, enable: bool) -> Self {
        self.timer_enabled = enable;
        self
    }

    pub fn timer_capacity(mut self, n: usize) -> Self {
        self.timer_capacity = n;
        self
    }

    /// Append one LRU timer slot; slots are addressed by insertion order.
    pub fn lru_slot(mut self, slot: LruSlotConfig) -> Self {
        self.lru_slots.push(slot);
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue("name must not be empty"));
        }
        if self.thread_count == 0 {
            return Err(ConfigError::InvalidValue("thread_count must be > 0"));
        }
        if self.thread_count > 256 {
            return Err(ConfigError::InvalidValue("thread_count must be <= 256"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("queue_capacity must be > 0"));
        }
        if self.event_record_size < HEADER_SIZE {
            return Err(ConfigError::InvalidValue(
                "event_record_size must hold an event header",
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue("batch_size must be > 0"));
        }
        if self.timedwait_interval.is_zero() {
            return Err(ConfigError::InvalidValue("timedwait_interval must be > 0"));
        }
        if self.shared_queue_enabled && self.priority_enabled {
            return Err(ConfigError::InvalidValue(
                "priority queues need per-thread queues",
            ));
        }
        if self.timer_enabled && self.timer_capacity == 0 {
            return Err(ConfigError::InvalidValue("timer_capacity must be > 0"));
        }
        if self
            .lru_slots
            .iter()
            .any(|s| s.capacity == 0 || s.interval_ms == 0)
        {
            return Err(ConfigError::InvalidValue(
                "lru slots need capacity > 0 and interval_ms > 0",
            ));
        }
        Ok(())
    }

    /// Slot size the stage queues will use.
    pub fn slot_size(&self) -> usize {
        seda_core::event::slot_size_for(self.event_record_size.max(MIN_SLOT_SIZE))
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        log_print!("Stage Configuration ({}):\n", self.name);
        log_print!("  thread_count:             {}\n", self.thread_count);
        log_print!("  queue_capacity:           {}\n", self.queue_capacity);
        log_print!("  event_record_size:        {}\n", self.event_record_size);
        log_print!("  timedwait_interval:       {:?}\n", self.timedwait_interval);
        log_print!("  timedwait_signal_enabled: {}\n", self.timedwait_signal_enabled);
        log_print!("  stage_type:               {}\n", self.stage_type);
        log_print!("  batch_size:               {}\n", self.batch_size);
        log_print!("  priority_enabled:         {}\n", self.priority_enabled);
        log_print!("  shared_queue_enabled:     {}\n", self.shared_queue_enabled);
        log_print!("  idle_enabled:             {}\n", self.idle_enabled);
        log_print!("  timer_enabled:            {}\n", self.timer_enabled);
        log_print!("  timer_capacity:           {}\n", self.timer_capacity);
        for (i, slot) in self.lru_slots.iter().enumerate() {
            log_print!(
                "  lru_slot[{}]:              capacity={} interval_ms={}\n",
                i,
                slot.capacity,
                slot.interval_ms
            );
        }
    }
}

/// Configuration error
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for seda_core::SedaError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => seda_core::SedaError::InvalidArgument(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_defaults_valid() {
        let config = LoopConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.edge_triggered(), defaults::LOOP_EDGE_TRIGGERED);
    }

    #[test]
    fn test_loop_builder() {
        let config = LoopConfig::new()
            .max_handles(16)
            .flags(LoopFlags::EDGE_TRIGGERED)
            .max_timeout(Duration::from_millis(5));
        assert_eq!(config.max_handles, 16);
        assert!(config.edge_triggered());
        assert_eq!(config.max_timeout, Duration::from_millis(5));

        assert!(LoopConfig::new().io_vector_count(0).validate().is_err());
        assert!(LoopConfig::new().inject_event_size(8).validate().is_err());
    }

    #[test]
    fn test_stage_from_env() {
        std::env::set_var("SEDA_STAGE_BATCH_SIZE", "7");
        let config = StageConfig::from_env("env");
        assert_eq!(config.batch_size, 7);
        std::env::remove_var("SEDA_STAGE_BATCH_SIZE");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stage_validation() {
        assert!(StageConfig::new("").validate().is_err());
        assert!(StageConfig::new("s").thread_count(0).validate().is_err());
        assert!(StageConfig::new("s")
            .shared_queue_enabled(true)
            .priority_enabled(true)
            .validate()
            .is_err());
        assert!(StageConfig::new("s")
            .lru_slot(LruSlotConfig::new(8, 0))
            .validate()
            .is_err());
        let ok = StageConfig::new("s")
            .thread_count(2)
            .lru_slot(LruSlotConfig::new(8, 100));
        assert!(ok.validate().is_ok());
        assert_eq!(ok.lru_slots.len(), 1);
    }

    #[test]
    fn test_slot_size() {
        assert_eq!(StageConfig::new("s").event_record_size(40).slot_size(), 64);
    }

    #[test]
    fn test_flags() {
        let f = LoopFlags::NONE | LoopFlags::EDGE_TRIGGERED;
        assert!(f.contains(LoopFlags::EDGE_TRIGGERED));
        assert!(!LoopFlags::NONE.contains(LoopFlags::EDGE_TRIGGERED));
        assert_eq!(f.bits(), 1);
    }
}
