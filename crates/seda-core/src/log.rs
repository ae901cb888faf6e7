//! Leveled stderr logging for reactor and stage threads
//!
//! Every line is written under the stderr lock so output from concurrent
//! stage threads never interleaves mid-line.
//!
//! # Environment Variables
//!
//! - `SEDA_LOG_LEVEL=<level>` - off, error, warn, info, debug, trace (or 0..5)
//! - `SEDA_FLUSH_EPRINT=1` - flush stderr after each line
//! - `SEDA_LOG_THREAD=1` - prefix each line with the current thread name
//!
//! # Usage
//!
//! ```ignore
//! use seda_core::{log_info, log_warn};
//!
//! log_info!("stage {} opened with {} threads", name, n);
//! log_warn!("queue full, dropping event type {}", type_id);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Once;

/// Log levels, most severe first
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit; unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static INIT: Once = Once::new();
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static THREAD_TAG: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Read `SEDA_LOG_LEVEL`, `SEDA_FLUSH_EPRINT` and `SEDA_LOG_THREAD`.
///
/// Runs once; later calls are no-ops. Called lazily by the first log line.
pub fn init() {
    INIT.call_once(|| {
        if let Some(level) = std::env::var("SEDA_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
        {
            LOG_LEVEL.store(level as u8, Ordering::Relaxed);
        }
        FLUSH_ENABLED.store(
            crate::env::env_get_bool("SEDA_FLUSH_EPRINT", false),
            Ordering::Relaxed,
        );
        THREAD_TAG.store(
            crate::env::env_get_bool("SEDA_LOG_THREAD", false),
            Ordering::Relaxed,
        );
    });
}

#[inline]
pub fn log_level() -> LogLevel {
    init();
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level programmatically (overrides the environment)
pub fn set_log_level(level: LogLevel) {
    init();
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn set_thread_tag_enabled(enabled: bool) {
    init();
    THREAD_TAG.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _print_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _log_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} ", level.prefix());
    if THREAD_TAG.load(Ordering::Relaxed) {
        let current = std::thread::current();
        let _ = write!(handle, "[{}] ", current.name().unwrap_or("-"));
    }
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

// ============================================================================
// Public Macros
// ============================================================================

/// Unleveled print to stderr (no newline)
#[macro_export]
macro_rules! log_print {
    ($($arg:tt)*) => {{
        $crate::log::_print_impl(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Error, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Warn, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Info, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Debug, format_args!($($arg)*));
    }};
}

/// Hot-path tracing; the level check happens before formatting
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        if $crate::log::level_enabled($crate::log::LogLevel::Trace) {
            $crate::log::_log_impl($crate::log::LogLevel::Trace, format_args!($($arg)*));
        }
    }};
}
