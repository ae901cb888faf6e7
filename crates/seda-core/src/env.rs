//! Environment variable helpers used by the configuration layer
//!
//! ```ignore
//! use seda_core::env::{env_get, env_get_bool};
//!
//! let threads: usize = env_get("SEDA_STAGE_THREADS", 4);
//! let signal = env_get_bool("SEDA_STAGE_TIMEDWAIT_SIGNAL", true);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`; unset or unparsable values yield `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` only when the variable is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag: "1", "true", "yes", "on" are true, "0", "false", "no",
/// "off" are false (case-insensitive). Anything else yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Millisecond duration.
#[inline]
pub fn env_get_ms(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Microsecond duration.
#[inline]
pub fn env_get_us(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_micros)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_defaults() {
        let v: usize = env_get("__SEDA_TEST_UNSET__", 42);
        assert_eq!(v, 42);
        assert!(env_get_bool("__SEDA_TEST_UNSET__", true));
        assert!(env_get_opt::<u32>("__SEDA_TEST_UNSET__").is_none());
        assert_eq!(
            env_get_ms("__SEDA_TEST_UNSET__", Duration::from_millis(7)),
            Duration::from_millis(7)
        );
    }

    #[test]
    fn test_parse_values() {
        std::env::set_var("__SEDA_TEST_NUM__", " 123 ");
        let v: usize = env_get("__SEDA_TEST_NUM__", 0);
        assert_eq!(v, 123);
        assert_eq!(
            env_get_us("__SEDA_TEST_NUM__", Duration::ZERO),
            Duration::from_micros(123)
        );
        std::env::remove_var("__SEDA_TEST_NUM__");
    }

    #[test]
    fn test_bool_variants() {
        std::env::set_var("__SEDA_TEST_BOOL__", "YES");
        assert!(env_get_bool("__SEDA_TEST_BOOL__", false));
        std::env::set_var("__SEDA_TEST_BOOL__", "off");
        assert!(!env_get_bool("__SEDA_TEST_BOOL__", true));
        std::env::set_var("__SEDA_TEST_BOOL__", "maybe");
        assert!(env_get_bool("__SEDA_TEST_BOOL__", true));
        std::env::remove_var("__SEDA_TEST_BOOL__");
    }

    #[test]
    fn test_garbage_falls_back() {
        std::env::set_var("__SEDA_TEST_BAD__", "not_a_number");
        let v: u64 = env_get("__SEDA_TEST_BAD__", 99);
        assert_eq!(v, 99);
        std::env::remove_var("__SEDA_TEST_BAD__");
    }
}
