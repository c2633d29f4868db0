//! Environment variable helpers used by the bridge configuration.
//!
//! ```ignore
//! let frames: usize = env_get("REFLECT_QUEUE_FRAMES", 16);
//! let timeout = env_get_millis("REFLECT_SEND_TIMEOUT_MS"); // 0 or unset => None
//! let flush = env_get_bool("REFLECT_FLUSH_EPRINT", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` only if `key` is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// "1", "true", "yes", "on" (any case) are true; any other set value is
/// false; unset returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Milliseconds as an optional duration. Zero, unset or garbage mean "none".
pub fn env_get_millis(key: &str) -> Option<Duration> {
    match env_get_opt::<u64>(key) {
        Some(0) | None => None,
        Some(ms) => Some(Duration::from_millis(ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names; the test harness runs in parallel.

    #[test]
    fn test_unset_defaults() {
        let n: usize = env_get("__REFLECT_TEST_UNSET__", 42);
        assert_eq!(n, 42);
        assert!(env_get_bool("__REFLECT_TEST_UNSET__", true));
        assert!(env_get_opt::<u32>("__REFLECT_TEST_UNSET__").is_none());
        assert_eq!(env_get_str("__REFLECT_TEST_UNSET__", "root"), "root");
        assert!(env_get_millis("__REFLECT_TEST_UNSET__").is_none());
    }

    #[test]
    fn test_parse_and_fallback() {
        std::env::set_var("__REFLECT_TEST_NUM__", " 123 ");
        assert_eq!(env_get::<usize>("__REFLECT_TEST_NUM__", 0), 123);
        std::env::set_var("__REFLECT_TEST_NUM__", "many");
        assert_eq!(env_get::<usize>("__REFLECT_TEST_NUM__", 9), 9);
        std::env::remove_var("__REFLECT_TEST_NUM__");
    }

    #[test]
    fn test_bool_variants() {
        for (v, want) in [("1", true), ("TRUE", true), ("on", true), ("0", false), ("nope", false)] {
            std::env::set_var("__REFLECT_TEST_BOOL__", v);
            assert_eq!(env_get_bool("__REFLECT_TEST_BOOL__", !want), want, "{}", v);
        }
        std::env::remove_var("__REFLECT_TEST_BOOL__");
    }

    #[test]
    fn test_millis() {
        std::env::set_var("__REFLECT_TEST_MS__", "0");
        assert!(env_get_millis("__REFLECT_TEST_MS__").is_none());
        std::env::set_var("__REFLECT_TEST_MS__", "250");
        assert_eq!(env_get_millis("__REFLECT_TEST_MS__"), Some(Duration::from_millis(250)));
        std::env::remove_var("__REFLECT_TEST_MS__");
    }
}
