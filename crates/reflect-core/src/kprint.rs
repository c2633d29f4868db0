//! Leveled stderr logging for the bridge.
//!
//! Every line is written under the stderr lock and carries the level and the
//! emitting module, e.g. `[WARN]  reflect_host::dispatcher: queue idle`.
//!
//! # Environment Variables
//!
//! - `REFLECT_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace or 0..5 (default: warn)
//! - `REFLECT_FLUSH_EPRINT=1` - Flush stderr after each line (useful when a
//!   producer is about to spin forever and you want the last words out)
//!
//! # Usage
//!
//! ```ignore
//! use reflect_core::{kdebug, kerror};
//!
//! kdebug!("dispatch {:?} from thread {}", handler, tid);
//! kerror!("corrupt frame: {}", err);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::env::env_get_bool;

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

    /// Accepts a name or a digit; anything else is `None`.
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

    fn tag(self) -> &'static str {
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

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);
static LOADED: AtomicBool = AtomicBool::new(false);

/// Read `REFLECT_LOG_LEVEL` and `REFLECT_FLUSH_EPRINT`.
///
/// Runs implicitly before the first line; explicit calls after that are
/// no-ops, so programmatic overrides set later stick.
pub fn init() {
    if LOADED.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Ok(val) = std::env::var("REFLECT_LOG_LEVEL") {
        if let Some(level) = LogLevel::parse(&val) {
            LEVEL.store(level as u8, Ordering::Relaxed);
        }
    }
    FLUSH.store(env_get_bool("REFLECT_FLUSH_EPRINT", false), Ordering::Relaxed);
}

#[inline]
fn ensure_init() {
    if !LOADED.load(Ordering::Relaxed) {
        init();
    }
}

#[inline]
pub fn log_level() -> LogLevel {
    ensure_init();
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

pub fn set_log_level(level: LogLevel) {
    ensure_init();
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    ensure_init();
    FLUSH.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, target: &str, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = writeln!(out, "{} {}: {}", level.tag(), target, args);
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Error,
            module_path!(),
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Warn,
            module_path!(),
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Info,
            module_path!(),
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Debug,
            module_path!(),
            format_args!($($arg)*)
        );
    }};
}

/// Per-frame chatter; off unless explicitly asked for.
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Trace,
            module_path!(),
            format_args!($($arg)*)
        );
    }};
}
