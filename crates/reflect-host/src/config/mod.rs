//! Bridge configuration.
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! ```rust,ignore
//! use reflect_host::config::BridgeConfig;
//!
//! // Defaults with env overrides
//! let config = BridgeConfig::from_env();
//!
//! // Or customize programmatically
//! let config = BridgeConfig::new()
//!     .queue_frames(64)
//!     .send_timeout(Some(Duration::from_secs(1)));
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reflect_core::env::{env_get, env_get_millis, env_get_str};
use reflect_core::{kinfo, Queue, SpinPolicy};

use crate::dispatcher::DispatcherConfig;

pub mod defaults {
    /// Maximal frames the queue holds at once.
    pub const QUEUE_FRAMES: usize = 16;
    /// Dispatcher sleep between empty polls.
    pub const IDLE_SLEEP_US: u64 = 50;
    pub const SPIN_MAX_SHIFT: u32 = 6;
    /// Backoff steps before a producer yields; 0 never yields.
    pub const SPIN_YIELD_AFTER: u32 = 10;
    /// 0 waits forever.
    pub const SEND_TIMEOUT_MS: u64 = 0;
    /// First handle the file service assigns.
    pub const FIRST_HANDLE: u32 = 1;
    /// Directory relative open paths resolve against.
    pub const ROOT: &str = ".";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Queue capacity in maximal frames
    pub queue_frames: usize,
    /// Dispatcher sleep when the queue is empty
    pub idle_sleep: Duration,
    /// Producer backoff cap
    pub spin_max_shift: u32,
    /// Producer yield threshold (`None` never yields)
    pub spin_yield_after: Option<u32>,
    /// Bound on every producer wait (`None` spins forever)
    pub send_timeout: Option<Duration>,
    /// First file handle
    pub first_handle: u32,
    /// Root for relative paths
    pub root: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl BridgeConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `REFLECT_QUEUE_FRAMES` - Queue capacity in maximal frames
    /// - `REFLECT_IDLE_SLEEP_US` - Dispatcher idle sleep in microseconds
    /// - `REFLECT_SPIN_MAX_SHIFT` - Producer backoff cap
    /// - `REFLECT_SPIN_YIELD_AFTER` - Backoff steps before yielding (0 = never)
    /// - `REFLECT_SEND_TIMEOUT_MS` - Producer wait bound (0 = none)
    /// - `REFLECT_FIRST_HANDLE` - First file handle assigned
    /// - `REFLECT_ROOT` - Root directory for relative paths
    pub fn from_env() -> Self {
        let yield_after = env_get("REFLECT_SPIN_YIELD_AFTER", defaults::SPIN_YIELD_AFTER);
        Self {
            queue_frames: env_get("REFLECT_QUEUE_FRAMES", defaults::QUEUE_FRAMES),
            idle_sleep: Duration::from_micros(env_get(
                "REFLECT_IDLE_SLEEP_US",
                defaults::IDLE_SLEEP_US,
            )),
            spin_max_shift: env_get("REFLECT_SPIN_MAX_SHIFT", defaults::SPIN_MAX_SHIFT),
            spin_yield_after: (yield_after != 0).then_some(yield_after),
            send_timeout: env_get_millis("REFLECT_SEND_TIMEOUT_MS"),
            first_handle: env_get("REFLECT_FIRST_HANDLE", defaults::FIRST_HANDLE),
            root: PathBuf::from(env_get_str("REFLECT_ROOT", defaults::ROOT)),
        }
    }

    /// Defaults only, no environment.
    pub fn new() -> Self {
        Self {
            queue_frames: defaults::QUEUE_FRAMES,
            idle_sleep: Duration::from_micros(defaults::IDLE_SLEEP_US),
            spin_max_shift: defaults::SPIN_MAX_SHIFT,
            spin_yield_after: Some(defaults::SPIN_YIELD_AFTER),
            send_timeout: None,
            first_handle: defaults::FIRST_HANDLE,
            root: PathBuf::from(defaults::ROOT),
        }
    }

    // Builder methods

    pub fn queue_frames(mut self, n: usize) -> Self {
        self.queue_frames = n;
        self
    }

    pub fn idle_sleep(mut self, d: Duration) -> Self {
        self.idle_sleep = d;
        self
    }

    pub fn spin_max_shift(mut self, shift: u32) -> Self {
        self.spin_max_shift = shift;
        self
    }

    pub fn spin_yield_after(mut self, steps: Option<u32>) -> Self {
        self.spin_yield_after = steps;
        self
    }

    pub fn send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn first_handle(mut self, handle: u32) -> Self {
        self.first_handle = handle;
        self
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_frames == 0 {
            return Err(ConfigError::InvalidValue("queue_frames must be > 0"));
        }
        if self.queue_frames > 1 << 16 {
            return Err(ConfigError::InvalidValue("queue_frames must be <= 65536"));
        }
        if self.first_handle == reflect_core::message::INVALID_HANDLE {
            return Err(ConfigError::InvalidValue("first_handle must not be the invalid handle"));
        }
        Ok(())
    }

    /// Policy every producer coordinator spins with.
    pub fn spin_policy(&self) -> SpinPolicy {
        SpinPolicy::new()
            .max_shift(self.spin_max_shift)
            .yield_after(self.spin_yield_after)
            .timeout(self.send_timeout)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig { idle_sleep: self.idle_sleep }
    }

    /// Bytes of shared region the queue needs.
    pub fn region_len(&self) -> usize {
        Queue::region_len_for(self.queue_frames)
    }

    /// Log the configuration at info level.
    pub fn print(&self) {
        kinfo!("bridge configuration:");
        kinfo!("  queue_frames:     {}", self.queue_frames);
        kinfo!("  idle_sleep:       {:?}", self.idle_sleep);
        kinfo!("  spin_max_shift:   {}", self.spin_max_shift);
        kinfo!("  spin_yield_after: {:?}", self.spin_yield_after);
        kinfo!("  send_timeout:     {:?}", self.send_timeout);
        kinfo!("  first_handle:     {}", self.first_handle);
        kinfo!("  root:             {}", self.root.display());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = BridgeConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_frames, defaults::QUEUE_FRAMES);
        assert!(config.send_timeout.is_none());
    }

    #[test]
    fn test_builder() {
        let config = BridgeConfig::new()
            .queue_frames(4)
            .spin_yield_after(None)
            .send_timeout(Some(Duration::from_millis(20)))
            .first_handle(7)
            .root("/tmp");

        assert_eq!(config.region_len(), Queue::region_len_for(4));
        assert_eq!(config.first_handle, 7);
        assert_eq!(config.root, PathBuf::from("/tmp"));

        let policy = config.spin_policy();
        assert_eq!(policy.yield_after, None);
        assert_eq!(policy.timeout, Some(Duration::from_millis(20)));
        assert_eq!(policy.max_shift, defaults::SPIN_MAX_SHIFT);
    }

    #[test]
    fn test_validation() {
        assert!(BridgeConfig::new().queue_frames(0).validate().is_err());
        assert!(BridgeConfig::new().queue_frames(1 << 20).validate().is_err());
        assert!(BridgeConfig::new().first_handle(u32::MAX).validate().is_err());
    }

    #[test]
    fn test_dispatcher_config() {
        let config = BridgeConfig::new().idle_sleep(Duration::from_micros(5));
        assert_eq!(config.dispatcher_config().idle_sleep, Duration::from_micros(5));
    }
}
