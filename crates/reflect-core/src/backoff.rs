//! Spin policy
//!
//! Busy-waiting is the only suspension primitive an accelerator thread has.
//! `SpinPolicy` makes the strategy explicit: exponential pause-hint backoff,
//! an optional OS yield once the backoff has saturated, and an optional
//! deadline.
//!
//! ```ignore
//! let policy = SpinPolicy::new().max_shift(8).timeout(Some(Duration::from_millis(50)));
//! let mut backoff = Backoff::new(&policy);
//! while !ready() {
//!     if backoff.expired() {
//!         return Err(ReflectError::Timeout);
//!     }
//!     backoff.snooze();
//! }
//! ```

use std::time::{Duration, Instant};

/// Largest shift accepted by `max_shift` (2^16 pause hints per step).
const MAX_SHIFT_LIMIT: u32 = 16;

/// How a waiter spins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinPolicy {
    /// Backoff step `k` spins `2^min(k, max_shift)` pause hints.
    pub max_shift: u32,
    /// Yield to the OS scheduler once `step >= yield_after`.
    /// `None` never yields (scheduler-less execution contexts).
    pub yield_after: Option<u32>,
    /// Give up after this long. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl SpinPolicy {
    pub const DEFAULT_MAX_SHIFT: u32 = 6;
    pub const DEFAULT_YIELD_AFTER: u32 = 10;

    /// Default policy: bounded exponential backoff, yield when saturated,
    /// no deadline.
    pub const fn new() -> Self {
        Self {
            max_shift: Self::DEFAULT_MAX_SHIFT,
            yield_after: Some(Self::DEFAULT_YIELD_AFTER),
            timeout: None,
        }
    }

    /// Never touches the OS: pause hints only, no deadline.
    pub const fn pure_spin() -> Self {
        Self {
            max_shift: Self::DEFAULT_MAX_SHIFT,
            yield_after: None,
            timeout: None,
        }
    }

    pub const fn max_shift(mut self, shift: u32) -> Self {
        self.max_shift = if shift > MAX_SHIFT_LIMIT { MAX_SHIFT_LIMIT } else { shift };
        self
    }

    pub const fn yield_after(mut self, steps: Option<u32>) -> Self {
        self.yield_after = steps;
        self
    }

    pub const fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SpinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-wait backoff state.
pub struct Backoff<'p> {
    policy: &'p SpinPolicy,
    step: u32,
    started: Option<Instant>,
}

impl<'p> Backoff<'p> {
    #[inline]
    pub fn new(policy: &'p SpinPolicy) -> Self {
        Self {
            policy,
            step: 0,
            // Only read the clock when a deadline exists.
            started: policy.timeout.map(|_| Instant::now()),
        }
    }

    /// Wait one backoff step.
    #[inline]
    pub fn snooze(&mut self) {
        let shift = self.step.min(self.policy.max_shift.min(MAX_SHIFT_LIMIT));
        for _ in 0..(1u32 << shift) {
            core::hint::spin_loop();
        }
        if let Some(after) = self.policy.yield_after {
            if self.step >= after {
                std::thread::yield_now();
            }
        }
        self.step = self.step.saturating_add(1);
    }

    /// True once the policy's deadline has passed.
    #[inline]
    pub fn expired(&self) -> bool {
        match (self.policy.timeout, self.started) {
            (Some(limit), Some(start)) => start.elapsed() >= limit,
            _ => false,
        }
    }

    /// Number of `snooze` calls so far.
    #[inline]
    pub fn steps(&self) -> u32 {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let p = SpinPolicy::default();
        assert_eq!(p.max_shift, SpinPolicy::DEFAULT_MAX_SHIFT);
        assert_eq!(p.yield_after, Some(SpinPolicy::DEFAULT_YIELD_AFTER));
        assert!(p.timeout.is_none());
    }

    #[test]
    fn test_max_shift_clamped() {
        let p = SpinPolicy::new().max_shift(40);
        assert_eq!(p.max_shift, MAX_SHIFT_LIMIT);
    }

    #[test]
    fn test_no_timeout_never_expires() {
        let p = SpinPolicy::pure_spin().max_shift(0);
        let mut b = Backoff::new(&p);
        for _ in 0..100 {
            b.snooze();
        }
        assert!(!b.expired());
        assert_eq!(b.steps(), 100);
    }

    #[test]
    fn test_timeout_expires() {
        let p = SpinPolicy::new().timeout(Some(Duration::from_millis(5)));
        let mut b = Backoff::new(&p);
        while !b.expired() {
            b.snooze();
        }
        assert!(b.steps() > 0);
    }
}
