//! Ticket spinlock
//!
//! `TicketLock` is a raw lock word pair with no data attached, so it can be
//! placed inside a shared region (the queue header embeds one). Every
//! contender takes a ticket with `fetch_add` and spins until that ticket is
//! served, which gives first-come-first-served hand-off: no contender can be
//! locked out forever, however many producers pile up.
//!
//! `SpinLock<T>` wraps a `TicketLock` around owned data for host-side tables.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::backoff::{Backoff, SpinPolicy};

/// Policy used while waiting for a ticket.
const LOCK_POLICY: SpinPolicy = SpinPolicy::new();

/// An in-place ticket lock.
///
/// Unlocked when `next_ticket == now_serving`. Both counters wrap.
#[repr(C)]
pub struct TicketLock {
    next_ticket: AtomicU32,
    now_serving: AtomicU32,
}

impl TicketLock {
    #[inline]
    pub const fn new() -> Self {
        TicketLock {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
        }
    }

    /// Take a ticket and spin until it is served.
    #[inline]
    pub fn lock(&self) -> TicketGuard<'_> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut backoff = Backoff::new(&LOCK_POLICY);
        while self.now_serving.load(Ordering::Acquire) != ticket {
            backoff.snooze();
        }
        TicketGuard { lock: self }
    }

    /// Acquire only if no one holds or is waiting for the lock.
    #[inline]
    pub fn try_lock(&self) -> Option<TicketGuard<'_>> {
        let serving = self.now_serving.load(Ordering::Relaxed);
        self.next_ticket
            .compare_exchange(
                serving,
                serving.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .ok()
            .map(|_| TicketGuard { lock: self })
    }

    /// Check if the lock is held or contended.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }

    /// Number of threads holding or queued on the lock.
    #[inline]
    pub fn queued(&self) -> u32 {
        self.next_ticket
            .load(Ordering::Relaxed)
            .wrapping_sub(self.now_serving.load(Ordering::Relaxed))
    }

    #[inline]
    fn unlock(&self) {
        self.now_serving.fetch_add(1, Ordering::Release);
    }
}

impl Default for TicketLock {
    fn default() -> Self {
        TicketLock::new()
    }
}

/// Releases the ticket lock when dropped.
pub struct TicketGuard<'a> {
    lock: &'a TicketLock,
}

impl Drop for TicketGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// A ticket lock protecting a value.
pub struct SpinLock<T> {
    lock: TicketLock,
    data: UnsafeCell<T>,
}

// Safety: SpinLock provides exclusive access to T
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        SpinLock {
            lock: TicketLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        SpinLockGuard {
            _ticket: self.lock.lock(),
            data: &self.data,
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.lock.try_lock().map(|ticket| SpinLockGuard {
            _ticket: ticket,
            data: &self.data,
        })
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        SpinLock::new(T::default())
    }
}

/// Guard that releases the spinlock when dropped
pub struct SpinLockGuard<'a, T> {
    _ticket: TicketGuard<'a>,
    data: &'a UnsafeCell<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: We hold the ticket
        unsafe { &*self.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: We hold the ticket
        unsafe { &mut *self.data.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ticket_lock_basic() {
        let lock = TicketLock::new();
        assert!(!lock.is_locked());
        {
            let _g = lock.lock();
            assert!(lock.is_locked());
            assert_eq!(lock.queued(), 1);
            assert!(lock.try_lock().is_none());
        }
        assert!(!lock.is_locked());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_ticket_lock_wraps() {
        let lock = TicketLock {
            next_ticket: AtomicU32::new(u32::MAX),
            now_serving: AtomicU32::new(u32::MAX),
        };
        for _ in 0..3 {
            let _g = lock.lock();
        }
        assert!(!lock.is_locked());
        assert_eq!(lock.now_serving.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_spinlock_basic() {
        let lock = SpinLock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard = 42;
        }
        assert_eq!(*lock.lock(), 42);
        assert_eq!(lock.into_inner(), 42);
    }

    #[test]
    fn test_spinlock_try_lock() {
        let lock = SpinLock::new(0u32);

        let guard = lock.try_lock();
        assert!(guard.is_some());

        // While held, try_lock should fail
        assert!(lock.try_lock().is_none());

        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_spinlock_concurrent() {
        let lock = Arc::new(SpinLock::new(0u32));
        let mut handles = vec![];

        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*lock.lock(), 8000);
    }
}
