//! Return slot for synchronous sends.
//!
//! The sender owns a `ReplySlot`, puts its address in the synchronous
//! header and spins on `done`. The dispatcher writes the payload bytes and
//! the length, then stores `done = 1` with release ordering as the very
//! last access. After that store the dispatcher never touches the slot
//! again, so the sender may free it as soon as it observes completion.
//!
//! `PendingReplies` records every address a sender has handed out. The
//! dispatcher claims an address before writing to it, so a frame carrying
//! an address nobody issued is rejected instead of dereferenced.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};
use std::collections::HashSet;

use crate::backoff::{Backoff, SpinPolicy};
use crate::error::{ReflectError, Result};
use crate::message::MAX_MESSAGE_SIZE;
use crate::spinlock::SpinLock;

const PENDING: u32 = 0;
const COMPLETE: u32 = 1;

/// Where the dispatcher writes exactly one reply.
#[repr(C, align(64))]
pub struct ReplySlot {
    done: AtomicU32,
    len: UnsafeCell<u32>,
    data: UnsafeCell<[u8; MAX_MESSAGE_SIZE]>,
}

// Safety: len/data are written by exactly one party (the dispatcher) before
// the release store of `done`, and read by the owner only after the acquire
// load observes it.
unsafe impl Send for ReplySlot {}
unsafe impl Sync for ReplySlot {}

impl ReplySlot {
    pub fn new() -> Self {
        Self {
            done: AtomicU32::new(PENDING),
            len: UnsafeCell::new(0),
            data: UnsafeCell::new([0; MAX_MESSAGE_SIZE]),
        }
    }

    /// Address to carry in a synchronous header.
    #[inline]
    pub fn address(&self) -> u64 {
        self as *const ReplySlot as u64
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire) == COMPLETE
    }

    /// Spin until the reply lands, or the policy's deadline passes.
    pub fn wait(&self, policy: &SpinPolicy) -> Result<()> {
        let mut backoff = Backoff::new(policy);
        while !self.is_complete() {
            if backoff.expired() {
                return Err(ReflectError::Timeout);
            }
            backoff.snooze();
        }
        Ok(())
    }

    /// The reply bytes, or `None` while still pending.
    pub fn payload(&self) -> Option<&[u8]> {
        if !self.is_complete() {
            return None;
        }
        // Safety: complete() finished every write before publishing `done`.
        unsafe {
            let len = (*self.len.get() as usize).min(MAX_MESSAGE_SIZE);
            Some(&(&*self.data.get())[..len])
        }
    }

    /// Write `payload` into the slot at `address` and publish it.
    ///
    /// Payloads longer than `MAX_MESSAGE_SIZE` are truncated; the reader
    /// then fails to decode them.
    ///
    /// # Safety
    ///
    /// `address` must come from `ReplySlot::address` of a slot that is still
    /// alive and not yet completed, and nothing else may complete it.
    pub unsafe fn complete(address: u64, payload: &[u8]) {
        let slot = &*(address as *const ReplySlot);
        let len = payload.len().min(MAX_MESSAGE_SIZE);
        (&mut *slot.data.get())[..len].copy_from_slice(&payload[..len]);
        *slot.len.get() = len as u32;
        slot.done.store(COMPLETE, Ordering::Release);
    }
}

impl Default for ReplySlot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReplySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplySlot")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Return addresses issued to senders and not yet claimed by the
/// dispatcher.
#[derive(Default)]
pub struct PendingReplies {
    issued: SpinLock<HashSet<u64>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `slot` as waiting for a reply.
    ///
    /// The slot must stay alive until the address is claimed or withdrawn.
    pub fn issue(&self, slot: &ReplySlot) -> u64 {
        let address = slot.address();
        self.issued.lock().insert(address);
        address
    }

    /// Forget an address whose frame was never published.
    pub fn withdraw(&self, address: u64) -> bool {
        self.issued.lock().remove(&address)
    }

    /// Take ownership of the single write to `address`.
    ///
    /// `false` for addresses never issued or already claimed.
    pub fn claim(&self, address: u64) -> bool {
        self.issued.lock().remove(&address)
    }

    /// Addresses still waiting.
    pub fn len(&self) -> usize {
        self.issued.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PendingReplies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReplies").field("outstanding", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_pending_until_completed() {
        let slot = ReplySlot::new();
        assert!(!slot.is_complete());
        assert!(slot.payload().is_none());
        unsafe { ReplySlot::complete(slot.address(), b"done") };
        assert!(slot.is_complete());
        assert_eq!(slot.payload(), Some(&b"done"[..]));
    }

    #[test]
    fn test_empty_reply_still_completes() {
        let slot = ReplySlot::new();
        unsafe { ReplySlot::complete(slot.address(), &[]) };
        slot.wait(&SpinPolicy::pure_spin()).unwrap();
        assert_eq!(slot.payload(), Some(&[][..]));
    }

    #[test]
    fn test_wait_sees_other_thread() {
        let slot = Arc::new(ReplySlot::new());
        let addr = slot.address();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            unsafe { ReplySlot::complete(addr, &[7u8; 100]) };
        });
        slot.wait(&SpinPolicy::new()).unwrap();
        assert_eq!(slot.payload().unwrap(), &[7u8; 100][..]);
        writer.join().unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let slot = ReplySlot::new();
        let policy = SpinPolicy::new().timeout(Some(Duration::from_millis(2)));
        assert_eq!(slot.wait(&policy), Err(ReflectError::Timeout));
    }

    #[test]
    fn test_slot_alignment() {
        let slot = Box::new(ReplySlot::new());
        assert_eq!(slot.address() % 64, 0);
    }

    #[test]
    fn test_pending_claim_once() {
        let pending = PendingReplies::new();
        let slot = ReplySlot::new();
        let addr = pending.issue(&slot);
        assert_eq!(addr, slot.address());
        assert_eq!(pending.len(), 1);

        assert!(pending.claim(addr));
        assert!(!pending.claim(addr));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_pending_rejects_unissued() {
        let pending = PendingReplies::new();
        let stray = vec![0u8; 64];
        assert!(!pending.claim(stray.as_ptr() as u64));

        let slot = ReplySlot::new();
        let addr = pending.issue(&slot);
        assert!(pending.withdraw(addr));
        assert!(!pending.claim(addr));
    }
}
