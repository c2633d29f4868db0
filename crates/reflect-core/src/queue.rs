//! `Queue`: framed circular byte buffer in a shared region.
//!
//! Any number of producers push whole frames; the dispatcher pulls them.
//! Every push and pull runs under the ticket lock stored in the queue
//! header, so a frame pushed with one `push` call is either entirely in the
//! ring or entirely absent.
//!
//! # Memory layout
//!
//! ```text
//! 0x00: magic        (u32)
//! 0x04: reserved     (u32)
//! 0x08: lock         (TicketLock: next_ticket u32, now_serving u32)
//! 0x10: capacity     (u64)
//! 0x18: head         (u64)  ← consumer position
//! 0x20: tail         (u64)  ← producer position
//! 0x28..0x40: padding
//! 0x40: data[capacity]
//! ```
//!
//! head and tail are u64 monotonically increasing byte counters. The byte
//! index is `counter % capacity`. Empty when head == tail; full when
//! `tail - head == capacity`.
//!
//! # Failure semantics
//!
//! `push`/`pull` returning `false` is backpressure: the caller retries.
//! Pushing more bytes than the whole ring can hold is a programming error
//! and panics.

use core::ptr;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{ReflectError, Result};
use crate::header::{HEADER_SIZE, MAX_FRAME_SIZE};
use crate::kerror;
use crate::region::{Region, REGION_ALIGN};
use crate::spinlock::TicketLock;

/// "RFLQ"
pub const QUEUE_MAGIC: u32 = 0x5146_4C52;

pub const QUEUE_HEADER_SIZE: usize = 64;

#[repr(C)]
struct QueueHeader {
    magic: AtomicU32,
    _reserved: AtomicU32,
    lock: TicketLock,
    capacity: AtomicU64,
    head: AtomicU64,
    tail: AtomicU64,
    _pad: [u64; 3],
}

const _: () = assert!(core::mem::size_of::<QueueHeader>() == QUEUE_HEADER_SIZE);

/// A handle to a formatted queue.
///
/// Cheap to clone; every clone refers to the same ring. Producers and the
/// dispatcher each hold one.
#[derive(Clone)]
pub struct Queue {
    /// Keeps the backing memory alive.
    region: Arc<dyn Region>,
    header: *const QueueHeader,
    data: *mut u8,
    capacity: usize,
}

// Safety: the header is only touched through atomics and the ticket lock;
// data bytes are only touched while the lock is held.
unsafe impl Send for Queue {}
unsafe impl Sync for Queue {}

impl Queue {
    /// Region length needed for a ring holding `frames` maximal frames.
    pub const fn region_len_for(frames: usize) -> usize {
        QUEUE_HEADER_SIZE + frames * MAX_FRAME_SIZE
    }

    /// Write a fresh header into `region`, claiming everything after it as
    /// ring capacity.
    ///
    /// Must happen before any other side attaches.
    pub fn format(region: Arc<dyn Region>) -> Result<Self> {
        let base = Self::check_region(&*region)?;
        let capacity = region.len() - QUEUE_HEADER_SIZE;

        // Safety: the region is valid for len bytes and aligned; nobody else
        // uses it until format returns.
        unsafe {
            ptr::write(
                base as *mut QueueHeader,
                QueueHeader {
                    magic: AtomicU32::new(QUEUE_MAGIC),
                    _reserved: AtomicU32::new(0),
                    lock: TicketLock::new(),
                    capacity: AtomicU64::new(capacity as u64),
                    head: AtomicU64::new(0),
                    tail: AtomicU64::new(0),
                    _pad: [0; 3],
                },
            );
        }

        Ok(Self::from_parts(region, base, capacity))
    }

    /// Join a queue another side already formatted.
    pub fn attach(region: Arc<dyn Region>) -> Result<Self> {
        let base = Self::check_region(&*region)?;
        // Safety: checked length and alignment above.
        let header = unsafe { &*(base as *const QueueHeader) };

        if header.magic.load(Ordering::Acquire) != QUEUE_MAGIC {
            return Err(ReflectError::BadRegion("bad queue magic"));
        }
        let capacity = header.capacity.load(Ordering::Acquire) as usize;
        if capacity != region.len() - QUEUE_HEADER_SIZE {
            return Err(ReflectError::BadRegion("capacity mismatch"));
        }

        Ok(Self::from_parts(region, base, capacity))
    }

    fn check_region(region: &dyn Region) -> Result<*mut u8> {
        let base = region.base();
        if base.is_null() {
            return Err(ReflectError::BadRegion("null base pointer"));
        }
        if base as usize % REGION_ALIGN != 0 {
            return Err(ReflectError::BadRegion("misaligned base"));
        }
        let required = Self::region_len_for(1);
        if region.len() < required {
            return Err(ReflectError::RegionTooSmall { len: region.len(), required });
        }
        Ok(base)
    }

    fn from_parts(region: Arc<dyn Region>, base: *mut u8, capacity: usize) -> Self {
        Self {
            region,
            header: base as *const QueueHeader,
            // Safety: check_region guaranteed len > QUEUE_HEADER_SIZE.
            data: unsafe { base.add(QUEUE_HEADER_SIZE) },
            capacity,
        }
    }

    /// Enqueue `data` as one contiguous frame.
    ///
    /// Returns `false` without writing anything if the free space is
    /// smaller than `data.len()`.
    ///
    /// # Panics
    ///
    /// If `data.len()` exceeds the ring capacity; such a push could never
    /// succeed.
    pub fn push(&self, data: &[u8]) -> bool {
        if data.len() > self.capacity {
            kerror!(
                "queue: push of {} bytes exceeds capacity {}",
                data.len(),
                self.capacity
            );
            panic!(
                "frame of {} bytes can never fit a queue of {} bytes",
                data.len(),
                self.capacity
            );
        }

        let h = self.header();
        let _guard = h.lock.lock();

        let head = h.head.load(Ordering::Relaxed);
        let tail = h.tail.load(Ordering::Relaxed);
        let used = tail.wrapping_sub(head) as usize;
        debug_assert!(used <= self.capacity);
        if self.capacity - used < data.len() {
            return false;
        }

        self.copy_in(tail, data);
        h.tail.store(tail.wrapping_add(data.len() as u64), Ordering::Release);
        true
    }

    /// Dequeue exactly `buf.len()` bytes.
    ///
    /// Returns `false` without consuming anything if fewer are available.
    pub fn pull(&self, buf: &mut [u8]) -> bool {
        let h = self.header();
        let _guard = h.lock.lock();

        let head = h.head.load(Ordering::Relaxed);
        let tail = h.tail.load(Ordering::Relaxed);
        let used = tail.wrapping_sub(head) as usize;
        if used < buf.len() {
            return false;
        }

        self.copy_out(head, buf);
        h.head.store(head.wrapping_add(buf.len() as u64), Ordering::Release);
        true
    }

    /// Whether at least one frame header's worth of bytes is queued.
    ///
    /// Lock-free snapshot; a `true` may be stale by the time the caller
    /// pulls, which is harmless for a single consumer.
    #[inline]
    pub fn peek(&self) -> bool {
        let h = self.header();
        // Head first: tail only grows, so tail - head never goes negative.
        let head = h.head.load(Ordering::Acquire);
        let tail = h.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize >= HEADER_SIZE
    }

    /// Bytes currently occupied: pushed minus pulled, taken under the lock.
    pub fn size(&self) -> usize {
        let h = self.header();
        let _guard = h.lock.lock();
        let head = h.head.load(Ordering::Relaxed);
        let tail = h.tail.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    /// Ring capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes a push could use right now.
    #[inline]
    pub fn free(&self) -> usize {
        self.capacity - self.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Length of the backing region.
    pub fn region_len(&self) -> usize {
        self.region.len()
    }

    // ── Internal helpers ──

    #[inline(always)]
    fn header(&self) -> &QueueHeader {
        // Safety: points into the region kept alive by self.region.
        unsafe { &*self.header }
    }

    /// Copy `src` into the ring starting at counter `at`, wrapping once.
    /// Caller holds the lock.
    fn copy_in(&self, at: u64, src: &[u8]) {
        let idx = (at % self.capacity as u64) as usize;
        let first = src.len().min(self.capacity - idx);
        // Safety: idx + first <= capacity and the rest fits from 0 because
        // src.len() <= capacity.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.data.add(idx), first);
            ptr::copy_nonoverlapping(src.as_ptr().add(first), self.data, src.len() - first);
        }
    }

    /// Copy out of the ring starting at counter `at`, wrapping once.
    /// Caller holds the lock.
    fn copy_out(&self, at: u64, dst: &mut [u8]) {
        let idx = (at % self.capacity as u64) as usize;
        let first = dst.len().min(self.capacity - idx);
        // Safety: mirror of copy_in.
        unsafe {
            ptr::copy_nonoverlapping(self.data.add(idx), dst.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(self.data, dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::HeapRegion;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn test_queue(frames: usize) -> Queue {
        Queue::format(Arc::new(HeapRegion::new(Queue::region_len_for(frames)))).unwrap()
    }

    /// A self-checking frame: [producer, seq, len, payload(len) filled with a tag].
    fn make_frame(producer: u8, seq: u32, len: usize) -> Vec<u8> {
        let mut f = Vec::with_capacity(8 + len);
        f.push(producer);
        f.extend_from_slice(&seq.to_le_bytes()[..3]);
        f.extend_from_slice(&(len as u32).to_le_bytes());
        let tag = producer.wrapping_mul(31).wrapping_add(seq as u8);
        f.extend(std::iter::repeat(tag).take(len));
        f
    }

    #[test]
    fn test_push_pull_single_thread() {
        let q = test_queue(1);
        assert!(q.is_empty());
        assert!(!q.peek());

        assert!(q.push(b"hello, host!!!!!"));
        assert_eq!(q.size(), 16);
        assert!(q.peek());

        let mut out = [0u8; 16];
        assert!(q.pull(&mut out));
        assert_eq!(&out, b"hello, host!!!!!");
        assert!(q.is_empty());
    }

    #[test]
    fn test_pull_needs_enough_bytes() {
        let q = test_queue(1);
        assert!(q.push(b"abc"));
        let mut out = [0u8; 4];
        assert!(!q.pull(&mut out));
        // Nothing consumed by the failed pull.
        assert_eq!(q.size(), 3);
        assert!(!q.peek());
    }

    #[test]
    fn test_full_is_backpressure() {
        let q = test_queue(1);
        let cap = q.capacity();
        assert!(q.push(&vec![1u8; cap - 4]));
        assert!(!q.push(&[0u8; 5]));
        assert_eq!(q.size(), cap - 4);
        assert!(q.push(&[2u8; 4]));
        assert_eq!(q.size(), cap);
        assert_eq!(q.free(), 0);
        assert!(!q.push(&[3u8]));
    }

    #[test]
    #[should_panic(expected = "can never fit")]
    fn test_oversized_push_is_fatal() {
        let q = test_queue(1);
        let too_big = vec![0u8; q.capacity() + 1];
        q.push(&too_big);
    }

    #[test]
    fn test_wrap_around() {
        let q = test_queue(1);
        let cap = q.capacity();
        // Odd-sized frames so the write position drifts across the end.
        let len = cap / 3 + 7;
        for round in 0..20u8 {
            let frame = vec![round; len];
            assert!(q.push(&frame));
            let mut out = vec![0u8; len];
            assert!(q.pull(&mut out));
            assert_eq!(out, frame, "round {}", round);
            assert_eq!(q.size(), 0);
        }
    }

    #[test]
    fn test_attach_sees_same_ring() {
        let region: Arc<dyn Region> = Arc::new(HeapRegion::new(Queue::region_len_for(2)));
        let producer = Queue::format(Arc::clone(&region)).unwrap();
        let consumer = Queue::attach(region).unwrap();
        assert_eq!(producer.capacity(), consumer.capacity());

        assert!(producer.push(b"0123456789abcdef"));
        let mut out = [0u8; 16];
        assert!(consumer.pull(&mut out));
        assert_eq!(&out, b"0123456789abcdef");
    }

    #[test]
    fn test_attach_rejects_unformatted() {
        let region: Arc<dyn Region> = Arc::new(HeapRegion::new(Queue::region_len_for(1)));
        assert!(matches!(Queue::attach(region), Err(ReflectError::BadRegion(_))));
    }

    #[test]
    fn test_region_too_small() {
        let region: Arc<dyn Region> = Arc::new(HeapRegion::new(QUEUE_HEADER_SIZE + 8));
        assert!(matches!(
            Queue::format(region),
            Err(ReflectError::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn test_concurrent_frames_atomic_no_loss() {
        let q = test_queue(2);
        let producers = 6u8;
        let per_producer = 400u32;
        let done = Arc::new(AtomicBool::new(false));

        let consumer = {
            let q = q.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut seen: HashMap<(u8, u32), usize> = HashMap::new();
                loop {
                    let mut fixed = [0u8; 8];
                    if !q.pull(&mut fixed) {
                        if done.load(Ordering::Acquire) && q.is_empty() {
                            break;
                        }
                        thread::yield_now();
                        continue;
                    }
                    let producer = fixed[0];
                    let seq = u32::from_le_bytes([fixed[1], fixed[2], fixed[3], 0]);
                    let len = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]) as usize;
                    let mut body = vec![0u8; len];
                    // The frame was pushed whole, so the body is already here.
                    assert!(q.pull(&mut body), "partial frame observed");
                    let tag = producer.wrapping_mul(31).wrapping_add(seq as u8);
                    assert!(body.iter().all(|&b| b == tag), "interleaved frame bytes");
                    *seen.entry((producer, seq)).or_default() += 1;
                    // Capacity conservation at every observed instant.
                    assert!(q.size() <= q.capacity());
                }
                seen
            })
        };

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let q = q.clone();
                thread::spawn(move || {
                    for seq in 0..per_producer {
                        let frame = make_frame(p, seq, (seq as usize * 13 + p as usize) % 700);
                        while !q.push(&frame) {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        done.store(true, Ordering::Release);
        let seen = consumer.join().unwrap();

        assert_eq!(seen.len(), producers as usize * per_producer as usize);
        assert!(seen.values().all(|&n| n == 1), "duplicated frame");
        assert!(q.is_empty());
    }

    #[test]
    fn test_size_tracks_pushed_minus_pulled() {
        let q = test_queue(1);
        let mut expected = 0usize;
        for n in [10usize, 200, 33, 1] {
            assert!(q.push(&vec![0u8; n]));
            expected += n;
            assert_eq!(q.size(), expected);
        }
        let mut out = vec![0u8; 43];
        assert!(q.pull(&mut out));
        expected -= 43;
        assert_eq!(q.size(), expected);
        assert_eq!(q.free(), q.capacity() - expected);
    }

    #[test]
    fn test_size_consistent_under_churn() {
        let q = test_queue(1);
        let rounds = 20_000u64;
        let pushed = Arc::new(AtomicU64::new(0));
        let pulled = Arc::new(AtomicU64::new(0));

        let producer = {
            let (q, pushed) = (q.clone(), Arc::clone(&pushed));
            thread::spawn(move || {
                for i in 0..rounds {
                    while !q.push(&i.to_le_bytes()) {
                        thread::yield_now();
                    }
                    pushed.fetch_add(1, Ordering::Release);
                }
            })
        };
        let consumer = {
            let (q, pulled) = (q.clone(), Arc::clone(&pulled));
            thread::spawn(move || {
                let mut buf = [0u8; 8];
                for i in 0..rounds {
                    while !q.pull(&mut buf) {
                        thread::yield_now();
                    }
                    assert_eq!(u64::from_le_bytes(buf), i);
                    pulled.fetch_add(1, Ordering::Release);
                }
            })
        };

        while pulled.load(Ordering::Acquire) < rounds {
            let before = pulled.load(Ordering::Acquire);
            let size = q.size();
            let after = pushed.load(Ordering::Acquire);
            assert!(size <= q.capacity(), "size {} over capacity", size);
            assert_eq!(size % 8, 0);
            // The producer may not have counted its latest push yet.
            assert!(size as u64 / 8 + before <= after + 1);
        }

        producer.join().unwrap();
        consumer.join().unwrap();
        assert_eq!(q.size(), 0);
    }
}
