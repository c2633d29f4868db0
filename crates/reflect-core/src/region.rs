//! Shared region descriptor.
//!
//! A `Region` is the base + length pair both sides of the bridge receive.
//! The queue lays its header and ring out inside it; nothing else is shared.
//!
//! # Implementors
//!
//! - `HeapRegion` (here): an owned, word-aligned arena. Used by tests and by
//!   hosts without `mmap`.
//! - `MmapRegion` (`reflect-host`): an anonymous `MAP_SHARED` mapping.

use core::cell::UnsafeCell;

/// Required alignment of a region base address.
pub const REGION_ALIGN: usize = 8;

/// Memory addressable by producers and the dispatcher.
///
/// # Safety
///
/// Implementors must guarantee that `base()` is valid for reads and writes
/// of `len()` bytes, aligned to `REGION_ALIGN`, for the whole lifetime of the
/// value, and that the bytes may be mutated through the raw pointer while
/// shared references to the region exist.
pub unsafe trait Region: Send + Sync {
    /// Base address of the region.
    fn base(&self) -> *mut u8;
    /// Length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owned, zero-initialized arena backed by `u64` words.
pub struct HeapRegion {
    words: Box<[UnsafeCell<u64>]>,
}

// Safety: all access goes through raw pointers under the queue's lock
// or atomics in the queue header.
unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    /// Allocate at least `len` bytes (rounded up to whole words).
    pub fn new(len: usize) -> Self {
        let words = len.div_ceil(core::mem::size_of::<u64>());
        Self {
            words: (0..words).map(|_| UnsafeCell::new(0)).collect(),
        }
    }
}

unsafe impl Region for HeapRegion {
    #[inline]
    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.words.as_ptr()) as *mut u8
    }

    #[inline]
    fn len(&self) -> usize {
        self.words.len() * core::mem::size_of::<u64>()
    }
}
