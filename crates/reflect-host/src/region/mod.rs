//! Shared region allocation.
//!
//! Unix hosts map an anonymous `MAP_SHARED` region so the queue lives in
//! memory a device or a forked peer can address; everything else falls back
//! to a heap arena from `reflect-core`.

use std::sync::Arc;

use reflect_core::{Region, Result};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::MmapRegion;

        /// Allocate a zeroed shared region of at least `len` bytes.
        pub fn allocate(len: usize) -> Result<Arc<dyn Region>> {
            Ok(Arc::new(MmapRegion::new(len)?))
        }
    } else {
        /// Allocate a zeroed region of at least `len` bytes.
        pub fn allocate(len: usize) -> Result<Arc<dyn Region>> {
            Ok(Arc::new(reflect_core::HeapRegion::new(len)))
        }
    }
}
