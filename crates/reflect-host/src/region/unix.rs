//! Anonymous shared mapping via mmap.

use reflect_core::{ReflectError, Region, Result};

/// Page-rounded `MAP_SHARED | MAP_ANONYMOUS` mapping, unmapped on drop.
pub struct MmapRegion {
    base: *mut u8,
    len: usize,
}

// Safety: the mapping is plain memory; access discipline is the queue's.
unsafe impl Send for MmapRegion {}
unsafe impl Sync for MmapRegion {}

impl MmapRegion {
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(ReflectError::RegionTooSmall { len, required: 1 });
        }
        let page = page_size();
        let len = len
            .checked_add(page - 1)
            .ok_or(ReflectError::RegionAlloc(libc::ENOMEM))?
            / page
            * page;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ReflectError::RegionAlloc(last_errno()));
        }

        Ok(Self { base: base as *mut u8, len })
    }
}

unsafe impl Region for MmapRegion {
    #[inline]
    fn base(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.base as *mut libc::c_void, self.len) };
        if ret != 0 {
            reflect_core::kwarn!("munmap of {} bytes failed: errno {}", self.len, last_errno());
        }
    }
}

fn page_size() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 {
        n as usize
    } else {
        4096
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}
