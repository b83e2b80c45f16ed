//! Anonymous private mappings placed at the window cursor.
//!
//! On Linux the hint is passed with `MAP_FIXED_NOREPLACE`, so a mapping lands
//! exactly at the cursor or the kernel answers `EEXIST`. Elsewhere the hint
//! is advisory and [`crate::AddressWindow`] rejects a mapping that strays
//! outside the window.

#![allow(unsafe_code)]

use core::ffi::c_void;
use core::ptr::NonNull;
use std::io;
use std::ops::{Deref, DerefMut};
use std::slice;

use rustix::mm::{mmap_anonymous, munmap, MapFlags, ProtFlags};
use tracing::warn;

use crate::alloc::{PageSource, Region};

/// Allocation granularity of [`AnonPages`].
pub const ANON_GRANULARITY: u64 = 0x1_0000;

#[cfg(any(target_os = "linux", target_os = "android"))]
const PLACEMENT: MapFlags = MapFlags::FIXED_NOREPLACE;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const PLACEMENT: MapFlags = MapFlags::empty();

/// Anonymous read-write pages requested at the allocation hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonPages;

impl PageSource for AnonPages {
    type Region = AnonRegion;

    fn granularity(&self) -> u64 {
        ANON_GRANULARITY
    }

    fn map(&mut self, hint: u64, len: usize) -> io::Result<Option<AnonRegion>> {
        // SAFETY: PLACEMENT never replaces an existing mapping, so no live
        // memory is affected whatever the hint.
        let ptr = unsafe {
            mmap_anonymous(
                hint as usize as *mut c_void,
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE | PLACEMENT,
            )
        }?;
        Ok(NonNull::new(ptr.cast::<u8>()).map(|ptr| AnonRegion { ptr, len }))
    }
}

/// One mapping from [`AnonPages`]; unmapped on drop.
#[derive(Debug)]
pub struct AnonRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is the only handle to its mapping.
unsafe impl Send for AnonRegion {}

impl Deref for AnonRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: `ptr..ptr + len` is a live read-write mapping owned by `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AnonRegion {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes the borrow unique.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Region for AnonRegion {}

impl Drop for AnonRegion {
    fn drop(&mut self) {
        // SAFETY: the mapping came from `mmap_anonymous` with this length and
        // no borrow of it outlives `self`.
        if let Err(err) = unsafe { munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) } {
            warn!(addr = self.addr(), %err, "munmap failed");
        }
    }
}
