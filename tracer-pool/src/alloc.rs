//! Page-granular allocation from a bounded, wrapping address window.
//!
//! Every allocation is requested at the window cursor. The cursor moves to
//! the returned address plus the size rounded up to the source's
//! granularity, and wraps back to the window start once fewer than `size`
//! bytes remain before the end. A hint the source reports as occupied is
//! skipped by the same step. A mapping that lands outside the window is an
//! error in both address modes.

use std::io;
use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::AllocError;
use crate::pages::AnonPages;

/// Address window selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// 64-bit addresses, `[0x1_4000_0000, 0x800_0000_0000)`.
    Wide,
    /// Addresses usable as 32-bit offsets, `[0x4000_0000, 0x8000_0000)`.
    Low32,
}

impl AddressMode {
    /// First address of the window.
    pub const fn min(self) -> u64 {
        match self {
            AddressMode::Wide => 0x0000_0001_4000_0000,
            AddressMode::Low32 => 0x0000_0000_4000_0000,
        }
    }

    /// One past the last address of the window.
    pub const fn max(self) -> u64 {
        match self {
            AddressMode::Wide => 0x0000_0800_0000_0000,
            AddressMode::Low32 => 0x0000_0000_8000_0000,
        }
    }

    /// Whether `[addr, addr + len)` lies inside the window.
    pub const fn contains(self, addr: u64, len: u64) -> bool {
        addr >= self.min() && addr.saturating_add(len) <= self.max()
    }
}

/// Backing memory handed out by a [`PageSource`].
pub trait Region: Deref<Target = [u8]> + DerefMut + Send {
    /// Start address of the mapping.
    fn addr(&self) -> u64 {
        self.as_ptr() as u64
    }
}

/// Supplier of page-granular mappings.
pub trait PageSource: Send {
    /// Mapping type.
    type Region: Region;

    /// Step the window cursor advances in.
    fn granularity(&self) -> u64;

    /// Map `len` bytes at `hint`.
    ///
    /// `Ok(None)` means no memory. An error of kind
    /// [`io::ErrorKind::AlreadyExists`] means the range at `hint` is taken
    /// and the window should try further on.
    fn map(&mut self, hint: u64, len: usize) -> io::Result<Option<Self::Region>>;
}

/// Occupied hints skipped before an allocation gives up.
pub const MAX_ATTEMPTS: u32 = 256;

struct Cursor<S> {
    next: u64,
    source: S,
}

/// Mutex-guarded allocator over one address window.
pub struct AddressWindow<S: PageSource = AnonPages> {
    mode: AddressMode,
    cursor: Mutex<Cursor<S>>,
}

impl AddressWindow<AnonPages> {
    /// Window backed by anonymous mappings placed at the cursor.
    pub fn anonymous(mode: AddressMode) -> Self {
        Self::new(mode, AnonPages)
    }
}

impl<S: PageSource> AddressWindow<S> {
    /// Window over `source` with the cursor at the window start.
    pub fn new(mode: AddressMode, source: S) -> Self {
        Self {
            mode,
            cursor: Mutex::new(Cursor {
                next: mode.min(),
                source,
            }),
        }
    }

    /// Address window in use.
    pub fn mode(&self) -> AddressMode {
        self.mode
    }

    /// Address the next allocation will be requested at.
    pub fn cursor(&self) -> u64 {
        self.cursor.lock().next
    }

    /// Allocate `size` bytes inside the window.
    pub fn alloc(&self, size: usize) -> Result<S::Region, AllocError> {
        let (min, max) = (self.mode.min(), self.mode.max());
        let len = size as u64;

        let mut cursor = self.cursor.lock();
        let step = cursor.source.granularity().max(1);
        let span = len.div_ceil(step).max(1) * step;

        for _ in 0..MAX_ATTEMPTS {
            if cursor.next >= max.saturating_sub(len) {
                cursor.next = min;
            }
            let hint = cursor.next;
            let region = match cursor.source.map(hint, size) {
                Ok(Some(region)) => region,
                Ok(None) => return Err(AllocError::Null),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    trace!(hint = format_args!("{hint:#018x}"), "hint occupied");
                    cursor.next = hint.saturating_add(span);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let addr = region.addr();
            debug!(addr = format_args!("{addr:#018x}"), size, "alloc");
            if addr == 0 {
                return Err(AllocError::Null);
            }
            if !self.mode.contains(addr, len) {
                return Err(AllocError::OutOfRange);
            }
            cursor.next = addr.saturating_add(span);
            return Ok(region);
        }
        Err(AllocError::WindowFull { attempts: MAX_ATTEMPTS })
    }
}
