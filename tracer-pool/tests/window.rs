use std::io;
use std::ops::{Deref, DerefMut};

use proptest::prelude::*;
use tracer_pool::{AddressMode, AddressWindow, AllocError, PageSource, Region, MAX_ATTEMPTS};

struct FakeRegion {
    addr: u64,
    bytes: Vec<u8>,
}

impl Deref for FakeRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for FakeRegion {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Region for FakeRegion {
    fn addr(&self) -> u64 {
        self.addr
    }
}

/// Maps exactly at the hint unless told otherwise.
#[derive(Default)]
struct FakePages {
    place_at: Option<u64>,
    exhausted: bool,
    occupied: Vec<(u64, u64)>,
}

impl PageSource for FakePages {
    type Region = FakeRegion;

    fn granularity(&self) -> u64 {
        0x1_0000
    }

    fn map(&mut self, hint: u64, len: usize) -> io::Result<Option<FakeRegion>> {
        if self.exhausted {
            return Ok(None);
        }
        let end = hint + len as u64;
        if self.occupied.iter().any(|&(lo, hi)| hint < hi && lo < end) {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists));
        }
        Ok(Some(FakeRegion {
            addr: self.place_at.unwrap_or(hint),
            bytes: Vec::new(),
        }))
    }
}

struct Failing;

impl PageSource for Failing {
    type Region = FakeRegion;

    fn granularity(&self) -> u64 {
        0x1000
    }

    fn map(&mut self, _hint: u64, _len: usize) -> io::Result<Option<FakeRegion>> {
        Err(io::Error::new(io::ErrorKind::OutOfMemory, "no pages"))
    }
}

#[test]
fn cursor_advances_by_rounded_size() {
    let window = AddressWindow::new(AddressMode::Wide, FakePages::default());
    let first = window.alloc(100).unwrap();
    assert_eq!(first.addr(), 0x1_4000_0000);
    assert_eq!(window.cursor(), 0x1_4001_0000);
    let second = window.alloc(0x1_0001).unwrap();
    assert_eq!(second.addr(), 0x1_4001_0000);
    assert_eq!(window.cursor(), 0x1_4003_0000);
}

#[test]
fn cursor_follows_the_returned_address() {
    let source = FakePages {
        place_at: Some(0x2_0000_0000),
        ..FakePages::default()
    };
    let window = AddressWindow::new(AddressMode::Wide, source);
    window.alloc(0x8000).unwrap();
    assert_eq!(window.cursor(), 0x2_0001_0000);
}

#[test]
fn low32_window_wraps_to_start() {
    let window = AddressWindow::new(AddressMode::Low32, FakePages::default());
    let quarter = 0x1000_0000;
    let addrs: Vec<u64> = (0..5).map(|_| window.alloc(quarter).unwrap().addr()).collect();
    assert_eq!(
        addrs,
        [0x4000_0000, 0x5000_0000, 0x6000_0000, 0x4000_0000, 0x5000_0000]
    );
}

#[test]
fn low32_rejects_mappings_past_the_window() {
    let source = FakePages {
        place_at: Some(0x7FFF_8000),
        ..FakePages::default()
    };
    let window = AddressWindow::new(AddressMode::Low32, source);
    let err = window.alloc(0x1_0000).err().unwrap();
    assert!(matches!(err, AllocError::OutOfRange));
    assert_eq!(err.to_string(), "address exceeded allowed range in sys_alloc");
}

#[test]
fn wide_rejects_mappings_past_the_window() {
    let source = FakePages {
        place_at: Some(0x7F00_0000_0000),
        ..FakePages::default()
    };
    let window = AddressWindow::new(AddressMode::Wide, source);
    assert!(matches!(window.alloc(0x1000), Err(AllocError::OutOfRange)));
    assert_eq!(window.cursor(), AddressMode::Wide.min());
}

#[test]
fn occupied_hints_are_skipped() {
    let source = FakePages {
        occupied: vec![(0x4000_0000, 0x4002_8000)],
        ..FakePages::default()
    };
    let window = AddressWindow::new(AddressMode::Low32, source);
    let region = window.alloc(0x1_0000).unwrap();
    assert_eq!(region.addr(), 0x4003_0000);
    assert_eq!(window.cursor(), 0x4004_0000);
}

#[test]
fn fully_occupied_window_gives_up() {
    let source = FakePages {
        occupied: vec![(0, u64::MAX)],
        ..FakePages::default()
    };
    let window = AddressWindow::new(AddressMode::Low32, source);
    let err = window.alloc(0x1000).err().unwrap();
    assert!(matches!(err, AllocError::WindowFull { attempts: MAX_ATTEMPTS }));
}

#[test]
fn exhausted_source_reports_null() {
    let source = FakePages {
        exhausted: true,
        ..FakePages::default()
    };
    let window = AddressWindow::new(AddressMode::Wide, source);
    let err = window.alloc(64).err().unwrap();
    assert_eq!(err.to_string(), "alloc failed with NULL address in sys_alloc");
    assert_eq!(window.cursor(), AddressMode::Wide.min());
}

#[test]
fn mapping_errors_propagate() {
    let window = AddressWindow::new(AddressMode::Wide, Failing);
    assert!(matches!(window.alloc(64), Err(AllocError::Map(_))));
}

proptest! {
    #[test]
    fn prop_hints_stay_inside_window(sizes in prop::collection::vec(1usize..0x0800_0000, 1..64)) {
        let window = AddressWindow::new(AddressMode::Low32, FakePages::default());
        let (min, max) = (AddressMode::Low32.min(), AddressMode::Low32.max());
        for size in sizes {
            let region = window.alloc(size).unwrap();
            let addr = region.addr();
            prop_assert!(addr >= min);
            prop_assert!(addr + size as u64 <= max);
            prop_assert_eq!(addr % 0x1_0000, 0);
        }
    }
}
