//! The info block: per-invocation context addressed through `Rebp`.
//!
//! ```text
//! 0x000  FCTRL   four control words, one per rounding mode
//! 0x010  SAVE    caller scratch word
//! 0x040  SPILL   64 bytes owned by the encoders
//! 0x080  GPC01   1.0 in every lane             (one logical vector each)
//!        GPC02   -0.5
//!        GPC03   3.0
//!        GPC07   all-ones
//!        SCR01 .. SCR04   scratch vectors
//!        REGS    register save area, one vector per logical register
//! ```
//!
//! Offsets past `CONSTS` scale with the logical vector width.

use crate::inst::RoundingMode;
use crate::isa::EncodeConvert;
use crate::profile::{ElementWidth, Target, FLUSH_ZERO};

/// Control words, indexed by [`RoundingMode::slot`].
pub const FCTRL: u32 = 0x000;
/// Caller scratch word.
pub const SAVE: u32 = 0x010;
/// Encoder spill area.
pub const SPILL: u32 = 0x040;
/// Bytes in the spill area.
pub const SPILL_BYTES: u32 = 0x40;
/// First constant vector.
pub const CONSTS: u32 = 0x080;

/// Width-dependent offsets of a profile's info block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoLayout {
    vector: u32,
    regs: u32,
    element: ElementWidth,
}

impl InfoLayout {
    /// Layout for profile `T`.
    pub fn of<T: Target>() -> Self {
        Self {
            vector: T::VECTOR_BYTES,
            regs: T::REGS as u32,
            element: T::ELEMENT,
        }
    }

    /// Logical vector width in bytes.
    pub fn vector_bytes(&self) -> u32 {
        self.vector
    }

    /// Offset of the control word for `mode`.
    pub fn fctrl(&self, mode: RoundingMode) -> u32 {
        FCTRL + mode.slot() * 4
    }

    /// 1.0 splat.
    pub fn gpc01(&self) -> u32 {
        CONSTS
    }

    /// -0.5 splat.
    pub fn gpc02(&self) -> u32 {
        CONSTS + self.vector
    }

    /// 3.0 splat.
    pub fn gpc03(&self) -> u32 {
        CONSTS + 2 * self.vector
    }

    /// All-ones splat.
    pub fn gpc07(&self) -> u32 {
        CONSTS + 3 * self.vector
    }

    /// Scratch vector `n` in `1..=4`.
    pub fn scr(&self, n: u32) -> u32 {
        debug_assert!((1..=4).contains(&n));
        CONSTS + (3 + n) * self.vector
    }

    /// Save slot of logical register `reg`.
    pub fn regs(&self, reg: u8) -> u32 {
        CONSTS + 8 * self.vector + reg as u32 * self.vector
    }

    /// Total size in bytes.
    pub fn size(&self) -> u32 {
        self.regs(0) + self.regs * self.vector
    }

    fn splat(&self, bytes: &mut [u8], offset: u32, value: f64) {
        let range = offset as usize..(offset + self.vector) as usize;
        match self.element {
            ElementWidth::W32 => {
                for lane in bytes[range].chunks_exact_mut(4) {
                    lane.copy_from_slice(&(value as f32).to_le_bytes());
                }
            }
            ElementWidth::W64 => {
                for lane in bytes[range].chunks_exact_mut(8) {
                    lane.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
    }
}

/// Initialized info block bytes for one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoBlock {
    layout: InfoLayout,
    bytes: Vec<u8>,
}

impl InfoBlock {
    /// Block with control words and constants filled in for `T`.
    pub fn new<T: Target>() -> Self {
        let layout = InfoLayout::of::<T>();
        let mut bytes = vec![0u8; layout.size() as usize];

        for mode in RoundingMode::ALL {
            let word = <T::Isa as EncodeConvert>::control_word(mode, FLUSH_ZERO);
            let at = layout.fctrl(mode) as usize;
            bytes[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }

        layout.splat(&mut bytes, layout.gpc01(), 1.0);
        layout.splat(&mut bytes, layout.gpc02(), -0.5);
        layout.splat(&mut bytes, layout.gpc03(), 3.0);
        let ones = layout.gpc07() as usize;
        bytes[ones..ones + layout.vector as usize].fill(0xFF);

        Self { layout, bytes }
    }

    /// Layout the block was built with.
    pub fn layout(&self) -> &InfoLayout {
        &self.layout
    }

    /// Raw bytes, to be placed at a vector-aligned address.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Fp32, Fp64, A64_512, X64_128};

    #[test]
    fn layout_scales_with_vector_width() {
        let narrow = InfoLayout::of::<X64_128<Fp32>>();
        assert_eq!(narrow.gpc02(), 0x90);
        assert_eq!(narrow.scr(1), 0xC0);
        assert_eq!(narrow.regs(0), 0x100);
        assert_eq!(narrow.size(), 0x200);

        let wide = InfoLayout::of::<A64_512<Fp32>>();
        assert_eq!(wide.gpc02(), 0xC0);
        assert_eq!(wide.scr(4), 0x80 + 7 * 64);
        assert_eq!(wide.size(), 0x80 + 8 * 64 + 7 * 64);
    }

    #[test]
    fn block_holds_constants_and_control_words() {
        let block = InfoBlock::new::<X64_128<Fp64>>();
        let bytes = block.bytes();
        let at = block.layout().gpc03() as usize;
        assert_eq!(f64::from_le_bytes(bytes[at..at + 8].try_into().unwrap()), 3.0);
        assert_eq!(f64::from_le_bytes(bytes[at + 8..at + 16].try_into().unwrap()), 3.0);
        let zero = block.layout().fctrl(RoundingMode::Zero) as usize;
        let word = u32::from_le_bytes(bytes[zero..zero + 4].try_into().unwrap());
        assert_eq!((word >> 13) & 3, 3);
        let ones = block.layout().gpc07() as usize;
        assert!(bytes[ones..ones + 16].iter().all(|&b| b == 0xFF));
    }
}
