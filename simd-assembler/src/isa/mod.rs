//! Per-family encoders.
//!
//! Each family implements the capability traits below once per element
//! width. Operands arrive already mapped to physical registers: the
//! [`crate::Asm`] front end resolves pair members, displacements and hidden
//! temporaries, so an encoder only ever sees one native-width operation.

mod avx2;
mod msa;
mod neon;
mod sse;
mod vsx;
mod x86;

pub use avx2::Avx2;
pub use msa::Msa;
pub use neon::Neon;
pub use sse::Sse;
pub use vsx::Vsx;

use crate::builder::{CodeBuilder, Label};
use crate::inst::{ArithOp, CmpOp, FusedOp, MaskCheck, Rounding, RoundingMode, ShiftOp, UnaryOp};
use crate::operand::{Breg, DispClass};
use crate::profile::{Arch, ElementWidth, Temps};

/// Index register of a physical memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PIndex {
    /// No index.
    None,
    /// `reg << shift` added to the base; `shift` is 0, 2 or 3.
    Reg {
        /// Index register.
        reg: u8,
        /// Left shift applied to the index.
        shift: u8,
    },
}

/// Memory operand in physical register numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PMem {
    /// Base register.
    pub base: u8,
    /// Index register.
    pub index: PIndex,
    /// Byte displacement of this pair member.
    pub disp: u32,
    /// Class of the logical displacement.
    pub class: DispClass,
}

impl PMem {
    /// Info block slot `base + disp`.
    pub fn at(base: u8, disp: u32) -> Self {
        Self {
            base,
            index: PIndex::None,
            disp,
            class: DispClass::Dp,
        }
    }

    /// Same operand, `bytes` further on.
    pub fn offset(self, bytes: u32) -> Self {
        Self {
            disp: self.disp + bytes,
            ..self
        }
    }
}

/// Register or memory source in physical numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum POp {
    /// Vector register.
    Reg(u8),
    /// Memory operand.
    Mem(PMem),
}

/// The pair member being encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Member index, `0..pairing`.
    pub member: u8,
    /// Byte offset of this member inside a logical vector.
    pub offset: u32,
    /// Hidden registers of the profile.
    pub temps: Temps,
}

/// Register moves, loads, stores and element copies.
pub trait EncodeMove {
    /// `d = s`.
    fn mov(b: &mut CodeBuilder, cx: &Chunk, d: u8, s: u8);
    /// `d = [m]`.
    fn load(b: &mut CodeBuilder, cx: &Chunk, d: u8, m: &PMem);
    /// `[m] = s`.
    fn store(b: &mut CodeBuilder, cx: &Chunk, s: u8, m: &PMem);
    /// One element from `from` to `to` through a general register.
    fn copy_elem(b: &mut CodeBuilder, from: &PMem, to: &PMem);
}

/// Bitwise, floating point and integer lane arithmetic.
pub trait EncodeArith {
    /// Whether [`EncodeArith::fused`] rounds once. Families without a fused
    /// multiply-add multiply and add separately.
    const FUSES: bool = true;
    /// Whether [`UnaryOp::Rce`] and [`UnaryOp::Rse`] are hardware estimates
    /// rather than exact divides.
    const ESTIMATES: bool = true;

    /// `d = s op t`.
    fn arith(b: &mut CodeBuilder, cx: &Chunk, op: ArithOp, d: u8, s: u8, t: POp);
    /// `d = op(s)`.
    fn unary(b: &mut CodeBuilder, cx: &Chunk, op: UnaryOp, d: u8, s: POp);
    /// `g = g + s * t` or `g = g - s * t`.
    fn fused(b: &mut CodeBuilder, cx: &Chunk, op: FusedOp, g: u8, s: u8, t: POp);
}

/// Compares, mask merge and mask branches.
pub trait EncodeCompare {
    /// `d = s op t` as lane masks.
    fn compare(b: &mut CodeBuilder, cx: &Chunk, op: CmpOp, d: u8, s: u8, t: POp);
    /// `g = mask ? s : g`.
    fn merge(b: &mut CodeBuilder, cx: &Chunk, g: u8, s: POp, mask: u8);
    /// Fold pair member `s` into the accumulated branch mask.
    fn mask_member(b: &mut CodeBuilder, cx: &Chunk, s: u8, check: MaskCheck);
    /// Branch on the accumulated mask.
    fn mask_branch(b: &mut CodeBuilder, cx: &Chunk, check: MaskCheck, target: Label);
}

/// Rounding, conversions and the FP control register.
pub trait EncodeConvert {
    /// Whether `round` can encode `mode` without touching the control register.
    fn rounds_directly(mode: RoundingMode) -> bool;
    /// Whether `to_int` can encode `mode` without touching the control register.
    fn converts_directly(mode: RoundingMode) -> bool;
    /// `d = round(s)`.
    fn round(b: &mut CodeBuilder, cx: &Chunk, mode: Rounding, d: u8, s: u8);
    /// `d = int(round(s))`.
    fn to_int(b: &mut CodeBuilder, cx: &Chunk, mode: Rounding, d: u8, s: u8);
    /// `d = float(s)`.
    fn from_int(b: &mut CodeBuilder, cx: &Chunk, d: u8, s: u8);
    /// Control register value selecting `mode`.
    fn control_word(mode: RoundingMode, flush: bool) -> u32;
    /// Load the control register with `mode`.
    fn set_mode(b: &mut CodeBuilder, mode: RoundingMode, flush: bool);
}

/// Immediate lane shifts.
pub trait EncodeShift {
    /// `d = s op imm`, `imm` below the element width.
    fn shift(b: &mut CodeBuilder, cx: &Chunk, op: ShiftOp, d: u8, s: u8, imm: u8);
}

/// A native encoder for one family and element width.
pub trait Isa: EncodeMove + EncodeArith + EncodeCompare + EncodeConvert + EncodeShift + 'static {
    /// Family.
    const ARCH: Arch;
    /// Native register width in bytes.
    const NATIVE_BYTES: u32;
    /// Lane width.
    const ELEMENT: ElementWidth;

    /// Physical number of a portable base register.
    fn base(reg: Breg) -> u8;

    /// Code run once at kernel entry.
    fn prologue(_b: &mut CodeBuilder, _temps: Temps) {}

    /// Unconditional branch.
    fn jump(b: &mut CodeBuilder, target: Label);
}
