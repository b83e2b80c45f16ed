// simd-assembler/src/isa/neon.rs
// AArch64 AdvSIMD, 128-bit. Every instruction is one little-endian word.

use core::marker::PhantomData;

use crate::builder::{CodeBuilder, Label, PatchKind};
use crate::inst::{ArithOp, CmpOp, FusedOp, MaskCheck, Rounding, RoundingMode, ShiftOp, UnaryOp};
use crate::operand::{Breg, DispClass};
use crate::profile::{Arch, Element, ElementWidth};

use super::{Chunk, EncodeArith, EncodeCompare, EncodeConvert, EncodeMove, EncodeShift, Isa, PIndex, POp, PMem};

/// Address scratch.
const X16: u8 = 16;
/// Second address scratch when an index and a long displacement combine.
const X17: u8 = 17;

/// Bit 22 selects `.2d` over `.4s` in the floating point forms.
const SZ_2D: u32 = 1 << 22;

const fn rrr(base: u32, d: u8, n: u8, m: u8) -> u32 {
    base | (m as u32) << 16 | (n as u32) << 5 | d as u32
}

const fn rr(base: u32, d: u8, n: u8) -> u32 {
    base | (n as u32) << 5 | d as u32
}

/// `orr vd.16b, vn.16b, vn.16b`.
const fn mov(d: u8, s: u8) -> u32 {
    rrr(0x4EA0_1C00, d, s, s)
}

/// `add xd, xn, xm, lsl #shift`.
const fn add_x(d: u8, n: u8, m: u8, shift: u8) -> u32 {
    rrr(0x8B00_0000, d, n, m) | (shift as u32) << 10
}

/// `movz xd, #lo; movk xd, #hi, lsl #16`.
fn mov_imm32(b: &mut CodeBuilder, d: u8, value: u32) {
    b.push_u32(0xD280_0000 | (value & 0xFFFF) << 5 | d as u32);
    b.push_u32(0xF2A0_0000 | (value >> 16) << 5 | d as u32);
}

/// Base register and byte offset for a `q` load or store of `m`.
///
/// Indexed operands go through x16. `DV` displacements are built in x16
/// (or x17 next to an index) and the returned offset is zero; every other
/// class fits the scaled 12-bit immediate.
fn address(b: &mut CodeBuilder, m: &PMem) -> (u8, u32) {
    let (base, indexed) = match m.index {
        PIndex::None => (m.base, false),
        PIndex::Reg { reg, shift } => {
            b.push_u32(add_x(X16, m.base, reg, shift));
            (X16, true)
        }
    };
    match m.class {
        DispClass::Dv => {
            let tmp = if indexed { X17 } else { X16 };
            mov_imm32(b, tmp, m.disp);
            b.push_u32(add_x(X16, base, tmp, 0));
            (X16, 0)
        }
        DispClass::Dp | DispClass::Df | DispClass::Dg | DispClass::Dh => (base, m.disp),
    }
}

fn ldr_q(b: &mut CodeBuilder, d: u8, m: &PMem) {
    let (rn, off) = address(b, m);
    b.push_u32(rr(0x3DC0_0000, d, rn) | (off / 16) << 10);
}

fn str_q(b: &mut CodeBuilder, s: u8, m: &PMem) {
    let (rn, off) = address(b, m);
    b.push_u32(rr(0x3D80_0000, s, rn) | (off / 16) << 10);
}

/// AdvSIMD encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Neon<E>(PhantomData<E>);

impl<E: Element> Neon<E> {
    const WIDE: bool = matches!(E::WIDTH, ElementWidth::W64);
    const SZ: u32 = if Self::WIDE { SZ_2D } else { 0 };
    const ESIZE: u32 = E::WIDTH.bits();

    /// Register form of `t`; memory goes through the hidden register.
    fn reg(b: &mut CodeBuilder, cx: &Chunk, t: POp) -> u8 {
        match t {
            POp::Reg(r) => r,
            POp::Mem(m) => {
                ldr_q(b, cx.temps.m, &m);
                cx.temps.m
            }
        }
    }

    fn fp(base: u32) -> u32 {
        base | Self::SZ
    }

    fn int(add: bool) -> u32 {
        match (add, Self::WIDE) {
            (true, false) => 0x4EA0_8400,
            (true, true) => 0x4EE0_8400,
            (false, false) => 0x6EA0_8400,
            (false, true) => 0x6EE0_8400,
        }
    }

    fn frint(mode: Rounding) -> u32 {
        Self::fp(match mode {
            Rounding::Mode(RoundingMode::Nearest) => 0x4E21_8800,
            Rounding::Mode(RoundingMode::Minus) => 0x4E21_9800,
            Rounding::Mode(RoundingMode::Plus) => 0x4EA1_8800,
            Rounding::Mode(RoundingMode::Zero) => 0x4EA1_9800,
            Rounding::Current => 0x6EA1_9800,
        })
    }

    fn fcvt(mode: RoundingMode) -> u32 {
        Self::fp(match mode {
            RoundingMode::Nearest => 0x4E21_A800,
            RoundingMode::Minus => 0x4E21_B800,
            RoundingMode::Plus => 0x4EA1_A800,
            RoundingMode::Zero => 0x4EA1_B800,
        })
    }

    /// `ldr`/`str` of one element through w16 or x16.
    fn gpr(b: &mut CodeBuilder, store: bool, m: &PMem) {
        let (base, scale) = match (store, Self::WIDE) {
            (false, false) => (0xB940_0000, 4),
            (false, true) => (0xF940_0000, 8),
            (true, false) => (0xB900_0000, 4),
            (true, true) => (0xF900_0000, 8),
        };
        let (rn, off) = match (m.index, m.class) {
            (PIndex::None, DispClass::Dp | DispClass::Df) => (m.base, m.disp),
            _ => {
                mov_imm32(b, X17, m.disp);
                let rn = match m.index {
                    PIndex::None => m.base,
                    PIndex::Reg { reg, shift } => {
                        b.push_u32(add_x(X17, X17, reg, shift));
                        m.base
                    }
                };
                b.push_u32(add_x(X17, rn, X17, 0));
                (X17, 0)
            }
        };
        b.push_u32(rr(base, X16, rn) | (off / scale) << 10);
    }
}

impl<E: Element> EncodeMove for Neon<E> {
    fn mov(b: &mut CodeBuilder, _cx: &Chunk, d: u8, s: u8) {
        b.push_u32(mov(d, s));
    }

    fn load(b: &mut CodeBuilder, _cx: &Chunk, d: u8, m: &PMem) {
        ldr_q(b, d, m);
    }

    fn store(b: &mut CodeBuilder, _cx: &Chunk, s: u8, m: &PMem) {
        str_q(b, s, m);
    }

    fn copy_elem(b: &mut CodeBuilder, from: &PMem, to: &PMem) {
        Self::gpr(b, false, from);
        Self::gpr(b, true, to);
    }
}

impl<E: Element> EncodeArith for Neon<E> {
    fn arith(b: &mut CodeBuilder, cx: &Chunk, op: ArithOp, d: u8, s: u8, t: POp) {
        let t = Self::reg(b, cx, t);
        let word = match op {
            ArithOp::And => rrr(0x4E20_1C00, d, s, t),
            // bic d, t, s
            ArithOp::Ann => rrr(0x4E60_1C00, d, t, s),
            ArithOp::Orr => rrr(0x4EA0_1C00, d, s, t),
            ArithOp::Xor => rrr(0x6E20_1C00, d, s, t),
            ArithOp::Add => rrr(Self::fp(0x4E20_D400), d, s, t),
            ArithOp::Sub => rrr(Self::fp(0x4EA0_D400), d, s, t),
            ArithOp::Mul => rrr(Self::fp(0x6E20_DC00), d, s, t),
            ArithOp::Div => rrr(Self::fp(0x6E20_FC00), d, s, t),
            ArithOp::Min => rrr(Self::fp(0x4EA0_F400), d, s, t),
            ArithOp::Max => rrr(Self::fp(0x4E20_F400), d, s, t),
            ArithOp::AddInt => rrr(Self::int(true), d, s, t),
            ArithOp::SubInt => rrr(Self::int(false), d, s, t),
        };
        b.push_u32(word);
    }

    fn unary(b: &mut CodeBuilder, cx: &Chunk, op: UnaryOp, d: u8, s: POp) {
        let s = Self::reg(b, cx, s);
        let base = match op {
            UnaryOp::Sqr => 0x6EA1_F800,
            UnaryOp::Rce => 0x4EA1_D800,
            UnaryOp::Rse => 0x6EA1_D800,
        };
        b.push_u32(rr(Self::fp(base), d, s));
    }

    fn fused(b: &mut CodeBuilder, cx: &Chunk, op: FusedOp, g: u8, s: u8, t: POp) {
        let t = Self::reg(b, cx, t);
        // fmla / fmls accumulate into the destination.
        let base = match op {
            FusedOp::Fma => 0x4E20_CC00,
            FusedOp::Fms => 0x4EA0_CC00,
        };
        b.push_u32(rrr(Self::fp(base), g, s, t));
    }
}

impl<E: Element> EncodeCompare for Neon<E> {
    fn compare(b: &mut CodeBuilder, cx: &Chunk, op: CmpOp, d: u8, s: u8, t: POp) {
        let t = Self::reg(b, cx, t);
        let eq = Self::fp(0x4E20_E400);
        let ge = Self::fp(0x6E20_E400);
        let gt = Self::fp(0x6EA0_E400);
        match op {
            CmpOp::Eq => b.push_u32(rrr(eq, d, s, t)),
            CmpOp::Ne => {
                b.push_u32(rrr(eq, d, s, t));
                b.push_u32(rr(0x6E20_5800, d, d));
            }
            CmpOp::Ge => b.push_u32(rrr(ge, d, s, t)),
            CmpOp::Gt => b.push_u32(rrr(gt, d, s, t)),
            CmpOp::Le => b.push_u32(rrr(ge, d, t, s)),
            CmpOp::Lt => b.push_u32(rrr(gt, d, t, s)),
        }
    }

    fn merge(b: &mut CodeBuilder, cx: &Chunk, g: u8, s: POp, mask: u8) {
        let s = Self::reg(b, cx, s);
        // bit g, s, mask
        b.push_u32(rrr(0x6EA0_1C00, g, s, mask));
    }

    fn mask_member(b: &mut CodeBuilder, cx: &Chunk, s: u8, check: MaskCheck) {
        let m = cx.temps.m;
        let word = match (cx.member, check) {
            (0, _) => mov(m, s),
            (_, MaskCheck::None) => rrr(0x4EA0_1C00, m, m, s),
            (_, MaskCheck::Full) => rrr(0x4E20_1C00, m, m, s),
        };
        b.push_u32(word);
    }

    fn mask_branch(b: &mut CodeBuilder, cx: &Chunk, check: MaskCheck, target: Label) {
        let m = cx.temps.m;
        // Lanes are all-ones or all-zeros, so 32-bit reductions serve both widths.
        let (reduce, branch) = match check {
            MaskCheck::None => (0x6EB0_A800, 0x3400_0010),
            MaskCheck::Full => (0x6EB1_A800, 0x3500_0010),
        };
        b.push_u32(rr(reduce, m, m));
        // fmov w16, s<m>
        b.push_u32(rr(0x1E26_0000, X16, m));
        b.emit_branch(PatchKind::A64Imm19(branch), target);
    }
}

impl<E: Element> EncodeConvert for Neon<E> {
    fn rounds_directly(_mode: RoundingMode) -> bool {
        true
    }

    fn converts_directly(_mode: RoundingMode) -> bool {
        true
    }

    fn round(b: &mut CodeBuilder, _cx: &Chunk, mode: Rounding, d: u8, s: u8) {
        b.push_u32(rr(Self::frint(mode), d, s));
    }

    fn to_int(b: &mut CodeBuilder, _cx: &Chunk, mode: Rounding, d: u8, s: u8) {
        match mode {
            Rounding::Mode(m) => b.push_u32(rr(Self::fcvt(m), d, s)),
            Rounding::Current => {
                b.push_u32(rr(Self::frint(Rounding::Current), d, s));
                b.push_u32(rr(Self::fcvt(RoundingMode::Zero), d, d));
            }
        }
    }

    fn from_int(b: &mut CodeBuilder, _cx: &Chunk, d: u8, s: u8) {
        b.push_u32(rr(Self::fp(0x4E21_D800), d, s));
    }

    fn control_word(mode: RoundingMode, flush: bool) -> u32 {
        let rmode = match mode {
            RoundingMode::Nearest => 0,
            RoundingMode::Plus => 1,
            RoundingMode::Minus => 2,
            RoundingMode::Zero => 3,
        };
        rmode << 22 | (flush as u32) << 24
    }

    fn set_mode(b: &mut CodeBuilder, mode: RoundingMode, flush: bool) {
        let high = Self::control_word(mode, flush) >> 16;
        // movz w16, #high, lsl #16; msr fpcr, x16
        b.push_u32(0x52A0_0000 | high << 5 | X16 as u32);
        b.push_u32(0xD51B_4400 | X16 as u32);
    }
}

impl<E: Element> EncodeShift for Neon<E> {
    fn shift(b: &mut CodeBuilder, _cx: &Chunk, op: ShiftOp, d: u8, s: u8, imm: u8) {
        let imm = imm as u32;
        let esize = Self::ESIZE;
        let word = match op {
            ShiftOp::Shl => rr(0x4F00_5400, d, s) | (esize + imm) << 16,
            ShiftOp::Shr | ShiftOp::Sra if imm == 0 => mov(d, s),
            ShiftOp::Shr => rr(0x6F00_0400, d, s) | (2 * esize - imm) << 16,
            ShiftOp::Sra => rr(0x4F00_0400, d, s) | (2 * esize - imm) << 16,
        };
        b.push_u32(word);
    }
}

impl<E: Element> Isa for Neon<E> {
    const ARCH: Arch = Arch::A64;
    const NATIVE_BYTES: u32 = 16;
    const ELEMENT: ElementWidth = E::WIDTH;

    fn base(reg: Breg) -> u8 {
        match reg {
            Breg::Reax => 0,
            Breg::Recx => 1,
            Breg::Redx => 2,
            Breg::Rebx => 3,
            Breg::Rebp => 5,
            Breg::Resi => 6,
            Breg::Redi => 7,
            Breg::Reg8 => 8,
            Breg::Reg9 => 9,
            Breg::RegA => 10,
            Breg::RegB => 11,
            Breg::RegC => 12,
            Breg::RegD => 13,
        }
    }

    fn jump(b: &mut CodeBuilder, target: Label) {
        b.emit_branch(PatchKind::A64Imm26(0x1400_0000), target);
    }
}
