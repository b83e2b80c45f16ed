// simd-assembler/src/isa/vsx.rs
// POWER9 VSX, 128-bit. Vector registers are addressed as VSR 32..63, so the
// TX/AX/BX extension bits are always set.

use core::marker::PhantomData;

use crate::builder::{CodeBuilder, Label, PatchKind};
use crate::inst::{ArithOp, CmpOp, FusedOp, MaskCheck, Rounding, RoundingMode, ShiftOp, UnaryOp};
use crate::operand::{Breg, DispClass};
use crate::profile::{Arch, Element, ElementWidth, Temps};

use super::{Chunk, EncodeArith, EncodeCompare, EncodeConvert, EncodeMove, EncodeShift, Isa, PIndex, POp, PMem};

/// Composed address.
const R24: u8 = 24;
/// Scaled index, high displacement bits, element copies.
const R25: u8 = 25;

/// XX3 form: `T = A op B`.
const fn xx3(xo: u32, t: u8, a: u8, bb: u8) -> u32 {
    0xF000_0000 | xo | (t as u32) << 21 | (a as u32) << 16 | (bb as u32) << 11 | 0b111
}

/// XX2 form: `T = op B`.
const fn xx2(xo: u32, t: u8, bb: u8) -> u32 {
    0xF000_0000 | xo | (t as u32) << 21 | (bb as u32) << 11 | 0b11
}

/// VX form on the VMX register numbering.
const fn vx(xo: u32, t: u8, a: u8, bb: u8) -> u32 {
    0x1000_0000 | xo | (t as u32) << 21 | (a as u32) << 16 | (bb as u32) << 11
}

/// D form: `opcode RT, D(RA)`.
const fn dform(op: u32, rt: u8, ra: u8, d: u32) -> u32 {
    op | (rt as u32) << 21 | (ra as u32) << 16 | (d & 0xFFFF)
}

const fn xxlor(d: u8, a: u8, bb: u8) -> u32 {
    xx3(0x490, d, a, bb)
}

const fn add(rt: u8, ra: u8, rb: u8) -> u32 {
    0x7C00_0214 | (rt as u32) << 21 | (ra as u32) << 16 | (rb as u32) << 11
}

/// `sldi ra, rs, 2|3` as `rldicr`.
const fn sldi(ra: u8, rs: u8, shift: u8) -> u32 {
    let base = if shift == 3 { 0x7800_1F24 } else { 0x7800_1764 };
    base | (rs as u32) << 21 | (ra as u32) << 16
}

/// Base register and DQ displacement for `lxv`/`stxv`.
///
/// Indexes are folded into r24 first. `DH` and `DV` displacements exceed the
/// signed DQ field and are added in through `lis`/`ori`.
fn address(b: &mut CodeBuilder, m: &PMem) -> (u8, u32) {
    let mut base = m.base;
    if let PIndex::Reg { reg, shift } = m.index {
        let index = if shift > 0 {
            b.push_u32(sldi(R25, reg, shift));
            R25
        } else {
            reg
        };
        b.push_u32(add(R24, base, index));
        base = R24;
    }
    match m.class {
        DispClass::Dh | DispClass::Dv => {
            b.push_u32(dform(0x3C00_0000, R25, 0, m.disp >> 16));
            b.push_u32(0x6000_0000 | (R25 as u32) << 21 | (R25 as u32) << 16 | (m.disp & 0xFFFF));
            b.push_u32(add(R24, base, R25));
            (R24, 0)
        }
        DispClass::Dp | DispClass::Df | DispClass::Dg => (base, m.disp),
    }
}

fn lxv(b: &mut CodeBuilder, t: u8, m: &PMem) {
    let (ra, dq) = address(b, m);
    b.push_u32(0xF400_0001 | (t as u32) << 21 | (ra as u32) << 16 | (dq & 0xFFF0) | 8);
}

fn stxv(b: &mut CodeBuilder, s: u8, m: &PMem) {
    let (ra, dq) = address(b, m);
    b.push_u32(0xF400_0005 | (s as u32) << 21 | (ra as u32) << 16 | (dq & 0xFFF0) | 8);
}

/// VSX encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vsx<E>(PhantomData<E>);

impl<E: Element> Vsx<E> {
    const WIDE: bool = matches!(E::WIDTH, ElementWidth::W64);

    /// `sp` opcode to its `dp` sibling.
    fn fp(xo: u32) -> u32 {
        if Self::WIDE {
            xo + 0x100
        } else {
            xo
        }
    }

    fn reg(b: &mut CodeBuilder, cx: &Chunk, t: POp) -> u8 {
        match t {
            POp::Reg(r) => r,
            POp::Mem(m) => {
                lxv(b, cx.temps.m, &m);
                cx.temps.m
            }
        }
    }

    fn round_xo(mode: Rounding) -> u32 {
        Self::fp(match mode {
            Rounding::Mode(RoundingMode::Zero) => 0x264,
            Rounding::Mode(RoundingMode::Plus) => 0x2A4,
            Rounding::Mode(RoundingMode::Minus) => 0x2E4,
            // xvrspi rounds ties away from zero; nearest-even uses the FPSCR.
            Rounding::Mode(RoundingMode::Nearest) | Rounding::Current => 0x2AC,
        })
    }

    fn truncate(b: &mut CodeBuilder, d: u8, s: u8) {
        let xo = if Self::WIDE { 0x760 } else { 0x260 };
        b.push_u32(xx2(xo, d, s));
    }

    /// Element copies address info block slots, which always fit a D field.
    fn gpr(b: &mut CodeBuilder, store: bool, m: &PMem) {
        debug_assert!(matches!(m.index, PIndex::None) && m.disp < 0x8000);
        let op = match (store, Self::WIDE) {
            (false, false) => 0x8000_0000,
            (false, true) => 0xE800_0000,
            (true, false) => 0x9000_0000,
            (true, true) => 0xF800_0000,
        };
        b.push_u32(dform(op, R25, m.base, m.disp));
    }
}

impl<E: Element> EncodeMove for Vsx<E> {
    fn mov(b: &mut CodeBuilder, _cx: &Chunk, d: u8, s: u8) {
        b.push_u32(xxlor(d, s, s));
    }

    fn load(b: &mut CodeBuilder, _cx: &Chunk, d: u8, m: &PMem) {
        lxv(b, d, m);
    }

    fn store(b: &mut CodeBuilder, _cx: &Chunk, s: u8, m: &PMem) {
        stxv(b, s, m);
    }

    fn copy_elem(b: &mut CodeBuilder, from: &PMem, to: &PMem) {
        Self::gpr(b, false, from);
        Self::gpr(b, true, to);
    }
}

impl<E: Element> EncodeArith for Vsx<E> {
    fn arith(b: &mut CodeBuilder, cx: &Chunk, op: ArithOp, d: u8, s: u8, t: POp) {
        let t = Self::reg(b, cx, t);
        let word = match op {
            ArithOp::And => xx3(0x410, d, s, t),
            // xxlandc d, t, s
            ArithOp::Ann => xx3(0x450, d, t, s),
            ArithOp::Orr => xxlor(d, s, t),
            ArithOp::Xor => xx3(0x4D0, d, s, t),
            ArithOp::Add => xx3(Self::fp(0x200), d, s, t),
            ArithOp::Sub => xx3(Self::fp(0x240), d, s, t),
            ArithOp::Mul => xx3(Self::fp(0x280), d, s, t),
            ArithOp::Div => xx3(Self::fp(0x2C0), d, s, t),
            ArithOp::Min => xx3(Self::fp(0x640), d, s, t),
            ArithOp::Max => xx3(Self::fp(0x600), d, s, t),
            ArithOp::AddInt => vx(if Self::WIDE { 0x0C0 } else { 0x080 }, d, s, t),
            ArithOp::SubInt => vx(if Self::WIDE { 0x4C0 } else { 0x480 }, d, s, t),
        };
        b.push_u32(word);
    }

    fn unary(b: &mut CodeBuilder, cx: &Chunk, op: UnaryOp, d: u8, s: POp) {
        let s = Self::reg(b, cx, s);
        let xo = match op {
            UnaryOp::Sqr => 0x22C,
            UnaryOp::Rce => 0x268,
            UnaryOp::Rse => 0x228,
        };
        b.push_u32(xx2(Self::fp(xo), d, s));
    }

    fn fused(b: &mut CodeBuilder, cx: &Chunk, op: FusedOp, g: u8, s: u8, t: POp) {
        let t = Self::reg(b, cx, t);
        // A-forms: the target is the addend.
        let xo = match op {
            FusedOp::Fma => 0x208,
            FusedOp::Fms => 0x688,
        };
        b.push_u32(xx3(Self::fp(xo), g, s, t));
    }
}

impl<E: Element> EncodeCompare for Vsx<E> {
    fn compare(b: &mut CodeBuilder, cx: &Chunk, op: CmpOp, d: u8, s: u8, t: POp) {
        let t = Self::reg(b, cx, t);
        let (eq, ge, gt) = (Self::fp(0x218), Self::fp(0x298), Self::fp(0x258));
        match op {
            CmpOp::Eq => b.push_u32(xx3(eq, d, s, t)),
            CmpOp::Ne => {
                b.push_u32(xx3(eq, d, s, t));
                b.push_u32(xx3(0x510, d, d, d));
            }
            CmpOp::Ge => b.push_u32(xx3(ge, d, s, t)),
            CmpOp::Gt => b.push_u32(xx3(gt, d, s, t)),
            CmpOp::Le => b.push_u32(xx3(ge, d, t, s)),
            CmpOp::Lt => b.push_u32(xx3(gt, d, t, s)),
        }
    }

    fn merge(b: &mut CodeBuilder, cx: &Chunk, g: u8, s: POp, mask: u8) {
        let s = Self::reg(b, cx, s);
        // xxsel g, g, s, mask
        b.push_u32(xx3(0x030, g, g, s) | 0b1000 | (mask as u32) << 6);
    }

    fn mask_member(b: &mut CodeBuilder, cx: &Chunk, s: u8, check: MaskCheck) {
        let m = cx.temps.m;
        let word = match (cx.member, check) {
            (0, _) => xxlor(m, s, s),
            (_, MaskCheck::None) => xxlor(m, m, s),
            (_, MaskCheck::Full) => xx3(0x410, m, m, s),
        };
        b.push_u32(word);
    }

    fn mask_branch(b: &mut CodeBuilder, cx: &Chunk, check: MaskCheck, target: Label) {
        // vcmpequw. against the all-ones register sets CR6.
        b.push_u32(vx(0x486, cx.temps.m, cx.temps.m, cx.temps.q));
        let bc = match check {
            MaskCheck::None => 0x419A_0000,
            MaskCheck::Full => 0x4198_0000,
        };
        b.emit_branch(PatchKind::PpcBd14(bc), target);
    }
}

impl<E: Element> EncodeConvert for Vsx<E> {
    fn rounds_directly(mode: RoundingMode) -> bool {
        mode != RoundingMode::Nearest
    }

    fn converts_directly(mode: RoundingMode) -> bool {
        mode != RoundingMode::Nearest
    }

    fn round(b: &mut CodeBuilder, _cx: &Chunk, mode: Rounding, d: u8, s: u8) {
        b.push_u32(xx2(Self::round_xo(mode), d, s));
    }

    fn to_int(b: &mut CodeBuilder, cx: &Chunk, mode: Rounding, d: u8, s: u8) {
        match mode {
            Rounding::Mode(RoundingMode::Zero) => Self::truncate(b, d, s),
            _ => {
                Self::round(b, cx, mode, d, s);
                Self::truncate(b, d, d);
            }
        }
    }

    fn from_int(b: &mut CodeBuilder, _cx: &Chunk, d: u8, s: u8) {
        let xo = if Self::WIDE { 0x7E0 } else { 0x2E0 };
        b.push_u32(xx2(xo, d, s));
    }

    fn control_word(mode: RoundingMode, flush: bool) -> u32 {
        let rn = match mode {
            RoundingMode::Nearest => 0,
            RoundingMode::Zero => 1,
            RoundingMode::Plus => 2,
            RoundingMode::Minus => 3,
        };
        rn | if flush { 4 } else { 0 }
    }

    fn set_mode(b: &mut CodeBuilder, mode: RoundingMode, flush: bool) {
        // mtfsfi 7, U
        b.push_u32(0xFF80_010C | Self::control_word(mode, flush) << 12);
    }
}

impl<E: Element> EncodeShift for Vsx<E> {
    fn shift(b: &mut CodeBuilder, cx: &Chunk, op: ShiftOp, d: u8, s: u8, imm: u8) {
        let m = cx.temps.m;
        // xxspltib: the count sits in the low bits of every element.
        b.push_u32(0xF000_02D0 | (m as u32) << 21 | (imm as u32) << 11 | 1);
        let xo = match (op, Self::WIDE) {
            (ShiftOp::Shl, false) => 0x184,
            (ShiftOp::Shr, false) => 0x284,
            (ShiftOp::Sra, false) => 0x384,
            (ShiftOp::Shl, true) => 0x5C4,
            (ShiftOp::Shr, true) => 0x6C4,
            (ShiftOp::Sra, true) => 0x3C4,
        };
        b.push_u32(vx(xo, d, s, m));
    }
}

impl<E: Element> Isa for Vsx<E> {
    const ARCH: Arch = Arch::P64;
    const NATIVE_BYTES: u32 = 16;
    const ELEMENT: ElementWidth = E::WIDTH;

    fn base(reg: Breg) -> u8 {
        match reg {
            Breg::Reax => 4,
            Breg::Recx => 5,
            Breg::Redx => 6,
            Breg::Rebx => 7,
            Breg::Rebp => 8,
            Breg::Resi => 9,
            Breg::Redi => 10,
            Breg::Reg8 => 14,
            Breg::Reg9 => 15,
            Breg::RegA => 16,
            Breg::RegB => 17,
            Breg::RegC => 18,
            Breg::RegD => 19,
        }
    }

    /// `vspltisw q, -1`: the all-ones register used by mask branches.
    fn prologue(b: &mut CodeBuilder, temps: Temps) {
        b.push_u32(0x101F_038C | (temps.q as u32) << 21);
    }

    fn jump(b: &mut CodeBuilder, target: Label) {
        b.emit_branch(PatchKind::PpcLi24(0x4800_0000), target);
    }
}
