// simd-assembler/src/isa/msa.rs
// MIPS64r6 MSA, 128-bit. Vector loads and stores always go through $24.

use core::marker::PhantomData;

use crate::builder::{CodeBuilder, Label, PatchKind};
use crate::inst::{ArithOp, CmpOp, FusedOp, MaskCheck, Rounding, RoundingMode, ShiftOp, UnaryOp};
use crate::operand::{Breg, DispClass};
use crate::profile::{Arch, Element, ElementWidth};

use super::{Chunk, EncodeArith, EncodeCompare, EncodeConvert, EncodeMove, EncodeShift, Isa, PIndex, POp, PMem};

const T8: u8 = 24;
const T9: u8 = 25;
const NOP: u32 = 0;

/// 3R / 3RF / VEC forms share the field layout.
const fn w3(base: u32, d: u8, s: u8, t: u8) -> u32 {
    base | (t as u32) << 16 | (s as u32) << 11 | (d as u32) << 6
}

const fn w2(base: u32, d: u8, s: u8) -> u32 {
    base | (s as u32) << 11 | (d as u32) << 6
}

/// `move.v d, s`.
const fn move_v(d: u8, s: u8) -> u32 {
    w2(0x78BE_0019, d, s)
}

const fn daddu(rd: u8, rs: u8, rt: u8) -> u32 {
    0x2D | (rs as u32) << 21 | (rt as u32) << 16 | (rd as u32) << 11
}

/// I-type `op rt, rs, imm`.
const fn itype(op: u32, rt: u8, rs: u8, imm: u32) -> u32 {
    op | (rs as u32) << 21 | (rt as u32) << 16 | (imm & 0xFFFF)
}

/// Leave the address of `m` in $24.
fn address(b: &mut CodeBuilder, m: &PMem) {
    let mut base = m.base;
    if let PIndex::Reg { reg, shift } = m.index {
        if shift > 0 {
            // dsll $25, index, shift
            b.push_u32(0x38 | (reg as u32) << 16 | (T9 as u32) << 11 | (shift as u32) << 6);
            b.push_u32(daddu(T9, base, T9));
        } else {
            b.push_u32(daddu(T9, base, reg));
        }
        base = T9;
    }
    match m.class {
        DispClass::Dp | DispClass::Df | DispClass::Dg => {
            b.push_u32(itype(0x6400_0000, T8, base, m.disp));
        }
        DispClass::Dh | DispClass::Dv => {
            b.push_u32(itype(0x3C00_0000, T8, 0, m.disp >> 16));
            b.push_u32(itype(0x3400_0000, T8, T8, m.disp));
            b.push_u32(daddu(T8, base, T8));
        }
    }
}

/// MSA encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Msa<E>(PhantomData<E>);

impl<E: Element> Msa<E> {
    const WIDE: bool = matches!(E::WIDTH, ElementWidth::W64);
    /// Data format field of `ld`/`st`.
    const DF: u32 = if Self::WIDE { 3 } else { 2 };

    fn fp3(base: u32) -> u32 {
        if Self::WIDE {
            base | 1 << 21
        } else {
            base
        }
    }

    fn fp2(base: u32) -> u32 {
        if Self::WIDE {
            base | 1 << 16
        } else {
            base
        }
    }

    fn reg(b: &mut CodeBuilder, cx: &Chunk, t: POp) -> u8 {
        match t {
            POp::Reg(r) => r,
            POp::Mem(m) => {
                Self::ld(b, cx.temps.m, &m);
                cx.temps.m
            }
        }
    }

    fn ld(b: &mut CodeBuilder, d: u8, m: &PMem) {
        address(b, m);
        b.push_u32(0x7800_0020 | Self::DF | (T8 as u32) << 11 | (d as u32) << 6);
    }

    fn st(b: &mut CodeBuilder, s: u8, m: &PMem) {
        address(b, m);
        b.push_u32(0x7800_0024 | Self::DF | (T8 as u32) << 11 | (s as u32) << 6);
    }

    /// Element copies address info block slots, which always fit an I-type offset.
    fn gpr(b: &mut CodeBuilder, store: bool, m: &PMem) {
        debug_assert!(matches!(m.index, PIndex::None) && m.disp < 0x8000);
        let op = match (store, Self::WIDE) {
            (false, false) => 0x8C00_0000,
            (false, true) => 0xDC00_0000,
            (true, false) => 0xAC00_0000,
            (true, true) => 0xFC00_0000,
        };
        b.push_u32(itype(op, T8, m.base, m.disp));
    }
}

impl<E: Element> EncodeMove for Msa<E> {
    fn mov(b: &mut CodeBuilder, _cx: &Chunk, d: u8, s: u8) {
        b.push_u32(move_v(d, s));
    }

    fn load(b: &mut CodeBuilder, _cx: &Chunk, d: u8, m: &PMem) {
        Self::ld(b, d, m);
    }

    fn store(b: &mut CodeBuilder, _cx: &Chunk, s: u8, m: &PMem) {
        Self::st(b, s, m);
    }

    fn copy_elem(b: &mut CodeBuilder, from: &PMem, to: &PMem) {
        Self::gpr(b, false, from);
        Self::gpr(b, true, to);
    }
}

impl<E: Element> EncodeArith for Msa<E> {
    fn arith(b: &mut CodeBuilder, cx: &Chunk, op: ArithOp, d: u8, s: u8, t: POp) {
        let t = Self::reg(b, cx, t);
        let int = |w: u32, dd: u32| if Self::WIDE { dd } else { w };
        let word = match op {
            ArithOp::And => w3(0x7800_001E, d, s, t),
            ArithOp::Ann => {
                let q = cx.temps.q;
                b.push_u32(w3(0x7840_001E, q, s, s));
                w3(0x7800_001E, d, q, t)
            }
            ArithOp::Orr => w3(0x7820_001E, d, s, t),
            ArithOp::Xor => w3(0x7860_001E, d, s, t),
            ArithOp::Add => w3(Self::fp3(0x7800_001B), d, s, t),
            ArithOp::Sub => w3(Self::fp3(0x7840_001B), d, s, t),
            ArithOp::Mul => w3(Self::fp3(0x7880_001B), d, s, t),
            ArithOp::Div => w3(Self::fp3(0x78C0_001B), d, s, t),
            ArithOp::Min => w3(Self::fp3(0x7B00_001B), d, s, t),
            ArithOp::Max => w3(Self::fp3(0x7B80_001B), d, s, t),
            ArithOp::AddInt => w3(int(0x7840_000E, 0x7860_000E), d, s, t),
            ArithOp::SubInt => w3(int(0x78C0_000E, 0x78E0_000E), d, s, t),
        };
        b.push_u32(word);
    }

    fn unary(b: &mut CodeBuilder, cx: &Chunk, op: UnaryOp, d: u8, s: POp) {
        let s = Self::reg(b, cx, s);
        let base = match op {
            UnaryOp::Sqr => 0x7B26_001E,
            UnaryOp::Rce => 0x7B2A_001E,
            UnaryOp::Rse => 0x7B28_001E,
        };
        b.push_u32(w2(Self::fp2(base), d, s));
    }

    fn fused(b: &mut CodeBuilder, cx: &Chunk, op: FusedOp, g: u8, s: u8, t: POp) {
        let t = Self::reg(b, cx, t);
        let base = match op {
            FusedOp::Fma => 0x7900_001B,
            FusedOp::Fms => 0x7940_001B,
        };
        b.push_u32(w3(Self::fp3(base), g, s, t));
    }
}

impl<E: Element> EncodeCompare for Msa<E> {
    fn compare(b: &mut CodeBuilder, cx: &Chunk, op: CmpOp, d: u8, s: u8, t: POp) {
        let t = Self::reg(b, cx, t);
        let (base, s, t) = match op {
            CmpOp::Eq => (0x7880_001A, s, t),
            CmpOp::Ne => (0x7880_001C, s, t),
            CmpOp::Lt => (0x7900_001A, s, t),
            CmpOp::Le => (0x7980_001A, s, t),
            CmpOp::Gt => (0x7900_001A, t, s),
            CmpOp::Ge => (0x7980_001A, t, s),
        };
        b.push_u32(w3(Self::fp3(base), d, s, t));
    }

    fn merge(b: &mut CodeBuilder, cx: &Chunk, g: u8, s: POp, mask: u8) {
        let s = Self::reg(b, cx, s);
        // bmnz.v g, s, mask
        b.push_u32(w3(0x7880_001E, g, s, mask));
    }

    fn mask_member(b: &mut CodeBuilder, cx: &Chunk, s: u8, check: MaskCheck) {
        let m = cx.temps.m;
        let word = match (cx.member, check) {
            (0, _) => move_v(m, s),
            (_, MaskCheck::None) => w3(0x7820_001E, m, m, s),
            (_, MaskCheck::Full) => w3(0x7800_001E, m, m, s),
        };
        b.push_u32(word);
    }

    fn mask_branch(b: &mut CodeBuilder, cx: &Chunk, check: MaskCheck, target: Label) {
        let op = match (check, Self::WIDE) {
            (MaskCheck::None, _) => 0x4560_0000,
            (MaskCheck::Full, false) => 0x47C0_0000,
            (MaskCheck::Full, true) => 0x47E0_0000,
        };
        b.emit_branch(PatchKind::MipsS16(op | (cx.temps.m as u32) << 16), target);
        b.push_u32(NOP);
    }
}

impl<E: Element> EncodeConvert for Msa<E> {
    fn rounds_directly(_mode: RoundingMode) -> bool {
        false
    }

    fn converts_directly(mode: RoundingMode) -> bool {
        mode == RoundingMode::Zero
    }

    fn round(b: &mut CodeBuilder, _cx: &Chunk, mode: Rounding, d: u8, s: u8) {
        debug_assert_eq!(mode, Rounding::Current);
        b.push_u32(w2(Self::fp2(0x7B2C_001E), d, s));
    }

    fn to_int(b: &mut CodeBuilder, _cx: &Chunk, mode: Rounding, d: u8, s: u8) {
        let base = match mode {
            Rounding::Mode(RoundingMode::Zero) => 0x7B22_001E,
            _ => {
                debug_assert_eq!(mode, Rounding::Current);
                0x7B38_001E
            }
        };
        b.push_u32(w2(Self::fp2(base), d, s));
    }

    fn from_int(b: &mut CodeBuilder, _cx: &Chunk, d: u8, s: u8) {
        b.push_u32(w2(Self::fp2(0x7B3C_001E), d, s));
    }

    fn control_word(mode: RoundingMode, flush: bool) -> u32 {
        let rm = match mode {
            RoundingMode::Nearest => 0,
            RoundingMode::Zero => 1,
            RoundingMode::Plus => 2,
            RoundingMode::Minus => 3,
        };
        rm | (flush as u32) << 24
    }

    fn set_mode(b: &mut CodeBuilder, mode: RoundingMode, flush: bool) {
        let word = Self::control_word(mode, flush);
        if flush {
            b.push_u32(itype(0x3C00_0000, T8, 0, word >> 16));
            b.push_u32(itype(0x3400_0000, T8, T8, word));
        } else {
            b.push_u32(itype(0x3400_0000, T8, 0, word));
        }
        // ctcmsa MSACSR, $24
        b.push_u32(0x783E_0019 | (T8 as u32) << 11 | 1 << 6);
    }
}

impl<E: Element> EncodeShift for Msa<E> {
    fn shift(b: &mut CodeBuilder, _cx: &Chunk, op: ShiftOp, d: u8, s: u8, imm: u8) {
        let base = match op {
            ShiftOp::Shl => 0x7800_0009,
            ShiftOp::Sra => 0x7880_0009,
            ShiftOp::Shr => 0x7900_0009,
        };
        let dfm = if Self::WIDE { imm as u32 } else { 0x40 | imm as u32 };
        b.push_u32(w2(base, d, s) | dfm << 16);
    }
}

impl<E: Element> Isa for Msa<E> {
    const ARCH: Arch = Arch::M64;
    const NATIVE_BYTES: u32 = 16;
    const ELEMENT: ElementWidth = E::WIDTH;

    fn base(reg: Breg) -> u8 {
        4 + reg.slot() as u8
    }

    fn jump(b: &mut CodeBuilder, target: Label) {
        b.emit_branch(PatchKind::MipsS16(0x1000_0000), target);
        b.push_u32(NOP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Fp32, Fp64, Temps};

    type S = Msa<Fp32>;
    type D = Msa<Fp64>;

    const CX: Chunk = Chunk {
        member: 0,
        offset: 0,
        temps: Temps { m: 31, q: 30 },
    };

    fn words(f: impl FnOnce(&mut CodeBuilder)) -> Vec<u32> {
        let mut b = CodeBuilder::new(32);
        f(&mut b);
        b.code()
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    }

    #[test]
    fn base_registers_start_at_a0() {
        assert_eq!(S::base(Breg::Reax), 4);
        assert_eq!(S::base(Breg::Rebp), 8);
        assert_eq!(S::base(Breg::RegD), 16);
    }

    #[test]
    fn arithmetic_forms() {
        let r = POp::Reg(3);
        assert_eq!(words(|b| S::arith(b, &CX, ArithOp::Add, 1, 2, r)), [0x7803_105B]);
        assert_eq!(words(|b| D::arith(b, &CX, ArithOp::Add, 1, 2, r)), [0x7823_105B]);
        assert_eq!(
            words(|b| S::arith(b, &CX, ArithOp::Ann, 1, 2, r)),
            [0x7842_179E, 0x7803_F05E]
        );
        assert_eq!(words(|b| S::compare(b, &CX, CmpOp::Gt, 1, 2, r)), [0x7902_185A]);
        assert_eq!(words(|b| S::merge(b, &CX, 1, POp::Reg(2), 0)), [0x7880_105E]);
    }

    #[test]
    fn fused_forms() {
        let r = POp::Reg(3);
        assert_eq!(words(|b| S::fused(b, &CX, FusedOp::Fma, 1, 2, r)), [0x7903_105B]);
        assert_eq!(words(|b| D::fused(b, &CX, FusedOp::Fma, 1, 2, r)), [0x7923_105B]);
        assert_eq!(words(|b| S::fused(b, &CX, FusedOp::Fms, 1, 2, r)), [0x7943_105B]);
        assert_eq!(words(|b| D::fused(b, &CX, FusedOp::Fms, 1, 2, r)), [0x7963_105B]);
    }

    #[test]
    fn addresses_are_built_in_t8() {
        assert_eq!(
            words(|b| S::load(b, &CX, 1, &PMem::at(8, 0x40))),
            [0x6518_0040, 0x7800_C062]
        );
        let far = PMem {
            base: 4,
            index: PIndex::None,
            disp: 0x12340,
            class: DispClass::Dv,
        };
        assert_eq!(
            words(|b| S::load(b, &CX, 1, &far)),
            [0x3C18_0001, 0x3718_2340, 0x0098_C02D, 0x7800_C062]
        );
        let scaled = PMem {
            base: 4,
            index: PIndex::Reg { reg: 5, shift: 2 },
            disp: 0x20,
            class: DispClass::Dp,
        };
        assert_eq!(
            words(|b| S::load(b, &CX, 1, &scaled))[..3],
            [0x0005_C8B8, 0x0099_C82D, 0x6738_0020]
        );
    }

    #[test]
    fn shifts_and_conversions() {
        assert_eq!(words(|b| S::shift(b, &CX, ShiftOp::Shl, 1, 2, 3)), [0x7843_1049]);
        assert_eq!(words(|b| D::shift(b, &CX, ShiftOp::Sra, 1, 2, 3)), [0x7883_1049]);
        let zero = Rounding::Mode(RoundingMode::Zero);
        assert_eq!(words(|b| S::to_int(b, &CX, zero, 1, 2)), [0x7B22_105E]);
        assert_eq!(words(|b| D::from_int(b, &CX, 1, 2)), [0x7B3D_105E]);
        assert!(!S::rounds_directly(RoundingMode::Zero));
        assert!(!S::converts_directly(RoundingMode::Plus));
    }

    #[test]
    fn control_register() {
        assert_eq!(
            words(|b| S::set_mode(b, RoundingMode::Zero, false)),
            [0x3418_0001, 0x783E_C059]
        );
        assert_eq!(
            words(|b| S::set_mode(b, RoundingMode::Minus, true)),
            [0x3C18_0100, 0x3718_0003, 0x783E_C059]
        );
    }

    #[test]
    fn mask_branch_fills_delay_slot() {
        let mut b = CodeBuilder::new(16);
        let done = b.fresh_label();
        S::mask_branch(&mut b, &CX, MaskCheck::None, done);
        b.bind(done);
        let (code, _) = b.finish().unwrap();
        assert_eq!(&code[..4], &0x457F_0001u32.to_le_bytes());
        assert_eq!(&code[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn element_copy() {
        assert_eq!(
            words(|b| S::copy_elem(b, &PMem::at(8, 0x100), &PMem::at(8, 0x104))),
            [0x8D18_0100, 0xAD18_0104]
        );
    }
}
