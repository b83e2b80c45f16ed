// simd-assembler/src/isa/avx2.rs
// AVX2, 256-bit, VEX three-operand forms.

use core::marker::PhantomData;

use crate::builder::{CodeBuilder, Label};
use crate::inst::{ArithOp, CmpOp, FusedOp, MaskCheck, Rounding, RoundingMode, ShiftOp, UnaryOp};
use crate::operand::Breg;
use crate::profile::{Arch, Element, ElementWidth};

use super::sse::{arith_op, cmp_imm, shift_op};
use super::x86::{self, op, packed, Flavor, Map, Pp, Rm};
use super::{Chunk, EncodeArith, EncodeCompare, EncodeConvert, EncodeMove, EncodeShift, Isa, POp, PMem};

const F: Flavor = Flavor::Vex256;

/// AVX2 encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Avx2<E>(PhantomData<E>);

impl<E: Element> Avx2<E> {
    const PD: bool = matches!(E::WIDTH, ElementWidth::W64);
    const LANES: u32 = 32 / E::WIDTH.bytes();

    fn src(s: &POp) -> Rm<'_> {
        match s {
            POp::Reg(r) => Rm::Reg(*r),
            POp::Mem(m) => Rm::Mem(m),
        }
    }
}

impl<E: Element> EncodeMove for Avx2<E> {
    fn mov(b: &mut CodeBuilder, _cx: &Chunk, d: u8, s: u8) {
        x86::mov_vec(b, F, Self::PD, d, s);
    }

    fn load(b: &mut CodeBuilder, _cx: &Chunk, d: u8, m: &PMem) {
        x86::load_vec(b, F, Self::PD, d, m);
    }

    fn store(b: &mut CodeBuilder, _cx: &Chunk, s: u8, m: &PMem) {
        x86::store_vec(b, F, Self::PD, s, m);
    }

    fn copy_elem(b: &mut CodeBuilder, from: &PMem, to: &PMem) {
        x86::copy_elem(b, Self::PD, from, to);
    }
}

impl<E: Element> EncodeArith for Avx2<E> {
    // No packed double estimate; `unary` divides.
    const ESTIMATES: bool = !Self::PD;

    fn arith(b: &mut CodeBuilder, _cx: &Chunk, op: ArithOp, d: u8, s: u8, t: POp) {
        x86::binop(b, F, arith_op(op, Self::PD), d, s, Self::src(&t), &[]);
    }

    fn unary(b: &mut CodeBuilder, cx: &Chunk, op: UnaryOp, d: u8, s: POp) {
        let div = packed(true, 0x5E);
        match (op, Self::PD) {
            (UnaryOp::Sqr, pd) => x86::unop(b, F, packed(pd, 0x51), d, Self::src(&s), &[]),
            (UnaryOp::Rce, false) => x86::unop(b, F, packed(false, 0x53), d, Self::src(&s), &[]),
            (UnaryOp::Rse, false) => x86::unop(b, F, packed(false, 0x52), d, Self::src(&s), &[]),
            (UnaryOp::Rce, true) => {
                let slot = x86::spill();
                let src = match s {
                    POp::Reg(r) if r == d => {
                        x86::store_vec(b, F, true, r, &slot);
                        POp::Mem(slot)
                    }
                    other => other,
                };
                x86::load_vec(b, F, true, d, &x86::one(cx.offset));
                x86::binop(b, F, div, d, d, Self::src(&src), &[]);
            }
            (UnaryOp::Rse, true) => {
                let slot = x86::spill();
                x86::unop(b, F, packed(true, 0x51), d, Self::src(&s), &[]);
                x86::store_vec(b, F, true, d, &slot);
                x86::load_vec(b, F, true, d, &x86::one(cx.offset));
                x86::binop(b, F, div, d, d, Rm::Mem(&slot), &[]);
            }
        }
    }

    fn fused(b: &mut CodeBuilder, _cx: &Chunk, op: FusedOp, g: u8, s: u8, t: POp) {
        // vfmadd231 / vfnmadd231: g = ±(s * t) + g.
        let code = match op {
            FusedOp::Fma => 0xB8,
            FusedOp::Fms => 0xBC,
        };
        let fma = if Self::PD {
            x86::op_w(Pp::P66, Map::M0F38, code)
        } else {
            x86::op(Pp::P66, Map::M0F38, code)
        };
        x86::vex(b, fma, g, s, Self::src(&t), &[]);
    }
}

impl<E: Element> EncodeCompare for Avx2<E> {
    fn compare(b: &mut CodeBuilder, _cx: &Chunk, op: CmpOp, d: u8, s: u8, t: POp) {
        x86::binop(b, F, packed(Self::PD, 0xC2), d, s, Self::src(&t), &[cmp_imm(op)]);
    }

    fn merge(b: &mut CodeBuilder, _cx: &Chunk, g: u8, s: POp, mask: u8) {
        let code = if Self::PD { 0x4B } else { 0x4A };
        x86::vex(b, op(Pp::P66, Map::M0F3A, code), g, g, Self::src(&s), &[mask << 4]);
    }

    fn mask_member(b: &mut CodeBuilder, cx: &Chunk, s: u8, check: MaskCheck) {
        x86::mask_member(b, F, Self::PD, cx.member, s, check);
    }

    fn mask_branch(b: &mut CodeBuilder, _cx: &Chunk, check: MaskCheck, target: Label) {
        x86::mask_branch(b, Self::LANES, check, target);
    }
}

impl<E: Element> EncodeConvert for Avx2<E> {
    fn rounds_directly(_mode: RoundingMode) -> bool {
        true
    }

    fn converts_directly(_mode: RoundingMode) -> bool {
        true
    }

    fn round(b: &mut CodeBuilder, _cx: &Chunk, mode: Rounding, d: u8, s: u8) {
        let mode = match mode {
            Rounding::Current => None,
            Rounding::Mode(m) => Some(m),
        };
        let code = if Self::PD { 0x09 } else { 0x08 };
        let imm = x86::round_imm(mode);
        x86::unop(b, F, op(Pp::P66, Map::M0F3A, code), d, Rm::Reg(s), &[imm]);
    }

    fn to_int(b: &mut CodeBuilder, cx: &Chunk, mode: Rounding, d: u8, s: u8) {
        let (src, truncate) = match mode {
            Rounding::Mode(RoundingMode::Zero) => (s, true),
            Rounding::Current => (s, false),
            Rounding::Mode(_) => {
                Self::round(b, cx, mode, d, s);
                (d, true)
            }
        };
        if Self::PD {
            x86::fp64_to_int(b, F, Self::LANES, truncate, d, src);
        } else {
            let pp = if truncate { Pp::PF3 } else { Pp::P66 };
            x86::unop(b, F, op(pp, Map::M0F, 0x5B), d, Rm::Reg(src), &[]);
        }
    }

    fn from_int(b: &mut CodeBuilder, _cx: &Chunk, d: u8, s: u8) {
        if Self::PD {
            x86::int64_to_fp(b, F, Self::LANES, d, s);
        } else {
            x86::unop(b, F, op(Pp::None, Map::M0F, 0x5B), d, Rm::Reg(s), &[]);
        }
    }

    fn control_word(mode: RoundingMode, flush: bool) -> u32 {
        x86::control_word(mode, flush)
    }

    fn set_mode(b: &mut CodeBuilder, mode: RoundingMode, _flush: bool) {
        x86::set_mode(b, mode);
    }
}

impl<E: Element> EncodeShift for Avx2<E> {
    fn shift(b: &mut CodeBuilder, _cx: &Chunk, op: ShiftOp, d: u8, s: u8, imm: u8) {
        if Self::PD && op == ShiftOp::Sra {
            x86::sra64(b, F, Self::LANES, d, s, imm);
            return;
        }
        // The group opcode takes the destination in vvvv and the /digit in reg.
        let (group, digit) = shift_op(op, Self::PD);
        x86::vex(b, group, digit, d, Rm::Reg(s), &[imm]);
    }
}

impl<E: Element> Isa for Avx2<E> {
    const ARCH: Arch = Arch::X64;
    const NATIVE_BYTES: u32 = 32;
    const ELEMENT: ElementWidth = E::WIDTH;

    fn base(reg: Breg) -> u8 {
        x86::base(reg)
    }

    fn jump(b: &mut CodeBuilder, target: Label) {
        x86::jump(b, target);
    }
}
