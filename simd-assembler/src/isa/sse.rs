// simd-assembler/src/isa/sse.rs
// SSE4.1, 128-bit, two-operand forms.

use core::marker::PhantomData;

use crate::builder::{CodeBuilder, Label};
use crate::inst::{ArithOp, CmpOp, FusedOp, MaskCheck, Rounding, RoundingMode, ShiftOp, UnaryOp};
use crate::operand::Breg;
use crate::profile::{Arch, Element, ElementWidth};

use super::x86::{self, op, packed, Flavor, Map, Op, Pp, Rm};
use super::{Chunk, EncodeArith, EncodeCompare, EncodeConvert, EncodeMove, EncodeShift, Isa, POp, PMem};

const F: Flavor = Flavor::Legacy;

/// SSE4.1 encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sse<E>(PhantomData<E>);

impl<E: Element> Sse<E> {
    const PD: bool = matches!(E::WIDTH, ElementWidth::W64);
    const LANES: u32 = 16 / E::WIDTH.bytes();

    /// `d = s op t` through a two-operand instruction; spills `t` when it
    /// aliases `d` and the operation does not commute.
    fn two_operand(b: &mut CodeBuilder, op: Op, commutative: bool, d: u8, s: u8, t: POp, imm: &[u8]) {
        match t {
            POp::Reg(t) if d == s => x86::legacy(b, op, d, Rm::Reg(t), imm),
            POp::Reg(t) if d == t && commutative => x86::legacy(b, op, d, Rm::Reg(s), imm),
            POp::Reg(t) if d == t => {
                let slot = x86::spill();
                x86::store_vec(b, F, Self::PD, t, &slot);
                x86::mov_vec(b, F, Self::PD, d, s);
                x86::legacy(b, op, d, Rm::Mem(&slot), imm);
            }
            POp::Reg(t) => {
                x86::mov_vec(b, F, Self::PD, d, s);
                x86::legacy(b, op, d, Rm::Reg(t), imm);
            }
            POp::Mem(m) => {
                if d != s {
                    x86::mov_vec(b, F, Self::PD, d, s);
                }
                x86::legacy(b, op, d, Rm::Mem(&m), imm);
            }
        }
    }

    fn src(s: &POp) -> Rm<'_> {
        match s {
            POp::Reg(r) => Rm::Reg(*r),
            POp::Mem(m) => Rm::Mem(m),
        }
    }
}

pub(super) fn arith_op(op: ArithOp, pd: bool) -> Op {
    let int = |code32: u8, code64: u8| x86::op(Pp::P66, Map::M0F, if pd { code64 } else { code32 });
    match op {
        ArithOp::And => packed(pd, 0x54),
        ArithOp::Ann => packed(pd, 0x55),
        ArithOp::Orr => packed(pd, 0x56),
        ArithOp::Xor => packed(pd, 0x57),
        ArithOp::Add => packed(pd, 0x58),
        ArithOp::Mul => packed(pd, 0x59),
        ArithOp::Sub => packed(pd, 0x5C),
        ArithOp::Min => packed(pd, 0x5D),
        ArithOp::Div => packed(pd, 0x5E),
        ArithOp::Max => packed(pd, 0x5F),
        ArithOp::AddInt => int(0xFE, 0xD4),
        ArithOp::SubInt => int(0xFA, 0xFB),
    }
}

pub(super) fn cmp_imm(op: CmpOp) -> u8 {
    match op {
        CmpOp::Eq => 0,
        CmpOp::Lt => 1,
        CmpOp::Le => 2,
        CmpOp::Ne => 4,
        CmpOp::Ge => 5,
        CmpOp::Gt => 6,
    }
}

/// Shift group opcode and `/digit`.
pub(super) fn shift_op(op: ShiftOp, pd: bool) -> (Op, u8) {
    let code = if pd { 0x73 } else { 0x72 };
    let digit = match op {
        ShiftOp::Shl => 6,
        ShiftOp::Shr => 2,
        ShiftOp::Sra => 4,
    };
    (x86::op(Pp::P66, Map::M0F, code), digit)
}

impl<E: Element> EncodeMove for Sse<E> {
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

impl<E: Element> EncodeArith for Sse<E> {
    const FUSES: bool = false;
    const ESTIMATES: bool = !Self::PD;

    fn arith(b: &mut CodeBuilder, _cx: &Chunk, op: ArithOp, d: u8, s: u8, t: POp) {
        Self::two_operand(b, arith_op(op, Self::PD), op.commutative(), d, s, t, &[]);
    }

    fn unary(b: &mut CodeBuilder, cx: &Chunk, op: UnaryOp, d: u8, s: POp) {
        match (op, Self::PD) {
            (UnaryOp::Sqr, pd) => x86::legacy(b, packed(pd, 0x51), d, Self::src(&s), &[]),
            (UnaryOp::Rce, false) => x86::legacy(b, packed(false, 0x53), d, Self::src(&s), &[]),
            (UnaryOp::Rse, false) => x86::legacy(b, packed(false, 0x52), d, Self::src(&s), &[]),
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
                x86::legacy(b, packed(true, 0x5E), d, Self::src(&src), &[]);
            }
            (UnaryOp::Rse, true) => {
                let slot = x86::spill();
                x86::legacy(b, packed(true, 0x51), d, Self::src(&s), &[]);
                x86::store_vec(b, F, true, d, &slot);
                x86::load_vec(b, F, true, d, &x86::one(cx.offset));
                x86::legacy(b, packed(true, 0x5E), d, Rm::Mem(&slot), &[]);
            }
        }
    }

    /// Multiply then add, rounding twice. The old accumulator goes to the
    /// spill area, the product of a subtract to the slot after it.
    fn fused(b: &mut CodeBuilder, _cx: &Chunk, op: FusedOp, g: u8, s: u8, t: POp) {
        let acc = x86::spill();
        x86::store_vec(b, F, Self::PD, g, &acc);
        let t = match t {
            POp::Reg(r) if r == g => POp::Mem(acc),
            other => other,
        };
        if s != g {
            x86::mov_vec(b, F, Self::PD, g, s);
        }
        x86::legacy(b, arith_op(ArithOp::Mul, Self::PD), g, Self::src(&t), &[]);
        match op {
            FusedOp::Fma => x86::legacy(b, arith_op(ArithOp::Add, Self::PD), g, Rm::Mem(&acc), &[]),
            FusedOp::Fms => {
                let prod = acc.offset(16);
                x86::store_vec(b, F, Self::PD, g, &prod);
                x86::load_vec(b, F, Self::PD, g, &acc);
                x86::legacy(b, arith_op(ArithOp::Sub, Self::PD), g, Rm::Mem(&prod), &[]);
            }
        }
    }
}

impl<E: Element> EncodeCompare for Sse<E> {
    fn compare(b: &mut CodeBuilder, _cx: &Chunk, op: CmpOp, d: u8, s: u8, t: POp) {
        let commutative = matches!(op, CmpOp::Eq | CmpOp::Ne);
        Self::two_operand(b, packed(Self::PD, 0xC2), commutative, d, s, t, &[cmp_imm(op)]);
    }

    fn merge(b: &mut CodeBuilder, _cx: &Chunk, g: u8, s: POp, mask: u8) {
        // blendv reads its mask from xmm0 implicitly.
        debug_assert_eq!(mask, 0);
        let code = if Self::PD { 0x15 } else { 0x14 };
        x86::legacy(b, op(Pp::P66, Map::M0F38, code), g, Self::src(&s), &[]);
    }

    fn mask_member(b: &mut CodeBuilder, cx: &Chunk, s: u8, check: MaskCheck) {
        x86::mask_member(b, F, Self::PD, cx.member, s, check);
    }

    fn mask_branch(b: &mut CodeBuilder, _cx: &Chunk, check: MaskCheck, target: Label) {
        x86::mask_branch(b, Self::LANES, check, target);
    }
}

impl<E: Element> EncodeConvert for Sse<E> {
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
        x86::legacy(b, op(Pp::P66, Map::M0F3A, code), d, Rm::Reg(s), &[imm]);
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
            x86::legacy(b, op(pp, Map::M0F, 0x5B), d, Rm::Reg(src), &[]);
        }
    }

    fn from_int(b: &mut CodeBuilder, _cx: &Chunk, d: u8, s: u8) {
        if Self::PD {
            x86::int64_to_fp(b, F, Self::LANES, d, s);
        } else {
            x86::legacy(b, op(Pp::None, Map::M0F, 0x5B), d, Rm::Reg(s), &[]);
        }
    }

    fn control_word(mode: RoundingMode, flush: bool) -> u32 {
        x86::control_word(mode, flush)
    }

    fn set_mode(b: &mut CodeBuilder, mode: RoundingMode, _flush: bool) {
        x86::set_mode(b, mode);
    }
}

impl<E: Element> EncodeShift for Sse<E> {
    fn shift(b: &mut CodeBuilder, _cx: &Chunk, op: ShiftOp, d: u8, s: u8, imm: u8) {
        if Self::PD && op == ShiftOp::Sra {
            x86::sra64(b, F, Self::LANES, d, s, imm);
            return;
        }
        if d != s {
            x86::mov_vec(b, F, Self::PD, d, s);
        }
        let (group, digit) = shift_op(op, Self::PD);
        x86::legacy(b, group, digit, Rm::Reg(d), &[imm]);
    }
}

impl<E: Element> Isa for Sse<E> {
    const ARCH: Arch = Arch::X64;
    const NATIVE_BYTES: u32 = 16;
    const ELEMENT: ElementWidth = E::WIDTH;

    fn base(reg: Breg) -> u8 {
        x86::base(reg)
    }

    fn jump(b: &mut CodeBuilder, target: Label) {
        x86::jump(b, target);
    }
}
