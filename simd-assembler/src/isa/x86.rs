// simd-assembler/src/isa/x86.rs
// x86-64 byte encoding shared by the SSE4.1 and AVX2 encoders.

use crate::builder::{CodeBuilder, Label, PatchKind};
use crate::info::{CONSTS, FCTRL, SPILL};
use crate::inst::{MaskCheck, RoundingMode};
use crate::operand::Breg;

use super::{PIndex, PMem};

pub(super) const RBP: u8 = 5;
pub(super) const R14: u8 = 14;
pub(super) const R15: u8 = 15;

pub(super) fn base(reg: Breg) -> u8 {
    match reg {
        Breg::Reax => 0,
        Breg::Recx => 1,
        Breg::Redx => 2,
        Breg::Rebx => 3,
        Breg::Rebp => RBP,
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

/// Mandatory prefix (`pp` in VEX).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Pp {
    None,
    P66,
    PF3,
    PF2,
}

impl Pp {
    fn byte(self) -> Option<u8> {
        match self {
            Pp::None => None,
            Pp::P66 => Some(0x66),
            Pp::PF3 => Some(0xF3),
            Pp::PF2 => Some(0xF2),
        }
    }

    fn bits(self) -> u8 {
        match self {
            Pp::None => 0,
            Pp::P66 => 1,
            Pp::PF3 => 2,
            Pp::PF2 => 3,
        }
    }
}

/// Opcode map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Map {
    Base,
    M0F,
    M0F38,
    M0F3A,
}

impl Map {
    fn escape(self) -> &'static [u8] {
        match self {
            Map::Base => &[],
            Map::M0F => &[0x0F],
            Map::M0F38 => &[0x0F, 0x38],
            Map::M0F3A => &[0x0F, 0x3A],
        }
    }

    fn mmmmm(self) -> u8 {
        match self {
            Map::Base | Map::M0F => 1,
            Map::M0F38 => 2,
            Map::M0F3A => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct Op {
    pub pp: Pp,
    pub map: Map,
    pub code: u8,
    pub w: bool,
}

pub(super) const fn op(pp: Pp, map: Map, code: u8) -> Op {
    Op {
        pp,
        map,
        code,
        w: false,
    }
}

pub(super) const fn op_w(pp: Pp, map: Map, code: u8) -> Op {
    Op {
        pp,
        map,
        code,
        w: true,
    }
}

/// `ps` forms carry no prefix, `pd` forms carry 0x66.
pub(super) const fn packed(pd: bool, code: u8) -> Op {
    op(if pd { Pp::P66 } else { Pp::None }, Map::M0F, code)
}

#[derive(Clone, Copy, Debug)]
pub(super) enum Rm<'a> {
    Reg(u8),
    Mem(&'a PMem),
}

/// Legacy SSE or VEX-256 encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Flavor {
    Legacy,
    Vex256,
}

impl Rm<'_> {
    fn ext(&self) -> (u8, u8) {
        match self {
            Rm::Reg(r) => (0, r >> 3),
            Rm::Mem(m) => {
                let x = match m.index {
                    PIndex::None => 0,
                    PIndex::Reg { reg, .. } => reg >> 3,
                };
                (x, m.base >> 3)
            }
        }
    }
}

fn modrm(out: &mut Vec<u8>, reg: u8, rm: &Rm) {
    let reg = (reg & 7) << 3;
    let m = match rm {
        Rm::Reg(r) => {
            out.push(0xC0 | reg | (r & 7));
            return;
        }
        Rm::Mem(m) => m,
    };

    let base = m.base & 7;
    let disp = m.disp as i32;
    let (mode, width) = if disp == 0 && base != 5 {
        (0x00, 0)
    } else if (-128..128).contains(&disp) {
        (0x40, 1)
    } else {
        (0x80, 4)
    };

    match m.index {
        PIndex::None if base == 4 => {
            out.push(mode | reg | 4);
            out.push(0x24);
        }
        PIndex::None => out.push(mode | reg | base),
        PIndex::Reg { reg: index, shift } => {
            out.push(mode | reg | 4);
            out.push((shift << 6) | ((index & 7) << 3) | base);
        }
    }

    match width {
        1 => out.push(disp as i8 as u8),
        4 => out.extend_from_slice(&disp.to_le_bytes()),
        _ => {}
    }
}

/// Legacy encoding: `[pp] [REX] map opcode modrm [imm]`.
pub(super) fn legacy(b: &mut CodeBuilder, op: Op, reg: u8, rm: Rm, imm: &[u8]) {
    let mut out = Vec::with_capacity(12);
    if let Some(prefix) = op.pp.byte() {
        out.push(prefix);
    }
    let (x, bb) = rm.ext();
    let rex = ((op.w as u8) << 3) | ((reg >> 3) << 2) | (x << 1) | bb;
    if rex != 0 {
        out.push(0x40 | rex);
    }
    out.extend_from_slice(op.map.escape());
    out.push(op.code);
    modrm(&mut out, reg, &rm);
    out.extend_from_slice(imm);
    b.push_bytes(&out);
}

/// VEX encoding with 256-bit length; `vvvv` names the extra source.
pub(super) fn vex(b: &mut CodeBuilder, op: Op, reg: u8, vvvv: u8, rm: Rm, imm: &[u8]) {
    let mut out = Vec::with_capacity(12);
    let (x, bb) = rm.ext();
    let r = reg >> 3;
    let tail = ((!vvvv & 0xF) << 3) | 0x04 | op.pp.bits();
    if x == 0 && bb == 0 && !op.w && op.map == Map::M0F {
        out.push(0xC5);
        out.push(((r ^ 1) << 7) | tail);
    } else {
        out.push(0xC4);
        out.push(((r ^ 1) << 7) | ((x ^ 1) << 6) | ((bb ^ 1) << 5) | op.map.mmmmm());
        out.push(((op.w as u8) << 7) | tail);
    }
    out.push(op.code);
    modrm(&mut out, reg, &rm);
    out.extend_from_slice(imm);
    b.push_bytes(&out);
}

/// `d = s op rm`; legacy forms require `d == s`.
pub(super) fn binop(b: &mut CodeBuilder, f: Flavor, op: Op, d: u8, s: u8, rm: Rm, imm: &[u8]) {
    match f {
        Flavor::Legacy => {
            debug_assert_eq!(d, s);
            legacy(b, op, d, rm, imm)
        }
        Flavor::Vex256 => vex(b, op, d, s, rm, imm),
    }
}

/// `d = op(rm)`.
pub(super) fn unop(b: &mut CodeBuilder, f: Flavor, op: Op, d: u8, rm: Rm, imm: &[u8]) {
    match f {
        Flavor::Legacy => legacy(b, op, d, rm, imm),
        Flavor::Vex256 => vex(b, op, d, 0, rm, imm),
    }
}

pub(super) fn mov_vec(b: &mut CodeBuilder, f: Flavor, pd: bool, d: u8, s: u8) {
    unop(b, f, packed(pd, 0x28), d, Rm::Reg(s), &[]);
}

pub(super) fn load_vec(b: &mut CodeBuilder, f: Flavor, pd: bool, d: u8, m: &PMem) {
    unop(b, f, packed(pd, 0x28), d, Rm::Mem(m), &[]);
}

pub(super) fn store_vec(b: &mut CodeBuilder, f: Flavor, pd: bool, s: u8, m: &PMem) {
    unop(b, f, packed(pd, 0x29), s, Rm::Mem(m), &[]);
}

pub(super) fn spill() -> PMem {
    PMem::at(RBP, SPILL)
}

/// 1.0 splat for the pair member at byte `offset`.
pub(super) fn one(offset: u32) -> PMem {
    PMem::at(RBP, CONSTS + offset)
}

/// Element copy through r15.
pub(super) fn copy_elem(b: &mut CodeBuilder, wide: bool, from: &PMem, to: &PMem) {
    let load = if wide {
        op_w(Pp::None, Map::Base, 0x8B)
    } else {
        op(Pp::None, Map::Base, 0x8B)
    };
    let store = Op { code: 0x89, ..load };
    legacy(b, load, R15, Rm::Mem(from), &[]);
    legacy(b, store, R15, Rm::Mem(to), &[]);
}

/// Packed fp64 to int64, one lane at a time through the spill slot.
pub(super) fn fp64_to_int(b: &mut CodeBuilder, f: Flavor, lanes: u32, truncate: bool, d: u8, s: u8) {
    let slot = spill();
    store_vec(b, f, true, s, &slot);
    let cvt = op_w(Pp::PF2, Map::M0F, if truncate { 0x2C } else { 0x2D });
    let mov = op_w(Pp::None, Map::Base, 0x89);
    for lane in 0..lanes {
        let at = slot.offset(lane * 8);
        legacy(b, cvt, R15, Rm::Mem(&at), &[]);
        legacy(b, mov, R15, Rm::Mem(&at), &[]);
    }
    load_vec(b, f, true, d, &slot);
}

/// Packed int64 to fp64, one lane at a time through the spill slot.
pub(super) fn int64_to_fp(b: &mut CodeBuilder, f: Flavor, lanes: u32, d: u8, s: u8) {
    let slot = spill();
    store_vec(b, f, true, s, &slot);
    let cvt = op_w(Pp::PF2, Map::M0F, 0x2A);
    let movsd = op(Pp::PF2, Map::M0F, 0x11);
    for lane in 0..lanes {
        let at = slot.offset(lane * 8);
        legacy(b, cvt, d, Rm::Mem(&at), &[]);
        legacy(b, movsd, d, Rm::Mem(&at), &[]);
    }
    load_vec(b, f, true, d, &slot);
}

/// Arithmetic right shift of 64-bit lanes, in memory.
pub(super) fn sra64(b: &mut CodeBuilder, f: Flavor, lanes: u32, d: u8, s: u8, imm: u8) {
    let slot = spill();
    store_vec(b, f, true, s, &slot);
    let sar = op_w(Pp::None, Map::Base, 0xC1);
    for lane in 0..lanes {
        legacy(b, sar, 7, Rm::Mem(&slot.offset(lane * 8)), &[imm]);
    }
    load_vec(b, f, true, d, &slot);
}

pub(super) fn control_word(mode: RoundingMode, flush: bool) -> u32 {
    let rc = match mode {
        RoundingMode::Nearest => 0,
        RoundingMode::Minus => 1,
        RoundingMode::Plus => 2,
        RoundingMode::Zero => 3,
    };
    0x1F80 | (rc << 13) | if flush { 0x8040 } else { 0 }
}

/// `ldmxcsr` from the info block control word table.
pub(super) fn set_mode(b: &mut CodeBuilder, mode: RoundingMode) {
    let slot = PMem::at(RBP, FCTRL + mode.slot() * 4);
    legacy(b, op(Pp::None, Map::M0F, 0xAE), 2, Rm::Mem(&slot), &[]);
}

/// `roundps`/`roundpd` immediate.
pub(super) fn round_imm(mode: Option<RoundingMode>) -> u8 {
    match mode {
        Some(RoundingMode::Nearest) => 0,
        Some(RoundingMode::Minus) => 1,
        Some(RoundingMode::Plus) => 2,
        Some(RoundingMode::Zero) => 3,
        None => 4,
    }
}

/// Member 0 lands in r15d; later members go through r14d and fold in.
pub(super) fn mask_member(b: &mut CodeBuilder, f: Flavor, pd: bool, member: u8, s: u8, check: MaskCheck) {
    let movmsk = packed(pd, 0x50);
    let dst = if member == 0 { R15 } else { R14 };
    unop(b, f, movmsk, dst, Rm::Reg(s), &[]);
    if member > 0 {
        let code = match check {
            MaskCheck::None => 0x09,
            MaskCheck::Full => 0x21,
        };
        legacy(b, op(Pp::None, Map::Base, code), R14, Rm::Reg(R15), &[]);
    }
}

/// `cmp r15d, expected; je target`.
pub(super) fn mask_branch(b: &mut CodeBuilder, lanes: u32, check: MaskCheck, target: Label) {
    let expected = match check {
        MaskCheck::None => 0,
        MaskCheck::Full => (1u32 << lanes) - 1,
    };
    if expected < 0x80 {
        legacy(b, op(Pp::None, Map::Base, 0x83), 7, Rm::Reg(R15), &[expected as u8]);
    } else {
        legacy(
            b,
            op(Pp::None, Map::Base, 0x81),
            7,
            Rm::Reg(R15),
            &expected.to_le_bytes(),
        );
    }
    b.push_bytes(&[0x0F, 0x84]);
    b.emit_branch(PatchKind::X86Rel32, target);
}

pub(super) fn jump(b: &mut CodeBuilder, target: Label) {
    b.push_bytes(&[0xE9]);
    b.emit_branch(PatchKind::X86Rel32, target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::DispClass;

    fn mem(base: u8, index: PIndex, disp: u32) -> PMem {
        PMem {
            base,
            index,
            disp,
            class: DispClass::Dp,
        }
    }

    fn bytes(f: impl FnOnce(&mut CodeBuilder)) -> Vec<u8> {
        let mut b = CodeBuilder::new(16);
        f(&mut b);
        b.code().to_vec()
    }

    #[test]
    fn addressing_forms() {
        // movaps xmm0, [rbp]
        assert_eq!(
            bytes(|b| load_vec(b, Flavor::Legacy, false, 0, &mem(5, PIndex::None, 0))),
            [0x0F, 0x28, 0x45, 0x00]
        );
        // movaps xmm0, [r13]
        assert_eq!(
            bytes(|b| load_vec(b, Flavor::Legacy, false, 0, &mem(13, PIndex::None, 0))),
            [0x41, 0x0F, 0x28, 0x45, 0x00]
        );
        // movaps xmm9, [rbx + 0x1000]
        assert_eq!(
            bytes(|b| load_vec(b, Flavor::Legacy, false, 9, &mem(3, PIndex::None, 0x1000))),
            [0x44, 0x0F, 0x28, 0x8B, 0x00, 0x10, 0x00, 0x00]
        );
        // movapd [r12 + 0x10], xmm10
        assert_eq!(
            bytes(|b| store_vec(b, Flavor::Legacy, true, 10, &mem(12, PIndex::None, 0x10))),
            [0x66, 0x45, 0x0F, 0x29, 0x54, 0x24, 0x10]
        );
        // movaps xmm3, [rax + rcx]
        let plain = PIndex::Reg { reg: 1, shift: 0 };
        assert_eq!(
            bytes(|b| load_vec(b, Flavor::Legacy, false, 3, &mem(0, plain, 0))),
            [0x0F, 0x28, 0x1C, 0x08]
        );
        // movaps xmm3, [rax + rcx*4 + 0x20]
        let scaled = PIndex::Reg { reg: 1, shift: 2 };
        assert_eq!(
            bytes(|b| load_vec(b, Flavor::Legacy, false, 3, &mem(0, scaled, 0x20))),
            [0x0F, 0x28, 0x5C, 0x88, 0x20]
        );
        // movapd xmm14, [r13 + r9*8 + 0x20]
        let scaled = PIndex::Reg { reg: 9, shift: 3 };
        assert_eq!(
            bytes(|b| load_vec(b, Flavor::Legacy, true, 14, &mem(13, scaled, 0x20))),
            [0x66, 0x47, 0x0F, 0x28, 0x74, 0xCD, 0x20]
        );
    }

    #[test]
    fn vex_forms() {
        // vmovaps ymm1, [rbp + 0x40]
        assert_eq!(
            bytes(|b| load_vec(b, Flavor::Vex256, false, 1, &mem(5, PIndex::None, 0x40))),
            [0xC5, 0xFC, 0x28, 0x4D, 0x40]
        );
        // vmovapd [r12 + 0x20], ymm9
        assert_eq!(
            bytes(|b| store_vec(b, Flavor::Vex256, true, 9, &mem(12, PIndex::None, 0x20))),
            [0xC4, 0x41, 0x7D, 0x29, 0x4C, 0x24, 0x20]
        );
        // vaddps ymm9, ymm10, ymm11
        assert_eq!(
            bytes(|b| binop(b, Flavor::Vex256, packed(false, 0x58), 9, 10, Rm::Reg(11), &[])),
            [0xC4, 0x41, 0x2C, 0x58, 0xCB]
        );
    }

    #[test]
    fn gpr_helpers() {
        let from = mem(5, PIndex::None, 0x40);
        let to = mem(5, PIndex::None, 0x80);
        assert_eq!(
            bytes(|b| copy_elem(b, false, &from, &to)),
            [0x44, 0x8B, 0x7D, 0x40, 0x44, 0x89, 0xBD, 0x80, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            bytes(|b| copy_elem(b, true, &from, &to)),
            [0x4C, 0x8B, 0x7D, 0x40, 0x4C, 0x89, 0xBD, 0x80, 0x00, 0x00, 0x00]
        );
        // ldmxcsr [rbp + 8]
        assert_eq!(bytes(|b| set_mode(b, RoundingMode::Plus)), [0x0F, 0xAE, 0x55, 0x08]);
    }

    #[test]
    fn fp64_lane_fallbacks() {
        let code = bytes(|b| fp64_to_int(b, Flavor::Legacy, 2, true, 1, 1));
        // movapd [rbp+0x40], xmm1
        assert_eq!(&code[..5], &[0x66, 0x0F, 0x29, 0x4D, 0x40]);
        // cvttsd2si r15, [rbp+0x40]; mov [rbp+0x40], r15
        assert_eq!(&code[5..11], &[0xF2, 0x4C, 0x0F, 0x2C, 0x7D, 0x40]);
        assert_eq!(&code[11..15], &[0x4C, 0x89, 0x7D, 0x40]);
        // second lane at 0x48
        assert_eq!(&code[15..21], &[0xF2, 0x4C, 0x0F, 0x2C, 0x7D, 0x48]);
        // movapd xmm1, [rbp+0x40]
        assert_eq!(&code[code.len() - 5..], &[0x66, 0x0F, 0x28, 0x4D, 0x40]);

        let code = bytes(|b| int64_to_fp(b, Flavor::Legacy, 2, 1, 1));
        assert_eq!(&code[5..11], &[0xF2, 0x48, 0x0F, 0x2A, 0x4D, 0x40]);
        assert_eq!(&code[11..16], &[0xF2, 0x0F, 0x11, 0x4D, 0x40]);

        let code = bytes(|b| sra64(b, Flavor::Legacy, 2, 1, 1, 3));
        assert_eq!(&code[5..10], &[0x48, 0xC1, 0x7D, 0x40, 0x03]);
    }

    #[test]
    fn mask_sequences() {
        assert_eq!(
            bytes(|b| mask_member(b, Flavor::Legacy, false, 0, 3, MaskCheck::None)),
            [0x44, 0x0F, 0x50, 0xFB]
        );
        assert_eq!(
            bytes(|b| mask_member(b, Flavor::Vex256, true, 1, 11, MaskCheck::None)),
            [0xC4, 0x41, 0x7D, 0x50, 0xF3, 0x45, 0x09, 0xF7]
        );
        assert_eq!(
            bytes(|b| mask_member(b, Flavor::Vex256, false, 1, 8, MaskCheck::Full)),
            [0xC4, 0x41, 0x7C, 0x50, 0xF0, 0x45, 0x21, 0xF7]
        );

        let mut b = CodeBuilder::new(16);
        let l = b.fresh_label();
        mask_branch(&mut b, 8, MaskCheck::Full, l);
        b.bind(l);
        let (code, _) = b.finish().unwrap();
        assert_eq!(
            code,
            [0x41, 0x81, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x0F, 0x84, 0x00, 0x00, 0x00, 0x00]
        );

        let mut b = CodeBuilder::new(16);
        let l = b.fresh_label();
        mask_branch(&mut b, 4, MaskCheck::Full, l);
        b.bind(l);
        let (code, _) = b.finish().unwrap();
        assert_eq!(&code[..4], &[0x41, 0x83, 0xFF, 0x0F]);
    }

    #[test]
    fn control_words() {
        assert_eq!(control_word(RoundingMode::Nearest, false), 0x1F80);
        assert_eq!(control_word(RoundingMode::Zero, false), 0x7F80);
        assert_eq!(control_word(RoundingMode::Minus, true), 0xBFC0);
    }
}
