//! Kernel front end.
//!
//! [`Asm`] is the only way to produce code. Each method takes logical
//! registers and memory operands, records one [`Inst`] and replays it once
//! per pair member of the profile: member `k` uses physical register
//! `logical + k * STRIDE` and displacement `disp + k * NATIVE_BYTES`. The
//! replay is uniform, so a logical operation never mixes paired and
//! unpaired forms. Element copies, mode switches and plain jumps touch no
//! vector register and run once; their expansion has a single span. A mask
//! jump folds every member and branches after the last one.
//!
//! [`Compat`] selects exact reciprocals and the rounding of unfused
//! multiply-adds; [`Asm::new`] takes it from the cargo features.
//!
//! ```
//! use simd_assembler::{xregs, Asm, Breg, Disp, Mem, A64_256, Fp32};
//!
//! let mut asm = Asm::<A64_256<Fp32>>::new();
//! xregs!(A64_256<Fp32>; xa = 1, xb = 2);
//! asm.ld(xa, Mem::plain(Breg::Reax, Disp::dp::<0x00>()));
//! asm.ld(xb, Mem::plain(Breg::Reax, Disp::dp::<0x20>()));
//! asm.add(xa, xb);
//! asm.st(xa, Mem::plain(Breg::Recx, Disp::ZERO));
//! let kernel = asm.finish().unwrap();
//! assert!(kernel.expansions().iter().all(|e| e.chunks.len() == 2));
//! ```

use core::fmt::{self, Write as _};
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use tracing::debug;

use crate::builder::{ChunkSpan, CodeBuilder, Expansion, Label};
use crate::error::EmitError;
use crate::info::InfoLayout;
use crate::inst::{ArithOp, CmpOp, FusedOp, Inst, MaskCheck, Operand, Rounding, RoundingMode, ShiftOp, UnaryOp, Vr};
use crate::isa::{Chunk, EncodeArith, EncodeCompare, EncodeConvert, EncodeMove, EncodeShift, Isa, PIndex, PMem, POp};
use crate::operand::{AddrMode, Mem, Src, Xreg};
use crate::profile::{Arch, Compat, ElementWidth, Target, FLUSH_ZERO};

fn operand<T: Target>(src: Src<T>) -> Operand {
    match src {
        Src::Reg(reg) => Operand::Reg(reg.index()),
        Src::Mem(mem) => Operand::Mem(mem),
    }
}

/// Assembler for one kernel of profile `T`.
#[derive(Debug)]
pub struct Asm<T: Target> {
    b: CodeBuilder,
    program: Vec<Inst>,
    modes: Vec<RoundingMode>,
    layout: InfoLayout,
    compat: Compat,
    _profile: PhantomData<T>,
}

impl<T: Target> Default for Asm<T> {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! binary_ops {
    ($($(#[$doc:meta])* $name:ident, $name3:ident => $op:ident;)*) => {$(
        $(#[$doc])*
        pub fn $name(&mut self, g: Xreg<T>, s: impl Into<Src<T>>) {
            self.$name3(g, g, s);
        }

        #[doc = concat!("Three-operand form of [`Asm::", stringify!($name), "`]: `d = s op t`.")]
        pub fn $name3(&mut self, d: Xreg<T>, s: Xreg<T>, t: impl Into<Src<T>>) {
            self.emit(Inst::Arith {
                op: ArithOp::$op,
                d: d.index(),
                s: s.index(),
                t: operand(t.into()),
            });
        }
    )*};
}

macro_rules! compare_ops {
    ($($(#[$doc:meta])* $name:ident, $name3:ident => $op:ident;)*) => {$(
        $(#[$doc])*
        pub fn $name(&mut self, g: Xreg<T>, s: impl Into<Src<T>>) {
            self.$name3(g, g, s);
        }

        #[doc = concat!("Three-operand form of [`Asm::", stringify!($name), "`].")]
        pub fn $name3(&mut self, d: Xreg<T>, s: Xreg<T>, t: impl Into<Src<T>>) {
            self.emit(Inst::Compare {
                op: CmpOp::$op,
                d: d.index(),
                s: s.index(),
                t: operand(t.into()),
            });
        }
    )*};
}

macro_rules! horizontal_ops {
    ($($(#[$doc:meta])* $pair:ident, $pair3:ident, $full:ident => $op:ident;)*) => {$(
        $(#[$doc])*
        pub fn $pair(&mut self, g: Xreg<T>, s: Xreg<T>) {
            self.$pair3(g, g, s);
        }

        #[doc = concat!("Three-operand form of [`Asm::", stringify!($pair), "`].")]
        pub fn $pair3(&mut self, d: Xreg<T>, s: Xreg<T>, t: Xreg<T>) {
            self.pairwise(ArithOp::$op, d, s, t);
        }

        #[doc = concat!("Every lane of `d` set to the full `", stringify!($op), "` reduction of `s`.")]
        pub fn $full(&mut self, d: Xreg<T>, s: Xreg<T>) {
            self.$pair3(d, s, s);
            for _ in 1..T::LANES.trailing_zeros() {
                self.$pair3(d, d, d);
            }
        }
    )*};
}

impl<T: Target> Asm<T> {
    /// Empty kernel; the family prologue is already emitted.
    pub fn new() -> Self {
        let mut b = CodeBuilder::new(4096);
        T::Isa::prologue(&mut b, T::TEMPS);
        Self {
            b,
            program: Vec::new(),
            modes: vec![RoundingMode::Nearest],
            layout: InfoLayout::of::<T>(),
            compat: Compat::ACTIVE,
            _profile: PhantomData,
        }
    }

    /// Assemble the rest of the kernel under `compat` instead of the
    /// feature defaults.
    pub fn with_compat(mut self, compat: Compat) -> Self {
        self.compat = compat;
        self
    }

    /// Compatibility settings in effect.
    pub fn compat(&self) -> Compat {
        self.compat
    }

    /// Info block layout the kernel addresses through `Rebp`.
    pub fn info(&self) -> InfoLayout {
        self.layout
    }

    /// Rounding mode in effect at this point of the kernel.
    pub fn mode(&self) -> RoundingMode {
        self.modes.last().copied().unwrap_or(RoundingMode::Nearest)
    }

    /// Logical operations recorded so far.
    pub fn program(&self) -> &[Inst] {
        &self.program
    }

    fn chunk(member: u8) -> Chunk {
        Chunk {
            member,
            offset: member as u32 * T::Isa::NATIVE_BYTES,
            temps: T::TEMPS,
        }
    }

    fn phys(reg: Vr, member: u8) -> u8 {
        reg + member * T::STRIDE
    }

    fn pmem(m: &Mem, member: u8) -> PMem {
        let scale = match T::ELEMENT {
            ElementWidth::W32 => 2,
            ElementWidth::W64 => 3,
        };
        let index = match m.mode {
            AddrMode::Plain => PIndex::None,
            AddrMode::Index(reg) => PIndex::Reg {
                reg: T::Isa::base(reg),
                shift: 0,
            },
            AddrMode::Scaled(reg) => PIndex::Reg {
                reg: T::Isa::base(reg),
                shift: scale,
            },
        };
        PMem {
            base: T::Isa::base(m.base),
            index,
            disp: m.disp.value() + member as u32 * T::Isa::NATIVE_BYTES,
            class: m.disp.class(),
        }
    }

    fn pop(op: Operand, member: u8) -> POp {
        match op {
            Operand::Reg(r) => POp::Reg(Self::phys(r, member)),
            Operand::Mem(m) => POp::Mem(Self::pmem(&m, member)),
        }
    }

    /// Replay one lane operation per pair member and record the spans.
    fn lanes(&mut self, inst: Inst, mem: Option<Mem>, mut f: impl FnMut(&mut CodeBuilder, &Chunk, u8)) {
        let mut chunks = Vec::with_capacity(T::PAIRING as usize);
        for member in 0..T::PAIRING {
            let start = self.b.position();
            f(&mut self.b, &Self::chunk(member), member);
            chunks.push(ChunkSpan {
                bytes: start..self.b.position(),
                disp: mem.map(|m| Self::pmem(&m, member).disp),
            });
        }
        self.b.record(Expansion {
            mnemonic: inst.mnemonic(),
            chunks,
        });
        self.program.push(inst);
    }

    /// Encode an operation that runs once whatever the pairing.
    fn once(&mut self, inst: Inst, disp: Option<u32>, f: impl FnOnce(&mut CodeBuilder)) {
        let start = self.b.position();
        f(&mut self.b);
        self.b.record(Expansion {
            mnemonic: inst.mnemonic(),
            chunks: vec![ChunkSpan {
                bytes: start..self.b.position(),
                disp,
            }],
        });
        self.program.push(inst);
    }

    fn emit(&mut self, inst: Inst) {
        let mem = match inst {
            Inst::Load { m, .. } | Inst::Store { m, .. } => Some(m),
            Inst::Arith { t: Operand::Mem(m), .. }
            | Inst::Compare { t: Operand::Mem(m), .. }
            | Inst::Unary { s: Operand::Mem(m), .. }
            | Inst::Fused { t: Operand::Mem(m), .. }
            | Inst::Merge { s: Operand::Mem(m), .. } => Some(m),
            _ => None,
        };
        let ph = Self::phys;
        match inst {
            Inst::Mov { d, s } => self.lanes(inst, mem, |b, cx, k| T::Isa::mov(b, cx, ph(d, k), ph(s, k))),
            Inst::Load { d, m } => {
                self.lanes(inst, mem, |b, cx, k| T::Isa::load(b, cx, ph(d, k), &Self::pmem(&m, k)))
            }
            Inst::Store { s, m } => {
                self.lanes(inst, mem, |b, cx, k| T::Isa::store(b, cx, ph(s, k), &Self::pmem(&m, k)))
            }
            Inst::Arith { op, d, s, t } => self.lanes(inst, mem, |b, cx, k| {
                T::Isa::arith(b, cx, op, ph(d, k), ph(s, k), Self::pop(t, k))
            }),
            Inst::Unary { op, d, s } => {
                self.lanes(inst, mem, |b, cx, k| T::Isa::unary(b, cx, op, ph(d, k), Self::pop(s, k)))
            }
            Inst::Fused { op, g, s, t } => self.lanes(inst, mem, |b, cx, k| {
                T::Isa::fused(b, cx, op, ph(g, k), ph(s, k), Self::pop(t, k))
            }),
            Inst::Compare { op, d, s, t } => self.lanes(inst, mem, |b, cx, k| {
                T::Isa::compare(b, cx, op, ph(d, k), ph(s, k), Self::pop(t, k))
            }),
            Inst::Merge { g, s } => self.lanes(inst, mem, |b, cx, k| {
                T::Isa::merge(b, cx, ph(g, k), Self::pop(s, k), ph(0, k))
            }),
            Inst::Shift { op, d, s, imm } => {
                self.lanes(inst, mem, |b, cx, k| T::Isa::shift(b, cx, op, ph(d, k), ph(s, k), imm))
            }
            Inst::Round { mode, d, s } => {
                self.lanes(inst, mem, |b, cx, k| T::Isa::round(b, cx, mode, ph(d, k), ph(s, k)))
            }
            Inst::ToInt { mode, d, s } => {
                self.lanes(inst, mem, |b, cx, k| T::Isa::to_int(b, cx, mode, ph(d, k), ph(s, k)))
            }
            Inst::FromInt { d, s } => {
                self.lanes(inst, mem, |b, cx, k| T::Isa::from_int(b, cx, ph(d, k), ph(s, k)))
            }
            Inst::CopyElem { from, to } => {
                let (from, to) = (Self::pmem(&from, 0), Self::pmem(&to, 0));
                self.once(inst, Some(from.disp), |b| T::Isa::copy_elem(b, &from, &to));
            }
            Inst::SetMode { mode } => self.once(inst, None, |b| T::Isa::set_mode(b, mode, FLUSH_ZERO)),
            Inst::MaskJump { s, check, target } => self.lanes(inst, None, |b, cx, k| {
                T::Isa::mask_member(b, cx, ph(s, k), check);
                if k + 1 == T::PAIRING {
                    T::Isa::mask_branch(b, &Self::chunk(0), check, target);
                }
            }),
            Inst::Bind(label) => {
                self.b.bind(label);
                self.program.push(inst);
            }
            Inst::Jump(label) => self.once(inst, None, |b| T::Isa::jump(b, label)),
        }
    }

    /// `d = s`.
    pub fn mov(&mut self, d: Xreg<T>, s: Xreg<T>) {
        self.emit(Inst::Mov {
            d: d.index(),
            s: s.index(),
        });
    }

    /// Load one logical vector.
    pub fn ld(&mut self, d: Xreg<T>, m: Mem) {
        self.emit(Inst::Load { d: d.index(), m });
    }

    /// Store one logical vector.
    pub fn st(&mut self, s: Xreg<T>, m: Mem) {
        self.emit(Inst::Store { s: s.index(), m });
    }

    binary_ops! {
        /// Bitwise and: `g = g & s`.
        and, and3 => And;
        /// Bitwise and-not: `g = !g & s`.
        ann, ann3 => Ann;
        /// Bitwise or.
        orr, orr3 => Orr;
        /// Bitwise exclusive or.
        xor, xor3 => Xor;
        /// Floating point add.
        add, add3 => Add;
        /// Floating point subtract.
        sub, sub3 => Sub;
        /// Floating point multiply.
        mul, mul3 => Mul;
        /// Floating point divide.
        div, div3 => Div;
        /// Floating point minimum.
        min, min3 => Min;
        /// Floating point maximum.
        max, max3 => Max;
        /// Wrapping integer add.
        add_int, add_int3 => AddInt;
        /// Wrapping integer subtract.
        sub_int, sub_int3 => SubInt;
    }

    compare_ops! {
        /// Lanes where `g == s`.
        ceq, ceq3 => Eq;
        /// Lanes where `g != s`, unordered included.
        cne, cne3 => Ne;
        /// Lanes where `g < s`.
        clt, clt3 => Lt;
        /// Lanes where `g <= s`.
        cle, cle3 => Le;
        /// Lanes where `g > s`.
        cgt, cgt3 => Gt;
        /// Lanes where `g >= s`.
        cge, cge3 => Ge;
    }

    fn unary(&mut self, op: UnaryOp, d: Xreg<T>, s: Src<T>) {
        self.emit(Inst::Unary {
            op,
            d: d.index(),
            s: operand(s),
        });
    }

    /// Exact square root.
    pub fn sqr(&mut self, d: Xreg<T>, s: impl Into<Src<T>>) {
        self.unary(UnaryOp::Sqr, d, s.into());
    }

    /// Reciprocal estimate; accuracy differs between families.
    ///
    /// Under [`Compat::rcp`] this is `1.0 / s`, exact on every family.
    pub fn rce(&mut self, d: Xreg<T>, s: impl Into<Src<T>>) {
        let s = s.into();
        if !self.compat.rcp {
            self.unary(UnaryOp::Rce, d, s);
            return;
        }
        let divisor = match s {
            Src::Reg(reg) => {
                let slot = Mem::info(self.layout.scr(1));
                self.st(reg, slot);
                slot
            }
            Src::Mem(mem) => mem,
        };
        self.ld(d, Mem::info(self.layout.gpc01()));
        self.div(d, divisor);
    }

    /// Reciprocal square root estimate; accuracy differs between families.
    ///
    /// Under [`Compat::rsq`] this is `1.0 / sqrt(s)`, exact on every family.
    pub fn rse(&mut self, d: Xreg<T>, s: impl Into<Src<T>>) {
        let s = s.into();
        if !self.compat.rsq {
            self.unary(UnaryOp::Rse, d, s);
            return;
        }
        let slot = Mem::info(self.layout.scr(1));
        self.sqr(d, s);
        self.st(d, slot);
        self.ld(d, Mem::info(self.layout.gpc01()));
        self.div(d, slot);
    }

    /// One Newton step refining `g ≈ 1/s`. Destroys `s`.
    ///
    /// Emits nothing under [`Compat::rcp`], where `g` is already exact.
    pub fn rcs(&mut self, g: Xreg<T>, s: Xreg<T>) {
        if self.compat.rcp {
            return;
        }
        self.mul(s, g);
        self.mul(s, g);
        self.add(g, g);
        self.sub(g, s);
    }

    /// One Newton step refining `g ≈ 1/sqrt(s)`. Destroys `s`.
    ///
    /// Emits nothing under [`Compat::rsq`].
    pub fn rss(&mut self, g: Xreg<T>, s: Xreg<T>) {
        if self.compat.rsq {
            return;
        }
        let three = Mem::info(self.layout.gpc03());
        let half = Mem::info(self.layout.gpc02());
        self.mul(s, g);
        self.mul(s, g);
        self.sub(s, three);
        self.mul(s, g);
        self.mul(s, half);
        self.mov(g, s);
    }

    fn fused(&mut self, op: FusedOp, g: Xreg<T>, s: Xreg<T>, t: Src<T>) {
        let inst = Inst::Fused {
            op,
            g: g.index(),
            s: s.index(),
            t: operand(t),
        };
        let fused = <T::Isa as EncodeArith>::FUSES;
        if fused || self.compat.fmr || self.mode() == RoundingMode::Nearest {
            self.emit(inst);
        } else {
            let mut scope = self.fctrl(RoundingMode::Nearest);
            scope.emit(inst);
        }
    }

    /// `g = g + s * t`. Rounds once where the family fuses; elsewhere the
    /// product and the sum round separately, to nearest unless
    /// [`Compat::fmr`] is set.
    pub fn fma(&mut self, g: Xreg<T>, s: Xreg<T>, t: impl Into<Src<T>>) {
        self.fused(FusedOp::Fma, g, s, t.into());
    }

    /// `g = g - s * t`, rounded as [`Asm::fma`].
    pub fn fms(&mut self, g: Xreg<T>, s: Xreg<T>, t: impl Into<Src<T>>) {
        self.fused(FusedOp::Fms, g, s, t.into());
    }

    /// Mask merge: lanes of `s` where `X0` is set, `g` elsewhere.
    pub fn mmv(&mut self, g: Xreg<T>, s: impl Into<Src<T>>) {
        self.emit(Inst::Merge {
            g: g.index(),
            s: operand(s.into()),
        });
    }

    fn shift<const N: u8>(&mut self, op: ShiftOp, d: Xreg<T>, s: Xreg<T>) {
        const { assert!((N as u32) < T::ELEMENT.bits(), "shift count must be below the element width") };
        self.emit(Inst::Shift {
            op,
            d: d.index(),
            s: s.index(),
            imm: N,
        });
    }

    /// Integer shift left by `N`.
    pub fn shl<const N: u8>(&mut self, d: Xreg<T>, s: Xreg<T>) {
        self.shift::<N>(ShiftOp::Shl, d, s);
    }

    /// Logical shift right by `N`.
    pub fn shr<const N: u8>(&mut self, d: Xreg<T>, s: Xreg<T>) {
        self.shift::<N>(ShiftOp::Shr, d, s);
    }

    /// Arithmetic shift right by `N`.
    pub fn sra<const N: u8>(&mut self, d: Xreg<T>, s: Xreg<T>) {
        self.shift::<N>(ShiftOp::Sra, d, s);
    }

    /// Round to integral value in the current mode.
    pub fn rnd(&mut self, d: Xreg<T>, s: Xreg<T>) {
        self.emit(Inst::Round {
            mode: Rounding::Current,
            d: d.index(),
            s: s.index(),
        });
    }

    /// Round to integral value in `mode`.
    pub fn rnr(&mut self, d: Xreg<T>, s: Xreg<T>, mode: RoundingMode) {
        let (d, s) = (d.index(), s.index());
        if mode == self.mode() {
            self.emit(Inst::Round {
                mode: Rounding::Current,
                d,
                s,
            });
        } else if T::Isa::rounds_directly(mode) {
            self.emit(Inst::Round {
                mode: Rounding::Mode(mode),
                d,
                s,
            });
        } else {
            let mut scope = self.fctrl(mode);
            scope.emit(Inst::Round {
                mode: Rounding::Current,
                d,
                s,
            });
        }
    }

    /// Convert to integer, rounding in the current mode.
    pub fn cvt(&mut self, d: Xreg<T>, s: Xreg<T>) {
        self.emit(Inst::ToInt {
            mode: Rounding::Current,
            d: d.index(),
            s: s.index(),
        });
    }

    /// Convert to integer, rounding toward zero.
    pub fn cvz(&mut self, d: Xreg<T>, s: Xreg<T>) {
        self.cvr(d, s, RoundingMode::Zero);
    }

    /// Convert to integer, rounding in `mode`.
    pub fn cvr(&mut self, d: Xreg<T>, s: Xreg<T>, mode: RoundingMode) {
        let (d, s) = (d.index(), s.index());
        if T::Isa::converts_directly(mode) {
            self.emit(Inst::ToInt {
                mode: Rounding::Mode(mode),
                d,
                s,
            });
        } else if mode == self.mode() {
            self.emit(Inst::ToInt {
                mode: Rounding::Current,
                d,
                s,
            });
        } else {
            let mut scope = self.fctrl(mode);
            scope.emit(Inst::ToInt {
                mode: Rounding::Current,
                d,
                s,
            });
        }
    }

    /// Convert integer lanes to floating point.
    pub fn cvn(&mut self, d: Xreg<T>, s: Xreg<T>) {
        self.emit(Inst::FromInt {
            d: d.index(),
            s: s.index(),
        });
    }

    /// `d = [s pairs, t pairs]` combined with `op`, through the scratch slots.
    fn pairwise(&mut self, op: ArithOp, d: Xreg<T>, s: Xreg<T>, t: Xreg<T>) {
        let layout = self.layout;
        let elem = T::ELEMENT.bytes();
        let half = T::LANES / 2;
        self.st(s, Mem::info(layout.scr(1)));
        self.st(t, Mem::info(layout.scr(2)));
        for (src, out) in [(layout.scr(1), 0), (layout.scr(2), half)] {
            for i in 0..half {
                let even = Mem::info(src + 2 * i * elem);
                let odd = Mem::info(src + (2 * i + 1) * elem);
                self.copy_elem(even, Mem::info(layout.scr(3) + (out + i) * elem));
                self.copy_elem(odd, Mem::info(layout.scr(4) + (out + i) * elem));
            }
        }
        self.ld(d, Mem::info(layout.scr(3)));
        self.emit(Inst::Arith {
            op,
            d: d.index(),
            s: d.index(),
            t: Operand::Mem(Mem::info(layout.scr(4))),
        });
    }

    fn copy_elem(&mut self, from: Mem, to: Mem) {
        self.emit(Inst::CopyElem { from, to });
    }

    horizontal_ops! {
        /// Pairwise add: `[g0+g1, g2+g3, .., s0+s1, s2+s3, ..]`.
        adp, adp3, adh => Add;
        /// Pairwise multiply.
        mlp, mlp3, mlh => Mul;
        /// Pairwise minimum.
        mnp, mnp3, mnh => Min;
        /// Pairwise maximum.
        mxp, mxp3, mxh => Max;
    }

    /// Store every logical register to the info block save area.
    pub fn sregs_sa(&mut self) {
        for reg in Xreg::<T>::all() {
            let slot = Mem::info(self.layout.regs(reg.index()));
            self.st(reg, slot);
        }
    }

    /// Reload every logical register from the info block save area.
    pub fn sregs_la(&mut self) {
        for reg in Xreg::<T>::all() {
            let slot = Mem::info(self.layout.regs(reg.index()));
            self.ld(reg, slot);
        }
    }

    /// New unbound label.
    pub fn label(&mut self) -> Label {
        self.b.fresh_label()
    }

    /// Bind `label` here.
    pub fn bind(&mut self, label: Label) {
        self.emit(Inst::Bind(label));
    }

    /// Unconditional jump.
    pub fn jmp(&mut self, label: Label) {
        self.emit(Inst::Jump(label));
    }

    /// Jump to `label` when the lanes of `x` match `check`. Pair members are
    /// combined first: OR for [`MaskCheck::None`], AND for [`MaskCheck::Full`].
    pub fn mkj(&mut self, x: Xreg<T>, check: MaskCheck, label: Label) {
        self.emit(Inst::MaskJump {
            s: x.index(),
            check,
            target: label,
        });
    }

    /// Override the rounding mode until the returned scope is dropped.
    ///
    /// Branches may not cross the scope boundary; [`Asm::finish`] rejects them.
    pub fn fctrl(&mut self, mode: RoundingMode) -> RoundingScope<'_, T> {
        self.emit(Inst::SetMode { mode });
        self.modes.push(mode);
        self.b.enter_scope();
        RoundingScope { asm: self }
    }

    fn leave_mode(&mut self) {
        self.b.leave_scope();
        self.modes.pop();
        let mode = self.mode();
        self.emit(Inst::SetMode { mode });
    }

    /// Resolve branches and hand back the kernel.
    pub fn finish(self) -> Result<Kernel, EmitError> {
        let (code, expansions) = self.b.finish()?;
        debug!(
            profile = T::NAME,
            bytes = code.len(),
            ops = self.program.len(),
            "kernel assembled"
        );
        Ok(Kernel {
            profile: T::NAME,
            arch: T::ARCH,
            code,
            expansions,
            program: self.program,
        })
    }
}

/// Scoped rounding mode override; restores the enclosing mode on drop.
#[must_use = "the override ends as soon as the scope is dropped"]
pub struct RoundingScope<'a, T: Target> {
    asm: &'a mut Asm<T>,
}

impl<T: Target> Deref for RoundingScope<'_, T> {
    type Target = Asm<T>;

    fn deref(&self) -> &Asm<T> {
        self.asm
    }
}

impl<T: Target> DerefMut for RoundingScope<'_, T> {
    fn deref_mut(&mut self) -> &mut Asm<T> {
        self.asm
    }
}

impl<T: Target> Drop for RoundingScope<'_, T> {
    fn drop(&mut self) {
        self.asm.leave_mode();
    }
}

/// Finished kernel: code bytes, their per-member spans and the logical program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kernel {
    profile: &'static str,
    arch: Arch,
    code: Vec<u8>,
    expansions: Vec<Expansion>,
    program: Vec<Inst>,
}

impl Kernel {
    /// Profile name the kernel was built for.
    pub fn profile(&self) -> &'static str {
        self.profile
    }

    /// Architecture family.
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Machine code.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// One record per lane operation, in emission order.
    pub fn expansions(&self) -> &[Expansion] {
        &self.expansions
    }

    /// Logical instruction stream.
    pub fn program(&self) -> &[Inst] {
        &self.program
    }

    /// BLAKE3 digest of the code.
    pub fn digest(&self) -> blake3::Hash {
        blake3::hash(&self.code)
    }

    /// Human readable dump of every lane operation's member encodings.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_listing(&mut out);
        out
    }

    fn write_listing(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "; {} ({}), {} bytes", self.profile, self.arch, self.code.len())?;
        for expansion in &self.expansions {
            for (member, chunk) in expansion.chunks.iter().enumerate() {
                write!(out, "{:<10} [{member}]", expansion.mnemonic)?;
                if let Some(disp) = chunk.disp {
                    write!(out, " +{disp:#x}")?;
                }
                out.push_str("  ");
                for byte in &self.code[chunk.bytes.clone()] {
                    write!(out, "{byte:02x}")?;
                }
                out.push('\n');
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::{Breg, Disp};
    use crate::profile::{Fp32, Fp64, A64_128, A64_512, M64_128, X64_1024, X64_128, X64_512};

    #[test]
    fn sse_add_encodes_directly() {
        let mut asm = Asm::<X64_128<Fp32>>::new();
        let (a, b) = (Xreg::at::<1>(), Xreg::at::<2>());
        asm.add(a, b);
        let kernel = asm.finish().unwrap();
        assert_eq!(kernel.code(), &[0x0F, 0x58, 0xCA]);
        assert_eq!(kernel.program(), &[Inst::Arith {
            op: ArithOp::Add,
            d: 1,
            s: 1,
            t: Operand::Reg(2),
        }]);
    }

    #[test]
    fn quad_members_advance_registers_and_displacement() {
        let mut asm = Asm::<A64_512<Fp32>>::new();
        let a = Xreg::at::<3>();
        asm.ld(a, Mem::plain(Breg::Reax, Disp::dp::<0x100>()));
        let kernel = asm.finish().unwrap();
        let exp = &kernel.expansions()[0];
        assert_eq!(exp.chunks.len(), 4);
        let disps: Vec<_> = exp.chunks.iter().map(|c| c.disp).collect();
        assert_eq!(disps, [Some(0x100), Some(0x110), Some(0x120), Some(0x130)]);
        // ldr q3, q11, q19, q27
        let words: Vec<u32> = kernel
            .code()
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        assert_eq!(words.iter().map(|w| w & 0x1F).collect::<Vec<_>>(), [3, 11, 19, 27]);
    }

    #[test]
    fn avx_pairs_split_memory_operands() {
        let mut asm = Asm::<X64_512<Fp64>>::new();
        let a = Xreg::at::<1>();
        asm.mul(a, Mem::plain(Breg::Rebx, Disp::dp::<0x40>()));
        let kernel = asm.finish().unwrap();
        let exp = &kernel.expansions()[0];
        assert_eq!(exp.chunks[0].disp, Some(0x40));
        assert_eq!(exp.chunks[1].disp, Some(0x60));
        // vmulpd ymm1, ymm1, [rbx+0x40]; vmulpd ymm9, ymm9, [rbx+0x60]
        assert_eq!(&kernel.code()[exp.chunks[0].bytes.clone()], &[0xC5, 0xF5, 0x59, 0x4B, 0x40]);
        assert_eq!(
            &kernel.code()[exp.chunks[1].bytes.clone()],
            &[0xC5, 0x35, 0x59, 0x4B, 0x60]
        );
    }

    #[test]
    fn explicit_rounding_falls_back_to_scope() {
        let mut asm = Asm::<M64_128<Fp32>>::new();
        let (a, b) = (Xreg::at::<1>(), Xreg::at::<2>());
        asm.rnr(a, b, RoundingMode::Plus);
        asm.cvz(a, b);
        let kernel = asm.finish().unwrap();
        assert_eq!(
            kernel.program(),
            &[
                Inst::SetMode {
                    mode: RoundingMode::Plus
                },
                Inst::Round {
                    mode: Rounding::Current,
                    d: 1,
                    s: 2
                },
                Inst::SetMode {
                    mode: RoundingMode::Nearest
                },
                Inst::ToInt {
                    mode: Rounding::Mode(RoundingMode::Zero),
                    d: 1,
                    s: 2
                },
            ]
        );
    }

    #[test]
    fn nested_scopes_restore_outer_mode() {
        let mut asm = Asm::<X64_128<Fp32>>::new();
        {
            let mut outer = asm.fctrl(RoundingMode::Zero);
            {
                let inner = outer.fctrl(RoundingMode::Minus);
                assert_eq!(inner.mode(), RoundingMode::Minus);
            }
            assert_eq!(outer.mode(), RoundingMode::Zero);
        }
        assert_eq!(asm.mode(), RoundingMode::Nearest);
        let modes: Vec<_> = asm
            .program()
            .iter()
            .filter_map(|inst| match inst {
                Inst::SetMode { mode } => Some(*mode),
                _ => None,
            })
            .collect();
        assert_eq!(
            modes,
            [
                RoundingMode::Zero,
                RoundingMode::Minus,
                RoundingMode::Zero,
                RoundingMode::Nearest
            ]
        );
    }

    #[test]
    fn branch_out_of_scope_is_rejected() {
        let mut asm = Asm::<X64_128<Fp32>>::new();
        let out = asm.label();
        {
            let mut scope = asm.fctrl(RoundingMode::Zero);
            scope.mkj(Xreg::mask(), MaskCheck::None, out);
        }
        asm.bind(out);
        assert_eq!(
            asm.finish().unwrap_err(),
            EmitError::CrossesRoundingScope { label: out }
        );
    }

    #[test]
    fn pairwise_goes_through_scratch() {
        let mut asm = Asm::<X64_128<Fp32>>::new();
        let (a, b) = (Xreg::at::<1>(), Xreg::at::<2>());
        asm.adp(a, b);
        let copies = asm
            .program()
            .iter()
            .filter(|inst| matches!(inst, Inst::CopyElem { .. }))
            .count();
        assert_eq!(copies, 8);
        let kernel = asm.finish().unwrap();
        assert!(kernel.listing().contains("add"));
        assert_eq!(kernel.digest(), blake3::hash(kernel.code()));
    }

    #[test]
    fn register_save_area_covers_budget() {
        let mut asm = Asm::<A64_512<Fp32>>::new();
        asm.sregs_sa();
        asm.sregs_la();
        assert_eq!(asm.program().len(), 2 * 7);
    }

    #[test]
    fn compat_reciprocals_divide_and_skip_refinement() {
        let compat = Compat {
            rcp: true,
            rsq: true,
            fmr: false,
        };
        let mut asm = Asm::<X64_128<Fp32>>::new().with_compat(compat);
        let layout = asm.info();
        let (scr, one) = (Mem::info(layout.scr(1)), Mem::info(layout.gpc01()));
        let (a, b) = (Xreg::at::<1>(), Xreg::at::<2>());
        asm.rce(a, b);
        asm.rcs(a, b);
        assert_eq!(
            asm.program(),
            &[
                Inst::Store { s: 2, m: scr },
                Inst::Load { d: 1, m: one },
                Inst::Arith {
                    op: ArithOp::Div,
                    d: 1,
                    s: 1,
                    t: Operand::Mem(scr)
                },
            ]
        );
        let before = asm.program().len();
        asm.rse(a, b);
        asm.rss(a, b);
        assert_eq!(asm.program().len(), before + 4);
        assert!(!asm.program().iter().any(|inst| matches!(inst, Inst::Unary { op: UnaryOp::Rse, .. })));
    }

    #[test]
    fn native_estimates_keep_refinement() {
        let mut asm = Asm::<A64_128<Fp32>>::new().with_compat(Compat::default());
        let (a, b) = (Xreg::at::<1>(), Xreg::at::<2>());
        asm.rce(a, b);
        asm.rcs(a, b);
        assert_eq!(asm.program().len(), 5);
        assert!(matches!(asm.program()[0], Inst::Unary { op: UnaryOp::Rce, d: 1, s: Operand::Reg(2) }));
    }

    fn modes_around_fma<T: Target>(compat: Compat) -> Vec<Inst> {
        let mut asm = Asm::<T>::new().with_compat(compat);
        let (g, s, t) = (Xreg::at::<1>(), Xreg::at::<2>(), Xreg::at::<3>());
        {
            let mut scope = asm.fctrl(RoundingMode::Zero);
            scope.fma(g, s, t);
        }
        asm.program().to_vec()
    }

    #[test]
    fn unfused_multiply_add_rounds_to_nearest() {
        let fma = Inst::Fused {
            op: FusedOp::Fma,
            g: 1,
            s: 2,
            t: Operand::Reg(3),
        };
        let set = |mode| Inst::SetMode { mode };
        let (zero, nearest) = (RoundingMode::Zero, RoundingMode::Nearest);

        let program = modes_around_fma::<X64_128<Fp64>>(Compat::default());
        assert_eq!(program, [set(zero), set(nearest), fma, set(zero), set(nearest)]);

        let honour = Compat {
            fmr: true,
            ..Compat::default()
        };
        let program = modes_around_fma::<X64_128<Fp64>>(honour);
        assert_eq!(program, [set(zero), fma, set(nearest)]);

        let program = modes_around_fma::<A64_128<Fp64>>(Compat::default());
        assert_eq!(program, [set(zero), fma, set(nearest)]);
    }

    #[test]
    fn fused_memory_factor_advances_per_member() {
        let mut asm = Asm::<X64_1024<Fp32>>::new();
        let (g, s) = (Xreg::at::<1>(), Xreg::at::<2>());
        asm.fms(g, s, Mem::plain(Breg::Rebx, Disp::dp::<0x80>()));
        let kernel = asm.finish().unwrap();
        let exp = &kernel.expansions()[0];
        assert_eq!(exp.mnemonic, "fms");
        let disps: Vec<_> = exp.chunks.iter().map(|c| c.disp).collect();
        assert_eq!(disps, [Some(0x80), Some(0xA0), Some(0xC0), Some(0xE0)]);
        // vfnmadd231ps ymm13, ymm14, [rbx+0xE0]
        assert_eq!(
            &kernel.code()[exp.chunks[3].bytes.clone()],
            &[0xC4, 0x62, 0x0D, 0xBC, 0xAB, 0xE0, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn mask_jump_spans_every_member() {
        let mut asm = Asm::<A64_512<Fp32>>::new();
        let skip = asm.label();
        asm.mkj(Xreg::mask(), MaskCheck::Full, skip);
        asm.jmp(skip);
        asm.bind(skip);
        let kernel = asm.finish().unwrap();
        let [mkj, jmp] = kernel.expansions() else {
            panic!("expected two expansions");
        };
        assert_eq!(mkj.mnemonic, "mkj");
        assert_eq!(mkj.chunks.len(), 4);
        for pair in mkj.chunks.windows(2) {
            assert_eq!(pair[0].bytes.end, pair[1].bytes.start);
        }
        // The branch rides on the last member.
        assert!(mkj.chunks[3].bytes.len() > mkj.chunks[2].bytes.len());
        assert_eq!(jmp.chunks.len(), 1);
        assert_eq!(jmp.chunks[0].bytes.end, kernel.code().len());
    }
}
