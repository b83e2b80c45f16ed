//! The closed vocabulary of logical vector operations.
//!
//! [`crate::Asm`] records every operation it encodes as an [`Inst`] over
//! logical register numbers. The recorded program is what the lane model
//! executes, so the semantics documented here are the contract every
//! encoder honours.

use core::fmt;

use crate::builder::Label;
use crate::operand::Mem;

/// Logical register number.
pub type Vr = u8;

/// Register or memory operand of a recorded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Logical register.
    Reg(Vr),
    /// One logical vector in memory.
    Mem(Mem),
}

/// Lane-wise binary operation, `d = s op t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// Bitwise and.
    And,
    /// Bitwise and-not: `!s & t`.
    Ann,
    /// Bitwise or.
    Orr,
    /// Bitwise exclusive or.
    Xor,
    /// Floating point add.
    Add,
    /// Floating point subtract.
    Sub,
    /// Floating point multiply.
    Mul,
    /// Floating point divide.
    Div,
    /// Floating point minimum.
    Min,
    /// Floating point maximum.
    Max,
    /// Wrapping integer add.
    AddInt,
    /// Wrapping integer subtract.
    SubInt,
}

impl ArithOp {
    /// Whether `s op t == t op s`.
    pub const fn commutative(self) -> bool {
        !matches!(
            self,
            ArithOp::Ann | ArithOp::Sub | ArithOp::Div | ArithOp::SubInt
        )
    }

    /// Assembler mnemonic stem.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::And => "and",
            ArithOp::Ann => "ann",
            ArithOp::Orr => "orr",
            ArithOp::Xor => "xor",
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Min => "min",
            ArithOp::Max => "max",
            ArithOp::AddInt => "add_int",
            ArithOp::SubInt => "sub_int",
        }
    }
}

/// Lane-wise unary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Exact square root.
    Sqr,
    /// Reciprocal estimate, accurate to the family's estimate precision.
    Rce,
    /// Reciprocal square root estimate.
    Rse,
}

impl UnaryOp {
    /// Assembler mnemonic stem.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            UnaryOp::Sqr => "sqr",
            UnaryOp::Rce => "rce",
            UnaryOp::Rse => "rse",
        }
    }
}

/// Fused multiply-accumulate into the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FusedOp {
    /// `g = g + s * t`.
    Fma,
    /// `g = g - s * t`.
    Fms,
}

impl FusedOp {
    /// Assembler mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            FusedOp::Fma => "fma",
            FusedOp::Fms => "fms",
        }
    }
}

/// Lane-wise floating point compare producing all-ones / all-zeros lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// `s == t`.
    Eq,
    /// `s != t`.
    Ne,
    /// `s < t`.
    Lt,
    /// `s <= t`.
    Le,
    /// `s > t`.
    Gt,
    /// `s >= t`.
    Ge,
}

impl CmpOp {
    /// Assembler mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            CmpOp::Eq => "ceq",
            CmpOp::Ne => "cne",
            CmpOp::Lt => "clt",
            CmpOp::Le => "cle",
            CmpOp::Gt => "cgt",
            CmpOp::Ge => "cge",
        }
    }
}

/// Lane-wise integer shift by an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    /// Logical left.
    Shl,
    /// Logical right.
    Shr,
    /// Arithmetic right.
    Sra,
}

impl ShiftOp {
    /// Assembler mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            ShiftOp::Shl => "shl",
            ShiftOp::Shr => "shr",
            ShiftOp::Sra => "shr_signed",
        }
    }
}

/// IEEE rounding direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundingMode {
    /// To nearest, ties to even.
    Nearest,
    /// Toward negative infinity.
    Minus,
    /// Toward positive infinity.
    Plus,
    /// Toward zero.
    Zero,
}

impl RoundingMode {
    /// All modes in control-word table order.
    pub const ALL: [RoundingMode; 4] = [
        RoundingMode::Nearest,
        RoundingMode::Minus,
        RoundingMode::Plus,
        RoundingMode::Zero,
    ];

    /// Position in [`RoundingMode::ALL`] and in the info block control words.
    pub const fn slot(self) -> u32 {
        match self {
            RoundingMode::Nearest => 0,
            RoundingMode::Minus => 1,
            RoundingMode::Plus => 2,
            RoundingMode::Zero => 3,
        }
    }
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoundingMode::Nearest => "nearest",
            RoundingMode::Minus => "minus",
            RoundingMode::Plus => "plus",
            RoundingMode::Zero => "zero",
        })
    }
}

/// Rounding applied by a round or convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rounding {
    /// Whatever mode the FP control register currently holds.
    Current,
    /// A mode encoded in the instruction itself.
    Mode(RoundingMode),
}

/// Condition tested by a mask jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskCheck {
    /// Jump when no lane is set.
    None,
    /// Jump when every lane is set.
    Full,
}

/// One logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inst {
    /// `d = s`.
    Mov {
        /// Destination.
        d: Vr,
        /// Source.
        s: Vr,
    },
    /// `d = [m]`.
    Load {
        /// Destination.
        d: Vr,
        /// Source address.
        m: Mem,
    },
    /// `[m] = s`.
    Store {
        /// Source.
        s: Vr,
        /// Destination address.
        m: Mem,
    },
    /// `d = s op t`.
    Arith {
        /// Operation.
        op: ArithOp,
        /// Destination.
        d: Vr,
        /// First source.
        s: Vr,
        /// Second source.
        t: Operand,
    },
    /// `d = op(s)`.
    Unary {
        /// Operation.
        op: UnaryOp,
        /// Destination.
        d: Vr,
        /// Source.
        s: Operand,
    },
    /// `g = g ± s * t`, rounded once where the family fuses.
    Fused {
        /// Accumulate or subtract.
        op: FusedOp,
        /// Accumulator and destination.
        g: Vr,
        /// First factor.
        s: Vr,
        /// Second factor.
        t: Operand,
    },
    /// `d = s cmp t ? !0 : 0`.
    Compare {
        /// Predicate.
        op: CmpOp,
        /// Destination.
        d: Vr,
        /// First source.
        s: Vr,
        /// Second source.
        t: Operand,
    },
    /// `g = X0 ? s : g`.
    Merge {
        /// Destination and kept source.
        g: Vr,
        /// Source taken where the mask is set.
        s: Operand,
    },
    /// `d = s shift imm`.
    Shift {
        /// Direction.
        op: ShiftOp,
        /// Destination.
        d: Vr,
        /// Source.
        s: Vr,
        /// Shift count, below the element width.
        imm: u8,
    },
    /// `d = round(s)`, floating point result.
    Round {
        /// Rounding.
        mode: Rounding,
        /// Destination.
        d: Vr,
        /// Source.
        s: Vr,
    },
    /// `d = int(round(s))`.
    ToInt {
        /// Rounding.
        mode: Rounding,
        /// Destination.
        d: Vr,
        /// Source.
        s: Vr,
    },
    /// `d = float(s)`.
    FromInt {
        /// Destination.
        d: Vr,
        /// Source.
        s: Vr,
    },
    /// Copy one element between memory slots through a general register.
    CopyElem {
        /// Source element.
        from: Mem,
        /// Destination element.
        to: Mem,
    },
    /// Load the FP control register with `mode`.
    SetMode {
        /// New mode.
        mode: RoundingMode,
    },
    /// Branch to `target` when the lanes of `s` satisfy `check`.
    MaskJump {
        /// Mask register.
        s: Vr,
        /// Condition.
        check: MaskCheck,
        /// Branch target.
        target: Label,
    },
    /// Position of a label.
    Bind(Label),
    /// Unconditional branch.
    Jump(Label),
}

impl Inst {
    /// Name used in listings and expansion records.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Inst::Mov { .. } => "mov",
            Inst::Load { .. } => "ld",
            Inst::Store { .. } => "st",
            Inst::Arith { op, .. } => op.mnemonic(),
            Inst::Unary { op, .. } => op.mnemonic(),
            Inst::Fused { op, .. } => op.mnemonic(),
            Inst::Compare { op, .. } => op.mnemonic(),
            Inst::Merge { .. } => "mmv",
            Inst::Shift { op, .. } => op.mnemonic(),
            Inst::Round { mode: Rounding::Current, .. } => "rnd",
            Inst::Round { .. } => "rnr",
            Inst::ToInt { mode: Rounding::Current, .. } => "cvt",
            Inst::ToInt { .. } => "cvr",
            Inst::FromInt { .. } => "cvn",
            Inst::CopyElem { .. } => "elm",
            Inst::SetMode { .. } => "fctrl",
            Inst::MaskJump { .. } => "mkj",
            Inst::Bind(_) => "label",
            Inst::Jump(_) => "jmp",
        }
    }
}
