//! Software lane model.
//!
//! [`LaneMachine`] executes the logical program recorded by [`crate::Asm`]
//! over a register file of lanes and a flat little-endian arena. Addresses
//! are arena offsets held in the portable base registers; `Rebp` starts out
//! pointing at an initialized info block.
//!
//! Floating point arithmetic rounds to nearest. Where the profile's family
//! has hardware estimates, `rce` and `rse` keep the leading
//! [`ESTIMATE_BITS`] mantissa bits of the exact result, the precision the
//! refinement steps are written against. `fma` and `fms` round once on
//! fusing families and twice elsewhere.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use crate::builder::Label;
use crate::info::InfoBlock;
use crate::inst::{ArithOp, CmpOp, FusedOp, Inst, MaskCheck, Operand, Rounding, RoundingMode, ShiftOp, UnaryOp, Vr};
use crate::isa::EncodeArith;
use crate::operand::{AddrMode, Breg, Mem};
use crate::profile::{ElementWidth, Target};

/// Mantissa bits an estimate keeps in the model.
pub const ESTIMATE_BITS: u32 = 12;

/// Fault raised while interpreting a program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaneError {
    /// An access left the arena.
    #[error("access of {len} bytes at {addr:#x} is outside the arena")]
    OutOfBounds {
        /// First byte.
        addr: u64,
        /// Access size.
        len: usize,
    },
    /// A jump names a label missing from the program.
    #[error("jump to unbound label {0}")]
    UnboundLabel(Label),
    /// The program did not finish within the step budget.
    #[error("program exceeded {0} steps")]
    StepLimit(usize),
    /// A register number outside the profile budget.
    #[error("register X{0} outside the register budget")]
    Register(Vr),
}

/// Interpreter state for one profile.
#[derive(Debug, Clone)]
pub struct LaneMachine {
    lanes: usize,
    elem: ElementWidth,
    vector: usize,
    regs: Vec<u64>,
    reg_count: usize,
    arena: Vec<u8>,
    bases: [u64; 13],
    mode: RoundingMode,
    fuses: bool,
    estimates: bool,
    step_limit: usize,
}

impl LaneMachine {
    /// Machine for `T` with the info block at address 0 and `Rebp` on it.
    pub fn new<T: Target>() -> Self {
        let block = InfoBlock::new::<T>();
        let lanes = T::LANES as usize;
        Self {
            lanes,
            elem: T::ELEMENT,
            vector: T::VECTOR_BYTES as usize,
            regs: vec![0; T::REGS as usize * lanes],
            reg_count: T::REGS as usize,
            arena: block.bytes().to_vec(),
            bases: [0; 13],
            mode: RoundingMode::Nearest,
            fuses: <T::Isa as EncodeArith>::FUSES,
            estimates: <T::Isa as EncodeArith>::ESTIMATES,
            step_limit: 1 << 20,
        }
    }

    /// Cap on executed instructions per [`LaneMachine::run`].
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Lanes per register.
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Copy `bytes` into the arena at the next vector-aligned address.
    pub fn place(&mut self, bytes: &[u8]) -> u64 {
        let addr = self.arena.len().next_multiple_of(self.vector);
        self.arena.resize(addr, 0);
        self.arena.extend_from_slice(bytes);
        addr as u64
    }

    /// Reserve `len` zeroed bytes at the next vector-aligned address.
    pub fn reserve(&mut self, len: usize) -> u64 {
        let addr = self.arena.len().next_multiple_of(self.vector);
        self.arena.resize(addr + len, 0);
        addr as u64
    }

    /// Point `reg` at `addr`.
    pub fn set_base(&mut self, reg: Breg, addr: u64) {
        self.bases[reg.slot()] = addr;
    }

    /// Current value of `reg`.
    pub fn base(&self, reg: Breg) -> u64 {
        self.bases[reg.slot()]
    }

    /// `len` bytes at `addr`.
    pub fn read(&self, addr: u64, len: usize) -> Result<&[u8], LaneError> {
        let range = self.span(addr, len)?;
        Ok(&self.arena[range])
    }

    /// Overwrite the arena at `addr`.
    pub fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), LaneError> {
        let range = self.span(addr, bytes.len())?;
        self.arena[range].copy_from_slice(bytes);
        Ok(())
    }

    fn span(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, LaneError> {
        let start = usize::try_from(addr).map_err(|_| LaneError::OutOfBounds { addr, len })?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.arena.len())
            .ok_or(LaneError::OutOfBounds { addr, len })?;
        Ok(start..end)
    }

    /// Raw lanes of `reg`.
    pub fn reg_bits(&self, reg: Vr) -> Result<&[u64], LaneError> {
        let at = self.reg_at(reg)?;
        Ok(&self.regs[at..at + self.lanes])
    }

    /// Set the raw lanes of `reg`; missing lanes are zeroed.
    pub fn set_reg_bits(&mut self, reg: Vr, bits: &[u64]) -> Result<(), LaneError> {
        let at = self.reg_at(reg)?;
        let mask = self.lane_mask();
        for lane in 0..self.lanes {
            self.regs[at + lane] = bits.get(lane).copied().unwrap_or(0) & mask;
        }
        Ok(())
    }

    /// Set `reg` from floating point values, narrowed to the element width.
    pub fn set_reg_f64(&mut self, reg: Vr, values: &[f64]) -> Result<(), LaneError> {
        let bits: Vec<u64> = values.iter().map(|&v| self.from_f64(v)).collect();
        self.set_reg_bits(reg, &bits)
    }

    /// Lanes of `reg` as floating point values.
    pub fn reg_f64(&self, reg: Vr) -> Result<Vec<f64>, LaneError> {
        Ok(self.reg_bits(reg)?.iter().map(|&b| self.to_f64(b)).collect())
    }

    /// Lanes of `reg` as signed integers.
    pub fn reg_int(&self, reg: Vr) -> Result<Vec<i64>, LaneError> {
        Ok(self.reg_bits(reg)?.iter().map(|&b| self.to_int(b)).collect())
    }

    /// Rounding mode in the control state.
    pub fn mode(&self) -> RoundingMode {
        self.mode
    }

    /// Switch the control state to `mode` until the guard drops.
    pub fn rounding(&mut self, mode: RoundingMode) -> RoundingGuard<'_> {
        let saved = self.mode;
        self.mode = mode;
        RoundingGuard {
            machine: self,
            saved,
        }
    }

    fn reg_at(&self, reg: Vr) -> Result<usize, LaneError> {
        if (reg as usize) < self.reg_count {
            Ok(reg as usize * self.lanes)
        } else {
            Err(LaneError::Register(reg))
        }
    }

    fn lane_mask(&self) -> u64 {
        match self.elem {
            ElementWidth::W32 => u32::MAX as u64,
            ElementWidth::W64 => u64::MAX,
        }
    }

    fn to_f64(&self, bits: u64) -> f64 {
        match self.elem {
            ElementWidth::W32 => f32::from_bits(bits as u32) as f64,
            ElementWidth::W64 => f64::from_bits(bits),
        }
    }

    fn from_f64(&self, value: f64) -> u64 {
        match self.elem {
            ElementWidth::W32 => (value as f32).to_bits() as u64,
            ElementWidth::W64 => value.to_bits(),
        }
    }

    fn to_int(&self, bits: u64) -> i64 {
        match self.elem {
            ElementWidth::W32 => bits as u32 as i32 as i64,
            ElementWidth::W64 => bits as i64,
        }
    }

    fn from_int(&self, value: i64) -> u64 {
        value as u64 & self.lane_mask()
    }

    fn address(&self, m: &Mem) -> u64 {
        let base = self.base(m.base);
        let index = match m.mode {
            AddrMode::Plain => 0,
            AddrMode::Index(reg) => self.base(reg),
            AddrMode::Scaled(reg) => self.base(reg).wrapping_mul(self.elem.bytes() as u64),
        };
        base.wrapping_add(index).wrapping_add(m.disp.value() as u64)
    }

    fn load_vector(&self, m: &Mem) -> Result<Vec<u64>, LaneError> {
        let bytes = self.read(self.address(m), self.vector)?;
        Ok(match self.elem {
            ElementWidth::W32 => bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as u64)
                .collect(),
            ElementWidth::W64 => bytes
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        })
    }

    fn store_vector(&mut self, m: &Mem, lanes: &[u64]) -> Result<(), LaneError> {
        let mut bytes = Vec::with_capacity(self.vector);
        for &lane in lanes {
            match self.elem {
                ElementWidth::W32 => bytes.extend_from_slice(&(lane as u32).to_le_bytes()),
                ElementWidth::W64 => bytes.extend_from_slice(&lane.to_le_bytes()),
            }
        }
        self.write(self.address(m), &bytes)
    }

    fn operand(&self, op: &Operand) -> Result<Vec<u64>, LaneError> {
        match op {
            Operand::Reg(r) => Ok(self.reg_bits(*r)?.to_vec()),
            Operand::Mem(m) => self.load_vector(m),
        }
    }

    fn round(&self, mode: Rounding, value: f64) -> f64 {
        match self.resolve(mode) {
            RoundingMode::Nearest => value.round_ties_even(),
            RoundingMode::Minus => value.floor(),
            RoundingMode::Plus => value.ceil(),
            RoundingMode::Zero => value.trunc(),
        }
    }

    fn resolve(&self, mode: Rounding) -> RoundingMode {
        match mode {
            Rounding::Current => self.mode,
            Rounding::Mode(mode) => mode,
        }
    }

    fn arith(&self, op: ArithOp, a: u64, b: u64) -> u64 {
        let mask = self.lane_mask();
        let fp = |f: fn(f64, f64) -> f64| self.from_f64(f(self.to_f64(a), self.to_f64(b)));
        match op {
            ArithOp::And => a & b,
            ArithOp::Ann => !a & b & mask,
            ArithOp::Orr => a | b,
            ArithOp::Xor => a ^ b,
            ArithOp::Add => fp(|x, y| x + y),
            ArithOp::Sub => fp(|x, y| x - y),
            ArithOp::Mul => fp(|x, y| x * y),
            ArithOp::Div => fp(|x, y| x / y),
            ArithOp::Min => fp(|x, y| if x < y { x } else { y }),
            ArithOp::Max => fp(|x, y| if x > y { x } else { y }),
            ArithOp::AddInt => a.wrapping_add(b) & mask,
            ArithOp::SubInt => a.wrapping_sub(b) & mask,
        }
    }

    /// `1/v` or `1/sqrt(v)`, cut to the estimate precision on estimating
    /// families.
    fn estimate(&self, exact: f64) -> u64 {
        let bits = self.from_f64(exact);
        if !self.estimates || !exact.is_finite() {
            return bits;
        }
        let mantissa = match self.elem {
            ElementWidth::W32 => 23,
            ElementWidth::W64 => 52,
        };
        bits & !((1u64 << (mantissa - ESTIMATE_BITS)) - 1)
    }

    fn fused(&self, op: FusedOp, g: u64, s: u64, t: u64) -> u64 {
        if !self.fuses {
            let product = self.arith(ArithOp::Mul, s, t);
            let combine = match op {
                FusedOp::Fma => ArithOp::Add,
                FusedOp::Fms => ArithOp::Sub,
            };
            return self.arith(combine, g, product);
        }
        match self.elem {
            ElementWidth::W32 => {
                let (g, s, t) = (f32::from_bits(g as u32), f32::from_bits(s as u32), f32::from_bits(t as u32));
                let s = if op == FusedOp::Fms { -s } else { s };
                s.mul_add(t, g).to_bits() as u64
            }
            ElementWidth::W64 => {
                let (g, s, t) = (f64::from_bits(g), f64::from_bits(s), f64::from_bits(t));
                let s = if op == FusedOp::Fms { -s } else { s };
                s.mul_add(t, g).to_bits()
            }
        }
    }

    fn compare(&self, op: CmpOp, a: u64, b: u64) -> u64 {
        let (x, y) = (self.to_f64(a), self.to_f64(b));
        let hit = match op {
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
        };
        if hit {
            self.lane_mask()
        } else {
            0
        }
    }

    fn shift(&self, op: ShiftOp, a: u64, imm: u8) -> u64 {
        let mask = self.lane_mask();
        match op {
            ShiftOp::Shl => (a << imm) & mask,
            ShiftOp::Shr => (a & mask) >> imm,
            ShiftOp::Sra => self.from_int(self.to_int(a) >> imm),
        }
    }

    fn convert(&self, mode: Rounding, bits: u64) -> u64 {
        let value = self.round(mode, self.to_f64(bits));
        match self.elem {
            ElementWidth::W32 => self.from_int(value as i32 as i64),
            ElementWidth::W64 => self.from_int(value as i64),
        }
    }

    fn lanewise(
        &mut self,
        d: Vr,
        a: &[u64],
        b: &[u64],
        f: impl Fn(&Self, u64, u64) -> u64,
    ) -> Result<(), LaneError> {
        let this = &*self;
        let out: Vec<u64> = a.iter().zip(b).map(|(&x, &y)| f(this, x, y)).collect();
        self.set_reg_bits(d, &out)
    }

    fn map(&mut self, d: Vr, a: &[u64], f: impl Fn(&Self, u64) -> u64) -> Result<(), LaneError> {
        let this = &*self;
        let out: Vec<u64> = a.iter().map(|&x| f(this, x)).collect();
        self.set_reg_bits(d, &out)
    }

    /// Execute `program` from the top.
    pub fn run(&mut self, program: &[Inst]) -> Result<(), LaneError> {
        let targets: HashMap<Label, usize> = program
            .iter()
            .enumerate()
            .filter_map(|(at, inst)| match inst {
                Inst::Bind(label) => Some((*label, at)),
                _ => None,
            })
            .collect();

        let mut pc = 0;
        let mut steps = 0;
        while let Some(inst) = program.get(pc) {
            steps += 1;
            if steps > self.step_limit {
                return Err(LaneError::StepLimit(self.step_limit));
            }
            pc += 1;
            if let Some(label) = self.step(inst)? {
                pc = *targets.get(&label).ok_or(LaneError::UnboundLabel(label))?;
            }
        }
        Ok(())
    }

    /// One instruction; returns the branch target when control transfers.
    fn step(&mut self, inst: &Inst) -> Result<Option<Label>, LaneError> {
        match *inst {
            Inst::Mov { d, s } => {
                let v = self.reg_bits(s)?.to_vec();
                self.set_reg_bits(d, &v)?;
            }
            Inst::Load { d, m } => {
                let v = self.load_vector(&m)?;
                self.set_reg_bits(d, &v)?;
            }
            Inst::Store { s, m } => {
                let v = self.reg_bits(s)?.to_vec();
                self.store_vector(&m, &v)?;
            }
            Inst::Arith { op, d, s, t } => {
                let (a, b) = (self.reg_bits(s)?.to_vec(), self.operand(&t)?);
                self.lanewise(d, &a, &b, |m, x, y| m.arith(op, x, y))?;
            }
            Inst::Unary { op, d, s } => {
                let a = self.operand(&s)?;
                self.map(d, &a, |m, x| {
                    let v = m.to_f64(x);
                    match op {
                        UnaryOp::Sqr => m.from_f64(v.sqrt()),
                        UnaryOp::Rce => m.estimate(1.0 / v),
                        UnaryOp::Rse => m.estimate(1.0 / v.sqrt()),
                    }
                })?;
            }
            Inst::Fused { op, g, s, t } => {
                let (acc, a, b) = (self.reg_bits(g)?.to_vec(), self.reg_bits(s)?.to_vec(), self.operand(&t)?);
                let this = &*self;
                let out: Vec<u64> = acc
                    .iter()
                    .zip(&a)
                    .zip(&b)
                    .map(|((&acc, &x), &y)| this.fused(op, acc, x, y))
                    .collect();
                self.set_reg_bits(g, &out)?;
            }
            Inst::Compare { op, d, s, t } => {
                let (a, b) = (self.reg_bits(s)?.to_vec(), self.operand(&t)?);
                self.lanewise(d, &a, &b, |m, x, y| m.compare(op, x, y))?;
            }
            Inst::Merge { g, s } => {
                let mask = self.reg_bits(0)?.to_vec();
                let (a, b) = (self.reg_bits(g)?.to_vec(), self.operand(&s)?);
                let out: Vec<u64> = a
                    .iter()
                    .zip(&b)
                    .zip(&mask)
                    .map(|((&keep, &take), &m)| (take & m) | (keep & !m))
                    .collect();
                self.set_reg_bits(g, &out)?;
            }
            Inst::Shift { op, d, s, imm } => {
                let a = self.reg_bits(s)?.to_vec();
                self.map(d, &a, |m, x| m.shift(op, x, imm))?;
            }
            Inst::Round { mode, d, s } => {
                let a = self.reg_bits(s)?.to_vec();
                self.map(d, &a, |m, x| m.from_f64(m.round(mode, m.to_f64(x))))?;
            }
            Inst::ToInt { mode, d, s } => {
                let a = self.reg_bits(s)?.to_vec();
                self.map(d, &a, |m, x| m.convert(mode, x))?;
            }
            Inst::FromInt { d, s } => {
                let a = self.reg_bits(s)?.to_vec();
                self.map(d, &a, |m, x| m.from_f64(m.to_int(x) as f64))?;
            }
            Inst::CopyElem { from, to } => {
                let len = self.elem.bytes() as usize;
                let bytes = self.read(self.address(&from), len)?.to_vec();
                self.write(self.address(&to), &bytes)?;
            }
            Inst::SetMode { mode } => self.mode = mode,
            Inst::MaskJump { s, check, target } => {
                let lanes = self.reg_bits(s)?;
                let taken = match check {
                    MaskCheck::None => lanes.iter().all(|&l| l == 0),
                    MaskCheck::Full => lanes.iter().all(|&l| l != 0),
                };
                if taken {
                    return Ok(Some(target));
                }
            }
            Inst::Bind(_) => {}
            Inst::Jump(target) => return Ok(Some(target)),
        }
        Ok(None)
    }
}

/// Restores the machine's rounding mode when dropped.
pub struct RoundingGuard<'a> {
    machine: &'a mut LaneMachine,
    saved: RoundingMode,
}

impl Deref for RoundingGuard<'_> {
    type Target = LaneMachine;

    fn deref(&self) -> &LaneMachine {
        self.machine
    }
}

impl DerefMut for RoundingGuard<'_> {
    fn deref_mut(&mut self) -> &mut LaneMachine {
        self.machine
    }
}

impl Drop for RoundingGuard<'_> {
    fn drop(&mut self) {
        self.machine.mode = self.saved;
    }
}
