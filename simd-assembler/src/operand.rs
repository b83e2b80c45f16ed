//! Operand model: logical vector registers, portable base registers and
//! memory operands with displacement classes.
//!
//! Everything here is independent of the physical encoding. Range checks run
//! as inline `const` assertions, so an illegal operand is a build failure of
//! the kernel that names it.

use core::fmt;
use core::marker::PhantomData;

use crate::profile::Target;

/// Logical vector register of profile `T`.
///
/// The profile parameter keeps registers of different profiles apart: an
/// `Xreg<A64_512>` cannot be handed to an `Asm<A64_128>`.
pub struct Xreg<T> {
    index: u8,
    _profile: PhantomData<fn() -> T>,
}

impl<T: Target> Xreg<T> {
    /// Register `N`; fails to compile when `N` exceeds the profile budget.
    #[inline]
    pub fn at<const N: u8>() -> Self {
        const { assert!(N < T::REGS, "vector register outside the profile's register budget") };
        Self::new(N)
    }

    /// The mask register `X0` used by [`crate::Asm::mmv`].
    #[inline]
    pub fn mask() -> Self {
        Self::at::<0>()
    }

    /// Every nameable register of the profile, in order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..T::REGS).map(Self::new)
    }

    pub(crate) fn new(index: u8) -> Self {
        Self {
            index,
            _profile: PhantomData,
        }
    }

    /// Logical register number.
    #[inline]
    pub fn index(self) -> u8 {
        self.index
    }
}

impl<T> Clone for Xreg<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Xreg<T> {}

impl<T> PartialEq for Xreg<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Xreg<T> {}

impl<T> fmt::Debug for Xreg<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{}", self.index)
    }
}

/// Declare a set of logical registers for profile `T`.
///
/// ```
/// use simd_assembler::{xregs, A64_256, Fp32};
///
/// xregs!(A64_256<Fp32>; xa = 1, xb = 2);
/// assert_eq!(xa.index(), 1);
/// assert_eq!(xb.index(), 2);
/// ```
#[macro_export]
macro_rules! xregs {
    ($t:ty; $($name:ident = $n:literal),+ $(,)?) => {
        $(let $name = $crate::Xreg::<$t>::at::<$n>();)+
    };
}

/// Portable base (general purpose) register.
///
/// Each family maps these onto its own integer registers; the family's
/// address and element-copy temporaries are never nameable. Inside a kernel
/// `Rebp` holds the info block pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Breg {
    /// General register 0.
    Reax,
    /// General register 1.
    Recx,
    /// General register 2.
    Redx,
    /// General register 3.
    Rebx,
    /// Info block pointer.
    Rebp,
    /// General register 5.
    Resi,
    /// General register 6.
    Redi,
    /// General register 7.
    Reg8,
    /// General register 8.
    Reg9,
    /// General register 9.
    RegA,
    /// General register 10.
    RegB,
    /// General register 11.
    RegC,
    /// General register 12.
    RegD,
}

impl Breg {
    /// Every portable register, in table order.
    pub const ALL: [Breg; 13] = [
        Breg::Reax,
        Breg::Recx,
        Breg::Redx,
        Breg::Rebx,
        Breg::Rebp,
        Breg::Resi,
        Breg::Redi,
        Breg::Reg8,
        Breg::Reg9,
        Breg::RegA,
        Breg::RegB,
        Breg::RegC,
        Breg::RegD,
    ];

    /// Position in [`Breg::ALL`].
    pub const fn slot(self) -> usize {
        self as usize
    }
}

/// Displacement class: the number of bits a displacement may occupy.
///
/// The class, not the value, selects the address composition sequence on the
/// RISC families, so the size of an expansion depends only on the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DispClass {
    /// 12-bit.
    Dp,
    /// 14-bit.
    Df,
    /// 15-bit.
    Dg,
    /// 16-bit.
    Dh,
    /// 31-bit.
    Dv,
}

impl DispClass {
    /// Width of the class in bits.
    pub const fn bits(self) -> u32 {
        match self {
            DispClass::Dp => 12,
            DispClass::Df => 14,
            DispClass::Dg => 15,
            DispClass::Dh => 16,
            DispClass::Dv => 31,
        }
    }

    /// Smallest class admitting `value`.
    pub const fn fitting(value: u32) -> Self {
        if fits(value, 12) {
            DispClass::Dp
        } else if fits(value, 14) {
            DispClass::Df
        } else if fits(value, 15) {
            DispClass::Dg
        } else if fits(value, 16) {
            DispClass::Dh
        } else {
            DispClass::Dv
        }
    }
}

/// Bytes a displacement must leave free inside its class for pair members:
/// four 32-byte members at the widest pairing.
pub const PAIR_SPAN: u32 = 0x80;

const fn fits(value: u32, bits: u32) -> bool {
    value % 16 == 0 && (value as u64) + PAIR_SPAN as u64 <= 1u64 << bits
}

/// A checked displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Disp {
    value: u32,
    class: DispClass,
}

macro_rules! disp_ctor {
    ($($(#[$doc:meta])* $name:ident => $class:ident;)*) => {$(
        $(#[$doc])*
        #[inline]
        pub fn $name<const D: u32>() -> Self {
            const {
                assert!(
                    fits(D, DispClass::$class.bits()),
                    "displacement must be 16-byte aligned and leave 128 bytes inside its class"
                )
            };
            Self { value: D, class: DispClass::$class }
        }
    )*};
}

impl Disp {
    disp_ctor! {
        /// 12-bit class displacement.
        dp => Dp;
        /// 14-bit class displacement.
        df => Df;
        /// 15-bit class displacement.
        dg => Dg;
        /// 16-bit class displacement.
        dh => Dh;
        /// 31-bit class displacement.
        dv => Dv;
    }

    /// Zero displacement.
    pub const ZERO: Disp = Disp {
        value: 0,
        class: DispClass::Dp,
    };

    /// Displacement computed at runtime; picks the smallest fitting class.
    ///
    /// Returns `None` when `value` is misaligned or too large for every class.
    pub const fn checked(value: u32) -> Option<Self> {
        if fits(value, DispClass::Dv.bits()) {
            Some(Self {
                value,
                class: DispClass::fitting(value),
            })
        } else {
            None
        }
    }

    /// Offset of the `N`th logical vector of profile `T`.
    ///
    /// Fails to compile when the offset leaves no class.
    #[inline]
    pub fn vector<T: Target, const N: u32>() -> Self {
        const {
            assert!(
                fits(N * T::VECTOR_BYTES, DispClass::Dv.bits()),
                "vector offset must fit a displacement class"
            )
        };
        let value = N * T::VECTOR_BYTES;
        Self {
            value,
            class: DispClass::fitting(value),
        }
    }

    /// Info block offsets are small, aligned layout constants.
    pub(crate) const fn info(value: u32) -> Self {
        Self {
            value,
            class: DispClass::Dp,
        }
    }

    /// Byte value.
    pub const fn value(self) -> u32 {
        self.value
    }

    /// Class.
    pub const fn class(self) -> DispClass {
        self.class
    }
}

/// How a memory operand combines its registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrMode {
    /// `base + disp`.
    Plain,
    /// `base + index + disp`.
    Index(Breg),
    /// `base + index * element_size + disp`.
    Scaled(Breg),
}

/// Memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mem {
    /// Base register.
    pub base: Breg,
    /// Addressing mode.
    pub mode: AddrMode,
    /// Displacement.
    pub disp: Disp,
}

impl Mem {
    /// `base + disp`.
    pub const fn plain(base: Breg, disp: Disp) -> Self {
        Self {
            base,
            mode: AddrMode::Plain,
            disp,
        }
    }

    /// `base + index + disp`.
    pub const fn index(base: Breg, index: Breg, disp: Disp) -> Self {
        Self {
            base,
            mode: AddrMode::Index(index),
            disp,
        }
    }

    /// `base + index * element_size + disp`.
    pub const fn scaled(base: Breg, index: Breg, disp: Disp) -> Self {
        Self {
            base,
            mode: AddrMode::Scaled(index),
            disp,
        }
    }

    /// Info block slot at `offset` from `Rebp`, as laid out by
    /// [`crate::info::InfoLayout`].
    pub const fn info(offset: u32) -> Self {
        Self::plain(Breg::Rebp, Disp::info(offset))
    }
}

/// Register or memory source operand.
pub enum Src<T> {
    /// Vector register.
    Reg(Xreg<T>),
    /// Memory operand of one logical vector.
    Mem(Mem),
}

impl<T> Clone for Src<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Src<T> {}

impl<T> fmt::Debug for Src<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Src::Reg(reg) => reg.fmt(f),
            Src::Mem(mem) => mem.fmt(f),
        }
    }
}

impl<T> From<Xreg<T>> for Src<T> {
    fn from(reg: Xreg<T>) -> Self {
        Src::Reg(reg)
    }
}

impl<T> From<Mem> for Src<T> {
    fn from(mem: Mem) -> Self {
        Src::Mem(mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Fp32, Fp64, A64_256, A64_512, R8, X64_1024, X64_128};

    #[test]
    fn classes_pick_smallest_fit() {
        assert_eq!(DispClass::fitting(0), DispClass::Dp);
        assert_eq!(DispClass::fitting(0xF80), DispClass::Dp);
        assert_eq!(DispClass::fitting(0xF90), DispClass::Df);
        assert_eq!(DispClass::fitting(0x7F80), DispClass::Dg);
        assert_eq!(DispClass::fitting(0xFF80), DispClass::Dh);
        assert_eq!(DispClass::fitting(0x10000), DispClass::Dv);
    }

    #[test]
    fn checked_rejects_misaligned_and_huge() {
        assert_eq!(Disp::checked(8), None);
        assert_eq!(Disp::checked(0x7FFF_FFF0), None);
        let disp = Disp::checked(0x1000).expect("aligned");
        assert_eq!(disp.class(), DispClass::Df);
        assert_eq!(disp.value(), 0x1000);
    }

    #[test]
    fn const_constructors_keep_class() {
        assert_eq!(Disp::dh::<0x40>().class(), DispClass::Dh);
        assert_eq!(Disp::dv::<0x12340>().value(), 0x12340);
        assert_eq!(Disp::dp::<0xF80>().value(), 0xF80);
    }

    #[test]
    fn vector_offsets_scale_with_profile() {
        assert_eq!(Disp::vector::<X64_128<Fp32>, 1>().value(), 16);
        assert_eq!(Disp::vector::<X64_1024<Fp64>, 1>().value(), 128);
        let far = Disp::vector::<X64_1024<Fp32>, 40>();
        assert_eq!(far.value(), 40 * 128);
        assert_eq!(far.class(), DispClass::Df);
        assert_eq!(Disp::vector::<A64_256<Fp32>, 0>(), Disp::ZERO);
    }

    #[test]
    fn reduced_budget_limits_nameable_registers() {
        let top: Xreg<A64_256<Fp32, R8>> = Xreg::at::<7>();
        assert_eq!(top.index(), 7);
        assert_eq!(Xreg::<A64_256<Fp32, R8>>::all().count(), 8);
        assert_eq!(Xreg::<A64_256<Fp32>>::all().count(), 14);
        assert_eq!(Xreg::<X64_1024<Fp32, R8>>::all().count(), 4);
    }

    #[test]
    fn registers_are_profile_bound() {
        let x: Xreg<X64_128> = Xreg::at::<15>();
        assert_eq!(x.index(), 15);
        assert_eq!(Xreg::<A64_512>::all().count(), 7);
        assert_eq!(Xreg::<A64_512>::mask().index(), 0);
    }
}
