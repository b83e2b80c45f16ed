//! Target profiles: the compile-time description of one build target.
//!
//! A profile fixes the architecture family, the logical vector width, the
//! element width and the register budget. Profiles are zero-sized types, so a
//! kernel written as `fn kernel<T: Target>(asm: &mut Asm<T>)` is monomorphized
//! once per profile and every emitter choice is resolved statically.
//!
//! The register budget is a second type parameter: `A64_256<Fp32, R8>` is the
//! same family and width limited to eight logical registers, with the member
//! stride derived from the reduced budget.
//!
//! The cargo features of this crate choose [`ActiveProfile`]; every profile
//! type stays nameable regardless, which is what lets one test binary cover
//! the whole catalogue.

use core::fmt;
use core::marker::PhantomData;

use crate::isa::{Avx2, Isa, Msa, Neon, Sse, Vsx};

/// Architecture family of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// x86-64 with SSE4.1 or AVX2.
    X64,
    /// AArch64 with AdvSIMD (NEON).
    A64,
    /// POWER9 with VSX.
    P64,
    /// MIPS64 release 6 with MSA.
    M64,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Arch::X64 => "x64",
            Arch::A64 => "a64",
            Arch::P64 => "p64",
            Arch::M64 => "m64",
        })
    }
}

/// Lane width of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementWidth {
    /// 32-bit lanes (`f32` / `i32`).
    W32,
    /// 64-bit lanes (`f64` / `i64`).
    W64,
}

impl ElementWidth {
    /// Lane size in bytes.
    pub const fn bytes(self) -> u32 {
        match self {
            ElementWidth::W32 => 4,
            ElementWidth::W64 => 8,
        }
    }

    /// Lane size in bits.
    pub const fn bits(self) -> u32 {
        self.bytes() * 8
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Fp32 {}
    impl Sealed for super::Fp64 {}
    impl Sealed for super::R8 {}
    impl Sealed for super::R16 {}
}

/// Element type parameter of a profile.
pub trait Element: sealed::Sealed + Copy + Default + fmt::Debug + Send + Sync + 'static {
    /// Width of one lane.
    const WIDTH: ElementWidth;
}

/// 32-bit floating point lanes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fp32;

/// 64-bit floating point lanes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fp64;

impl Element for Fp32 {
    const WIDTH: ElementWidth = ElementWidth::W32;
}

impl Element for Fp64 {
    const WIDTH: ElementWidth = ElementWidth::W64;
}

/// Register budget parameter of a profile: the most logical registers a
/// kernel may name.
pub trait Budget: sealed::Sealed + Copy + Default + fmt::Debug + PartialEq + Eq + Send + Sync + 'static {
    /// Upper bound on [`Target::REGS`].
    const LIMIT: u8;
}

/// Eight nameable registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct R8;

/// Sixteen nameable registers, or the family maximum when lower.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct R16;

impl Budget for R8 {
    const LIMIT: u8 = 8;
}

impl Budget for R16 {
    const LIMIT: u8 = 16;
}

/// Registers left to a profile whose family provides `family` under `budget`.
const fn budgeted(family: u8, budget: u8) -> u8 {
    if family < budget {
        family
    } else {
        budget
    }
}

/// Member stride for `regs` logical registers replayed `pairing` times.
///
/// Members sit at power-of-two distances so that member `k` of register `r`
/// is `r + k * stride`.
const fn member_stride(pairing: u8, regs: u8) -> u8 {
    if pairing > 1 {
        regs.next_power_of_two()
    } else {
        0
    }
}

/// Whether every control word written by a kernel flushes denormals.
pub const FLUSH_ZERO: bool = cfg!(feature = "flush-zero");

/// Precision and rounding trade-offs a kernel is assembled under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compat {
    /// `rce` divides `1.0` exactly and `rcs` emits nothing.
    pub rcp: bool,
    /// `rse` is `1.0 / sqrt` exactly and `rss` emits nothing.
    pub rsq: bool,
    /// Unfused `fma`/`fms` run in the current rounding mode instead of
    /// round-to-nearest.
    pub fmr: bool,
}

impl Compat {
    /// Set by the `compat-rcp`, `compat-rsq` and `compat-fmr` features.
    pub const ACTIVE: Compat = Compat {
        rcp: cfg!(feature = "compat-rcp"),
        rsq: cfg!(feature = "compat-rsq"),
        fmr: cfg!(feature = "compat-fmr"),
    };
}

/// Hidden vector registers of a profile, in physical numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Temps {
    /// Memory-operand and mask accumulation temporary.
    pub m: u8,
    /// Second temporary; all-ones on POWER.
    pub q: u8,
}

/// A compile-time build target.
pub trait Target: Copy + Default + fmt::Debug + Send + Sync + 'static {
    /// Native encoder for this profile.
    type Isa: Isa;
    /// Element type.
    type Elem: Element;
    /// Register budget.
    type Regs: Budget;

    /// Profile name, e.g. `a64_256`, with an `_r8` suffix under [`R8`].
    const NAME: &'static str;
    /// Architecture family.
    const ARCH: Arch;
    /// Logical vector width in bits.
    const VECTOR_BITS: u32;
    /// Number of physical registers backing one logical register.
    const PAIRING: u8;
    /// Number of nameable logical vector registers.
    const REGS: u8;
    /// Distance between pair members in physical register numbering.
    const STRIDE: u8;
    /// Hidden registers reserved by the profile.
    const TEMPS: Temps;

    /// Logical vector width in bytes.
    const VECTOR_BYTES: u32 = Self::VECTOR_BITS / 8;
    /// Element width.
    const ELEMENT: ElementWidth = <Self::Elem as Element>::WIDTH;
    /// Lanes in one logical register.
    const LANES: u32 = Self::VECTOR_BYTES / <Self::Elem as Element>::WIDTH.bytes();
}

macro_rules! profiles {
    (@target $name:ident<$budget:ident> = $label:expr, $isa:ident, $arch:ident, $bits:literal,
        $pairing:literal, $regs:literal, ($m:literal, $q:literal)) => {
        impl<E: Element> Target for $name<E, $budget> {
            type Isa = $isa<E>;
            type Elem = E;
            type Regs = $budget;

            const NAME: &'static str = $label;
            const ARCH: Arch = Arch::$arch;
            const VECTOR_BITS: u32 = $bits;
            const PAIRING: u8 = $pairing;
            const REGS: u8 = budgeted($regs, $budget::LIMIT);
            const STRIDE: u8 = member_stride($pairing, Self::REGS);
            const TEMPS: Temps = Temps { m: $m, q: $q };
        }
    };
    ($(
        $(#[$doc:meta])*
        $name:ident = $label:literal {
            isa: $isa:ident,
            arch: $arch:ident,
            bits: $bits:literal,
            pairing: $pairing:literal,
            regs: $regs:literal,
            temps: ($m:literal, $q:literal),
        }
    )*) => {$(
        $(#[$doc])*
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name<E: Element = Fp32, B: Budget = R16>(PhantomData<(E, B)>);

        profiles!(@target $name<R16> = $label, $isa, $arch, $bits, $pairing, $regs, ($m, $q));
        profiles!(@target $name<R8> = concat!($label, "_r8"), $isa, $arch, $bits, $pairing, $regs, ($m, $q));
    )*};
}

profiles! {
    /// SSE4.1, 128-bit.
    X64_128 = "x64_128" {
        isa: Sse, arch: X64, bits: 128, pairing: 1, regs: 16, temps: (0, 0),
    }
    /// AVX2, 256-bit.
    X64_256 = "x64_256" {
        isa: Avx2, arch: X64, bits: 256, pairing: 1, regs: 16, temps: (0, 0),
    }
    /// AVX2 pairs emulating 512-bit registers.
    X64_512 = "x64_512" {
        isa: Avx2, arch: X64, bits: 512, pairing: 2, regs: 8, temps: (0, 0),
    }
    /// AVX2 quads emulating 1024-bit registers.
    X64_1024 = "x64_1024" {
        isa: Avx2, arch: X64, bits: 1024, pairing: 4, regs: 4, temps: (0, 0),
    }
    /// NEON, 128-bit.
    A64_128 = "a64_128" {
        isa: Neon, arch: A64, bits: 128, pairing: 1, regs: 16, temps: (31, 30),
    }
    /// NEON pairs emulating 256-bit registers.
    A64_256 = "a64_256" {
        isa: Neon, arch: A64, bits: 256, pairing: 2, regs: 14, temps: (31, 30),
    }
    /// NEON quads emulating 512-bit registers.
    A64_512 = "a64_512" {
        isa: Neon, arch: A64, bits: 512, pairing: 4, regs: 7, temps: (31, 23),
    }
    /// VSX, 128-bit.
    P64_128 = "p64_128" {
        isa: Vsx, arch: P64, bits: 128, pairing: 1, regs: 16, temps: (31, 30),
    }
    /// VSX pairs emulating 256-bit registers.
    P64_256 = "p64_256" {
        isa: Vsx, arch: P64, bits: 256, pairing: 2, regs: 14, temps: (31, 30),
    }
    /// MSA, 128-bit.
    M64_128 = "m64_128" {
        isa: Msa, arch: M64, bits: 128, pairing: 1, regs: 16, temps: (31, 30),
    }
    /// MSA pairs emulating 256-bit registers.
    M64_256 = "m64_256" {
        isa: Msa, arch: M64, bits: 256, pairing: 2, regs: 14, temps: (31, 30),
    }
    /// MSA quads emulating 512-bit registers.
    M64_512 = "m64_512" {
        isa: Msa, arch: M64, bits: 512, pairing: 4, regs: 7, temps: (31, 23),
    }
}

/// Element type chosen by the `fp64` feature.
#[cfg(not(feature = "fp64"))]
pub type ActiveElement = Fp32;
/// Element type chosen by the `fp64` feature.
#[cfg(feature = "fp64")]
pub type ActiveElement = Fp64;

/// Register budget chosen by the `regs-8` feature.
#[cfg(not(feature = "regs-8"))]
pub type ActiveBudget = R16;
/// Register budget chosen by the `regs-8` feature.
#[cfg(feature = "regs-8")]
pub type ActiveBudget = R8;

/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-x64", feature = "simd-128"))]
pub type ActiveProfile = X64_128<ActiveElement, ActiveBudget>;
/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-x64", feature = "simd-256"))]
pub type ActiveProfile = X64_256<ActiveElement, ActiveBudget>;
/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-x64", feature = "simd-512"))]
pub type ActiveProfile = X64_512<ActiveElement, ActiveBudget>;
/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-x64", feature = "simd-1024"))]
pub type ActiveProfile = X64_1024<ActiveElement, ActiveBudget>;
/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-a64", feature = "simd-128"))]
pub type ActiveProfile = A64_128<ActiveElement, ActiveBudget>;
/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-a64", feature = "simd-256"))]
pub type ActiveProfile = A64_256<ActiveElement, ActiveBudget>;
/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-a64", feature = "simd-512"))]
pub type ActiveProfile = A64_512<ActiveElement, ActiveBudget>;
/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-p64", feature = "simd-128"))]
pub type ActiveProfile = P64_128<ActiveElement, ActiveBudget>;
/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-p64", feature = "simd-256"))]
pub type ActiveProfile = P64_256<ActiveElement, ActiveBudget>;
/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-m64", feature = "simd-128"))]
pub type ActiveProfile = M64_128<ActiveElement, ActiveBudget>;
/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-m64", feature = "simd-256"))]
pub type ActiveProfile = M64_256<ActiveElement, ActiveBudget>;
/// Profile chosen by the `arch-*` and `simd-*` features.
#[cfg(all(feature = "arch-m64", feature = "simd-512"))]
pub type ActiveProfile = M64_512<ActiveElement, ActiveBudget>;

// Exactly one architecture family per build.
#[cfg(not(any(
    feature = "arch-x64",
    feature = "arch-a64",
    feature = "arch-p64",
    feature = "arch-m64"
)))]
compile_error!("select exactly one architecture family: arch-x64, arch-a64, arch-p64 or arch-m64");

#[cfg(any(
    all(feature = "arch-x64", feature = "arch-a64"),
    all(feature = "arch-x64", feature = "arch-p64"),
    all(feature = "arch-x64", feature = "arch-m64"),
    all(feature = "arch-a64", feature = "arch-p64"),
    all(feature = "arch-a64", feature = "arch-m64"),
    all(feature = "arch-p64", feature = "arch-m64")
))]
compile_error!("select exactly one architecture family: more than one arch-* feature is enabled");

// Exactly one vector width per build.
#[cfg(not(any(
    feature = "simd-128",
    feature = "simd-256",
    feature = "simd-512",
    feature = "simd-1024"
)))]
compile_error!("select exactly one vector width: simd-128, simd-256, simd-512 or simd-1024");

#[cfg(any(
    all(feature = "simd-128", feature = "simd-256"),
    all(feature = "simd-128", feature = "simd-512"),
    all(feature = "simd-128", feature = "simd-1024"),
    all(feature = "simd-256", feature = "simd-512"),
    all(feature = "simd-256", feature = "simd-1024"),
    all(feature = "simd-512", feature = "simd-1024")
))]
compile_error!("select exactly one vector width: more than one simd-* feature is enabled");

#[cfg(all(feature = "simd-1024", not(feature = "arch-x64")))]
compile_error!("unsupported vector width: simd-1024 needs arch-x64");

#[cfg(all(feature = "arch-p64", feature = "simd-512"))]
compile_error!("unsupported vector width: simd-512 needs arch-x64, arch-a64 or arch-m64");
