#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![doc = r#"
Retargetable encoder for a closed vocabulary of SIMD operations.

A kernel is written once against [`Asm<T>`], generic over a [`Target`]
profile, and monomorphized per profile into x86 (SSE4.1, AVX2), AArch64
(NEON), POWER (VSX) or MIPS (MSA) machine code. Logical registers wider than
the native width are emulated by replaying every operation over two or four
physical members.

The recorded logical program runs unchanged on [`LaneMachine`], the
software lane model used for semantic checks.
"#]

mod asm;
mod builder;
mod error;
pub mod info;
pub mod inst;
pub mod isa;
mod lanes;
mod operand;
pub mod profile;

pub use asm::{Asm, Kernel, RoundingScope};
pub use builder::{ChunkSpan, CodeBuilder, Expansion, Label, PatchKind};
pub use error::EmitError;
pub use inst::{FusedOp, Inst, MaskCheck, RoundingMode};
pub use lanes::{LaneError, LaneMachine, RoundingGuard, ESTIMATE_BITS};
pub use operand::{AddrMode, Breg, Disp, DispClass, Mem, Src, Xreg, PAIR_SPAN};
pub use profile::*;
