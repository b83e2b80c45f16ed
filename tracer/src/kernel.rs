//! Demo shading kernel: one lit sphere, written once for every profile.
//!
//! Inputs per invocation, one logical vector each:
//!
//! ```text
//! [Reax]        x coordinates, sphere radius 1
//! [Reax + V]    y coordinates
//! [Resi]        intensity scale
//! [Redi]        background value (integer lanes)
//! [Recx]        output (integer lanes)
//! ```

use simd_assembler::{xregs, Asm, Breg, Disp, EmitError, Kernel, MaskCheck, Mem, Target};

/// Assemble the shading kernel for profile `T`.
///
/// Four registers, so the quad-paired profiles fit.
pub fn shade<T: Target>() -> Result<Kernel, EmitError> {
    let mut asm = Asm::<T>::new();
    xregs!(T; xmask = 0, xa = 1, xb = 2, xc = 3);

    let one = Mem::info(asm.info().gpc01());
    let miss = asm.label();
    let done = asm.label();

    // r = x*x + y*y
    asm.ld(xa, Mem::plain(Breg::Reax, Disp::ZERO));
    asm.mul(xa, xa);
    asm.ld(xb, Mem::plain(Breg::Reax, Disp::vector::<T, 1>()));
    asm.mul(xb, xb);
    asm.add(xa, xb);
    asm.ld(xb, one);
    asm.clt3(xmask, xa, xb);
    asm.mkj(xmask, MaskCheck::None, miss);

    // z = sqrt(1 - r) * scale, truncated
    asm.sub(xb, xa);
    asm.sqr(xc, xb);
    asm.mul(xc, Mem::plain(Breg::Resi, Disp::ZERO));
    asm.cvz(xa, xc);
    asm.ld(xb, Mem::plain(Breg::Redi, Disp::ZERO));
    asm.mmv(xb, xa);
    asm.st(xb, Mem::plain(Breg::Recx, Disp::ZERO));
    asm.jmp(done);

    asm.bind(miss);
    asm.ld(xb, Mem::plain(Breg::Redi, Disp::ZERO));
    asm.st(xb, Mem::plain(Breg::Recx, Disp::ZERO));
    asm.bind(done);

    asm.finish()
}
