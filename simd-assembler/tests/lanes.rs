use proptest::prelude::*;
use simd_assembler::*;

fn run<T: Target>(kernel: &Kernel, setup: impl FnOnce(&mut LaneMachine)) -> LaneMachine {
    let mut machine = LaneMachine::new::<T>();
    setup(&mut machine);
    machine.run(kernel.program()).expect("program runs");
    machine
}

fn truncate_round_trip<T: Target>() -> Kernel {
    let mut asm = Asm::<T>::new();
    let (x, i, y) = (Xreg::at::<1>(), Xreg::at::<2>(), Xreg::at::<3>());
    asm.cvz(i, x);
    asm.cvn(y, i);
    asm.finish().expect("assembles")
}

fn zero_mask_merge<T: Target>() -> Kernel {
    let mut asm = Asm::<T>::new();
    asm.mmv(Xreg::at::<1>(), Xreg::at::<2>());
    asm.finish().expect("assembles")
}

fn pairwise_add<T: Target>() -> Kernel {
    let mut asm = Asm::<T>::new();
    let (d, s) = (Xreg::at::<1>(), Xreg::at::<2>());
    asm.adp3(d, s, s);
    asm.finish().expect("assembles")
}

proptest! {
    #[test]
    fn prop_truncation_round_trips_f32(values in prop::array::uniform4(-8_388_608.0f32..8_388_608.0)) {
        let kernel = truncate_round_trip::<X64_128<Fp32>>();
        let inputs: Vec<f64> = values.iter().map(|&v| v as f64).collect();
        let machine = run::<X64_128<Fp32>>(&kernel, |m| m.set_reg_f64(1, &inputs).unwrap());
        let expected: Vec<f64> = values.iter().map(|v| v.trunc() as f64).collect();
        prop_assert_eq!(machine.reg_f64(3).unwrap(), expected);
    }

    #[test]
    fn prop_truncation_round_trips_f64_pairs(values in prop::array::uniform4(-1.0e15f64..1.0e15)) {
        let kernel = truncate_round_trip::<A64_256<Fp64>>();
        let machine = run::<A64_256<Fp64>>(&kernel, |m| m.set_reg_f64(1, &values).unwrap());
        let expected: Vec<f64> = values.iter().map(|v| v.trunc()).collect();
        prop_assert_eq!(machine.reg_f64(3).unwrap(), expected);
    }

    #[test]
    fn prop_zero_mask_merge_keeps_destination(
        keep in prop::array::uniform8(any::<u32>()),
        take in prop::array::uniform8(any::<u32>()),
    ) {
        let kernel = zero_mask_merge::<X64_256<Fp32>>();
        let keep: Vec<u64> = keep.iter().map(|&v| v as u64).collect();
        let take: Vec<u64> = take.iter().map(|&v| v as u64).collect();
        let machine = run::<X64_256<Fp32>>(&kernel, |m| {
            m.set_reg_bits(0, &[0; 8]).unwrap();
            m.set_reg_bits(1, &keep).unwrap();
            m.set_reg_bits(2, &take).unwrap();
        });
        prop_assert_eq!(machine.reg_bits(1).unwrap(), keep.as_slice());
    }

    #[test]
    fn prop_pairwise_add_keeps_lane_order(values in prop::array::uniform4(-1.0e6f32..1.0e6)) {
        let [a, b, c, d] = values;
        let kernel = pairwise_add::<X64_128<Fp32>>();
        let inputs: Vec<f64> = values.iter().map(|&v| v as f64).collect();
        let machine = run::<X64_128<Fp32>>(&kernel, |m| m.set_reg_f64(2, &inputs).unwrap());
        let expected = [a + b, c + d, a + b, c + d].map(|v| v as f64);
        prop_assert_eq!(machine.reg_f64(1).unwrap(), expected.to_vec());
    }
}

#[test]
fn full_mask_merge_takes_source() {
    let kernel = zero_mask_merge::<M64_512<Fp32>>();
    let machine = run::<M64_512<Fp32>>(&kernel, |m| {
        m.set_reg_bits(0, &[u32::MAX as u64; 16]).unwrap();
        m.set_reg_f64(1, &[1.0; 16]).unwrap();
        m.set_reg_f64(2, &[2.0; 16]).unwrap();
    });
    assert_eq!(machine.reg_f64(1).unwrap(), [2.0; 16]);
}

#[test]
fn full_reductions_fill_every_lane() {
    let mut asm = Asm::<A64_256<Fp32>>::new();
    let (sum, prod, low, high, s) = (
        Xreg::at::<1>(),
        Xreg::at::<2>(),
        Xreg::at::<3>(),
        Xreg::at::<4>(),
        Xreg::at::<5>(),
    );
    asm.adh(sum, s);
    asm.mlh(prod, s);
    asm.mnh(low, s);
    asm.mxh(high, s);
    let kernel = asm.finish().expect("assembles");

    let machine = run::<A64_256<Fp32>>(&kernel, |m| {
        m.set_reg_f64(5, &[1.0, 2.0, 3.0, 4.0, -1.0, 0.5, 2.0, 1.0]).unwrap();
    });
    assert_eq!(machine.reg_f64(1).unwrap(), [12.5; 8]);
    assert_eq!(machine.reg_f64(2).unwrap(), [-24.0; 8]);
    assert_eq!(machine.reg_f64(3).unwrap(), [-1.0; 8]);
    assert_eq!(machine.reg_f64(4).unwrap(), [4.0; 8]);
}

#[test]
fn refinement_steps_converge() {
    let mut asm = Asm::<X64_128<Fp64>>::new();
    let (g, s, h, t) = (Xreg::at::<1>(), Xreg::at::<2>(), Xreg::at::<3>(), Xreg::at::<4>());
    asm.rcs(g, s);
    asm.rss(h, t);
    let kernel = asm.finish().expect("assembles");

    let machine = run::<X64_128<Fp64>>(&kernel, |m| {
        m.set_reg_f64(1, &[0.24, 0.126]).unwrap();
        m.set_reg_f64(2, &[4.0, 8.0]).unwrap();
        m.set_reg_f64(3, &[0.49, 0.33]).unwrap();
        m.set_reg_f64(4, &[4.0, 9.0]).unwrap();
    });
    let recip = machine.reg_f64(1).unwrap();
    assert!((recip[0] - 0.25).abs() < (0.24f64 - 0.25).abs() / 10.0);
    assert!((recip[1] - 0.125).abs() < (0.126f64 - 0.125).abs() / 10.0);
    let rsqrt = machine.reg_f64(3).unwrap();
    assert!((rsqrt[0] - 0.5).abs() < 0.001);
    assert!((rsqrt[1] - 1.0 / 3.0).abs() < 0.001);
}

#[test]
fn explicit_rounding_scopes_restore_control_state() {
    let mut asm = Asm::<P64_256<Fp32>>::new();
    let (d, s) = (Xreg::at::<1>(), Xreg::at::<2>());
    asm.cvr(d, s, RoundingMode::Minus);
    let kernel = asm.finish().expect("assembles");

    let machine = run::<P64_256<Fp32>>(&kernel, |m| {
        m.set_reg_f64(2, &[1.5, -1.5, 2.5, -2.5, 0.2, -0.2, 7.9, -7.9]).unwrap();
    });
    assert_eq!(machine.reg_int(1).unwrap(), [1, -2, 2, -3, 0, -1, 7, -8]);
    assert_eq!(machine.mode(), RoundingMode::Nearest);
}

fn estimate_and_refine<T: Target>(compat: Compat) -> Kernel {
    let mut asm = Asm::<T>::new().with_compat(compat);
    let (g, s, first) = (Xreg::at::<1>(), Xreg::at::<2>(), Xreg::at::<3>());
    asm.rce(g, s);
    asm.mov(first, g);
    asm.rcs(g, s);
    asm.finish().expect("assembles")
}

#[test]
fn native_reciprocal_estimate_is_refined() {
    let divisors = [3.0, 7.0, 0.1, -10.0];
    let kernel = estimate_and_refine::<X64_128<Fp32>>(Compat::default());
    let machine = run::<X64_128<Fp32>>(&kernel, |m| m.set_reg_f64(2, &divisors).unwrap());

    let estimate = machine.reg_f64(3).unwrap();
    let refined = machine.reg_f64(1).unwrap();
    let bound = 2f64.powi(-(ESTIMATE_BITS as i32 - 1));
    for ((&d, &e), &r) in divisors.iter().zip(&estimate).zip(&refined) {
        let exact = 1.0 / d;
        assert!(((e - exact) / exact).abs() < bound, "estimate of 1/{d}");
        assert!(((r - exact) / exact).abs() < 1e-6, "refined 1/{d}");
    }
    assert_ne!(estimate[0], (1.0f64 / 3.0) as f32 as f64);
}

#[test]
fn compat_reciprocal_is_exact_without_refinement() {
    let compat = Compat {
        rcp: true,
        ..Compat::default()
    };
    let divisors = [3.0, 7.0, 0.1, -10.0];
    let kernel = estimate_and_refine::<A64_128<Fp32>>(compat);
    let machine = run::<A64_128<Fp32>>(&kernel, |m| m.set_reg_f64(2, &divisors).unwrap());

    let expected: Vec<f64> = divisors.iter().map(|&d| (1.0f32 / d as f32) as f64).collect();
    assert_eq!(machine.reg_f64(3).unwrap(), expected);
    assert_eq!(machine.reg_f64(1).unwrap(), expected);
    assert!(!kernel.program().iter().any(|inst| matches!(inst, Inst::Arith { op: inst::ArithOp::Mul, .. })));
}

#[test]
fn compat_rsqrt_matches_exact_quotient() {
    let compat = Compat {
        rsq: true,
        ..Compat::default()
    };
    let mut asm = Asm::<M64_256<Fp64>>::new().with_compat(compat);
    let (d, s) = (Xreg::at::<1>(), Xreg::at::<2>());
    asm.rse(d, s);
    let kernel = asm.finish().expect("assembles");

    let inputs = [4.0, 2.0, 9.0, 0.5];
    let machine = run::<M64_256<Fp64>>(&kernel, |m| m.set_reg_f64(2, &inputs).unwrap());
    let expected: Vec<f64> = inputs.iter().map(|v: &f64| 1.0 / v.sqrt()).collect();
    assert_eq!(machine.reg_f64(1).unwrap(), expected);
}

fn multiply_add<T: Target>(op: FusedOp) -> Kernel {
    let mut asm = Asm::<T>::new().with_compat(Compat::default());
    let (g, s, t) = (Xreg::at::<1>(), Xreg::at::<2>(), Xreg::at::<3>());
    match op {
        FusedOp::Fma => asm.fma(g, s, t),
        FusedOp::Fms => asm.fms(g, s, t),
    }
    asm.finish().expect("assembles")
}

fn multiply_add_lane0<T: Target>(op: FusedOp, g: f64, s: f64, t: f64) -> f64 {
    let kernel = multiply_add::<T>(op);
    let lanes = T::LANES as usize;
    let machine = run::<T>(&kernel, |m| {
        m.set_reg_f64(1, &vec![g; lanes]).unwrap();
        m.set_reg_f64(2, &vec![s; lanes]).unwrap();
        m.set_reg_f64(3, &vec![t; lanes]).unwrap();
    });
    machine.reg_f64(1).unwrap()[0]
}

#[test]
fn fused_families_round_once() {
    // (1 + e)(1 - e) = 1 - e^2 rounds to 1.0 on its own.
    let e = 2f64.powi(-30);
    let (s, t) = (1.0 + e, 1.0 - e);
    let fused = -e * e;
    assert_eq!(multiply_add_lane0::<X64_256<Fp64>>(FusedOp::Fma, -1.0, s, t), fused);
    assert_eq!(multiply_add_lane0::<A64_256<Fp64>>(FusedOp::Fma, -1.0, s, t), fused);
    assert_eq!(multiply_add_lane0::<P64_128<Fp64>>(FusedOp::Fms, 1.0, s, t), -fused);
    assert_eq!(multiply_add_lane0::<X64_128<Fp64>>(FusedOp::Fma, -1.0, s, t), 0.0);
    assert_eq!(multiply_add_lane0::<X64_128<Fp64>>(FusedOp::Fms, 1.0, s, t), 0.0);
}

proptest! {
    #[test]
    fn prop_multiply_add_matches_exact_small_integers(
        g in -1000i32..1000,
        s in -1000i32..1000,
        t in -1000i32..1000,
    ) {
        let (g, s, t) = (g as f64, s as f64, t as f64);
        prop_assert_eq!(multiply_add_lane0::<X64_128<Fp32>>(FusedOp::Fma, g, s, t), g + s * t);
        prop_assert_eq!(multiply_add_lane0::<M64_512<Fp32>>(FusedOp::Fms, g, s, t), g - s * t);
        prop_assert_eq!(multiply_add_lane0::<X64_1024<Fp64, R8>>(FusedOp::Fms, g, s, t), g - s * t);
    }
}
