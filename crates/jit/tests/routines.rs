use shale_jit::dsl::*;
use shale_jit::{build_routine, build_routine_ret, BackendConfig, MemOrder, RoutineContext, Ty};

fn configs() -> Vec<BackendConfig> {
    let mut portable = BackendConfig::default();
    portable.force_portable = true;
    portable.verify = true;
    let mut native = BackendConfig::default();
    native.verify = true;
    vec![portable, native]
}

/// Build and run the same routine under every engine, handing each run a
/// fresh copy of `data`; returns one output buffer per engine.
fn run_engines(name: &str, data: &[f32], body: impl Fn() + Copy) -> Vec<Vec<f32>> {
    configs()
        .iter()
        .map(|config| {
            let routine = build_routine(name, &[Ty::Ptr], config, body).unwrap();
            let mut buf = data.to_vec();
            let ctx = RoutineContext::new().ptr(0, buf.as_mut_ptr());
            unsafe { routine.call(&ctx) };
            buf
        })
        .collect()
}

fn run_engines_identical(name: &str, data: &[f32], body: impl Fn() + Copy) -> Vec<f32> {
    let results = run_engines(name, data, body);
    for other in &results[1..] {
        for (a, b) in results[0].iter().zip(other) {
            assert_eq!(
                a.to_bits(),
                b.to_bits(),
                "engines disagree in {name}: {a} vs {b}"
            );
        }
    }
    results.into_iter().next().unwrap()
}

#[test]
fn float4_arithmetic() {
    let out = run_engines_identical(
        "float4_arith",
        &[1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0],
        || {
            let data = arg_ptr::<Float4>(0);
            let a = data.load();
            let b = data.offset_const(16).load();
            data.store(a * b + Float4::new(0.5, 0.5, 0.5, 0.5));
            data.offset_const(16).store(b / a - a);
        },
    );

    assert_eq!(&out[0..4], &[10.5, 40.5, 90.5, 160.5]);
    assert_eq!(&out[4..8], &[9.0, 8.0, 7.0, 6.0]);
}

#[test]
fn loop_accumulates() {
    let out = run_engines_identical("loop_sum", &[0.0], || {
        let data = arg_ptr::<Float>(0);
        let i = Var::<Int>::init(Int::from(1));
        let sum = Var::<Int>::init(Int::from(0));
        while_loop(
            || i.get().le(Int::from(10)),
            || {
                sum.set(sum.get() + i.get());
                i.set(i.get() + Int::from(1));
            },
        );
        data.store(Float::from(sum.get()));
    });

    assert_eq!(out[0], 55.0);
}

#[test]
fn branches_join_through_slots() {
    let out = run_engines_identical("branchy", &[5.0, 0.0], || {
        let data = arg_ptr::<Float>(0);
        let x = data.load();
        let result = Var::<Float>::init(Float::from(0.0));
        if_then_else(
            x.gt(Float::from(3.0)),
            || result.set(x * Float::from(2.0)),
            || result.set(x - Float::from(1.0)),
        );
        data.offset_const(4).store(result.get());
    });
    assert_eq!(out[1], 10.0);

    let out = run_engines_identical("branchy2", &[2.0, 0.0], || {
        let data = arg_ptr::<Float>(0);
        let x = data.load();
        let result = Var::<Float>::init(Float::from(0.0));
        if_then_else(
            x.gt(Float::from(3.0)),
            || result.set(x * Float::from(2.0)),
            || result.set(x - Float::from(1.0)),
        );
        data.offset_const(4).store(result.get());
    });
    assert_eq!(out[1], 1.0);
}

#[test]
fn round_to_nearest_is_banker() {
    let out = run_engines_identical("round_int", &[2.5, 3.5, -2.5, 0.0, 0.0, 0.0, 0.0, 0.0], || {
        let data = arg_ptr::<Float>(0);
        for i in 0..3 {
            let v = data.offset_const(i * 4).load();
            let r = round_int(v);
            data.offset_const(12 + i * 4)
                .cast::<Float>()
                .store(Float::from(r));
        }
    });

    assert_eq!(out[3], 2.0);
    assert_eq!(out[4], 4.0);
    assert_eq!(out[5], -2.0);
}

#[test]
fn bitcast_same_size_is_identity() {
    let out = run_engines_identical("bitcast_chain", &[1.25, 0.0], || {
        let data = arg_ptr::<Float>(0);
        let v = data.load();
        let through: Float = bitcast(bitcast::<UInt, Float>(v));
        data.offset_const(4).store(through);
    });

    assert_eq!(out[1], 1.25);
}

#[test]
fn swizzle_and_shuffle() {
    let out = run_engines_identical("swizzles", &[1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0], || {
        let data = arg_ptr::<Float4>(0);
        let v = data.load();
        let wzyx = v.swizzle(sel(3, 2, 1, 0));
        data.offset_const(16).store(wzyx);
    });
    assert_eq!(&out[4..8], &[4.0, 3.0, 2.0, 1.0]);

    let out = run_engines_identical("splat", &[7.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], || {
        let data = arg_ptr::<Float>(0);
        let x = data.load();
        data.cast::<Float4>()
            .offset_const(16)
            .store(Float4::splat(x));
    });
    assert_eq!(&out[4..8], &[7.0; 4]);
}

#[test]
fn int_vector_compare_and_select() {
    let out = run_engines_identical(
        "cmp_select",
        &[1.0, 5.0, 3.0, 8.0, 2.0, 2.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0],
        || {
            let data = arg_ptr::<Float4>(0);
            let a = data.load();
            let b = data.offset_const(16).load();
            let mask = a.gt(b);
            let picked = mask.select_lanes(a, b);
            data.offset_const(32).store(picked);
        },
    );

    assert_eq!(&out[8..12], &[2.0, 5.0, 3.0, 8.0]);
}

#[test]
fn packing_saturates() {
    // 0x10000 saturates to 0xffff through unsigned 16-bit packing.
    let out = run_engines_identical("packs", &[0.0; 8], || {
        let data = arg_ptr::<Float>(0);
        let wide = Int4::new(0x10000, 0x1234, -5, 255);
        let packed: UShort8 = pack_unsigned(wide, wide);
        data.cast::<UShort8>().store(packed);
    });

    let bits = out[0].to_bits();
    assert_eq!(bits & 0xffff, 0xffff);
    assert_eq!(bits >> 16, 0x1234);
    let bits2 = out[1].to_bits();
    assert_eq!(bits2 & 0xffff, 0);
    assert_eq!(bits2 >> 16, 255);
}

#[test]
fn sign_mask_gathers_lanes() {
    let out = run_engines_identical(
        "signmask",
        &[-1.0, 2.0, -3.0, 4.0, 0.0, 0.0, 0.0, 0.0],
        || {
            let data = arg_ptr::<Float4>(0);
            let v = data.load();
            let mask = sign_mask(v);
            data.offset_const(16)
                .cast::<Float>()
                .store(Float::from(mask));
        },
    );

    assert_eq!(out[4], 5.0); // lanes 0 and 2
}

#[test]
fn transcendentals_agree_across_engines() {
    let input: Vec<f32> = vec![0.3, 1.7, 2.9, 0.1, 0.0, 0.0, 0.0, 0.0];
    let out = run_engines_identical("transcendental", &input, || {
        let data = arg_ptr::<Float4>(0);
        let v = data.load();
        data.offset_const(16).store(sin(v) + sqrt(v) * exp2(v));
    });

    for i in 0..4 {
        let x = input[i];
        let expect = x.sin() + x.sqrt() * x.exp2();
        assert_eq!(out[4 + i].to_bits(), expect.to_bits());
    }
}

#[test]
fn atomics_round_trip() {
    for config in configs() {
        let routine = build_routine("atomics", &[Ty::Ptr], &config, || {
            let cell = arg_ptr::<UInt>(0);
            let v = atomic_load(cell, MemOrder::Acquire);
            atomic_store(cell, v + UInt::from(3u32), MemOrder::SeqCst);
        })
        .unwrap();

        let cell = std::sync::atomic::AtomicU32::new(39);
        let ctx = RoutineContext::new().ptr(0, cell.as_ptr());
        unsafe { routine.call(&ctx) };
        assert_eq!(cell.load(std::sync::atomic::Ordering::SeqCst), 42);
    }
}

#[test]
fn returned_condition() {
    for config in configs() {
        let routine = build_routine_ret("returns_bool", &[Ty::Ptr], Ty::Bool, &config, || {
            let data = arg_ptr::<Float>(0);
            let v = data.load();
            if_then_else(
                v.gt(Float::from(0.0)),
                || ret(Bool::from(true)),
                || ret(Bool::from(false)),
            );
        })
        .unwrap();

        let pos: f32 = 2.0;
        let neg: f32 = -2.0;
        assert_ne!(unsafe { routine.call(&RoutineContext::new().ptr(0, &pos)) }, 0);
        assert_eq!(unsafe { routine.call(&RoutineContext::new().ptr(0, &neg)) }, 0);
    }
}

#[test]
fn unsigned_conversion_is_exact() {
    let out = run_engines_identical("u2f", &[0.0, 0.0], || {
        let data = arg_ptr::<Float>(0);
        let big = UInt::from(0xfffffff0u32);
        data.store(Float::from(big));
        data.offset_const(4).store(Float::from(UInt::from(7u32)));
    });

    assert_eq!(out[0], 0xfffffff0u32 as f32);
    assert_eq!(out[1], 7.0);
}

#[test]
fn do_until_runs_at_least_once() {
    let out = run_engines_identical("do_until", &[0.0], || {
        let data = arg_ptr::<Float>(0);
        let n = Var::<Int>::init(Int::from(10));
        let steps = Var::<Int>::init(Int::from(0));
        do_until(
            || {
                n.set(n.get() - Int::from(3));
                steps.set(steps.get() + Int::from(1));
            },
            || n.get().le(Int::from(0)),
        );
        data.store(Float::from(steps.get()));
    });
    // 10 → 7 → 4 → 1 → -2: four trips.
    assert_eq!(out[0], 4.0);
}

#[test]
fn for_loop_counts() {
    let out = run_engines_identical("for_loop", &[0.0], || {
        let data = arg_ptr::<Float>(0);
        let i = Var::<Int>::new();
        let acc = Var::<Float>::init(Float::from(0.0));
        for_loop(
            || i.set(Int::from(0)),
            || i.get().lt(Int::from(5)),
            || i.set(i.get() + Int::from(1)),
            || acc.set(acc.get() + Float::from(2.0)),
        );
        data.store(acc.get());
    });
    assert_eq!(out[0], 10.0);
}

#[test]
fn optimizer_passes_preserve_behavior() {
    use shale_jit::Pass;

    let all = vec![
        Pass::Sroa,
        Pass::EarlyCse,
        Pass::InstructionCombining,
        Pass::Sccp,
        Pass::Reassociate,
        Pass::Gvn,
        Pass::Licm,
        Pass::DeadStoreElimination,
        Pass::CfgSimplification,
        Pass::AggressiveDce,
    ];

    let body = || {
        let data = arg_ptr::<Float>(0);
        let x = data.load();
        let acc = Var::<Float>::init(Float::from(0.0));
        let i = Var::<Int>::init(Int::from(0));
        while_loop(
            || i.get().lt(Int::from(4)),
            || {
                // Loop-invariant subexpression plus a varying term.
                let inv = x * Float::from(3.0) + Float::from(1.0);
                acc.set(acc.get() + inv + Float::from(i.get()));
                i.set(i.get() + Int::from(1) + Int::from(0));
            },
        );
        data.offset_const(4).store(acc.get());
    };

    let mut results = Vec::new();
    for passes in [Vec::new(), all] {
        let mut config = BackendConfig::default();
        config.passes = passes;
        config.verify = true;
        config.force_portable = true;

        let routine = build_routine("opt_equiv", &[Ty::Ptr], &config, body).unwrap();
        let mut buf = vec![1.5f32, 0.0];
        let ctx = RoutineContext::new().ptr(0, buf.as_mut_ptr());
        unsafe { routine.call(&ctx) };
        results.push(buf[1]);
    }

    assert_eq!(results[0].to_bits(), results[1].to_bits());
    // 4 iterations of (1.5*3 + 1) plus 0+1+2+3
    assert_eq!(results[0], 4.0 * 5.5 + 6.0);
}
