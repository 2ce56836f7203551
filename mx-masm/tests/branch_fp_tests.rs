//! Execution tests for branching, condition semantics, and floating point:
//! the twelve-way ordered/unordered truth table in all three consumption
//! modes, condition inversion at runtime, and the saturating scalar
//! conversions' boundary behavior.

#![cfg(all(target_arch = "x86_64", not(windows)))]

use masm::{
    DoubleCondition, ExecutableMemory, FpReg, Imm32, Imm64, MacroAssembler, Reg,
    RelationalCondition,
};

type FnFF = unsafe extern "C" fn(f64, f64) -> u64;
type FnF = unsafe extern "C" fn(f64) -> u64;
type Fn2 = unsafe extern "C" fn(u64, u64) -> u64;

fn compile(masm: MacroAssembler) -> ExecutableMemory {
    ExecutableMemory::from_code(&masm.finalize()).expect("executable region")
}

fn expected_double(cond: DoubleCondition, a: f64, b: f64) -> bool {
    let unordered = a.is_nan() || b.is_nan();
    match cond {
        DoubleCondition::EqualAndOrdered => !unordered && a == b,
        DoubleCondition::NotEqualAndOrdered => !unordered && a != b,
        DoubleCondition::GreaterThanAndOrdered => a > b,
        DoubleCondition::GreaterThanOrEqualAndOrdered => a >= b,
        DoubleCondition::LessThanAndOrdered => a < b,
        DoubleCondition::LessThanOrEqualAndOrdered => a <= b,
        DoubleCondition::EqualOrUnordered => unordered || a == b,
        DoubleCondition::NotEqualOrUnordered => unordered || a != b,
        DoubleCondition::GreaterThanOrUnordered => unordered || a > b,
        DoubleCondition::GreaterThanOrEqualOrUnordered => unordered || a >= b,
        DoubleCondition::LessThanOrUnordered => unordered || a < b,
        DoubleCondition::LessThanOrEqualOrUnordered => unordered || a <= b,
    }
}

const FP_PAIRS: [(f64, f64); 7] = [
    (1.0, 2.0),
    (2.0, 1.0),
    (1.0, 1.0),
    (f64::NAN, 1.0),
    (1.0, f64::NAN),
    (f64::NAN, f64::NAN),
    (-0.0, 0.0),
];

fn run_ff(masm: MacroAssembler, a: f64, b: f64) -> u64 {
    let memory = compile(masm);
    let entry = unsafe { std::mem::transmute::<*mut u8, FnFF>(memory.ptr()) };
    unsafe { entry(a, b) }
}

fn run_f(masm: MacroAssembler, a: f64) -> u64 {
    let memory = compile(masm);
    let entry = unsafe { std::mem::transmute::<*mut u8, FnF>(memory.ptr()) };
    unsafe { entry(a) }
}

#[test]
fn double_conditions_as_branches() {
    for cond in DoubleCondition::ALL {
        for (a, b) in FP_PAIRS {
            let mut masm = MacroAssembler::new();
            let taken = masm.branch_double(cond, FpReg::Xmm0, FpReg::Xmm1);
            masm.move_imm32(Imm32::new(0), Reg::Rax);
            masm.ret();
            masm.link(taken);
            masm.move_imm32(Imm32::new(1), Reg::Rax);
            masm.ret();
            assert_eq!(
                run_ff(masm, a, b),
                expected_double(cond, a, b) as u64,
                "branch {cond:?} ({a}, {b})"
            );
        }
    }
}

#[test]
fn double_conditions_as_materialized_booleans() {
    for cond in DoubleCondition::ALL {
        for (a, b) in FP_PAIRS {
            let mut masm = MacroAssembler::new();
            masm.compare_double(cond, FpReg::Xmm0, FpReg::Xmm1, Reg::Rax);
            masm.ret();
            assert_eq!(
                run_ff(masm, a, b),
                expected_double(cond, a, b) as u64,
                "compare {cond:?} ({a}, {b})"
            );
        }
    }
}

#[test]
fn double_conditions_as_conditional_moves() {
    let then_bits = 111.0f64.to_bits();
    let else_bits = 222.0f64.to_bits();
    // Exercise every destination-aliasing shape of the select.
    for (then_reg, else_reg, dest) in [
        (FpReg::Xmm2, FpReg::Xmm3, FpReg::Xmm4),
        (FpReg::Xmm2, FpReg::Xmm3, FpReg::Xmm2),
        (FpReg::Xmm2, FpReg::Xmm3, FpReg::Xmm3),
    ] {
        for cond in DoubleCondition::ALL {
            for (a, b) in FP_PAIRS {
                let mut masm = MacroAssembler::new();
                masm.move_imm64(Imm64::new(then_bits as i64), Reg::Rax);
                masm.move64_to_double(Reg::Rax, then_reg);
                masm.move_imm64(Imm64::new(else_bits as i64), Reg::Rax);
                masm.move64_to_double(Reg::Rax, else_reg);
                masm.move_double_conditionally(
                    cond, FpReg::Xmm0, FpReg::Xmm1, then_reg, else_reg, dest,
                );
                masm.move_double_to64(dest, Reg::Rax);
                masm.ret();
                let expected = if expected_double(cond, a, b) {
                    then_bits
                } else {
                    else_bits
                };
                assert_eq!(
                    run_ff(masm, a, b),
                    expected,
                    "select {cond:?} ({a}, {b}) dest={dest:?}"
                );
            }
        }
    }
}

#[test]
fn same_register_compare_short_circuits_to_nan_check() {
    for cond in DoubleCondition::ALL {
        for value in [1.5f64, 0.0, f64::NAN, f64::INFINITY] {
            let mut masm = MacroAssembler::new();
            masm.compare_double(cond, FpReg::Xmm0, FpReg::Xmm0, Reg::Rax);
            masm.ret();
            assert_eq!(
                run_f(masm, value),
                expected_double(cond, value, value) as u64,
                "self-compare {cond:?} ({value})"
            );
        }
    }
}

#[test]
fn float_conditions_spot_checks() {
    type FnGG = unsafe extern "C" fn(f32, f32) -> u64;
    for cond in [
        DoubleCondition::EqualAndOrdered,
        DoubleCondition::NotEqualOrUnordered,
        DoubleCondition::LessThanAndOrdered,
        DoubleCondition::GreaterThanOrUnordered,
    ] {
        for (a, b) in [(1.0f32, 2.0f32), (2.0, 1.0), (1.0, 1.0), (f32::NAN, 1.0)] {
            let mut masm = MacroAssembler::new();
            masm.compare_float(cond, FpReg::Xmm0, FpReg::Xmm1, Reg::Rax);
            masm.ret();
            let memory = compile(masm);
            let entry = unsafe { std::mem::transmute::<*mut u8, FnGG>(memory.ptr()) };
            let got = unsafe { entry(a, b) };
            assert_eq!(
                got,
                expected_double(cond, a as f64, b as f64) as u64,
                "float {cond:?} ({a}, {b})"
            );
        }
    }
}

#[test]
fn relational_branches_and_their_inversions() {
    let samples = [
        (0u64, 0u64),
        (1, 2),
        (2, 1),
        (0xFFFF_FFFF, 1),           // -1 vs 1 signed, huge vs 1 unsigned
        (0x8000_0000, 0x7FFF_FFFF), // INT32_MIN vs INT32_MAX
    ];
    let reference = |cond: RelationalCondition, a: u32, b: u32| -> bool {
        let (sa, sb) = (a as i32, b as i32);
        match cond {
            RelationalCondition::Equal => a == b,
            RelationalCondition::NotEqual => a != b,
            RelationalCondition::Above => a > b,
            RelationalCondition::AboveOrEqual => a >= b,
            RelationalCondition::Below => a < b,
            RelationalCondition::BelowOrEqual => a <= b,
            RelationalCondition::GreaterThan => sa > sb,
            RelationalCondition::GreaterThanOrEqual => sa >= sb,
            RelationalCondition::LessThan => sa < sb,
            RelationalCondition::LessThanOrEqual => sa <= sb,
        }
    };
    for cond in RelationalCondition::ALL {
        for &(a, b) in &samples {
            let build = |c: RelationalCondition| {
                let mut masm = MacroAssembler::new();
                let taken = masm.branch32(c, Reg::Rdi, Reg::Rsi);
                masm.move_imm32(Imm32::new(0), Reg::Rax);
                masm.ret();
                masm.link(taken);
                masm.move_imm32(Imm32::new(1), Reg::Rax);
                masm.ret();
                masm
            };
            let memory = compile(build(cond));
            let entry = unsafe { std::mem::transmute::<*mut u8, Fn2>(memory.ptr()) };
            let got = unsafe { entry(a, b) } != 0;
            assert_eq!(got, reference(cond, a as u32, b as u32), "{cond:?} {a} {b}");

            // The inverted condition must produce the complement.
            let memory = compile(build(cond.invert()));
            let entry = unsafe { std::mem::transmute::<*mut u8, Fn2>(memory.ptr()) };
            let inverted = unsafe { entry(a, b) } != 0;
            assert_eq!(inverted, !got, "invert({cond:?}) {a} {b}");
        }
    }
}

#[test]
fn compare_to_zero_test_rewrite_behaves_identically() {
    for value in [0u64, 1, 0xFFFF_FFFF, 0x8000_0000] {
        for cond in [
            RelationalCondition::Equal,
            RelationalCondition::NotEqual,
            RelationalCondition::LessThan,
            RelationalCondition::GreaterThanOrEqual,
        ] {
            let mut masm = MacroAssembler::new();
            masm.compare32_imm(cond, Reg::Rdi, Imm32::new(0), Reg::Rax);
            masm.ret();
            let memory = compile(masm);
            let entry = unsafe { std::mem::transmute::<*mut u8, Fn2>(memory.ptr()) };
            let got = unsafe { entry(value, 0) };

            // The patchable marker suppresses the test rewrite, forcing a
            // real compare; results must match.
            let mut masm = MacroAssembler::new();
            masm.compare32_imm(cond, Reg::Rdi, Imm32::patchable(0), Reg::Rax);
            masm.ret();
            let memory = compile(masm);
            let entry = unsafe { std::mem::transmute::<*mut u8, Fn2>(memory.ptr()) };
            let generic = unsafe { entry(value, 0) };
            assert_eq!(got, generic, "{cond:?} value={value:#x}");
        }
    }
}

// -- saturating scalar conversions ------------------------------------------

#[test]
fn double_to_int32_saturating_boundaries() {
    let cases = [
        (f64::INFINITY, i32::MAX),
        (f64::NEG_INFINITY, i32::MIN),
        (f64::NAN, 0),
        (3.9, 3),
        (-3.9, -3),
        (-0.0, 0),
        (0.0, 0),
        (2147483647.0, i32::MAX),
        (2147483648.0, i32::MAX),
        (-2147483648.0, i32::MIN),
        (-2147483649.0, i32::MIN),
        (2147483646.5, 2147483646),
    ];
    for (input, expected) in cases {
        let mut masm = MacroAssembler::new();
        masm.truncate_double_to_int32_saturated(FpReg::Xmm0, Reg::Rax);
        masm.zero_extend32_to_64(Reg::Rax, Reg::Rax);
        masm.ret();
        assert_eq!(
            run_f(masm, input) as u32,
            expected as u32,
            "saturate({input})"
        );
    }
}

#[test]
fn double_to_uint32_saturating_boundaries() {
    let cases: [(f64, u32); 9] = [
        (f64::INFINITY, u32::MAX),
        (f64::NEG_INFINITY, 0),
        (f64::NAN, 0),
        (-0.9, 0),
        (-0.0, 0),
        (3.9, 3),
        (4294967295.0, u32::MAX),
        (4294967296.0, u32::MAX),
        (4000000000.0, 4_000_000_000),
    ];
    for (input, expected) in cases {
        let mut masm = MacroAssembler::new();
        masm.truncate_double_to_uint32_saturated(FpReg::Xmm0, Reg::Rax);
        masm.ret();
        assert_eq!(run_f(masm, input) as u32, expected, "saturate_u({input})");
    }
}

#[test]
fn float_to_int32_saturating_boundaries() {
    type FnG = unsafe extern "C" fn(f32) -> u64;
    let cases = [
        (f32::INFINITY, i32::MAX),
        (f32::NEG_INFINITY, i32::MIN),
        (f32::NAN, 0),
        (3.9f32, 3),
        (-0.0f32, 0),
    ];
    for (input, expected) in cases {
        let mut masm = MacroAssembler::new();
        masm.truncate_float_to_int32_saturated(FpReg::Xmm0, Reg::Rax);
        masm.zero_extend32_to_64(Reg::Rax, Reg::Rax);
        masm.ret();
        let memory = compile(masm);
        let entry = unsafe { std::mem::transmute::<*mut u8, FnG>(memory.ptr()) };
        assert_eq!(unsafe { entry(input) } as u32, expected as u32);
    }
}

// -- fp arithmetic spot checks ----------------------------------------------

#[test]
fn fp_arithmetic_and_aliasing() {
    // dest aliases the subtrahend: must still compute a - b.
    let mut masm = MacroAssembler::new();
    masm.sub_double_rrr(FpReg::Xmm0, FpReg::Xmm1, FpReg::Xmm1);
    masm.move_double_to64(FpReg::Xmm1, Reg::Rax);
    masm.ret();
    assert_eq!(run_ff(masm, 5.5, 2.0), 3.5f64.to_bits());

    let mut masm = MacroAssembler::new();
    masm.add_double_rrr(FpReg::Xmm0, FpReg::Xmm1, FpReg::Xmm2);
    masm.move_double_to64(FpReg::Xmm2, Reg::Rax);
    masm.ret();
    assert_eq!(run_ff(masm, 1.25, 2.5), 3.75f64.to_bits());

    let mut masm = MacroAssembler::new();
    masm.sqrt_double(FpReg::Xmm0, FpReg::Xmm0);
    masm.move_double_to64(FpReg::Xmm0, Reg::Rax);
    masm.ret();
    assert_eq!(run_f(masm, 9.0), 3.0f64.to_bits());
}

#[test]
fn negate_preserves_signed_zero_semantics() {
    let mut masm = MacroAssembler::new();
    masm.negate_double(FpReg::Xmm0, FpReg::Xmm0);
    masm.move_double_to64(FpReg::Xmm0, Reg::Rax);
    masm.ret();
    let memory = compile(masm);
    let entry = unsafe { std::mem::transmute::<*mut u8, FnF>(memory.ptr()) };
    assert_eq!(unsafe { entry(0.0) }, (-0.0f64).to_bits());
    assert_eq!(unsafe { entry(-0.0) }, 0.0f64.to_bits());
    assert_eq!(unsafe { entry(1.5) }, (-1.5f64).to_bits());
}

#[test]
fn abs_clears_only_the_sign_bit() {
    let mut masm = MacroAssembler::new();
    masm.abs_double(FpReg::Xmm0, FpReg::Xmm0);
    masm.move_double_to64(FpReg::Xmm0, Reg::Rax);
    masm.ret();
    let memory = compile(masm);
    let entry = unsafe { std::mem::transmute::<*mut u8, FnF>(memory.ptr()) };
    assert_eq!(unsafe { entry(-2.5) }, 2.5f64.to_bits());
    assert_eq!(unsafe { entry(-0.0) }, 0.0f64.to_bits());
}

#[test]
fn rounding_modes_when_supported() {
    let masm_probe = MacroAssembler::new();
    if !masm_probe.supports_floating_point_rounding() {
        return;
    }
    let cases = [
        (2.5f64, 2.0, 2.0, 3.0, 2.0),   // value, nearest, floor, ceil, trunc
        (3.5, 4.0, 3.0, 4.0, 3.0),      // ties to even
        (-2.5, -2.0, -3.0, -2.0, -2.0),
    ];
    for (input, nearest, floor, ceil, trunc) in cases {
        let modes: [(fn(&mut MacroAssembler, FpReg, FpReg), f64); 4] = [
            (MacroAssembler::round_to_nearest_double, nearest),
            (MacroAssembler::floor_double, floor),
            (MacroAssembler::ceil_double, ceil),
            (MacroAssembler::trunc_double, trunc),
        ];
        for (emit, expected) in modes {
            let mut masm = MacroAssembler::new();
            emit(&mut masm, FpReg::Xmm0, FpReg::Xmm0);
            masm.move_double_to64(FpReg::Xmm0, Reg::Rax);
            masm.ret();
            assert_eq!(run_f(masm, input), expected.to_bits(), "round({input})");
        }
    }
}

#[test]
fn int_float_conversions_round_trip() {
    let mut masm = MacroAssembler::new();
    masm.convert_int64_to_double(Reg::Rdi, FpReg::Xmm0);
    masm.move_double_to64(FpReg::Xmm0, Reg::Rax);
    masm.ret();
    let memory = compile(masm);
    let entry =
        unsafe { std::mem::transmute::<*mut u8, unsafe extern "C" fn(i64) -> u64>(memory.ptr()) };
    assert_eq!(unsafe { entry(-7) }, (-7.0f64).to_bits());
    assert_eq!(unsafe { entry(1 << 40) }, ((1u64 << 40) as f64).to_bits());

    let mut masm = MacroAssembler::new();
    masm.truncate_double_to_int64(FpReg::Xmm0, Reg::Rax);
    masm.ret();
    assert_eq!(run_f(masm, -123.9) as i64, -123);
}
