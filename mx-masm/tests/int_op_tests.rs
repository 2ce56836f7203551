//! Execution tests for the scalar integer surface: operand-form dispatch
//! across every aliasing combination, the immediate-width peephole, shifts,
//! bit counting, loads and stores.

#![cfg(all(target_arch = "x86_64", not(windows)))]

use masm::{
    Address, CpuFeatures, ExecutableMemory, Imm32, MacroAssembler, Reg, RelationalCondition,
    Scale,
};

type Fn2 = unsafe extern "C" fn(u64, u64) -> u64;
type Fn1 = unsafe extern "C" fn(u64) -> u64;
type FnPtr = unsafe extern "C" fn(*const u8) -> u64;

fn compile(masm: MacroAssembler) -> ExecutableMemory {
    ExecutableMemory::from_code(&masm.finalize()).expect("executable region")
}

fn run2(masm: MacroAssembler, a: u64, b: u64) -> u64 {
    let memory = compile(masm);
    let entry = unsafe { std::mem::transmute::<*mut u8, Fn2>(memory.ptr()) };
    unsafe { entry(a, b) }
}

fn run1(masm: MacroAssembler, a: u64) -> u64 {
    let memory = compile(masm);
    let entry = unsafe { std::mem::transmute::<*mut u8, Fn1>(memory.ptr()) };
    unsafe { entry(a) }
}

const SAMPLES64: [u64; 8] = [
    0,
    1,
    0xFFFF_FFFF_FFFF_FFFF,
    0x8000_0000_0000_0000,
    0x7FFF_FFFF_FFFF_FFFF,
    0x0000_0001_0000_0000,
    0x1234_5678_9ABC_DEF0,
    42,
];

const SAMPLES32: [u32; 7] = [0, 1, u32::MAX, 0x8000_0000, 0x7FFF_FFFF, 0xDEAD_BEEF, 42];

/// Emit `op(a, b, dest)` arranged so the result ends in rax, for each of
/// the four aliasing shapes, and check against `reference`.
fn check_rrr32(
    emit: impl Fn(&mut MacroAssembler, Reg, Reg, Reg),
    reference: impl Fn(u32, u32) -> u32,
) {
    for &a in &SAMPLES32 {
        for &b in &SAMPLES32 {
            // All distinct.
            let mut masm = MacroAssembler::new();
            emit(&mut masm, Reg::Rdi, Reg::Rsi, Reg::Rax);
            masm.ret();
            assert_eq!(
                run2(masm, a as u64, b as u64) as u32,
                reference(a, b),
                "distinct registers, a={a:#x} b={b:#x}"
            );

            // dest aliases the first operand.
            let mut masm = MacroAssembler::new();
            emit(&mut masm, Reg::Rdi, Reg::Rsi, Reg::Rdi);
            masm.move32(Reg::Rdi, Reg::Rax);
            masm.ret();
            assert_eq!(
                run2(masm, a as u64, b as u64) as u32,
                reference(a, b),
                "dest == a, a={a:#x} b={b:#x}"
            );

            // dest aliases the second operand.
            let mut masm = MacroAssembler::new();
            emit(&mut masm, Reg::Rdi, Reg::Rsi, Reg::Rsi);
            masm.move32(Reg::Rsi, Reg::Rax);
            masm.ret();
            assert_eq!(
                run2(masm, a as u64, b as u64) as u32,
                reference(a, b),
                "dest == b, a={a:#x} b={b:#x}"
            );
        }

        // Both sources the same register.
        let mut masm = MacroAssembler::new();
        emit(&mut masm, Reg::Rdi, Reg::Rdi, Reg::Rax);
        masm.ret();
        assert_eq!(
            run1(masm, a as u64) as u32,
            reference(a, a),
            "a == b, a={a:#x}"
        );
    }
}

fn check_rrr64(
    emit: impl Fn(&mut MacroAssembler, Reg, Reg, Reg),
    reference: impl Fn(u64, u64) -> u64,
) {
    for &a in &SAMPLES64 {
        for &b in &SAMPLES64 {
            let mut masm = MacroAssembler::new();
            emit(&mut masm, Reg::Rdi, Reg::Rsi, Reg::Rax);
            masm.ret();
            assert_eq!(run2(masm, a, b), reference(a, b), "distinct, {a:#x} {b:#x}");

            let mut masm = MacroAssembler::new();
            emit(&mut masm, Reg::Rdi, Reg::Rsi, Reg::Rsi);
            masm.move64(Reg::Rsi, Reg::Rax);
            masm.ret();
            assert_eq!(run2(masm, a, b), reference(a, b), "dest==b, {a:#x} {b:#x}");
        }
        let mut masm = MacroAssembler::new();
        emit(&mut masm, Reg::Rdi, Reg::Rdi, Reg::Rax);
        masm.ret();
        assert_eq!(run1(masm, a), reference(a, a), "a==b, {a:#x}");
    }
}

#[test]
fn add32_all_aliasing_forms() {
    check_rrr32(
        |m, a, b, d| m.add32_rrr(a, b, d),
        |a, b| a.wrapping_add(b),
    );
}

#[test]
fn sub32_all_aliasing_forms() {
    check_rrr32(
        |m, a, b, d| m.sub32_rrr(a, b, d),
        |a, b| a.wrapping_sub(b),
    );
}

#[test]
fn and_or_xor32_all_aliasing_forms() {
    check_rrr32(|m, a, b, d| m.and32_rrr(a, b, d), |a, b| a & b);
    check_rrr32(|m, a, b, d| m.or32_rrr(a, b, d), |a, b| a | b);
    check_rrr32(|m, a, b, d| m.xor32_rrr(a, b, d), |a, b| a ^ b);
}

#[test]
fn mul32_all_aliasing_forms() {
    check_rrr32(
        |m, a, b, d| m.mul32_rrr(a, b, d),
        |a, b| a.wrapping_mul(b),
    );
}

#[test]
fn add64_sub64_all_aliasing_forms() {
    check_rrr64(
        |m, a, b, d| m.add64_rrr(a, b, d),
        |a, b| a.wrapping_add(b),
    );
    check_rrr64(
        |m, a, b, d| m.sub64_rrr(a, b, d),
        |a, b| a.wrapping_sub(b),
    );
    check_rrr64(|m, a, b, d| m.xor64_rrr(a, b, d), |a, b| a ^ b);
}

#[test]
fn immediate_forms_match_register_forms() {
    for &a in &SAMPLES32 {
        for imm in [0i32, 1, -1, 127, 128, -128, -129, 0x1234_5678] {
            let mut masm = MacroAssembler::new();
            masm.move32(Reg::Rdi, Reg::Rax);
            masm.add32_imm(Imm32::new(imm), Reg::Rax);
            masm.ret();
            assert_eq!(
                run1(masm, a as u64) as u32,
                a.wrapping_add(imm as u32),
                "add imm={imm} a={a:#x}"
            );

            let mut masm = MacroAssembler::new();
            masm.move32(Reg::Rdi, Reg::Rax);
            masm.sub32_imm(Imm32::new(imm), Reg::Rax);
            masm.ret();
            assert_eq!(run1(masm, a as u64) as u32, a.wrapping_sub(imm as u32));
        }
    }
}

/// The imm8 peephole and the forced-generic imm32 encoding must leave
/// identical register and flag state (peephole equivalence): both the
/// arithmetic result and each observable condition flag are compared.
#[test]
fn peephole_imm8_equivalence_including_flags() {
    use masm::ResultCondition;

    let flag_probe = |generic: bool, initial: u32, cond: ResultCondition| -> u64 {
        let mut masm = MacroAssembler::new();
        masm.move32(Reg::Rdi, Reg::Rax);
        let imm = if generic {
            Imm32::patchable(1) // patchable marker forces the generic form
        } else {
            Imm32::new(1)
        };
        // The branch consumes the addition's flags directly.
        let taken = masm.branch_add32_imm(cond, imm, Reg::Rax);
        masm.move_imm32(Imm32::new(0), Reg::Rdx);
        let skip = masm.jump();
        masm.link(taken);
        masm.move_imm32(Imm32::new(1), Reg::Rdx);
        masm.link(skip);
        // Pack: rax = (flag << 32) | result32.
        masm.lshift64_imm(Imm32::new(32), Reg::Rdx);
        masm.zero_extend32_to_64(Reg::Rax, Reg::Rax);
        masm.or64(Reg::Rdx, Reg::Rax);
        masm.ret();
        run1(masm, initial as u64)
    };

    for initial in [0u32, 1, 0x7FFF_FFFF, 0xFFFF_FFFF, 0x8000_0000] {
        for cond in [
            ResultCondition::Overflow,
            ResultCondition::Carry,
            ResultCondition::Signed,
            ResultCondition::Zero,
        ] {
            assert_eq!(
                flag_probe(false, initial, cond),
                flag_probe(true, initial, cond),
                "{cond:?} diverges at {initial:#x}"
            );
        }
    }
}

#[test]
fn shifts_and_rotates() {
    for &a in &SAMPLES32 {
        for amount in [0u32, 1, 5, 31, 32, 33] {
            let mut masm = MacroAssembler::new();
            masm.move32(Reg::Rdi, Reg::Rax);
            masm.lshift32(Reg::Rsi, Reg::Rax);
            masm.ret();
            assert_eq!(
                run2(masm, a as u64, amount as u64) as u32,
                a.wrapping_shl(amount),
                "shl {a:#x} by {amount}"
            );

            // Destination in rcx exercises the exchange path.
            let mut masm = MacroAssembler::new();
            masm.move32(Reg::Rdi, Reg::Rcx);
            masm.urshift32(Reg::Rsi, Reg::Rcx);
            masm.move32(Reg::Rcx, Reg::Rax);
            masm.ret();
            assert_eq!(run2(masm, a as u64, amount as u64) as u32, a.wrapping_shr(amount));

            // Amount already in rcx takes the direct encoding.
            let mut masm = MacroAssembler::new();
            masm.move32(Reg::Rsi, Reg::Rcx);
            masm.move32(Reg::Rdi, Reg::Rax);
            masm.rshift32(Reg::Rcx, Reg::Rax);
            masm.ret();
            assert_eq!(
                run2(masm, a as u64, amount as u64) as u32,
                ((a as i32).wrapping_shr(amount)) as u32
            );

            let mut masm = MacroAssembler::new();
            masm.move32(Reg::Rdi, Reg::Rax);
            masm.rotate_left32_imm(Imm32::new(amount as i32), Reg::Rax);
            masm.ret();
            assert_eq!(run1(masm, a as u64) as u32, a.rotate_left(amount & 31));
        }
    }
}

#[test]
fn bit_counting_fallbacks_match_hardware_semantics() {
    for features in [CpuFeatures::baseline(), CpuFeatures::detect()] {
        for &a in &SAMPLES32 {
            let mut masm = MacroAssembler::with_features(features);
            masm.count_leading_zeros32(Reg::Rdi, Reg::Rax);
            masm.ret();
            assert_eq!(run1(masm, a as u64) as u32, a.leading_zeros(), "clz {a:#x}");

            let mut masm = MacroAssembler::with_features(features);
            masm.count_trailing_zeros32(Reg::Rdi, Reg::Rax);
            masm.ret();
            assert_eq!(run1(masm, a as u64) as u32, a.trailing_zeros(), "ctz {a:#x}");

            let mut masm = MacroAssembler::with_features(features);
            masm.count_population32(Reg::Rdi, Reg::Rax);
            masm.ret();
            assert_eq!(run1(masm, a as u64) as u32, a.count_ones(), "popcnt {a:#x}");
        }
        for &a in &SAMPLES64 {
            let mut masm = MacroAssembler::with_features(features);
            masm.count_leading_zeros64(Reg::Rdi, Reg::Rax);
            masm.ret();
            assert_eq!(run1(masm, a) as u32, a.leading_zeros());

            let mut masm = MacroAssembler::with_features(features);
            masm.count_population64(Reg::Rdi, Reg::Rax);
            masm.ret();
            assert_eq!(run1(masm, a) as u32, a.count_ones(), "popcnt64 {a:#x}");
        }
    }
}

#[test]
fn byte_swaps() {
    let mut masm = MacroAssembler::new();
    masm.move64(Reg::Rdi, Reg::Rax);
    masm.byte_swap64(Reg::Rax);
    masm.ret();
    assert_eq!(run1(masm, 0x0102_0304_0506_0708), 0x0807_0605_0403_0201);

    let mut masm = MacroAssembler::new();
    masm.move32(Reg::Rdi, Reg::Rax);
    masm.byte_swap32(Reg::Rax);
    masm.ret();
    assert_eq!(run1(masm, 0x1122_3344) as u32, 0x4433_2211);

    let mut masm = MacroAssembler::new();
    masm.move32(Reg::Rdi, Reg::Rax);
    masm.byte_swap16(Reg::Rax);
    masm.ret();
    assert_eq!(run1(masm, 0xABCD) as u32, 0xCDAB);
}

#[test]
fn loads_extend_correctly() {
    let data: [u8; 16] = [
        0x80, 0xFF, 0x01, 0x02, 0xFE, 0xFF, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE, 0x78, 0x56,
        0x34, 0x12,
    ];
    let run_load = |emit: &dyn Fn(&mut MacroAssembler)| -> u64 {
        let mut masm = MacroAssembler::new();
        emit(&mut masm);
        masm.ret();
        let memory = compile(masm);
        let entry = unsafe { std::mem::transmute::<*mut u8, FnPtr>(memory.ptr()) };
        unsafe { entry(data.as_ptr()) }
    };

    assert_eq!(
        run_load(&|m| m.load8(Address::base(Reg::Rdi, 0), Reg::Rax)),
        0x80
    );
    assert_eq!(
        run_load(&|m| m.load8_signed_extend_to_32(Address::base(Reg::Rdi, 0), Reg::Rax)),
        0xFFFF_FF80
    );
    assert_eq!(
        run_load(&|m| m.load8_signed_extend_to_64(Address::base(Reg::Rdi, 0), Reg::Rax)),
        0xFFFF_FFFF_FFFF_FF80
    );
    assert_eq!(
        run_load(&|m| m.load16(Address::base(Reg::Rdi, 4), Reg::Rax)),
        0xFFFE
    );
    assert_eq!(
        run_load(&|m| m.load16_signed_extend_to_32(Address::base(Reg::Rdi, 4), Reg::Rax)),
        0xFFFF_FFFE
    );
    assert_eq!(
        run_load(&|m| m.load32(Address::base(Reg::Rdi, 8), Reg::Rax)),
        0xDEAD_BEEF
    );
    assert_eq!(
        run_load(&|m| m.load32_signed_extend_to_64(Address::base(Reg::Rdi, 8), Reg::Rax)),
        0xFFFF_FFFF_DEAD_BEEF
    );
    assert_eq!(
        run_load(&|m| m.load64(Address::base(Reg::Rdi, 8), Reg::Rax)),
        0x1234_5678_DEAD_BEEF
    );
    // Base-index form: element 3 of a word array.
    assert_eq!(
        run_load(&|m| {
            m.move_imm32(Imm32::new(3), Reg::Rsi);
            m.load16(
                Address::base_index(Reg::Rdi, Reg::Rsi, Scale::TimesTwo, 0),
                Reg::Rax,
            );
        }),
        0x1234
    );
}

#[test]
fn pair_load_with_aliased_base() {
    let data: [u64; 2] = [0x1111_2222_3333_4444, 0x5555_6666_7777_8888];
    let mut masm = MacroAssembler::new();
    // dest1 aliases the base: higher word must be fetched first.
    masm.load_pair64(Reg::Rdi, 0, Reg::Rdi, Reg::Rsi);
    masm.add64_rrr(Reg::Rdi, Reg::Rsi, Reg::Rax);
    masm.ret();
    let memory = compile(masm);
    let entry = unsafe { std::mem::transmute::<*mut u8, FnPtr>(memory.ptr()) };
    let sum = unsafe { entry(data.as_ptr() as *const u8) };
    assert_eq!(
        sum,
        0x1111_2222_3333_4444u64.wrapping_add(0x5555_6666_7777_8888)
    );
}

#[test]
fn stores_write_expected_widths() {
    let mut data = [0u8; 16];
    let mut masm = MacroAssembler::new();
    masm.move_imm32(Imm32::new(0x7766_5544), Reg::Rax);
    masm.store8(Reg::Rax, Address::base(Reg::Rdi, 0));
    masm.store16(Reg::Rax, Address::base(Reg::Rdi, 2));
    masm.store32(Reg::Rax, Address::base(Reg::Rdi, 4));
    masm.store32_imm(Imm32::new(0x0BAD_F00D), Address::base(Reg::Rdi, 8));
    masm.store_pair32(Reg::Rax, Reg::Rax, Reg::Rdi, 8 + 4);
    masm.ret();
    let memory = compile(masm);
    let entry =
        unsafe { std::mem::transmute::<*mut u8, unsafe extern "C" fn(*mut u8)>(memory.ptr()) };
    unsafe { entry(data.as_mut_ptr()) };
    assert_eq!(data[0], 0x44);
    assert_eq!(u16::from_le_bytes([data[2], data[3]]), 0x5544);
    assert_eq!(
        u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        0x7766_5544
    );
    assert_eq!(
        u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
        0x0BAD_F00D
    );
}

#[test]
fn conditional_moves_select_without_branching() {
    for (a, b) in [(1u64, 2u64), (2, 1), (5, 5)] {
        let mut masm = MacroAssembler::new();
        masm.move_imm32(Imm32::new(111), Reg::Rdx);
        masm.move_imm32(Imm32::new(222), Reg::Rcx);
        masm.move_conditionally32_then_else(
            RelationalCondition::Below,
            Reg::Rdi,
            Reg::Rsi,
            Reg::Rdx,
            Reg::Rcx,
            Reg::Rax,
        );
        masm.ret();
        let expected = if (a as u32) < (b as u32) { 111 } else { 222 };
        assert_eq!(run2(masm, a, b), expected, "a={a} b={b}");
    }
}

#[test]
fn compare_materializes_booleans_across_aliasing() {
    for (a, b) in [(3u64, 9u64), (9, 3), (7, 7)] {
        for dest in [Reg::Rax, Reg::Rdi, Reg::Rsi] {
            let mut masm = MacroAssembler::new();
            masm.compare32(RelationalCondition::LessThan, Reg::Rdi, Reg::Rsi, dest);
            if dest != Reg::Rax {
                masm.move32(dest, Reg::Rax);
            }
            masm.ret();
            let expected = ((a as i32) < (b as i32)) as u64;
            assert_eq!(run2(masm, a, b), expected, "dest={dest:?} a={a} b={b}");
        }
    }
}

#[test]
fn lea_computes_scaled_addresses() {
    let mut masm = MacroAssembler::new();
    masm.lea64(
        Address::base_index(Reg::Rdi, Reg::Rsi, Scale::TimesEight, 24),
        Reg::Rax,
    );
    masm.ret();
    assert_eq!(run2(masm, 1000, 3), 1000 + 3 * 8 + 24);
}
