//! Scalar floating-point operations, comparisons, and conversions.
//!
//! The ucomis{s,d} flag mapping conflates "unordered" with specific
//! relational flags, so two of the twelve conditions need a two-branch
//! synthesis. That synthesis lives in exactly one place here
//! ([`MacroAssemblerX86_64::fp_compare`] + [`MacroAssemblerX86_64::fp_true_jumps`])
//! and every consumption mode — branch, materialized boolean, conditional
//! move — goes through it.

use crate::masm::{DoubleCondition, Imm32, Imm64, Jump, JumpList};

use super::asm::Cc;
use super::{Address, FpReg, MacroAssemblerX86_64, Reg};

/// What a double-condition comparison compiled down to: either a single
/// hardware condition code, or one of the two synthesized forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FpPlan {
    Cc(Cc),
    EqualAndOrdered,
    NotEqualOrUnordered,
}

impl FpPlan {
    /// Logical negation of the already-compared plan: the flag-level
    /// complement of a single condition code, and the synthesized pair map
    /// to each other. Pure; used by the conditional-move consumer to branch
    /// on the false side.
    fn invert(self) -> FpPlan {
        match self {
            FpPlan::Cc(Cc::A) => FpPlan::Cc(Cc::BE),
            FpPlan::Cc(Cc::AE) => FpPlan::Cc(Cc::B),
            FpPlan::Cc(Cc::B) => FpPlan::Cc(Cc::AE),
            FpPlan::Cc(Cc::BE) => FpPlan::Cc(Cc::A),
            FpPlan::Cc(Cc::E) => FpPlan::Cc(Cc::NE),
            FpPlan::Cc(Cc::NE) => FpPlan::Cc(Cc::E),
            FpPlan::Cc(Cc::P) => FpPlan::Cc(Cc::NP),
            FpPlan::Cc(Cc::NP) => FpPlan::Cc(Cc::P),
            FpPlan::EqualAndOrdered => FpPlan::NotEqualOrUnordered,
            FpPlan::NotEqualOrUnordered => FpPlan::EqualAndOrdered,
            other => other,
        }
    }
}

impl MacroAssemblerX86_64 {
    // -- the shared comparison/synthesis core --------------------------------

    /// Emit the flag-setting comparison for `cond` (swapping operands where
    /// the unordered flag placement demands it) and classify the consumption
    /// plan. Self-comparisons short-circuit: the relational half is
    /// statically known, leaving only the NaN check.
    pub(crate) fn fp_compare(
        &mut self,
        cond: DoubleCondition,
        left: FpReg,
        right: FpReg,
        wide: bool,
    ) -> FpPlan {
        let ucomis = |masm: &mut Self, lhs: FpReg, rhs: FpReg| {
            if wide {
                masm.asm.ucomisd_rr(rhs, lhs);
            } else {
                masm.asm.ucomiss_rr(rhs, lhs);
            }
        };

        if left == right {
            ucomis(self, left, right);
            // Equal-to-self holds except for NaN: every ...AndOrdered
            // condition that includes equality reduces to "ordered", the
            // rest to their unordered complement.
            return match cond {
                DoubleCondition::EqualAndOrdered
                | DoubleCondition::GreaterThanOrEqualAndOrdered
                | DoubleCondition::LessThanOrEqualAndOrdered => FpPlan::Cc(Cc::NP),
                DoubleCondition::NotEqualAndOrdered
                | DoubleCondition::GreaterThanAndOrdered
                | DoubleCondition::LessThanAndOrdered => {
                    // Never true for x vs x: after a self-compare, A needs
                    // ZF=0 and CF=0, but ordered sets ZF and unordered
                    // sets CF.
                    FpPlan::Cc(Cc::A)
                }
                DoubleCondition::EqualOrUnordered
                | DoubleCondition::GreaterThanOrEqualOrUnordered
                | DoubleCondition::LessThanOrEqualOrUnordered => {
                    // Always true for x vs x: a self-compare sets ZF or CF.
                    FpPlan::Cc(Cc::BE)
                }
                DoubleCondition::NotEqualOrUnordered
                | DoubleCondition::GreaterThanOrUnordered
                | DoubleCondition::LessThanOrUnordered => FpPlan::Cc(Cc::P),
            };
        }

        match cond {
            DoubleCondition::GreaterThanAndOrdered => {
                ucomis(self, left, right);
                FpPlan::Cc(Cc::A)
            }
            DoubleCondition::GreaterThanOrEqualAndOrdered => {
                ucomis(self, left, right);
                FpPlan::Cc(Cc::AE)
            }
            DoubleCondition::LessThanAndOrdered => {
                ucomis(self, right, left);
                FpPlan::Cc(Cc::A)
            }
            DoubleCondition::LessThanOrEqualAndOrdered => {
                ucomis(self, right, left);
                FpPlan::Cc(Cc::AE)
            }
            DoubleCondition::LessThanOrUnordered => {
                ucomis(self, left, right);
                FpPlan::Cc(Cc::B)
            }
            DoubleCondition::LessThanOrEqualOrUnordered => {
                ucomis(self, left, right);
                FpPlan::Cc(Cc::BE)
            }
            DoubleCondition::GreaterThanOrUnordered => {
                ucomis(self, right, left);
                FpPlan::Cc(Cc::B)
            }
            DoubleCondition::GreaterThanOrEqualOrUnordered => {
                ucomis(self, right, left);
                FpPlan::Cc(Cc::BE)
            }
            DoubleCondition::NotEqualAndOrdered => {
                // ZF=0 excludes both equality and unordered in one flag.
                ucomis(self, left, right);
                FpPlan::Cc(Cc::NE)
            }
            DoubleCondition::EqualOrUnordered => {
                ucomis(self, left, right);
                FpPlan::Cc(Cc::E)
            }
            DoubleCondition::EqualAndOrdered => {
                ucomis(self, left, right);
                FpPlan::EqualAndOrdered
            }
            DoubleCondition::NotEqualOrUnordered => {
                ucomis(self, left, right);
                FpPlan::NotEqualOrUnordered
            }
        }
    }

    /// Emit jumps taken exactly when the compared condition is true; the
    /// fall-through is the false path. The two synthesized plans expand to
    /// the double-branch sequences here and nowhere else.
    pub(crate) fn fp_true_jumps(&mut self, plan: FpPlan) -> JumpList {
        let mut list = JumpList::new();
        match plan {
            FpPlan::Cc(cc) => {
                let jump = self.jump_if(cc);
                list.push(jump);
            }
            FpPlan::EqualAndOrdered => {
                // Unordered must reach the same place as "not equal": skip
                // the equality branch and fall through.
                let unordered = self.jump_if(Cc::P);
                let equal = self.jump_if(Cc::E);
                self.link(unordered);
                list.push(equal);
            }
            FpPlan::NotEqualOrUnordered => {
                // Unordered is immediately true; otherwise inequality
                // decides.
                let unordered = self.jump_if(Cc::P);
                let not_equal = self.jump_if(Cc::NE);
                list.push(unordered);
                list.push(not_equal);
            }
        }
        list
    }

    // -- consumption mode: materializing branch ------------------------------

    pub fn branch_double(&mut self, cond: DoubleCondition, left: FpReg, right: FpReg) -> Jump {
        let plan = self.fp_compare(cond, left, right, true);
        self.branch_on_plan(plan)
    }

    pub fn branch_float(&mut self, cond: DoubleCondition, left: FpReg, right: FpReg) -> Jump {
        let plan = self.fp_compare(cond, left, right, false);
        self.branch_on_plan(plan)
    }

    fn branch_on_plan(&mut self, plan: FpPlan) -> Jump {
        let mut jumps = self.fp_true_jumps(plan);
        let mut drained = jumps.drain();
        if drained.len() == 1 {
            return drained.remove(0);
        }
        // Multiple true-jumps: funnel them through one trampoline so the
        // caller still gets a single handle.
        let false_path = self.jump();
        for jump in drained {
            self.link(jump);
        }
        let result = self.jump();
        self.link(false_path);
        result
    }

    // -- consumption mode: materializing boolean -----------------------------

    pub fn compare_double(&mut self, cond: DoubleCondition, left: FpReg, right: FpReg, dest: Reg) {
        self.fp_materialize(cond, left, right, dest, true);
    }

    pub fn compare_float(&mut self, cond: DoubleCondition, left: FpReg, right: FpReg, dest: Reg) {
        self.fp_materialize(cond, left, right, dest, false);
    }

    fn fp_materialize(
        &mut self,
        cond: DoubleCondition,
        left: FpReg,
        right: FpReg,
        dest: Reg,
        wide: bool,
    ) {
        // The destination is a general register and can never alias the
        // floating-point operands, so it is always safe to clear first.
        self.move_imm32(Imm32::new(0), dest);
        let plan = self.fp_compare(cond, left, right, wide);
        match plan {
            FpPlan::Cc(cc) => self.asm.setcc_r(cc, dest),
            synthesized => {
                let mut trues = self.fp_true_jumps(synthesized);
                let stays_zero = self.jump();
                self.link_jump_list(&mut trues);
                self.move_imm32(Imm32::new(1), dest);
                self.link(stays_zero);
            }
        }
    }

    // -- consumption mode: conditional move ----------------------------------

    /// `dest = cond(left, right) ? then_case : else_case` over
    /// floating-point values, without exposing a branch to the caller.
    pub fn move_double_conditionally(
        &mut self,
        cond: DoubleCondition,
        left: FpReg,
        right: FpReg,
        then_case: FpReg,
        else_case: FpReg,
        dest: FpReg,
    ) {
        self.fp_select(cond, left, right, then_case, else_case, dest, true);
    }

    pub fn move_float_conditionally(
        &mut self,
        cond: DoubleCondition,
        left: FpReg,
        right: FpReg,
        then_case: FpReg,
        else_case: FpReg,
        dest: FpReg,
    ) {
        self.fp_select(cond, left, right, then_case, else_case, dest, false);
    }

    fn fp_select(
        &mut self,
        cond: DoubleCondition,
        left: FpReg,
        right: FpReg,
        then_case: FpReg,
        else_case: FpReg,
        dest: FpReg,
        wide: bool,
    ) {
        if then_case == else_case {
            self.move_double(then_case, dest);
            return;
        }
        let plan = self.fp_compare(cond, left, right, wide);
        // Register moves after the compare leave the flags alone.
        if dest == then_case {
            // Keep `then` on true; overwrite with `else` on false.
            let mut trues = self.fp_true_jumps(plan);
            self.move_double(else_case, dest);
            self.link_jump_list(&mut trues);
        } else {
            // dest != then_case: park the else value, overwrite on true.
            if dest != else_case {
                self.move_double(else_case, dest);
            }
            let mut falses = self.fp_true_jumps(plan.invert());
            self.move_double(then_case, dest);
            self.link_jump_list(&mut falses);
        }
    }

    // -- moves / loads / stores ----------------------------------------------

    pub fn move_double(&mut self, src: FpReg, dest: FpReg) {
        if src != dest {
            self.asm.movaps_rr(src, dest);
        }
    }

    pub fn load_double(&mut self, src: Address, dest: FpReg) {
        let (base, offset) = self.resolve_to_base(src);
        self.asm.movsd_mr(base, offset, dest);
    }

    pub fn load_float(&mut self, src: Address, dest: FpReg) {
        let (base, offset) = self.resolve_to_base(src);
        self.asm.movss_mr(base, offset, dest);
    }

    pub fn store_double(&mut self, src: FpReg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.movsd_rm(src, base, offset);
    }

    pub fn store_float(&mut self, src: FpReg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.movss_rm(src, base, offset);
    }

    /// Bit-exact general-to-float register move.
    pub fn move64_to_double(&mut self, src: Reg, dest: FpReg) {
        self.asm.movq_r2fp(src, dest);
    }

    pub fn move_double_to64(&mut self, src: FpReg, dest: Reg) {
        self.asm.movq_fp2r(src, dest);
    }

    pub fn move32_to_float(&mut self, src: Reg, dest: FpReg) {
        self.asm.movd_r2fp(src, dest);
    }

    pub fn move_float_to32(&mut self, src: FpReg, dest: Reg) {
        self.asm.movd_fp2r(src, dest);
    }

    /// Materialize a double constant from its bit pattern, through the
    /// integer scratch register.
    pub fn move_double_imm(&mut self, value: f64, dest: FpReg) {
        if value.to_bits() == 0 {
            self.zero_double(dest);
            return;
        }
        let scratch = self.scratch();
        self.move_imm64(Imm64::new(value.to_bits() as i64), scratch);
        self.move64_to_double(scratch, dest);
    }

    pub fn zero_double(&mut self, dest: FpReg) {
        self.asm.pnone_rr(0x57, dest, dest); // xorps
    }

    // -- arithmetic ----------------------------------------------------------

    pub fn add_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.sse_op_sd(0x58, src, dest);
    }

    pub fn add_double_rrr(&mut self, a: FpReg, b: FpReg, dest: FpReg) {
        if self.supports_avx() {
            self.asm.vex_rr(3, 0x58, b, a, dest);
        } else if dest == a {
            self.add_double(b, dest);
        } else if dest == b {
            self.add_double(a, dest);
        } else {
            self.move_double(a, dest);
            self.add_double(b, dest);
        }
    }

    pub fn add_double_mem(&mut self, src: Address, dest: FpReg) {
        let (base, offset) = self.resolve_to_base(src);
        self.asm.sse_op_sd_mem(0x58, base, offset, dest);
    }

    pub fn add_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.sse_op_ss(0x58, src, dest);
    }

    pub fn add_float_mem(&mut self, src: Address, dest: FpReg) {
        let (base, offset) = self.resolve_to_base(src);
        self.asm.sse_op_ss_mem(0x58, base, offset, dest);
    }

    pub fn sub_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.sse_op_sd(0x5C, src, dest);
    }

    /// Subtraction is non-commutative: `dest == b` routes the minuend
    /// through the floating-point scratch register.
    pub fn sub_double_rrr(&mut self, a: FpReg, b: FpReg, dest: FpReg) {
        if self.supports_avx() {
            self.asm.vex_rr(3, 0x5C, b, a, dest);
        } else if dest == a {
            self.sub_double(b, dest);
        } else if dest == b {
            let tmp = self.fp_scratch();
            self.move_double(b, tmp);
            self.move_double(a, dest);
            self.sub_double(tmp, dest);
        } else {
            self.move_double(a, dest);
            self.sub_double(b, dest);
        }
    }

    pub fn sub_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.sse_op_ss(0x5C, src, dest);
    }

    pub fn mul_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.sse_op_sd(0x59, src, dest);
    }

    pub fn mul_double_rrr(&mut self, a: FpReg, b: FpReg, dest: FpReg) {
        if self.supports_avx() {
            self.asm.vex_rr(3, 0x59, b, a, dest);
        } else if dest == a {
            self.mul_double(b, dest);
        } else if dest == b {
            self.mul_double(a, dest);
        } else {
            self.move_double(a, dest);
            self.mul_double(b, dest);
        }
    }

    pub fn mul_double_mem(&mut self, src: Address, dest: FpReg) {
        let (base, offset) = self.resolve_to_base(src);
        self.asm.sse_op_sd_mem(0x59, base, offset, dest);
    }

    pub fn mul_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.sse_op_ss(0x59, src, dest);
    }

    pub fn div_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.sse_op_sd(0x5E, src, dest);
    }

    pub fn div_double_rrr(&mut self, a: FpReg, b: FpReg, dest: FpReg) {
        if self.supports_avx() {
            self.asm.vex_rr(3, 0x5E, b, a, dest);
        } else if dest == a {
            self.div_double(b, dest);
        } else if dest == b {
            let tmp = self.fp_scratch();
            self.move_double(b, tmp);
            self.move_double(a, dest);
            self.div_double(tmp, dest);
        } else {
            self.move_double(a, dest);
            self.div_double(b, dest);
        }
    }

    pub fn div_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.sse_op_ss(0x5E, src, dest);
    }

    pub fn sqrt_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.sse_op_sd(0x51, src, dest);
    }

    pub fn sqrt_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.sse_op_ss(0x51, src, dest);
    }

    /// Clear the sign bit through the integer pipeline; no memory constant
    /// needed.
    pub fn abs_double(&mut self, src: FpReg, dest: FpReg) {
        let scratch = self.scratch();
        self.move_double_to64(src, scratch);
        self.lshift64_imm(Imm32::new(1), scratch);
        self.urshift64_imm(Imm32::new(1), scratch);
        self.move64_to_double(scratch, dest);
    }

    pub fn abs_float(&mut self, src: FpReg, dest: FpReg) {
        let scratch = self.scratch();
        self.move_float_to32(src, scratch);
        self.and32_imm(Imm32::new(0x7FFF_FFFF), scratch);
        self.move32_to_float(scratch, dest);
    }

    /// Flip the sign bit, distinguishing -0.0 from 0.0 as IEEE requires.
    pub fn negate_double(&mut self, src: FpReg, dest: FpReg) {
        let scratch = self.scratch();
        self.move_double_to64(src, scratch);
        self.asm.btcq_i8r(63, scratch);
        self.move64_to_double(scratch, dest);
    }

    pub fn negate_float(&mut self, src: FpReg, dest: FpReg) {
        let scratch = self.scratch();
        self.move_float_to32(src, scratch);
        self.xor32_imm(Imm32::new(i32::MIN), scratch);
        self.move32_to_float(scratch, dest);
    }

    // -- rounding ------------------------------------------------------------

    fn round_double_with_mode(&mut self, mode: u8, src: FpReg, dest: FpReg) {
        if !self.supports_floating_point_rounding() {
            // No multi-instruction sequence reproduces the directed
            // roundings bit-exactly here; emitting wrong code is worse than
            // stopping the compiler.
            panic!("floating-point rounding requires SSE4.1; check supports_floating_point_rounding() before emitting");
        }
        self.asm.roundsd_rr(mode, src, dest);
    }

    fn round_float_with_mode(&mut self, mode: u8, src: FpReg, dest: FpReg) {
        if !self.supports_floating_point_rounding() {
            panic!("floating-point rounding requires SSE4.1; check supports_floating_point_rounding() before emitting");
        }
        self.asm.roundss_rr(mode, src, dest);
    }

    /// Round to nearest, ties to even.
    pub fn round_to_nearest_double(&mut self, src: FpReg, dest: FpReg) {
        self.round_double_with_mode(0, src, dest);
    }

    pub fn floor_double(&mut self, src: FpReg, dest: FpReg) {
        self.round_double_with_mode(1, src, dest);
    }

    pub fn ceil_double(&mut self, src: FpReg, dest: FpReg) {
        self.round_double_with_mode(2, src, dest);
    }

    pub fn trunc_double(&mut self, src: FpReg, dest: FpReg) {
        self.round_double_with_mode(3, src, dest);
    }

    pub fn round_to_nearest_float(&mut self, src: FpReg, dest: FpReg) {
        self.round_float_with_mode(0, src, dest);
    }

    pub fn floor_float(&mut self, src: FpReg, dest: FpReg) {
        self.round_float_with_mode(1, src, dest);
    }

    pub fn ceil_float(&mut self, src: FpReg, dest: FpReg) {
        self.round_float_with_mode(2, src, dest);
    }

    pub fn trunc_float(&mut self, src: FpReg, dest: FpReg) {
        self.round_float_with_mode(3, src, dest);
    }

    // -- conversions ---------------------------------------------------------

    pub fn convert_int32_to_double(&mut self, src: Reg, dest: FpReg) {
        self.asm.cvtsi2sdl_rr(src, dest);
    }

    pub fn convert_int64_to_double(&mut self, src: Reg, dest: FpReg) {
        self.asm.cvtsi2sdq_rr(src, dest);
    }

    pub fn convert_int32_to_float(&mut self, src: Reg, dest: FpReg) {
        self.asm.cvtsi2ssl_rr(src, dest);
    }

    pub fn convert_int64_to_float(&mut self, src: Reg, dest: FpReg) {
        self.asm.cvtsi2ssq_rr(src, dest);
    }

    pub fn convert_double_to_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cvtsd2ss_rr(src, dest);
    }

    pub fn convert_float_to_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cvtss2sd_rr(src, dest);
    }

    /// Raw truncating conversion: out-of-range and NaN inputs produce the
    /// architecture's sentinel, not a saturated value.
    pub fn truncate_double_to_int32(&mut self, src: FpReg, dest: Reg) {
        self.asm.cvttsd2sil_rr(src, dest);
    }

    pub fn truncate_double_to_int64(&mut self, src: FpReg, dest: Reg) {
        self.asm.cvttsd2siq_rr(src, dest);
    }

    pub fn truncate_float_to_int32(&mut self, src: FpReg, dest: Reg) {
        self.asm.cvttss2sil_rr(src, dest);
    }

    pub fn truncate_float_to_int64(&mut self, src: FpReg, dest: Reg) {
        self.asm.cvttss2siq_rr(src, dest);
    }

    /// Truncate with saturation: out-of-range inputs clamp to the integer
    /// boundaries, NaN produces zero.
    pub fn truncate_double_to_int32_saturated(&mut self, src: FpReg, dest: Reg) {
        self.truncate_double_to_int32(src, dest);
        // In-range results never equal the sentinel; everything else takes
        // the slow path.
        let in_range = self.branch32_imm(
            crate::masm::RelationalCondition::NotEqual,
            dest,
            Imm32::new(i32::MIN),
        );
        self.asm.ucomisd_rr(src, src);
        let is_nan = self.jump_if(Cc::P);
        let zero = self.fp_scratch();
        self.zero_double(zero);
        self.asm.ucomisd_rr(zero, src);
        // Negative overflow keeps the sentinel (it already is INT32_MIN).
        let negative = self.jump_if(Cc::B);
        self.move_imm32(Imm32::new(i32::MAX), dest);
        let done = self.jump();
        self.link(is_nan);
        self.move_imm32(Imm32::new(0), dest);
        self.link(negative);
        self.link(done);
        self.link(in_range);
    }

    pub fn truncate_float_to_int32_saturated(&mut self, src: FpReg, dest: Reg) {
        self.truncate_float_to_int32(src, dest);
        let in_range = self.branch32_imm(
            crate::masm::RelationalCondition::NotEqual,
            dest,
            Imm32::new(i32::MIN),
        );
        self.asm.ucomiss_rr(src, src);
        let is_nan = self.jump_if(Cc::P);
        let zero = self.fp_scratch();
        self.zero_double(zero);
        self.asm.ucomiss_rr(zero, src);
        let negative = self.jump_if(Cc::B);
        self.move_imm32(Imm32::new(i32::MAX), dest);
        let done = self.jump();
        self.link(is_nan);
        self.move_imm32(Imm32::new(0), dest);
        self.link(negative);
        self.link(done);
        self.link(in_range);
    }

    /// Unsigned saturating truncation: clamps to [0, u32::MAX], NaN to zero.
    /// Bounds are checked on the floating-point side before the (64-bit)
    /// native conversion, whose result then always fits.
    pub fn truncate_double_to_uint32_saturated(&mut self, src: FpReg, dest: Reg) {
        self.asm.ucomisd_rr(src, src);
        let is_nan = self.jump_if(Cc::P);

        let bound = self.fp_scratch();
        // 2^32 as a double.
        let scratch = self.scratch();
        self.move_imm64(Imm64::new(0x41F0_0000_0000_0000), scratch);
        self.move64_to_double(scratch, bound);
        self.asm.ucomisd_rr(bound, src);
        let overflows = self.jump_if(Cc::AE);

        self.zero_double(bound);
        self.asm.ucomisd_rr(bound, src);
        let negative = self.jump_if(Cc::B);

        // 0 <= src < 2^32: the 64-bit truncation is exact and fits.
        self.truncate_double_to_int64(src, dest);
        self.zero_extend32_to_64(dest, dest);
        let done_value = self.jump();

        self.link(overflows);
        self.move_imm32(Imm32::new(-1), dest); // u32::MAX
        let done_max = self.jump();

        self.link(is_nan);
        self.link(negative);
        self.move_imm32(Imm32::new(0), dest);

        self.link(done_value);
        self.link(done_max);
    }

    pub fn branch_double_non_zero(&mut self, reg: FpReg, scratch_fp: FpReg) -> Jump {
        self.zero_double(scratch_fp);
        self.branch_double(DoubleCondition::NotEqualAndOrdered, reg, scratch_fp)
    }

    pub fn branch_double_zero_or_nan(&mut self, reg: FpReg, scratch_fp: FpReg) -> Jump {
        self.zero_double(scratch_fp);
        self.branch_double(DoubleCondition::EqualOrUnordered, reg, scratch_fp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(build: impl FnOnce(&mut MacroAssemblerX86_64)) -> Vec<u8> {
        let mut masm = MacroAssemblerX86_64::with_features(crate::cpu::CpuFeatures::baseline());
        build(&mut masm);
        masm.finalize()
    }

    #[test]
    fn equal_and_ordered_synthesizes_two_branches() {
        let bytes = code(|m| {
            let jump = m.branch_double(DoubleCondition::EqualAndOrdered, FpReg::Xmm0, FpReg::Xmm1);
            m.link(jump);
        });
        // ucomisd xmm0, xmm1; jp +6 (over the je); je ...
        assert_eq!(&bytes[..4], &[0x66, 0x0F, 0x2E, 0xC1]);
        assert_eq!(&bytes[4..6], &[0x0F, 0x8A]); // jp
        assert_eq!(&bytes[10..12], &[0x0F, 0x84]); // je
        let jp_rel = i32::from_le_bytes(bytes[6..10].try_into().unwrap());
        assert_eq!(jp_rel, 6, "unordered must skip only the equality branch");
    }

    #[test]
    fn same_register_compare_collapses_to_parity_check() {
        let bytes = code(|m| {
            let jump = m.branch_double(DoubleCondition::EqualAndOrdered, FpReg::Xmm0, FpReg::Xmm0);
            m.link(jump);
        });
        // ucomisd xmm0, xmm0; jnp — a single branch.
        assert_eq!(&bytes[..4], &[0x66, 0x0F, 0x2E, 0xC0]);
        assert_eq!(&bytes[4..6], &[0x0F, 0x8B]); // jnp
        assert_eq!(bytes.len(), 10);
    }

    #[test]
    fn less_than_ordered_swaps_operands_for_above_encoding() {
        let bytes = code(|m| {
            let jump =
                m.branch_double(DoubleCondition::LessThanAndOrdered, FpReg::Xmm0, FpReg::Xmm1);
            m.link(jump);
        });
        // ucomisd xmm1, xmm0 (operands swapped); ja
        assert_eq!(&bytes[..4], &[0x66, 0x0F, 0x2E, 0xC8]);
        assert_eq!(&bytes[4..6], &[0x0F, 0x87]);
    }

    #[test]
    fn rounding_without_sse41_panics() {
        let result = std::panic::catch_unwind(|| {
            let mut masm =
                MacroAssemblerX86_64::with_features(crate::cpu::CpuFeatures::baseline());
            masm.floor_double(FpReg::Xmm0, FpReg::Xmm1);
        });
        assert!(result.is_err());
    }

    #[test]
    fn sub_rrr_dest_aliasing_subtrahend_goes_through_scratch() {
        let bytes = code(|m| m.sub_double_rrr(FpReg::Xmm1, FpReg::Xmm0, FpReg::Xmm0));
        // movaps xmm15, xmm0; movaps xmm0, xmm1; subsd xmm0, xmm15
        assert_eq!(&bytes[..4], &[0x44, 0x0F, 0x28, 0xF8]);
        assert_eq!(&bytes[4..7], &[0x0F, 0x28, 0xC1]);
        assert_eq!(&bytes[7..], &[0xF2, 0x41, 0x0F, 0x5C, 0xC7]);
    }
}
