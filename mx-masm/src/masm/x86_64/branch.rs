//! Comparison, branching, boolean materialization, conditional moves, and
//! the call/patch emission surface.

use crate::masm::{
    Call, CallKind, DataLabelPtr, Imm32, Imm64, Jump, Label, RelationalCondition,
    ResultCondition, commute_compare_to_zero_into_test,
};

use super::asm::{Cc, Group1};
use super::{
    Address, MacroAssemblerX86_64, Mem, MOVE_WITH_PATCH_IMM_OFFSET, PATCHABLE_CALL_SPAN, Reg,
};

impl MacroAssemblerX86_64 {
    pub(crate) fn relational_cc(cond: RelationalCondition) -> Cc {
        match cond {
            RelationalCondition::Equal => Cc::E,
            RelationalCondition::NotEqual => Cc::NE,
            RelationalCondition::Above => Cc::A,
            RelationalCondition::AboveOrEqual => Cc::AE,
            RelationalCondition::Below => Cc::B,
            RelationalCondition::BelowOrEqual => Cc::BE,
            RelationalCondition::GreaterThan => Cc::G,
            RelationalCondition::GreaterThanOrEqual => Cc::GE,
            RelationalCondition::LessThan => Cc::L,
            RelationalCondition::LessThanOrEqual => Cc::LE,
        }
    }

    pub(crate) fn result_cc(cond: ResultCondition) -> Cc {
        match cond {
            ResultCondition::Overflow => Cc::O,
            ResultCondition::Carry => Cc::B,
            ResultCondition::Signed => Cc::S,
            ResultCondition::PositiveOrZero => Cc::NS,
            ResultCondition::Zero => Cc::E,
            ResultCondition::NonZero => Cc::NE,
        }
    }

    // -- compares (flag-setting only) ---------------------------------------

    pub fn cmp32(&mut self, left: Reg, right: Reg) {
        self.asm.group1_rr32(Group1::Cmp, right, left);
    }

    pub fn cmp64(&mut self, left: Reg, right: Reg) {
        self.asm.group1_rr64(Group1::Cmp, right, left);
    }

    /// Compare against an immediate, rewriting compare-to-zero into the
    /// cheaper register self-test when the condition has a test equivalent.
    /// Returns the condition code the caller should consume.
    fn cmp32_imm(&mut self, cond: RelationalCondition, left: Reg, right: Imm32) -> Cc {
        if right.value == 0 && !right.patchable {
            if let Some(test_cond) = commute_compare_to_zero_into_test(cond) {
                self.asm.testl_rr(left, left);
                return Self::result_cc(test_cond);
            }
        }
        self.asm
            .group1_ir32(Group1::Cmp, right.value, !right.patchable, left);
        Self::relational_cc(cond)
    }

    fn cmp64_imm(&mut self, cond: RelationalCondition, left: Reg, right: Imm32) -> Cc {
        if right.value == 0 && !right.patchable {
            if let Some(test_cond) = commute_compare_to_zero_into_test(cond) {
                self.asm.testq_rr(left, left);
                return Self::result_cc(test_cond);
            }
        }
        self.asm
            .group1_ir64(Group1::Cmp, right.value, !right.patchable, left);
        Self::relational_cc(cond)
    }

    // -- materializing branches ---------------------------------------------

    pub fn branch32(&mut self, cond: RelationalCondition, left: Reg, right: Reg) -> Jump {
        self.cmp32(left, right);
        self.jump_if(Self::relational_cc(cond))
    }

    pub fn branch32_imm(&mut self, cond: RelationalCondition, left: Reg, right: Imm32) -> Jump {
        let cc = self.cmp32_imm(cond, left, right);
        self.jump_if(cc)
    }

    pub fn branch32_mem(&mut self, cond: RelationalCondition, left: Address, right: Reg) -> Jump {
        match self.resolve(left) {
            Mem::Base(base, offset) => self.asm.group1_rm32(Group1::Cmp, right, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_rsib32(Group1::Cmp, right, base, index, scale, offset)
            }
        }
        self.jump_if(Self::relational_cc(cond))
    }

    pub fn branch32_mem_imm(
        &mut self,
        cond: RelationalCondition,
        left: Address,
        right: Imm32,
    ) -> Jump {
        match self.resolve(left) {
            Mem::Base(base, offset) => {
                self.asm
                    .group1_im32(Group1::Cmp, right.value, !right.patchable, base, offset)
            }
            Mem::Sib(base, index, scale, offset) => self.asm.group1_isib32(
                Group1::Cmp,
                right.value,
                !right.patchable,
                base,
                index,
                scale,
                offset,
            ),
        }
        self.jump_if(Self::relational_cc(cond))
    }

    pub fn branch64(&mut self, cond: RelationalCondition, left: Reg, right: Reg) -> Jump {
        self.cmp64(left, right);
        self.jump_if(Self::relational_cc(cond))
    }

    pub fn branch64_imm(&mut self, cond: RelationalCondition, left: Reg, right: Imm32) -> Jump {
        let cc = self.cmp64_imm(cond, left, right);
        self.jump_if(cc)
    }

    /// Full-width immediate compare; values outside the sign-extended
    /// 32-bit range go through the scratch register.
    pub fn branch64_imm64(&mut self, cond: RelationalCondition, left: Reg, right: Imm64) -> Jump {
        if !right.patchable && i32::try_from(right.value).is_ok() {
            return self.branch64_imm(cond, left, Imm32::new(right.value as i32));
        }
        let scratch = self.scratch();
        debug_assert!(left != scratch, "operand aliases the scratch register");
        self.asm.movq_i64r(right.value, scratch);
        self.branch64(cond, left, scratch)
    }

    pub fn branch64_mem(&mut self, cond: RelationalCondition, left: Address, right: Reg) -> Jump {
        match self.resolve(left) {
            Mem::Base(base, offset) => self.asm.group1_rm64(Group1::Cmp, right, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_rsib64(Group1::Cmp, right, base, index, scale, offset)
            }
        }
        self.jump_if(Self::relational_cc(cond))
    }

    /// Byte compare against an immediate, for packed flag/tag fields.
    pub fn branch8_mem_imm(
        &mut self,
        cond: RelationalCondition,
        left: Address,
        right: Imm32,
    ) -> Jump {
        let (base, offset) = self.resolve_to_base(left);
        self.asm.cmpb_im(right.value as i8, base, offset);
        self.jump_if(Self::relational_cc(cond))
    }

    pub fn branch_test32(&mut self, cond: ResultCondition, reg: Reg, mask: Imm32) -> Jump {
        if mask.value == -1 && !mask.patchable {
            self.asm.testl_rr(reg, reg);
        } else {
            self.asm.testl_ir(mask.value, reg);
        }
        self.jump_if(Self::result_cc(cond))
    }

    pub fn branch_test32_rr(&mut self, cond: ResultCondition, reg: Reg, mask: Reg) -> Jump {
        self.asm.testl_rr(mask, reg);
        self.jump_if(Self::result_cc(cond))
    }

    pub fn branch_test64(&mut self, cond: ResultCondition, reg: Reg, mask: Imm32) -> Jump {
        if mask.value == -1 && !mask.patchable {
            self.asm.testq_rr(reg, reg);
        } else {
            self.asm.testq_ir(mask.value, reg);
        }
        self.jump_if(Self::result_cc(cond))
    }

    pub fn branch_test64_rr(&mut self, cond: ResultCondition, reg: Reg, mask: Reg) -> Jump {
        self.asm.testq_rr(mask, reg);
        self.jump_if(Self::result_cc(cond))
    }

    pub fn branch_test8(&mut self, cond: ResultCondition, reg: Reg, mask: Imm32) -> Jump {
        self.asm.testb_ir(mask.value as i8, reg);
        self.jump_if(Self::result_cc(cond))
    }

    pub fn branch_test8_mem(&mut self, cond: ResultCondition, address: Address, mask: Imm32) -> Jump {
        let (base, offset) = self.resolve_to_base(address);
        self.asm.testb_im(mask.value as i8, base, offset);
        self.jump_if(Self::result_cc(cond))
    }

    pub fn branch_test32_mem(
        &mut self,
        cond: ResultCondition,
        address: Address,
        mask: Imm32,
    ) -> Jump {
        let (base, offset) = self.resolve_to_base(address);
        self.asm.testl_im(mask.value, base, offset);
        self.jump_if(Self::result_cc(cond))
    }

    // -- materializing booleans ---------------------------------------------

    /// Shared setcc tail. When the destination could be cleared before the
    /// compare the zero-extension is already done; otherwise extend the
    /// flag byte after the fact.
    fn materialize_flag(&mut self, cc: Cc, dest: Reg, dest_was_cleared: bool) {
        self.asm.setcc_r(cc, dest);
        if !dest_was_cleared {
            self.asm.movzbl_rr(dest, dest);
        }
    }

    pub fn compare32(&mut self, cond: RelationalCondition, left: Reg, right: Reg, dest: Reg) {
        let clear_first = dest != left && dest != right;
        if clear_first {
            // xor clobbers flags, so it must precede the compare.
            self.move_imm32(Imm32::new(0), dest);
        }
        self.cmp32(left, right);
        self.materialize_flag(Self::relational_cc(cond), dest, clear_first);
    }

    pub fn compare32_imm(
        &mut self,
        cond: RelationalCondition,
        left: Reg,
        right: Imm32,
        dest: Reg,
    ) {
        let clear_first = dest != left;
        if clear_first {
            self.move_imm32(Imm32::new(0), dest);
        }
        let cc = self.cmp32_imm(cond, left, right);
        self.materialize_flag(cc, dest, clear_first);
    }

    pub fn compare64(&mut self, cond: RelationalCondition, left: Reg, right: Reg, dest: Reg) {
        let clear_first = dest != left && dest != right;
        if clear_first {
            self.move_imm32(Imm32::new(0), dest);
        }
        self.cmp64(left, right);
        self.materialize_flag(Self::relational_cc(cond), dest, clear_first);
    }

    pub fn compare64_imm(
        &mut self,
        cond: RelationalCondition,
        left: Reg,
        right: Imm32,
        dest: Reg,
    ) {
        let clear_first = dest != left;
        if clear_first {
            self.move_imm32(Imm32::new(0), dest);
        }
        let cc = self.cmp64_imm(cond, left, right);
        self.materialize_flag(cc, dest, clear_first);
    }

    /// Materialize the boolean outcome of a bit test.
    pub fn test32(&mut self, cond: ResultCondition, reg: Reg, mask: Imm32, dest: Reg) {
        let clear_first = dest != reg;
        if clear_first {
            self.move_imm32(Imm32::new(0), dest);
        }
        if mask.value == -1 && !mask.patchable {
            self.asm.testl_rr(reg, reg);
        } else {
            self.asm.testl_ir(mask.value, reg);
        }
        self.materialize_flag(Self::result_cc(cond), dest, clear_first);
    }

    pub fn test64(&mut self, cond: ResultCondition, reg: Reg, mask: Imm32, dest: Reg) {
        let clear_first = dest != reg;
        if clear_first {
            self.move_imm32(Imm32::new(0), dest);
        }
        if mask.value == -1 && !mask.patchable {
            self.asm.testq_rr(reg, reg);
        } else {
            self.asm.testq_ir(mask.value, reg);
        }
        self.materialize_flag(Self::result_cc(cond), dest, clear_first);
    }

    // -- conditional moves ---------------------------------------------------

    /// Select `src` into `dest` when the comparison holds; `dest` keeps its
    /// value otherwise. No branch is emitted.
    pub fn move_conditionally32(
        &mut self,
        cond: RelationalCondition,
        left: Reg,
        right: Reg,
        src: Reg,
        dest: Reg,
    ) {
        self.cmp32(left, right);
        self.asm.cmovccl_rr(Self::relational_cc(cond), src, dest);
    }

    /// Full two-sided select: `dest = cond ? then_case : else_case`.
    pub fn move_conditionally32_then_else(
        &mut self,
        cond: RelationalCondition,
        left: Reg,
        right: Reg,
        then_case: Reg,
        else_case: Reg,
        dest: Reg,
    ) {
        self.cmp32(left, right);
        if else_case == dest {
            self.asm.cmovccl_rr(Self::relational_cc(cond), then_case, dest);
        } else if then_case == dest {
            self.asm
                .cmovccl_rr(Self::relational_cc(cond.invert()), else_case, dest);
        } else {
            // Plain moves do not disturb the flags set above.
            self.move32(else_case, dest);
            self.asm.cmovccl_rr(Self::relational_cc(cond), then_case, dest);
        }
    }

    pub fn move_conditionally64(
        &mut self,
        cond: RelationalCondition,
        left: Reg,
        right: Reg,
        src: Reg,
        dest: Reg,
    ) {
        self.cmp64(left, right);
        self.asm.cmovccq_rr(Self::relational_cc(cond), src, dest);
    }

    pub fn move_conditionally64_then_else(
        &mut self,
        cond: RelationalCondition,
        left: Reg,
        right: Reg,
        then_case: Reg,
        else_case: Reg,
        dest: Reg,
    ) {
        self.cmp64(left, right);
        if else_case == dest {
            self.asm.cmovccq_rr(Self::relational_cc(cond), then_case, dest);
        } else if then_case == dest {
            self.asm
                .cmovccq_rr(Self::relational_cc(cond.invert()), else_case, dest);
        } else {
            self.move64(else_case, dest);
            self.asm.cmovccq_rr(Self::relational_cc(cond), then_case, dest);
        }
    }

    /// Conditional move gated on a bit test.
    pub fn move_conditionally_test32(
        &mut self,
        cond: ResultCondition,
        reg: Reg,
        mask: Reg,
        src: Reg,
        dest: Reg,
    ) {
        self.asm.testl_rr(mask, reg);
        self.asm.cmovccl_rr(Self::result_cc(cond), src, dest);
    }

    // -- calls ---------------------------------------------------------------

    /// Call with a rel32 target, linked later to an in-buffer label. Used
    /// for calls within the same generated-code region.
    pub fn near_call(&mut self) -> Call {
        Call::new(self.asm.call_rel32(), CallKind::Near)
    }

    /// Link a near call to a recorded label.
    pub fn link_call(&mut self, call: Call, target: Label) {
        debug_assert!(matches!(call.kind(), CallKind::Near));
        self.asm.link_rel32(call.at(), target.label.offset());
    }

    pub fn call_reg(&mut self, target: Reg) {
        self.asm.call_r(target);
    }

    pub fn call_mem(&mut self, target: Address) {
        let (base, offset) = self.resolve_to_base(target);
        self.asm.call_m(base, offset);
    }

    /// Call a fixed runtime address through the scratch register. Not
    /// patchable; for patchable targets use [`Self::patchable_call`].
    pub fn call_ptr(&mut self, target: usize) {
        let scratch = self.scratch();
        self.asm.movq_i64r(target as i64, scratch);
        self.asm.call_r(scratch);
    }

    /// Call whose target lives in a full-width immediate slot and may be
    /// rewritten after generation. The byte distance from the returned
    /// label to the call instruction is always [`PATCHABLE_CALL_SPAN`].
    pub fn patchable_call(&mut self, initial: usize) -> (DataLabelPtr, Call) {
        let scratch = self.scratch();
        let label = self.move_with_patch(Imm64::patchable(initial as i64), scratch);
        debug_assert_eq!(
            self.assembler_label().offset() - label.offset(),
            PATCHABLE_CALL_SPAN,
            "patchable call span must be an architecture constant"
        );
        self.asm.call_r(scratch);
        let call = Call::new(self.assembler_label().offset(), CallKind::Patchable);
        (label, call)
    }

    /// Patchable call whose immediate slot is naturally aligned, so a
    /// concurrent repatch is a single atomic store and executing threads
    /// can never observe a torn target. The padding is a pure function of
    /// the current buffer length.
    pub fn thread_safe_patchable_call(&mut self, initial: usize) -> (DataLabelPtr, Call) {
        let imm_field = self.buffer_len() as u32 + MOVE_WITH_PATCH_IMM_OFFSET;
        let padding = (8 - (imm_field % 8)) % 8;
        self.nop_filled(padding as usize);
        debug_assert_eq!(
            (self.buffer_len() as u32 + MOVE_WITH_PATCH_IMM_OFFSET) % 8,
            0,
            "patchable immediate slot must be naturally aligned"
        );
        self.patchable_call(initial)
    }

    /// A jump at a recorded boundary, sized for later replacement by the
    /// post-generation patch primitives.
    pub fn patchable_jump(&mut self) -> (Label, Jump) {
        let label = self.label();
        let jump = self.jump();
        (label, jump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(build: impl FnOnce(&mut MacroAssemblerX86_64)) -> Vec<u8> {
        let mut masm = MacroAssemblerX86_64::new();
        build(&mut masm);
        masm.finalize()
    }

    #[test]
    fn compare_to_zero_becomes_register_test() {
        let bytes = code(|m| {
            let jump = m.branch32_imm(RelationalCondition::Equal, Reg::Rax, Imm32::new(0));
            m.link(jump);
        });
        // test eax, eax; jz
        assert_eq!(&bytes[..2], &[0x85, 0xC0]);
        assert_eq!(&bytes[2..4], &[0x0F, 0x84]);
    }

    #[test]
    fn compare_to_zero_without_test_equivalent_keeps_cmp() {
        let bytes = code(|m| {
            let jump = m.branch32_imm(RelationalCondition::GreaterThan, Reg::Rax, Imm32::new(0));
            m.link(jump);
        });
        // cmp eax, 0 (imm8 form); jg
        assert_eq!(&bytes[..3], &[0x83, 0xF8, 0x00]);
        assert_eq!(&bytes[3..5], &[0x0F, 0x8F]);
    }

    #[test]
    fn compare32_clears_destination_before_compare() {
        let bytes = code(|m| {
            m.compare32(RelationalCondition::LessThan, Reg::Rdi, Reg::Rsi, Reg::Rax)
        });
        // xor eax, eax; cmp edi, esi; setl al
        assert_eq!(
            bytes,
            [0x31, 0xC0, 0x39, 0xF7, 0x0F, 0x9C, 0xC0]
        );
    }

    #[test]
    fn compare32_extends_when_destination_aliases_operand() {
        let bytes = code(|m| {
            m.compare32(RelationalCondition::LessThan, Reg::Rdi, Reg::Rsi, Reg::Rdi)
        });
        // cmp edi, esi; setl dil; movzx edi, dil
        assert_eq!(
            bytes,
            [0x39, 0xF7, 0x40, 0x0F, 0x9C, 0xC7, 0x40, 0x0F, 0xB6, 0xFF]
        );
    }

    #[test]
    fn patchable_call_span_is_constant() {
        let mut masm = MacroAssemblerX86_64::new();
        let (label, _call) = masm.patchable_call(0);
        let code = masm.finalize();
        // movabs r11, imm64 then call r11 at the documented distance.
        assert_eq!(label.offset(), 0);
        assert_eq!(&code[PATCHABLE_CALL_SPAN as usize..], &[0x41, 0xFF, 0xD3]);
    }

    #[test]
    fn thread_safe_patchable_call_aligns_immediate_slot() {
        for preceding in 0..16 {
            let mut masm = MacroAssemblerX86_64::new();
            masm.nop_filled(preceding);
            let (label, _call) = masm.thread_safe_patchable_call(0);
            assert_eq!(
                (label.offset() + MOVE_WITH_PATCH_IMM_OFFSET) % 8,
                0,
                "misaligned slot with {preceding} preceding bytes"
            );
        }
    }

    #[test]
    fn cmov_two_sided_select_preserves_flags() {
        let bytes = code(|m| {
            m.move_conditionally32_then_else(
                RelationalCondition::Equal,
                Reg::Rdi,
                Reg::Rsi,
                Reg::Rdx,
                Reg::Rcx,
                Reg::Rax,
            )
        });
        // cmp edi, esi; mov eax, ecx; cmove eax, edx
        assert_eq!(bytes, [0x39, 0xF7, 0x89, 0xC8, 0x0F, 0x44, 0xC2]);
    }
}
