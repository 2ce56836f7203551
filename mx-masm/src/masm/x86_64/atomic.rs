//! Atomic memory operations.
//!
//! All read-modify-write forms use the lock prefix; exchange is implicitly
//! locked. Compare-and-swap channels the expected value through rax as the
//! hardware demands.
//!
//! Weak and relaxed-weak CAS reuse the strong encoding on this architecture:
//! `lock cmpxchg` cannot spuriously fail, so "weak" here is strong by a
//! deliberate per-architecture choice. The caller-facing contract is
//! unchanged (callers must tolerate spurious failure, and the expected
//! register is clobbered); a port to an LL/SC architecture implements true
//! spurious failure behind the same signatures.

use crate::masm::{Imm32, Jump, StatusCondition};

use super::asm::{Cc, Group1};
use super::{Address, MacroAssemblerX86_64, Reg};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl MacroAssemblerX86_64 {
    fn status_cc(cond: StatusCondition) -> Cc {
        match cond {
            StatusCondition::Success => Cc::E,
            StatusCondition::Failure => Cc::NE,
        }
    }

    // -- fetch-and-modify (result discarded) --------------------------------

    fn fetch_op_reg(&mut self, op: Group1, width: Width, src: Reg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        match width {
            Width::W8 => self.asm.group1_rm8_locked(op, src, base, offset),
            Width::W16 => self.asm.group1_rm16_locked(op, src, base, offset),
            Width::W32 => self.asm.group1_rm_locked(op, false, src, base, offset),
            Width::W64 => self.asm.group1_rm_locked(op, true, src, base, offset),
        }
    }

    fn fetch_op_imm(&mut self, op: Group1, width: Width, imm: Imm32, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        match width {
            Width::W8 => self.asm.group1_im8_locked(op, imm.value as i8, base, offset),
            Width::W16 => self
                .asm
                .group1_im16_locked(op, imm.value as i16, base, offset),
            Width::W32 => self.asm.group1_im_locked(op, false, imm.value, base, offset),
            Width::W64 => self.asm.group1_im_locked(op, true, imm.value, base, offset),
        }
    }

    pub fn atomic_add8(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Add, Width::W8, src, dest);
    }

    pub fn atomic_add16(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Add, Width::W16, src, dest);
    }

    pub fn atomic_add32(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Add, Width::W32, src, dest);
    }

    pub fn atomic_add64(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Add, Width::W64, src, dest);
    }

    pub fn atomic_add32_imm(&mut self, imm: Imm32, dest: Address) {
        self.fetch_op_imm(Group1::Add, Width::W32, imm, dest);
    }

    pub fn atomic_add64_imm(&mut self, imm: Imm32, dest: Address) {
        self.fetch_op_imm(Group1::Add, Width::W64, imm, dest);
    }

    pub fn atomic_sub8(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Sub, Width::W8, src, dest);
    }

    pub fn atomic_sub16(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Sub, Width::W16, src, dest);
    }

    pub fn atomic_sub32(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Sub, Width::W32, src, dest);
    }

    pub fn atomic_sub64(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Sub, Width::W64, src, dest);
    }

    pub fn atomic_sub32_imm(&mut self, imm: Imm32, dest: Address) {
        self.fetch_op_imm(Group1::Sub, Width::W32, imm, dest);
    }

    pub fn atomic_and8(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::And, Width::W8, src, dest);
    }

    pub fn atomic_and16(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::And, Width::W16, src, dest);
    }

    pub fn atomic_and32(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::And, Width::W32, src, dest);
    }

    pub fn atomic_and64(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::And, Width::W64, src, dest);
    }

    pub fn atomic_or8(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Or, Width::W8, src, dest);
    }

    pub fn atomic_or16(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Or, Width::W16, src, dest);
    }

    pub fn atomic_or32(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Or, Width::W32, src, dest);
    }

    pub fn atomic_or64(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Or, Width::W64, src, dest);
    }

    pub fn atomic_xor8(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Xor, Width::W8, src, dest);
    }

    pub fn atomic_xor16(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Xor, Width::W16, src, dest);
    }

    pub fn atomic_xor32(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Xor, Width::W32, src, dest);
    }

    pub fn atomic_xor64(&mut self, src: Reg, dest: Address) {
        self.fetch_op_reg(Group1::Xor, Width::W64, src, dest);
    }

    pub fn atomic_neg8(&mut self, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.negb_m_locked(base, offset);
    }

    pub fn atomic_neg16(&mut self, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.negw_m_locked(base, offset);
    }

    pub fn atomic_neg32(&mut self, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.negl_m_locked(base, offset);
    }

    pub fn atomic_neg64(&mut self, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.negq_m_locked(base, offset);
    }

    pub fn atomic_not8(&mut self, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.notb_m_locked(base, offset);
    }

    pub fn atomic_not16(&mut self, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.notw_m_locked(base, offset);
    }

    pub fn atomic_not32(&mut self, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.notl_m_locked(base, offset);
    }

    pub fn atomic_not64(&mut self, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.notq_m_locked(base, offset);
    }

    // -- exchange -----------------------------------------------------------

    /// Fetch-and-set: stores `reg`, leaves the previous memory value in
    /// `reg`. xchg with a memory operand is locked regardless of prefix.
    pub fn atomic_xchg8(&mut self, reg: Reg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.xchgb_rm(reg, base, offset);
    }

    pub fn atomic_xchg16(&mut self, reg: Reg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.xchgw_rm(reg, base, offset);
    }

    pub fn atomic_xchg32(&mut self, reg: Reg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.xchgl_rm(reg, base, offset);
    }

    pub fn atomic_xchg64(&mut self, reg: Reg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.xchgq_rm(reg, base, offset);
    }

    /// Fetch-and-add with the previous value retained in `reg`.
    pub fn atomic_xchg_add8(&mut self, reg: Reg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.xaddb_rm_locked(reg, base, offset);
    }

    pub fn atomic_xchg_add16(&mut self, reg: Reg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.xaddw_rm_locked(reg, base, offset);
    }

    pub fn atomic_xchg_add32(&mut self, reg: Reg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.xaddl_rm_locked(reg, base, offset);
    }

    pub fn atomic_xchg_add64(&mut self, reg: Reg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.xaddq_rm_locked(reg, base, offset);
    }

    // -- compare-and-swap ---------------------------------------------------

    fn cmpxchg(&mut self, width: Width, new_value: Reg, base: Reg, offset: i32) {
        match width {
            Width::W8 => self.asm.cmpxchgb_rm_locked(new_value, base, offset),
            Width::W16 => self.asm.cmpxchgw_rm_locked(new_value, base, offset),
            Width::W32 => self.asm.cmpxchgl_rm_locked(new_value, base, offset),
            Width::W64 => self.asm.cmpxchgq_rm_locked(new_value, base, offset),
        }
    }

    /// Strong CAS core: preserves the expected register and rax around the
    /// rax channeling. Leaves ZF describing the outcome.
    fn strong_cas_flags(&mut self, width: Width, expected: Reg, new_value: Reg, addr: Address) {
        debug_assert!(
            new_value != Reg::Rax || expected == Reg::Rax,
            "new value in rax would be clobbered by the expected-value channeling"
        );
        let (base, offset) = self.resolve_to_base(addr);
        debug_assert!(
            base != Reg::Rax || expected == Reg::Rax,
            "cas address base may not be rax while channeling"
        );
        debug_assert!(base != Reg::Rsp, "the rax spill would shift an rsp-based address");
        self.push(Reg::Rax);
        if expected != Reg::Rax {
            self.move64(expected, Reg::Rax);
        }
        self.cmpxchg(width, new_value, base, offset);
        // Callers consume ZF before the rax restore; pop leaves flags alone.
    }

    fn strong_cas(
        &mut self,
        width: Width,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        debug_assert!(result != expected, "result must not alias the expected value");
        self.strong_cas_flags(width, expected, new_value, addr);
        if result == Reg::Rax {
            self.pop(Reg::Rax);
            self.asm.setcc_r(Self::status_cc(cond), result);
            self.asm.movzbl_rr(result, result);
        } else {
            self.asm.setcc_r(Self::status_cc(cond), result);
            self.asm.movzbl_rr(result, result);
            self.pop(Reg::Rax);
        }
    }

    /// Weak CAS core: the expected register is swapped with rax and swapped
    /// back, so rax survives but `expected` ends up holding the observed
    /// old value (clobbered, per the weak-CAS caller contract).
    fn weak_cas_flags(&mut self, width: Width, expected: Reg, new_value: Reg, addr: Address) {
        debug_assert!(
            new_value != Reg::Rax || expected == Reg::Rax,
            "new value in rax would be clobbered by the expected-value channeling"
        );
        let (base, offset) = self.resolve_to_base(addr);
        debug_assert!(
            base != Reg::Rax || expected == Reg::Rax,
            "cas address base may not be rax while channeling"
        );
        if expected != Reg::Rax {
            self.asm.xchgq_rr(expected, Reg::Rax);
            let new_value = if new_value == expected { Reg::Rax } else { new_value };
            let base = if base == expected { Reg::Rax } else { base };
            self.cmpxchg(width, new_value, base, offset);
            self.asm.xchgq_rr(expected, Reg::Rax);
        } else {
            self.cmpxchg(width, new_value, base, offset);
        }
    }

    fn weak_cas(
        &mut self,
        width: Width,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.weak_cas_flags(width, expected, new_value, addr);
        self.asm.setcc_r(Self::status_cc(cond), result);
        self.asm.movzbl_rr(result, result);
    }

    /// Strong CAS: never spuriously fails, and the expected register keeps
    /// its original contents. `result` receives 0/1 per `cond`.
    pub fn atomic_strong_cas8(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.strong_cas(Width::W8, cond, expected, new_value, addr, result);
    }

    pub fn atomic_strong_cas16(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.strong_cas(Width::W16, cond, expected, new_value, addr, result);
    }

    pub fn atomic_strong_cas32(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.strong_cas(Width::W32, cond, expected, new_value, addr, result);
    }

    pub fn atomic_strong_cas64(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.strong_cas(Width::W64, cond, expected, new_value, addr, result);
    }

    /// Weak CAS: may spuriously fail on architectures where that is
    /// cheaper; here it is the strong encoding (see module docs). The
    /// expected register is clobbered with the observed value.
    pub fn atomic_weak_cas8(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.weak_cas(Width::W8, cond, expected, new_value, addr, result);
    }

    pub fn atomic_weak_cas16(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.weak_cas(Width::W16, cond, expected, new_value, addr, result);
    }

    pub fn atomic_weak_cas32(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.weak_cas(Width::W32, cond, expected, new_value, addr, result);
    }

    pub fn atomic_weak_cas64(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.weak_cas(Width::W64, cond, expected, new_value, addr, result);
    }

    /// Relaxed weak CAS: atomicity only, no ordering guarantee beyond it.
    /// The locked encoding already orders on this architecture; the relaxed
    /// name records the caller's weaker requirement, not a different
    /// lowering.
    pub fn atomic_relaxed_weak_cas32(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.weak_cas(Width::W32, cond, expected, new_value, addr, result);
    }

    pub fn atomic_relaxed_weak_cas64(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.weak_cas(Width::W64, cond, expected, new_value, addr, result);
    }

    pub fn atomic_relaxed_weak_cas8(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
        result: Reg,
    ) {
        self.weak_cas(Width::W8, cond, expected, new_value, addr, result);
    }

    /// Branch directly on the CAS outcome, for retry loops that would
    /// otherwise pay an extra compare.
    pub fn branch_atomic_strong_cas32(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
    ) -> Jump {
        self.strong_cas_flags(Width::W32, expected, new_value, addr);
        self.pop(Reg::Rax);
        self.jump_if(Self::status_cc(cond))
    }

    pub fn branch_atomic_strong_cas64(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
    ) -> Jump {
        self.strong_cas_flags(Width::W64, expected, new_value, addr);
        self.pop(Reg::Rax);
        self.jump_if(Self::status_cc(cond))
    }

    pub fn branch_atomic_weak_cas32(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
    ) -> Jump {
        self.weak_cas_flags(Width::W32, expected, new_value, addr);
        self.jump_if(Self::status_cc(cond))
    }

    pub fn branch_atomic_weak_cas64(
        &mut self,
        cond: StatusCondition,
        expected: Reg,
        new_value: Reg,
        addr: Address,
    ) -> Jump {
        self.weak_cas_flags(Width::W64, expected, new_value, addr);
        self.jump_if(Self::status_cc(cond))
    }

    // -- fences -------------------------------------------------------------

    /// Full two-way fence with acquire-release semantics.
    pub fn memory_fence(&mut self) {
        self.asm.mfence();
    }

    /// Load-load/load-store fence. On x86_64 ordinary loads are already
    /// acquire-ordered, so nothing is emitted. This is an x86_64 fact, not
    /// a portable default: a weakly-ordered port must emit a real fence.
    pub fn load_fence(&mut self) {}

    /// Store-store fence. No-op for the same x86_64-specific reason as
    /// [`Self::load_fence`].
    pub fn store_fence(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masm::Scale;

    fn code(build: impl FnOnce(&mut MacroAssemblerX86_64)) -> Vec<u8> {
        let mut masm = MacroAssemblerX86_64::new();
        build(&mut masm);
        masm.finalize()
    }

    #[test]
    fn fetch_ops_carry_lock_prefix() {
        let bytes = code(|m| m.atomic_add32(Reg::Rax, Address::base(Reg::Rdi, 0)));
        assert_eq!(bytes, [0xF0, 0x01, 0x07]);
        let bytes = code(|m| m.atomic_add64(Reg::Rax, Address::base(Reg::Rdi, 0)));
        assert_eq!(bytes, [0xF0, 0x48, 0x01, 0x07]);
    }

    #[test]
    fn fences() {
        assert_eq!(code(|m| m.memory_fence()), [0x0F, 0xAE, 0xF0]);
        assert!(code(|m| m.load_fence()).is_empty());
        assert!(code(|m| m.store_fence()).is_empty());
    }

    #[test]
    fn strong_cas_saves_and_restores_rax() {
        let bytes = code(|m| {
            m.atomic_strong_cas32(
                StatusCondition::Success,
                Reg::Rdx,
                Reg::Rcx,
                Address::base(Reg::Rdi, 0),
                Reg::Rsi,
            )
        });
        // push rax; mov rax, rdx; lock cmpxchg [rdi], ecx; sete sil;
        // movzx esi, sil; pop rax
        assert_eq!(bytes[0], 0x50);
        assert_eq!(*bytes.last().unwrap(), 0x58);
        assert!(bytes.windows(4).any(|w| w == [0xF0, 0x0F, 0xB1, 0x0F]));
    }

    #[test]
    fn weak_cas_swaps_expected_through_rax() {
        let bytes = code(|m| {
            m.atomic_weak_cas32(
                StatusCondition::Success,
                Reg::Rdx,
                Reg::Rcx,
                Address::base(Reg::Rdi, 0),
                Reg::Rsi,
            )
        });
        // xchg rax, rdx (short form) on both sides of the cmpxchg, no
        // push/pop.
        assert!(!bytes.contains(&0x50));
        let swaps = bytes.windows(2).filter(|w| *w == [0x48, 0x92]).count();
        assert_eq!(swaps, 2);
    }

    #[test]
    fn xchg_add_uses_xadd() {
        let bytes = code(|m| m.atomic_xchg_add64(Reg::Rax, Address::base(Reg::Rdi, 8)));
        assert_eq!(bytes, [0xF0, 0x48, 0x0F, 0xC1, 0x47, 0x08]);
    }

    #[test]
    fn atomic_ops_resolve_base_index_addresses() {
        let bytes = code(|m| {
            m.atomic_and32(
                Reg::Rax,
                Address::base_index(Reg::Rdi, Reg::Rsi, Scale::TimesFour, 0),
            )
        });
        // lea r11, [rdi+rsi*4]; lock and [r11], eax
        assert_eq!(&bytes[..4], &[0x4C, 0x8D, 0x1C, 0xB7]);
        assert_eq!(&bytes[4..], &[0xF0, 0x41, 0x21, 0x03]);
    }
}
