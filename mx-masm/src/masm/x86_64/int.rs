//! Scalar integer operation dispatch.
//!
//! Every family offers the operand forms the driving compiler may pass and
//! picks the cheapest correct encoding per combination. The aliasing rules
//! matter more than the encodings: a wrong "move first" vs "reuse in place"
//! choice silently corrupts a live register.

use crate::masm::{Imm32, Jump, ResultCondition};

use super::asm::{Group1, Group2};
use super::{Address, MacroAssemblerX86_64, Mem, Reg};

impl MacroAssemblerX86_64 {
    // -- add ---------------------------------------------------------------

    pub fn add32(&mut self, src: Reg, dest: Reg) {
        self.asm.group1_rr32(Group1::Add, src, dest);
    }

    pub fn add64(&mut self, src: Reg, dest: Reg) {
        self.asm.group1_rr64(Group1::Add, src, dest);
    }

    pub fn add32_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm
            .group1_ir32(Group1::Add, imm.value, !imm.patchable, dest);
    }

    pub fn add64_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm
            .group1_ir64(Group1::Add, imm.value, !imm.patchable, dest);
    }

    pub fn add32_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if dest == a {
            self.add32(b, dest);
        } else if dest == b {
            self.add32(a, dest);
        } else {
            // Three distinct registers: lea computes the sum without
            // touching either source.
            self.asm
                .leal_sibr(a, b, crate::masm::Scale::TimesOne, 0, dest);
        }
    }

    pub fn add64_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if dest == a {
            self.add64(b, dest);
        } else if dest == b {
            self.add64(a, dest);
        } else {
            self.asm
                .leaq_sibr(a, b, crate::masm::Scale::TimesOne, 0, dest);
        }
    }

    pub fn add32_imm_to(&mut self, imm: Imm32, src: Reg, dest: Reg) {
        if src == dest {
            self.add32_imm(imm, dest);
        } else {
            self.asm.leal_mr(src, imm.value, dest);
        }
    }

    pub fn add64_imm_to(&mut self, imm: Imm32, src: Reg, dest: Reg) {
        if src == dest {
            self.add64_imm(imm, dest);
        } else {
            self.asm.leaq_mr(src, imm.value, dest);
        }
    }

    pub fn add32_mem(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.group1_mr32(Group1::Add, base, offset, dest),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_sibr32(Group1::Add, base, index, scale, offset, dest)
            }
        }
    }

    pub fn add64_mem(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.group1_mr64(Group1::Add, base, offset, dest),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_sibr64(Group1::Add, base, index, scale, offset, dest)
            }
        }
    }

    /// Memory-source three-operand form. When `dest` is not one of the two
    /// logical operands the memory word is first loaded into `dest`, so no
    /// live register is clobbered.
    pub fn add32_mem_to(&mut self, src: Address, operand: Reg, dest: Reg) {
        if operand == dest {
            self.add32_mem(src, dest);
        } else {
            self.load32(src, dest);
            self.add32(operand, dest);
        }
    }

    pub fn add32_to_mem(&mut self, src: Reg, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.group1_rm32(Group1::Add, src, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_rsib32(Group1::Add, src, base, index, scale, offset)
            }
        }
    }

    pub fn add64_to_mem(&mut self, src: Reg, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.group1_rm64(Group1::Add, src, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_rsib64(Group1::Add, src, base, index, scale, offset)
            }
        }
    }

    pub fn add32_imm_to_mem(&mut self, imm: Imm32, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => {
                self.asm
                    .group1_im32(Group1::Add, imm.value, !imm.patchable, base, offset)
            }
            Mem::Sib(base, index, scale, offset) => self.asm.group1_isib32(
                Group1::Add,
                imm.value,
                !imm.patchable,
                base,
                index,
                scale,
                offset,
            ),
        }
    }

    pub fn add64_imm_to_mem(&mut self, imm: Imm32, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => {
                self.asm
                    .group1_im64(Group1::Add, imm.value, !imm.patchable, base, offset)
            }
            Mem::Sib(..) => {
                // No 64-bit immediate-to-sib group form wired up; go through
                // the scratch register.
                let scratch = self.scratch();
                self.move_imm32(imm, scratch);
                self.sign_extend32_to_64(scratch, scratch);
                self.add64_to_mem(scratch, dest);
            }
        }
    }

    // -- sub ---------------------------------------------------------------

    pub fn sub32(&mut self, src: Reg, dest: Reg) {
        self.asm.group1_rr32(Group1::Sub, src, dest);
    }

    pub fn sub64(&mut self, src: Reg, dest: Reg) {
        self.asm.group1_rr64(Group1::Sub, src, dest);
    }

    pub fn sub32_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm
            .group1_ir32(Group1::Sub, imm.value, !imm.patchable, dest);
    }

    pub fn sub64_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm
            .group1_ir64(Group1::Sub, imm.value, !imm.patchable, dest);
    }

    /// Subtraction is not commutative: when `dest` aliases the subtrahend
    /// the move-then-subtract shortcut would destroy it, so that case is
    /// rewritten as negate-and-add.
    pub fn sub32_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if a == b {
            // x - x: materialize zero directly.
            self.move_imm32(Imm32::new(0), dest);
        } else if dest == a {
            self.sub32(b, dest);
        } else if dest == b {
            self.neg32(dest);
            self.add32(a, dest);
        } else {
            self.move32(a, dest);
            self.sub32(b, dest);
        }
    }

    pub fn sub64_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if a == b {
            self.move_imm32(Imm32::new(0), dest);
        } else if dest == a {
            self.sub64(b, dest);
        } else if dest == b {
            self.neg64(dest);
            self.add64(a, dest);
        } else {
            self.move64(a, dest);
            self.sub64(b, dest);
        }
    }

    pub fn sub32_imm_to(&mut self, imm: Imm32, src: Reg, dest: Reg) {
        if src == dest {
            self.sub32_imm(imm, dest);
        } else if let Some(negated) = imm.value.checked_neg() {
            self.asm.leal_mr(src, negated, dest);
        } else {
            self.move32(src, dest);
            self.sub32_imm(imm, dest);
        }
    }

    pub fn sub32_mem(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.group1_mr32(Group1::Sub, base, offset, dest),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_sibr32(Group1::Sub, base, index, scale, offset, dest)
            }
        }
    }

    pub fn sub64_mem(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.group1_mr64(Group1::Sub, base, offset, dest),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_sibr64(Group1::Sub, base, index, scale, offset, dest)
            }
        }
    }

    pub fn sub32_to_mem(&mut self, src: Reg, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.group1_rm32(Group1::Sub, src, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_rsib32(Group1::Sub, src, base, index, scale, offset)
            }
        }
    }

    pub fn sub32_imm_to_mem(&mut self, imm: Imm32, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => {
                self.asm
                    .group1_im32(Group1::Sub, imm.value, !imm.patchable, base, offset)
            }
            Mem::Sib(base, index, scale, offset) => self.asm.group1_isib32(
                Group1::Sub,
                imm.value,
                !imm.patchable,
                base,
                index,
                scale,
                offset,
            ),
        }
    }

    // -- bitwise and/or/xor ------------------------------------------------

    pub fn and32(&mut self, src: Reg, dest: Reg) {
        self.asm.group1_rr32(Group1::And, src, dest);
    }

    pub fn and64(&mut self, src: Reg, dest: Reg) {
        self.asm.group1_rr64(Group1::And, src, dest);
    }

    pub fn and32_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm
            .group1_ir32(Group1::And, imm.value, !imm.patchable, dest);
    }

    pub fn and64_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm
            .group1_ir64(Group1::And, imm.value, !imm.patchable, dest);
    }

    pub fn and32_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if a == b {
            // x & x == x.
            self.move32(a, dest);
        } else if dest == a {
            self.and32(b, dest);
        } else if dest == b {
            self.and32(a, dest);
        } else {
            self.move32(a, dest);
            self.and32(b, dest);
        }
    }

    pub fn and64_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if a == b {
            self.move64(a, dest);
        } else if dest == a {
            self.and64(b, dest);
        } else if dest == b {
            self.and64(a, dest);
        } else {
            self.move64(a, dest);
            self.and64(b, dest);
        }
    }

    pub fn and32_mem(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.group1_mr32(Group1::And, base, offset, dest),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_sibr32(Group1::And, base, index, scale, offset, dest)
            }
        }
    }

    pub fn and32_mem_to(&mut self, src: Address, operand: Reg, dest: Reg) {
        if operand == dest {
            self.and32_mem(src, dest);
        } else {
            self.load32(src, dest);
            self.and32(operand, dest);
        }
    }

    pub fn and32_to_mem(&mut self, src: Reg, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.group1_rm32(Group1::And, src, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_rsib32(Group1::And, src, base, index, scale, offset)
            }
        }
    }

    pub fn and32_imm_to_mem(&mut self, imm: Imm32, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => {
                self.asm
                    .group1_im32(Group1::And, imm.value, !imm.patchable, base, offset)
            }
            Mem::Sib(base, index, scale, offset) => self.asm.group1_isib32(
                Group1::And,
                imm.value,
                !imm.patchable,
                base,
                index,
                scale,
                offset,
            ),
        }
    }

    pub fn or32(&mut self, src: Reg, dest: Reg) {
        self.asm.group1_rr32(Group1::Or, src, dest);
    }

    pub fn or64(&mut self, src: Reg, dest: Reg) {
        self.asm.group1_rr64(Group1::Or, src, dest);
    }

    pub fn or32_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm
            .group1_ir32(Group1::Or, imm.value, !imm.patchable, dest);
    }

    pub fn or64_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm
            .group1_ir64(Group1::Or, imm.value, !imm.patchable, dest);
    }

    pub fn or32_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if a == b {
            self.move32(a, dest);
        } else if dest == a {
            self.or32(b, dest);
        } else if dest == b {
            self.or32(a, dest);
        } else {
            self.move32(a, dest);
            self.or32(b, dest);
        }
    }

    pub fn or64_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if a == b {
            self.move64(a, dest);
        } else if dest == a {
            self.or64(b, dest);
        } else if dest == b {
            self.or64(a, dest);
        } else {
            self.move64(a, dest);
            self.or64(b, dest);
        }
    }

    pub fn or32_mem(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.group1_mr32(Group1::Or, base, offset, dest),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_sibr32(Group1::Or, base, index, scale, offset, dest)
            }
        }
    }

    pub fn or32_mem_to(&mut self, src: Address, operand: Reg, dest: Reg) {
        if operand == dest {
            self.or32_mem(src, dest);
        } else {
            self.load32(src, dest);
            self.or32(operand, dest);
        }
    }

    pub fn or32_to_mem(&mut self, src: Reg, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.group1_rm32(Group1::Or, src, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_rsib32(Group1::Or, src, base, index, scale, offset)
            }
        }
    }

    pub fn or32_imm_to_mem(&mut self, imm: Imm32, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => {
                self.asm
                    .group1_im32(Group1::Or, imm.value, !imm.patchable, base, offset)
            }
            Mem::Sib(base, index, scale, offset) => self.asm.group1_isib32(
                Group1::Or,
                imm.value,
                !imm.patchable,
                base,
                index,
                scale,
                offset,
            ),
        }
    }

    pub fn xor32(&mut self, src: Reg, dest: Reg) {
        self.asm.group1_rr32(Group1::Xor, src, dest);
    }

    pub fn xor64(&mut self, src: Reg, dest: Reg) {
        self.asm.group1_rr64(Group1::Xor, src, dest);
    }

    pub fn xor32_imm(&mut self, imm: Imm32, dest: Reg) {
        if imm.value == -1 && !imm.patchable {
            self.asm.notl_r(dest);
        } else {
            self.asm
                .group1_ir32(Group1::Xor, imm.value, !imm.patchable, dest);
        }
    }

    pub fn xor64_imm(&mut self, imm: Imm32, dest: Reg) {
        if imm.value == -1 && !imm.patchable {
            self.asm.notq_r(dest);
        } else {
            self.asm
                .group1_ir64(Group1::Xor, imm.value, !imm.patchable, dest);
        }
    }

    pub fn xor32_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if a == b {
            // x ^ x: materialize zero.
            self.move_imm32(Imm32::new(0), dest);
        } else if dest == a {
            self.xor32(b, dest);
        } else if dest == b {
            self.xor32(a, dest);
        } else {
            self.move32(a, dest);
            self.xor32(b, dest);
        }
    }

    pub fn xor64_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if a == b {
            self.move_imm32(Imm32::new(0), dest);
        } else if dest == a {
            self.xor64(b, dest);
        } else if dest == b {
            self.xor64(a, dest);
        } else {
            self.move64(a, dest);
            self.xor64(b, dest);
        }
    }

    pub fn xor32_mem(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.group1_mr32(Group1::Xor, base, offset, dest),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_sibr32(Group1::Xor, base, index, scale, offset, dest)
            }
        }
    }

    pub fn xor32_to_mem(&mut self, src: Reg, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.group1_rm32(Group1::Xor, src, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm
                    .group1_rsib32(Group1::Xor, src, base, index, scale, offset)
            }
        }
    }

    pub fn xor32_imm_to_mem(&mut self, imm: Imm32, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => {
                self.asm
                    .group1_im32(Group1::Xor, imm.value, !imm.patchable, base, offset)
            }
            Mem::Sib(base, index, scale, offset) => self.asm.group1_isib32(
                Group1::Xor,
                imm.value,
                !imm.patchable,
                base,
                index,
                scale,
                offset,
            ),
        }
    }

    // -- not / neg ---------------------------------------------------------

    pub fn not32(&mut self, dest: Reg) {
        self.asm.notl_r(dest);
    }

    pub fn not64(&mut self, dest: Reg) {
        self.asm.notq_r(dest);
    }

    pub fn not32_mem(&mut self, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.notl_m(base, offset),
            Mem::Sib(..) => {
                let scratch = self.scratch();
                self.load32(dest, scratch);
                self.not32(scratch);
                self.store32(scratch, dest);
            }
        }
    }

    pub fn neg32(&mut self, dest: Reg) {
        self.asm.negl_r(dest);
    }

    pub fn neg64(&mut self, dest: Reg) {
        self.asm.negq_r(dest);
    }

    pub fn neg32_to(&mut self, src: Reg, dest: Reg) {
        if src != dest {
            self.move32(src, dest);
        }
        self.neg32(dest);
    }

    pub fn neg64_to(&mut self, src: Reg, dest: Reg) {
        if src != dest {
            self.move64(src, dest);
        }
        self.neg64(dest);
    }

    // -- multiply ----------------------------------------------------------

    pub fn mul32(&mut self, src: Reg, dest: Reg) {
        self.asm.imull_rr(src, dest);
    }

    pub fn mul64(&mut self, src: Reg, dest: Reg) {
        self.asm.imulq_rr(src, dest);
    }

    pub fn mul32_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if dest == a {
            self.mul32(b, dest);
        } else if dest == b {
            self.mul32(a, dest);
        } else {
            self.move32(a, dest);
            self.mul32(b, dest);
        }
    }

    pub fn mul64_rrr(&mut self, a: Reg, b: Reg, dest: Reg) {
        if dest == a {
            self.mul64(b, dest);
        } else if dest == b {
            self.mul64(a, dest);
        } else {
            self.move64(a, dest);
            self.mul64(b, dest);
        }
    }

    /// The three-operand immediate multiply never aliases: the hardware form
    /// reads `src` and writes `dest` in one instruction.
    pub fn mul32_imm(&mut self, imm: Imm32, src: Reg, dest: Reg) {
        self.asm.imull_i32(src, imm.value, dest);
    }

    pub fn mul64_imm(&mut self, imm: Imm32, src: Reg, dest: Reg) {
        self.asm.imulq_i32(src, imm.value, dest);
    }

    pub fn mul32_mem(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.imull_mr(base, offset, dest),
            Mem::Sib(..) => {
                let scratch = self.scratch();
                self.load32(src, scratch);
                self.mul32(scratch, dest);
            }
        }
    }

    // -- shifts and rotates --------------------------------------------------

    fn shift32_common(&mut self, op: Group2, amount: Reg, dest: Reg) {
        debug_assert!(
            amount != dest || amount == Reg::Rcx,
            "shift amount may not alias the destination unless both are rcx"
        );
        if amount == Reg::Rcx {
            self.asm.group2_clr32(op, dest);
        } else {
            // Channel the amount through CL, preserving rcx around it. If
            // the destination was rcx the value to shift now lives in the
            // amount register.
            self.asm.xchgq_rr(amount, Reg::Rcx);
            let target = if dest == Reg::Rcx { amount } else { dest };
            self.asm.group2_clr32(op, target);
            self.asm.xchgq_rr(amount, Reg::Rcx);
        }
    }

    fn shift64_common(&mut self, op: Group2, amount: Reg, dest: Reg) {
        debug_assert!(
            amount != dest || amount == Reg::Rcx,
            "shift amount may not alias the destination unless both are rcx"
        );
        if amount == Reg::Rcx {
            self.asm.group2_clr64(op, dest);
        } else {
            self.asm.xchgq_rr(amount, Reg::Rcx);
            let target = if dest == Reg::Rcx { amount } else { dest };
            self.asm.group2_clr64(op, target);
            self.asm.xchgq_rr(amount, Reg::Rcx);
        }
    }

    pub fn lshift32(&mut self, amount: Reg, dest: Reg) {
        self.shift32_common(Group2::Shl, amount, dest);
    }

    pub fn lshift32_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm.group2_i8r32(Group2::Shl, (imm.value & 31) as u8, dest);
    }

    pub fn lshift32_to(&mut self, src: Reg, amount: Reg, dest: Reg) {
        debug_assert!(amount != dest, "shift amount may not alias the destination");
        if src != dest {
            self.move32(src, dest);
        }
        self.lshift32(amount, dest);
    }

    pub fn lshift64(&mut self, amount: Reg, dest: Reg) {
        self.shift64_common(Group2::Shl, amount, dest);
    }

    pub fn lshift64_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm.group2_i8r64(Group2::Shl, (imm.value & 63) as u8, dest);
    }

    pub fn rshift32(&mut self, amount: Reg, dest: Reg) {
        self.shift32_common(Group2::Sar, amount, dest);
    }

    pub fn rshift32_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm.group2_i8r32(Group2::Sar, (imm.value & 31) as u8, dest);
    }

    pub fn rshift64(&mut self, amount: Reg, dest: Reg) {
        self.shift64_common(Group2::Sar, amount, dest);
    }

    pub fn rshift64_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm.group2_i8r64(Group2::Sar, (imm.value & 63) as u8, dest);
    }

    pub fn urshift32(&mut self, amount: Reg, dest: Reg) {
        self.shift32_common(Group2::Shr, amount, dest);
    }

    pub fn urshift32_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm.group2_i8r32(Group2::Shr, (imm.value & 31) as u8, dest);
    }

    pub fn urshift64(&mut self, amount: Reg, dest: Reg) {
        self.shift64_common(Group2::Shr, amount, dest);
    }

    pub fn urshift64_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm.group2_i8r64(Group2::Shr, (imm.value & 63) as u8, dest);
    }

    pub fn rotate_left32(&mut self, amount: Reg, dest: Reg) {
        self.shift32_common(Group2::Rol, amount, dest);
    }

    pub fn rotate_left32_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm.group2_i8r32(Group2::Rol, (imm.value & 31) as u8, dest);
    }

    pub fn rotate_left64(&mut self, amount: Reg, dest: Reg) {
        self.shift64_common(Group2::Rol, amount, dest);
    }

    pub fn rotate_left64_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm.group2_i8r64(Group2::Rol, (imm.value & 63) as u8, dest);
    }

    pub fn rotate_right32(&mut self, amount: Reg, dest: Reg) {
        self.shift32_common(Group2::Ror, amount, dest);
    }

    pub fn rotate_right32_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm.group2_i8r32(Group2::Ror, (imm.value & 31) as u8, dest);
    }

    pub fn rotate_right64(&mut self, amount: Reg, dest: Reg) {
        self.shift64_common(Group2::Ror, amount, dest);
    }

    pub fn rotate_right64_imm(&mut self, imm: Imm32, dest: Reg) {
        self.asm.group2_i8r64(Group2::Ror, (imm.value & 63) as u8, dest);
    }

    // -- population count ----------------------------------------------------

    pub fn count_population32(&mut self, src: Reg, dest: Reg) {
        if self.features().popcnt {
            self.asm.popcntl_rr(src, dest);
            return;
        }
        // SWAR fallback: bits are folded pairwise, then by nibble, then
        // summed through a byte multiply.
        let tmp = self.scratch();
        debug_assert!(src != tmp && dest != tmp);
        if src != dest {
            self.move32(src, dest);
        }
        self.move32(dest, tmp);
        self.urshift32_imm(Imm32::new(1), tmp);
        self.and32_imm(Imm32::new(0x5555_5555), tmp);
        self.sub32(tmp, dest);
        self.move32(dest, tmp);
        self.and32_imm(Imm32::new(0x3333_3333), tmp);
        self.urshift32_imm(Imm32::new(2), dest);
        self.and32_imm(Imm32::new(0x3333_3333), dest);
        self.add32(tmp, dest);
        self.move32(dest, tmp);
        self.urshift32_imm(Imm32::new(4), tmp);
        self.add32(tmp, dest);
        self.and32_imm(Imm32::new(0x0F0F_0F0F), dest);
        self.mul32_imm(Imm32::new(0x0101_0101), dest, dest);
        self.urshift32_imm(Imm32::new(24), dest);
    }

    pub fn count_population64(&mut self, src: Reg, dest: Reg) {
        if self.features().popcnt {
            self.asm.popcntq_rr(src, dest);
            return;
        }
        // The 64-bit masks do not fit an immediate field, so the fallback
        // borrows one extra register for them across a push/pop.
        let tmp = self.scratch();
        debug_assert!(src != tmp && dest != tmp);
        let masks = [Reg::Rax, Reg::Rcx, Reg::Rdx, Reg::Rbx]
            .into_iter()
            .find(|&reg| reg != src && reg != dest)
            .expect("four candidates cannot all alias two registers");
        self.push(masks);
        if src != dest {
            self.move64(src, dest);
        }
        self.move_imm64(crate::masm::Imm64::new(0x5555_5555_5555_5555), masks);
        self.move64(dest, tmp);
        self.urshift64_imm(Imm32::new(1), tmp);
        self.and64(masks, tmp);
        self.sub64(tmp, dest);
        self.move_imm64(crate::masm::Imm64::new(0x3333_3333_3333_3333), masks);
        self.move64(dest, tmp);
        self.and64(masks, tmp);
        self.urshift64_imm(Imm32::new(2), dest);
        self.and64(masks, dest);
        self.add64(tmp, dest);
        self.move64(dest, tmp);
        self.urshift64_imm(Imm32::new(4), tmp);
        self.add64(tmp, dest);
        self.move_imm64(crate::masm::Imm64::new(0x0F0F_0F0F_0F0F_0F0F), masks);
        self.and64(masks, dest);
        self.move_imm64(crate::masm::Imm64::new(0x0101_0101_0101_0101), masks);
        self.mul64(masks, dest);
        self.urshift64_imm(Imm32::new(56), dest);
        self.pop(masks);
    }

    // -- flag-observing arithmetic branches ----------------------------------

    pub fn branch_add32(&mut self, cond: ResultCondition, src: Reg, dest: Reg) -> Jump {
        self.add32(src, dest);
        let cc = Self::result_cc(cond);
        self.jump_if(cc)
    }

    pub fn branch_add32_imm(&mut self, cond: ResultCondition, imm: Imm32, dest: Reg) -> Jump {
        self.add32_imm(imm, dest);
        let cc = Self::result_cc(cond);
        self.jump_if(cc)
    }

    pub fn branch_add64(&mut self, cond: ResultCondition, src: Reg, dest: Reg) -> Jump {
        self.add64(src, dest);
        let cc = Self::result_cc(cond);
        self.jump_if(cc)
    }

    /// Flag-observing three-operand add. lea does not set flags, so this
    /// form reduces to move-and-add.
    pub fn branch_add32_rrr(
        &mut self,
        cond: ResultCondition,
        a: Reg,
        b: Reg,
        dest: Reg,
    ) -> Jump {
        if dest == a {
            self.branch_add32(cond, b, dest)
        } else if dest == b {
            self.branch_add32(cond, a, dest)
        } else {
            self.move32(a, dest);
            self.branch_add32(cond, b, dest)
        }
    }

    pub fn branch_sub32(&mut self, cond: ResultCondition, src: Reg, dest: Reg) -> Jump {
        self.sub32(src, dest);
        let cc = Self::result_cc(cond);
        self.jump_if(cc)
    }

    pub fn branch_sub32_imm(&mut self, cond: ResultCondition, imm: Imm32, dest: Reg) -> Jump {
        self.sub32_imm(imm, dest);
        let cc = Self::result_cc(cond);
        self.jump_if(cc)
    }

    pub fn branch_sub64(&mut self, cond: ResultCondition, src: Reg, dest: Reg) -> Jump {
        self.sub64(src, dest);
        let cc = Self::result_cc(cond);
        self.jump_if(cc)
    }

    /// The negate-and-add rewrite is unusable here (it produces addition
    /// flags, not subtraction flags), so the `dest == b` case runs the
    /// subtraction in the scratch register and moves the result over.
    pub fn branch_sub32_rrr(
        &mut self,
        cond: ResultCondition,
        a: Reg,
        b: Reg,
        dest: Reg,
    ) -> Jump {
        if dest == b && dest != a {
            let scratch = self.scratch();
            self.move32(a, scratch);
            self.sub32(b, scratch);
            // Plain moves leave flags intact between the sub and the jump.
            self.move32(scratch, dest);
            let cc = Self::result_cc(cond);
            self.jump_if(cc)
        } else {
            if dest != a {
                self.move32(a, dest);
            }
            self.branch_sub32(cond, b, dest)
        }
    }

    pub fn branch_mul32(&mut self, cond: ResultCondition, src: Reg, dest: Reg) -> Jump {
        debug_assert!(
            matches!(cond, ResultCondition::Overflow),
            "multiply only reports overflow directly"
        );
        self.mul32(src, dest);
        self.jump_if(super::Cc::O)
    }

    pub fn branch_mul32_rrr(
        &mut self,
        cond: ResultCondition,
        a: Reg,
        b: Reg,
        dest: Reg,
    ) -> Jump {
        if dest == a {
            self.branch_mul32(cond, b, dest)
        } else if dest == b {
            self.branch_mul32(cond, a, dest)
        } else {
            self.move32(a, dest);
            self.branch_mul32(cond, b, dest)
        }
    }

    pub fn branch_mul64(&mut self, cond: ResultCondition, src: Reg, dest: Reg) -> Jump {
        debug_assert!(matches!(cond, ResultCondition::Overflow));
        self.mul64(src, dest);
        self.jump_if(super::Cc::O)
    }

    pub fn branch_neg32(&mut self, cond: ResultCondition, dest: Reg) -> Jump {
        self.neg32(dest);
        let cc = Self::result_cc(cond);
        self.jump_if(cc)
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
    fn three_operand_add_uses_lea_when_disjoint() {
        // lea eax, [rdi + rsi]
        assert_eq!(
            code(|m| m.add32_rrr(Reg::Rdi, Reg::Rsi, Reg::Rax)),
            [0x8D, 0x04, 0x37]
        );
        // aliased destination reduces to the two-operand form: add edi, esi
        assert_eq!(
            code(|m| m.add32_rrr(Reg::Rdi, Reg::Rsi, Reg::Rdi)),
            [0x01, 0xF7]
        );
    }

    #[test]
    fn sub_aliasing_rewrites() {
        // dest == subtrahend: neg + add
        assert_eq!(
            code(|m| m.sub32_rrr(Reg::Rdi, Reg::Rax, Reg::Rax)),
            [0xF7, 0xD8, 0x01, 0xF8] // neg eax; add eax, edi
        );
        // a == b: zero idiom
        assert_eq!(
            code(|m| m.sub32_rrr(Reg::Rdi, Reg::Rdi, Reg::Rax)),
            [0x31, 0xC0] // xor eax, eax
        );
    }

    #[test]
    fn xor_self_materializes_zero() {
        assert_eq!(
            code(|m| m.xor32_rrr(Reg::Rdi, Reg::Rdi, Reg::Rax)),
            [0x31, 0xC0]
        );
    }

    #[test]
    fn and_self_degenerates_to_move() {
        // and(x, x, dest) → mov eax, edi
        assert_eq!(
            code(|m| m.and32_rrr(Reg::Rdi, Reg::Rdi, Reg::Rax)),
            [0x89, 0xF8]
        );
    }

    #[test]
    fn xor_minus_one_uses_not() {
        assert_eq!(code(|m| m.xor32_imm(Imm32::new(-1), Reg::Rax)), [0xF7, 0xD0]);
    }

    #[test]
    fn shift_by_non_rcx_register_swaps_through_cl() {
        let bytes = code(|m| m.lshift32(Reg::Rdi, Reg::Rax));
        // xchg rdi, rcx; shl eax, cl; xchg rdi, rcx
        assert_eq!(bytes, [0x48, 0x87, 0xF9, 0xD3, 0xE0, 0x48, 0x87, 0xF9]);
    }

    #[test]
    fn shift_by_rcx_is_direct() {
        assert_eq!(code(|m| m.lshift32(Reg::Rcx, Reg::Rax)), [0xD3, 0xE0]);
    }

    #[test]
    fn imm_shift_amount_is_masked() {
        assert_eq!(
            code(|m| m.lshift32_imm(Imm32::new(33), Reg::Rax)),
            code(|m| m.lshift32_imm(Imm32::new(1), Reg::Rax)),
        );
    }

    #[test]
    fn popcount_fallback_avoids_hardware_popcnt() {
        let mut masm = MacroAssemblerX86_64::with_features(crate::cpu::CpuFeatures::baseline());
        masm.count_population32(Reg::Rdi, Reg::Rax);
        let bytes = masm.finalize();
        // No F3 0F B8 (popcnt) anywhere in the fallback.
        assert!(!bytes.windows(3).any(|w| w == [0xF3, 0x0F, 0xB8]));
        assert!(!bytes.windows(3).any(|w| w == [0xF3, 0x44, 0x0F]));
    }
}
