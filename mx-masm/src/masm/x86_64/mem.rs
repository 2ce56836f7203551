//! Loads, stores, and addressing-form lowering.

use crate::masm::{DataLabel32, DataLabelCompact, Imm32, Imm64};

use super::{Address, MacroAssemblerX86_64, Mem, Reg};

impl MacroAssemblerX86_64 {
    /// Reduce any address to a plain base+offset pair, materializing
    /// base-index and absolute forms through the scratch register.
    pub(crate) fn resolve_to_base(&mut self, address: Address) -> (Reg, i32) {
        match address {
            Address::Base { base, offset } => (base, offset),
            Address::BaseIndex {
                base,
                index,
                scale,
                offset,
            } => {
                let scratch = self.scratch();
                self.asm.leaq_sibr(base, index, scale, offset, scratch);
                (scratch, 0)
            }
            Address::Absolute { ptr } => {
                let scratch = self.scratch();
                self.asm.movq_i64r(ptr as i64, scratch);
                (scratch, 0)
            }
        }
    }

    // -- loads ---------------------------------------------------------------

    /// Byte load, zero-extended to the full register.
    pub fn load8(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.movzbl_mr(base, offset, dest),
            Mem::Sib(base, index, scale, offset) => {
                self.asm.movzbl_sibr(base, index, scale, offset, dest)
            }
        }
    }

    pub fn load8_signed_extend_to_32(&mut self, src: Address, dest: Reg) {
        let (base, offset) = self.resolve_to_base(src);
        self.asm.movsbl_mr(base, offset, dest);
    }

    pub fn load8_signed_extend_to_64(&mut self, src: Address, dest: Reg) {
        let (base, offset) = self.resolve_to_base(src);
        self.asm.movsbq_mr(base, offset, dest);
    }

    /// Halfword load, zero-extended.
    pub fn load16(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.movzwl_mr(base, offset, dest),
            Mem::Sib(base, index, scale, offset) => {
                self.asm.movzwl_sibr(base, index, scale, offset, dest)
            }
        }
    }

    pub fn load16_signed_extend_to_32(&mut self, src: Address, dest: Reg) {
        let (base, offset) = self.resolve_to_base(src);
        self.asm.movswl_mr(base, offset, dest);
    }

    pub fn load16_signed_extend_to_64(&mut self, src: Address, dest: Reg) {
        let (base, offset) = self.resolve_to_base(src);
        self.asm.movswq_mr(base, offset, dest);
    }

    /// Word load, zero-extending into the upper half.
    pub fn load32(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.movl_mr(base, offset, dest),
            Mem::Sib(base, index, scale, offset) => {
                self.asm.movl_sibr(base, index, scale, offset, dest)
            }
        }
    }

    pub fn load32_signed_extend_to_64(&mut self, src: Address, dest: Reg) {
        let (base, offset) = self.resolve_to_base(src);
        self.asm.movslq_mr(base, offset, dest);
    }

    pub fn load64(&mut self, src: Address, dest: Reg) {
        match self.resolve(src) {
            Mem::Base(base, offset) => self.asm.movq_mr(base, offset, dest),
            Mem::Sib(base, index, scale, offset) => {
                self.asm.movq_sibr(base, index, scale, offset, dest)
            }
        }
    }

    // Unaligned variants. x86_64 has no alignment restriction on integer
    // loads and stores; these exist so portable driver code can state its
    // intent, and ports to stricter architectures must implement them with
    // genuinely unaligned-safe sequences.

    pub fn load16_unaligned(&mut self, src: Address, dest: Reg) {
        self.load16(src, dest);
    }

    pub fn load32_unaligned(&mut self, src: Address, dest: Reg) {
        self.load32(src, dest);
    }

    pub fn load64_unaligned(&mut self, src: Address, dest: Reg) {
        self.load64(src, dest);
    }

    /// Paired load of two adjacent words. When the first destination
    /// aliases the base register the higher-address word is loaded first,
    /// so the base survives for the second access.
    pub fn load_pair32(&mut self, base: Reg, offset: i32, dest1: Reg, dest2: Reg) {
        debug_assert!(dest1 != dest2, "pair load destinations must differ");
        if dest1 == base {
            self.load32(Address::base(base, offset + 4), dest2);
            self.load32(Address::base(base, offset), dest1);
        } else {
            self.load32(Address::base(base, offset), dest1);
            self.load32(Address::base(base, offset + 4), dest2);
        }
    }

    pub fn load_pair64(&mut self, base: Reg, offset: i32, dest1: Reg, dest2: Reg) {
        debug_assert!(dest1 != dest2, "pair load destinations must differ");
        if dest1 == base {
            self.load64(Address::base(base, offset + 8), dest2);
            self.load64(Address::base(base, offset), dest1);
        } else {
            self.load64(Address::base(base, offset), dest1);
            self.load64(Address::base(base, offset + 8), dest2);
        }
    }

    // -- patchable loads ------------------------------------------------------

    /// 32-bit load whose displacement is forced to the full-width encoding
    /// so it can be rewritten after generation.
    pub fn load32_with_address_offset_patch(
        &mut self,
        base: Reg,
        offset: i32,
        dest: Reg,
    ) -> DataLabel32 {
        let start = self.assembler_label();
        self.asm.movl_mr_disp32(base, offset, dest);
        let end = self.assembler_label();
        DataLabel32 {
            label: start,
            disp_offset: (end.offset() - start.offset() - 4) as u8,
        }
    }

    /// 32-bit load in the compact single-byte-displacement form, for
    /// cache-friendly patchable loads. The offset must fit the compact
    /// range; general loads fall back to the wide form transparently, but a
    /// compact patch slot cannot.
    pub fn load32_with_compact_address_offset_patch(
        &mut self,
        base: Reg,
        offset: i32,
        dest: Reg,
    ) -> DataLabelCompact {
        debug_assert!(
            i8::try_from(offset).is_ok(),
            "compact patch displacement out of range"
        );
        let start = self.assembler_label();
        self.asm.movl_mr_disp8(base, offset, dest);
        let end = self.assembler_label();
        DataLabelCompact {
            label: start,
            disp_offset: (end.offset() - start.offset() - 1) as u8,
        }
    }

    // -- stores ---------------------------------------------------------------

    pub fn store8(&mut self, src: Reg, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.movb_rm(src, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm.movb_rsib(src, base, index, scale, offset)
            }
        }
    }

    pub fn store8_imm(&mut self, imm: Imm32, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.movb_i8m(imm.value as i8, base, offset);
    }

    pub fn store16(&mut self, src: Reg, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.movw_rm(src, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm.movw_rsib(src, base, index, scale, offset)
            }
        }
    }

    pub fn store16_imm(&mut self, imm: Imm32, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.movw_i16m(imm.value as i16, base, offset);
    }

    pub fn store32(&mut self, src: Reg, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.movl_rm(src, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm.movl_rsib(src, base, index, scale, offset)
            }
        }
    }

    pub fn store32_imm(&mut self, imm: Imm32, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.movl_i32m(imm.value, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm.movl_i32sib(imm.value, base, index, scale, offset)
            }
        }
    }

    pub fn store64(&mut self, src: Reg, dest: Address) {
        match self.resolve(dest) {
            Mem::Base(base, offset) => self.asm.movq_rm(src, base, offset),
            Mem::Sib(base, index, scale, offset) => {
                self.asm.movq_rsib(src, base, index, scale, offset)
            }
        }
    }

    /// Store a sign-extended 32-bit immediate into a 64-bit slot.
    pub fn store64_imm32(&mut self, imm: Imm32, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.movq_i32m(imm.value, base, offset);
    }

    /// Store a full 64-bit immediate, channeling wide values through the
    /// scratch register.
    pub fn store64_imm(&mut self, imm: Imm64, dest: Address) {
        if !imm.patchable && i32::try_from(imm.value).is_ok() {
            self.store64_imm32(Imm32::new(imm.value as i32), dest);
            return;
        }
        let (base, offset) = self.resolve_to_base(dest);
        let scratch = self.scratch();
        debug_assert!(base != scratch, "wide store would clobber its own address");
        self.asm.movq_i64r(imm.value, scratch);
        self.asm.movq_rm(scratch, base, offset);
    }

    pub fn store32_unaligned(&mut self, src: Reg, dest: Address) {
        self.store32(src, dest);
    }

    pub fn store64_unaligned(&mut self, src: Reg, dest: Address) {
        self.store64(src, dest);
    }

    pub fn store_pair32(&mut self, src1: Reg, src2: Reg, base: Reg, offset: i32) {
        self.store32(src1, Address::base(base, offset));
        self.store32(src2, Address::base(base, offset + 4));
    }

    pub fn store_pair64(&mut self, src1: Reg, src2: Reg, base: Reg, offset: i32) {
        self.store64(src1, Address::base(base, offset));
        self.store64(src2, Address::base(base, offset + 8));
    }

    // -- address computation ---------------------------------------------------

    pub fn lea32(&mut self, address: Address, dest: Reg) {
        match address {
            Address::Base { base, offset } => self.asm.leal_mr(base, offset, dest),
            Address::BaseIndex {
                base,
                index,
                scale,
                offset,
            } => self.asm.leal_sibr(base, index, scale, offset, dest),
            Address::Absolute { ptr } => self.move_imm32(Imm32::new(ptr as i32), dest),
        }
    }

    pub fn lea64(&mut self, address: Address, dest: Reg) {
        match address {
            Address::Base { base, offset } => self.asm.leaq_mr(base, offset, dest),
            Address::BaseIndex {
                base,
                index,
                scale,
                offset,
            } => self.asm.leaq_sibr(base, index, scale, offset, dest),
            Address::Absolute { ptr } => self.move_ptr(ptr, dest),
        }
    }
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
    fn pair_load_orders_by_base_alias() {
        // dest1 aliases base: the +8 word must be read first.
        let aliased = code(|m| m.load_pair64(Reg::Rdi, 0, Reg::Rdi, Reg::Rsi));
        // mov rsi, [rdi+8]; mov rdi, [rdi]
        assert_eq!(aliased, [0x48, 0x8B, 0x77, 0x08, 0x48, 0x8B, 0x3F]);

        let plain = code(|m| m.load_pair64(Reg::Rdi, 0, Reg::Rax, Reg::Rsi));
        // mov rax, [rdi]; mov rsi, [rdi+8]
        assert_eq!(plain, [0x48, 0x8B, 0x07, 0x48, 0x8B, 0x77, 0x08]);
    }

    #[test]
    fn patch_labels_locate_displacement_fields() {
        let mut masm = MacroAssemblerX86_64::new();
        let wide = masm.load32_with_address_offset_patch(Reg::Rdi, 16, Reg::Rax);
        let compact = masm.load32_with_compact_address_offset_patch(Reg::Rdi, 16, Reg::Rax);
        let bytes = masm.finalize();
        // Wide form: 8B 87 <disp32>; the field starts two bytes in.
        assert_eq!(wide.field_offset(), 2);
        assert_eq!(
            &bytes[wide.field_offset() as usize..wide.field_offset() as usize + 4],
            &16i32.to_le_bytes()
        );
        // Compact form: 8B 47 <disp8>.
        assert_eq!(bytes[compact.field_offset() as usize], 16);
    }

    #[test]
    fn absolute_addresses_lower_through_scratch() {
        let bytes = code(|m| m.load32(Address::absolute(0x1122_3344), Reg::Rax));
        // movabs r11, imm64 then mov eax, [r11]
        assert_eq!(bytes[..2], [0x49, 0xBB]);
        assert_eq!(&bytes[10..], &[0x41, 0x8B, 0x03]);
    }

    #[test]
    fn base_index_store_uses_sib() {
        let bytes = code(|m| {
            m.store32(
                Reg::Rax,
                Address::base_index(Reg::Rdi, Reg::Rsi, Scale::TimesFour, 0),
            )
        });
        // mov [rdi+rsi*4], eax
        assert_eq!(bytes, [0x89, 0x04, 0xB7]);
    }
}
