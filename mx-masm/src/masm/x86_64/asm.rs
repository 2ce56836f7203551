//! x86_64 instruction encoder.
//!
//! The leaf layer: one method per mnemonic form, appending encoded bytes to
//! the buffer. Manual REX/ModR/M/SIB construction, no tables. The
//! macro-assembler above this performs all operand-form selection; methods
//! here encode exactly what they are told.

use crate::buffer::{AssemblerBuffer, AssemblerLabel};
use crate::masm::Scale;

use super::{FpReg, Reg};

/// Hardware condition-code nibble, as used by Jcc/SETcc/CMOVcc.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Cc {
    O = 0x0,
    B = 0x2,
    AE = 0x3,
    E = 0x4,
    NE = 0x5,
    BE = 0x6,
    A = 0x7,
    S = 0x8,
    NS = 0x9,
    P = 0xA,
    NP = 0xB,
    L = 0xC,
    GE = 0xD,
    LE = 0xE,
    G = 0xF,
}

/// Group-1 arithmetic opcode selector (the /digit in the immediate forms).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Group1 {
    Add = 0,
    Or = 1,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// Group-2 shift/rotate opcode selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Group2 {
    Rol = 0,
    Ror = 1,
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

const PRE_OPERAND_SIZE: u8 = 0x66;
const PRE_LOCK: u8 = 0xF0;
const PRE_GS: u8 = 0x65;

pub(crate) struct X86Assembler {
    pub(crate) buffer: AssemblerBuffer,
}

impl X86Assembler {
    pub(crate) fn new() -> Self {
        Self {
            buffer: AssemblerBuffer::new(),
        }
    }

    pub(crate) fn label(&self) -> AssemblerLabel {
        self.buffer.label()
    }

    // -- prefix / modrm machinery ------------------------------------------

    /// Emit a REX prefix when any extension bit or the W bit is needed.
    fn rex_if_needed(&mut self, w: bool, reg: u8, index: u8, rm: u8) {
        let rex = ((w as u8) << 3) | (((reg >> 3) & 1) << 2) | (((index >> 3) & 1) << 1) | ((rm >> 3) & 1);
        if rex != 0 {
            self.buffer.put_u8(0x40 | rex);
        }
    }

    /// As above, but forces an empty REX when a byte register in 4..=7 is
    /// involved (spl/bpl/sil/dil are unreachable without one).
    fn rex_for_byte(&mut self, reg: u8, index: u8, rm: u8) {
        let rex =
            (((reg >> 3) & 1) << 2) | (((index >> 3) & 1) << 1) | ((rm >> 3) & 1);
        if rex != 0 || (4..=7).contains(&reg) || (4..=7).contains(&rm) {
            self.buffer.put_u8(0x40 | rex);
        }
    }

    fn modrm_rr(&mut self, reg: u8, rm: u8) {
        self.buffer.put_u8(0xC0 | ((reg & 7) << 3) | (rm & 7));
    }

    /// Memory ModR/M for [base + offset]. `force_disp32` keeps the
    /// displacement field rewritable at full width.
    fn modrm_mem(&mut self, reg: u8, base: Reg, offset: i32, force_disp32: bool) {
        let base_low = base.number() & 7;
        let reg_low = (reg & 7) << 3;
        let needs_sib = base_low == 4; // rsp/r12 escape
        let no_disp = offset == 0 && base_low != 5 && !force_disp32; // rbp/r13 need a disp
        let disp8 = !force_disp32 && i8::try_from(offset).is_ok();

        let (mode, disp_bytes) = if no_disp {
            (0x00, 0)
        } else if disp8 {
            (0x40, 1)
        } else {
            (0x80, 4)
        };

        if needs_sib {
            self.buffer.put_u8(mode | reg_low | 4);
            self.buffer.put_u8(0x24); // SIB: scale=1, no index, base
        } else {
            self.buffer.put_u8(mode | reg_low | base_low);
        }
        match disp_bytes {
            1 => self.buffer.put_i8(offset as i8),
            4 => self.buffer.put_i32(offset),
            _ => {}
        }
    }

    /// Memory ModR/M+SIB for [base + index*scale + offset].
    fn modrm_sib(&mut self, reg: u8, base: Reg, index: Reg, scale: Scale, offset: i32) {
        debug_assert!(index != Reg::Rsp, "rsp cannot be an index register");
        let reg_low = (reg & 7) << 3;
        let base_low = base.number() & 7;
        let sib = (scale.shift() << 6) | ((index.number() & 7) << 3) | base_low;
        let disp8 = i8::try_from(offset).is_ok();

        if offset == 0 && base_low != 5 {
            self.buffer.put_u8(reg_low | 4);
            self.buffer.put_u8(sib);
        } else if disp8 {
            self.buffer.put_u8(0x40 | reg_low | 4);
            self.buffer.put_u8(sib);
            self.buffer.put_i8(offset as i8);
        } else {
            self.buffer.put_u8(0x80 | reg_low | 4);
            self.buffer.put_u8(sib);
            self.buffer.put_i32(offset);
        }
    }

    /// Memory ModR/M for an absolute [disp32] with no base register
    /// (SIB form with no base, no index). Used with segment prefixes.
    fn modrm_abs(&mut self, reg: u8, disp: i32) {
        self.buffer.put_u8(((reg & 7) << 3) | 4);
        self.buffer.put_u8(0x25); // no index, base=101 (disp32)
        self.buffer.put_i32(disp);
    }

    fn opcode(&mut self, opcode: &[u8]) {
        for &byte in opcode {
            self.buffer.put_u8(byte);
        }
    }

    // Generic shapes. reg/rm are raw register numbers; `w` selects REX.W.

    fn insn_rr(&mut self, prefix: Option<u8>, w: bool, opcode: &[u8], reg: u8, rm: u8) {
        if let Some(prefix) = prefix {
            self.buffer.put_u8(prefix);
        }
        self.rex_if_needed(w, reg, 0, rm);
        self.opcode(opcode);
        self.modrm_rr(reg, rm);
    }

    fn insn_rr_byte(&mut self, opcode: &[u8], reg: u8, rm: u8) {
        self.rex_for_byte(reg, 0, rm);
        self.opcode(opcode);
        self.modrm_rr(reg, rm);
    }

    fn insn_mem(
        &mut self,
        prefix: Option<u8>,
        w: bool,
        opcode: &[u8],
        reg: u8,
        base: Reg,
        offset: i32,
    ) {
        if let Some(prefix) = prefix {
            self.buffer.put_u8(prefix);
        }
        self.rex_if_needed(w, reg, 0, base.number());
        self.opcode(opcode);
        self.modrm_mem(reg, base, offset, false);
    }

    fn insn_mem_byte(&mut self, opcode: &[u8], reg: u8, base: Reg, offset: i32) {
        self.rex_for_byte(reg, 0, base.number());
        self.opcode(opcode);
        self.modrm_mem(reg, base, offset, false);
    }

    fn insn_sib(
        &mut self,
        prefix: Option<u8>,
        w: bool,
        opcode: &[u8],
        reg: u8,
        base: Reg,
        index: Reg,
        scale: Scale,
        offset: i32,
    ) {
        if let Some(prefix) = prefix {
            self.buffer.put_u8(prefix);
        }
        self.rex_if_needed(w, reg, index.number(), base.number());
        self.opcode(opcode);
        self.modrm_sib(reg, base, index, scale, offset);
    }

    fn insn_sib_byte(
        &mut self,
        opcode: &[u8],
        reg: u8,
        base: Reg,
        index: Reg,
        scale: Scale,
        offset: i32,
    ) {
        self.rex_for_byte(reg, index.number(), base.number());
        self.opcode(opcode);
        self.modrm_sib(reg, base, index, scale, offset);
    }

    // -- group-1 arithmetic (add/or/adc/and/sub/xor/cmp) -------------------

    /// reg-to-reg, 32-bit: `op r/m32, r32`.
    pub(crate) fn group1_rr32(&mut self, op: Group1, src: Reg, dst: Reg) {
        self.insn_rr(None, false, &[(op as u8) << 3 | 0x01], src.number(), dst.number());
    }

    pub(crate) fn group1_rr64(&mut self, op: Group1, src: Reg, dst: Reg) {
        self.insn_rr(None, true, &[(op as u8) << 3 | 0x01], src.number(), dst.number());
    }

    /// Immediate form. Uses the sign-extended imm8 encoding when the value
    /// fits and shrinking is allowed; the generic imm32 encoding otherwise.
    /// Both leave identical register and flag state.
    pub(crate) fn group1_ir32(&mut self, op: Group1, imm: i32, allow_imm8: bool, dst: Reg) {
        if allow_imm8 && i8::try_from(imm).is_ok() {
            self.insn_rr(None, false, &[0x83], op as u8, dst.number());
            self.buffer.put_i8(imm as i8);
        } else {
            self.insn_rr(None, false, &[0x81], op as u8, dst.number());
            self.buffer.put_i32(imm);
        }
    }

    pub(crate) fn group1_ir64(&mut self, op: Group1, imm: i32, allow_imm8: bool, dst: Reg) {
        if allow_imm8 && i8::try_from(imm).is_ok() {
            self.insn_rr(None, true, &[0x83], op as u8, dst.number());
            self.buffer.put_i8(imm as i8);
        } else {
            self.insn_rr(None, true, &[0x81], op as u8, dst.number());
            self.buffer.put_i32(imm);
        }
    }

    pub(crate) fn group1_im32(
        &mut self,
        op: Group1,
        imm: i32,
        allow_imm8: bool,
        base: Reg,
        offset: i32,
    ) {
        if allow_imm8 && i8::try_from(imm).is_ok() {
            self.insn_mem(None, false, &[0x83], op as u8, base, offset);
            self.buffer.put_i8(imm as i8);
        } else {
            self.insn_mem(None, false, &[0x81], op as u8, base, offset);
            self.buffer.put_i32(imm);
        }
    }

    pub(crate) fn group1_im64(
        &mut self,
        op: Group1,
        imm: i32,
        allow_imm8: bool,
        base: Reg,
        offset: i32,
    ) {
        if allow_imm8 && i8::try_from(imm).is_ok() {
            self.insn_mem(None, true, &[0x83], op as u8, base, offset);
            self.buffer.put_i8(imm as i8);
        } else {
            self.insn_mem(None, true, &[0x81], op as u8, base, offset);
            self.buffer.put_i32(imm);
        }
    }

    pub(crate) fn group1_isib32(
        &mut self,
        op: Group1,
        imm: i32,
        allow_imm8: bool,
        base: Reg,
        index: Reg,
        scale: Scale,
        offset: i32,
    ) {
        if allow_imm8 && i8::try_from(imm).is_ok() {
            self.insn_sib(None, false, &[0x83], op as u8, base, index, scale, offset);
            self.buffer.put_i8(imm as i8);
        } else {
            self.insn_sib(None, false, &[0x81], op as u8, base, index, scale, offset);
            self.buffer.put_i32(imm);
        }
    }

    /// memory-to-reg: `op r32, r/m32`.
    pub(crate) fn group1_mr32(&mut self, op: Group1, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, false, &[(op as u8) << 3 | 0x03], dst.number(), base, offset);
    }

    pub(crate) fn group1_mr64(&mut self, op: Group1, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, true, &[(op as u8) << 3 | 0x03], dst.number(), base, offset);
    }

    pub(crate) fn group1_sibr32(
        &mut self,
        op: Group1,
        base: Reg,
        index: Reg,
        scale: Scale,
        offset: i32,
        dst: Reg,
    ) {
        self.insn_sib(
            None,
            false,
            &[(op as u8) << 3 | 0x03],
            dst.number(),
            base,
            index,
            scale,
            offset,
        );
    }

    pub(crate) fn group1_sibr64(
        &mut self,
        op: Group1,
        base: Reg,
        index: Reg,
        scale: Scale,
        offset: i32,
        dst: Reg,
    ) {
        self.insn_sib(
            None,
            true,
            &[(op as u8) << 3 | 0x03],
            dst.number(),
            base,
            index,
            scale,
            offset,
        );
    }

    /// reg-to-memory: `op r/m32, r32`.
    pub(crate) fn group1_rm32(&mut self, op: Group1, src: Reg, base: Reg, offset: i32) {
        self.insn_mem(None, false, &[(op as u8) << 3 | 0x01], src.number(), base, offset);
    }

    pub(crate) fn group1_rm64(&mut self, op: Group1, src: Reg, base: Reg, offset: i32) {
        self.insn_mem(None, true, &[(op as u8) << 3 | 0x01], src.number(), base, offset);
    }

    pub(crate) fn group1_rsib32(
        &mut self,
        op: Group1,
        src: Reg,
        base: Reg,
        index: Reg,
        scale: Scale,
        offset: i32,
    ) {
        self.insn_sib(
            None,
            false,
            &[(op as u8) << 3 | 0x01],
            src.number(),
            base,
            index,
            scale,
            offset,
        );
    }

    pub(crate) fn group1_rsib64(
        &mut self,
        op: Group1,
        src: Reg,
        base: Reg,
        index: Reg,
        scale: Scale,
        offset: i32,
    ) {
        self.insn_sib(
            None,
            true,
            &[(op as u8) << 3 | 0x01],
            src.number(),
            base,
            index,
            scale,
            offset,
        );
    }

    /// Locked read-modify-write to memory: `lock op r/m, r`.
    pub(crate) fn group1_rm_locked(
        &mut self,
        op: Group1,
        wide: bool,
        src: Reg,
        base: Reg,
        offset: i32,
    ) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, wide, &[(op as u8) << 3 | 0x01], src.number(), base, offset);
    }

    pub(crate) fn group1_rm16_locked(&mut self, op: Group1, src: Reg, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(
            Some(PRE_OPERAND_SIZE),
            false,
            &[(op as u8) << 3 | 0x01],
            src.number(),
            base,
            offset,
        );
    }

    pub(crate) fn group1_rm8_locked(&mut self, op: Group1, src: Reg, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem_byte(&[(op as u8) << 3], src.number(), base, offset);
    }

    pub(crate) fn group1_im_locked(
        &mut self,
        op: Group1,
        wide: bool,
        imm: i32,
        base: Reg,
        offset: i32,
    ) {
        self.buffer.put_u8(PRE_LOCK);
        if i8::try_from(imm).is_ok() {
            self.insn_mem(None, wide, &[0x83], op as u8, base, offset);
            self.buffer.put_i8(imm as i8);
        } else {
            self.insn_mem(None, wide, &[0x81], op as u8, base, offset);
            self.buffer.put_i32(imm);
        }
    }

    pub(crate) fn group1_im16_locked(&mut self, op: Group1, imm: i16, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(Some(PRE_OPERAND_SIZE), false, &[0x81], op as u8, base, offset);
        self.buffer.put_u16(imm as u16);
    }

    pub(crate) fn group1_im8_locked(&mut self, op: Group1, imm: i8, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, false, &[0x80], op as u8, base, offset);
        self.buffer.put_i8(imm);
    }

    // -- group-2 shifts/rotates --------------------------------------------

    pub(crate) fn group2_i8r32(&mut self, op: Group2, amount: u8, dst: Reg) {
        if amount == 1 {
            self.insn_rr(None, false, &[0xD1], op as u8, dst.number());
        } else {
            self.insn_rr(None, false, &[0xC1], op as u8, dst.number());
            self.buffer.put_u8(amount);
        }
    }

    pub(crate) fn group2_i8r64(&mut self, op: Group2, amount: u8, dst: Reg) {
        if amount == 1 {
            self.insn_rr(None, true, &[0xD1], op as u8, dst.number());
        } else {
            self.insn_rr(None, true, &[0xC1], op as u8, dst.number());
            self.buffer.put_u8(amount);
        }
    }

    pub(crate) fn group2_i8r16(&mut self, op: Group2, amount: u8, dst: Reg) {
        self.insn_rr(Some(PRE_OPERAND_SIZE), false, &[0xC1], op as u8, dst.number());
        self.buffer.put_u8(amount);
    }

    /// Shift by CL.
    pub(crate) fn group2_clr32(&mut self, op: Group2, dst: Reg) {
        self.insn_rr(None, false, &[0xD3], op as u8, dst.number());
    }

    pub(crate) fn group2_clr64(&mut self, op: Group2, dst: Reg) {
        self.insn_rr(None, true, &[0xD3], op as u8, dst.number());
    }

    // -- group-3 unary (not/neg) and test ----------------------------------

    pub(crate) fn notl_r(&mut self, dst: Reg) {
        self.insn_rr(None, false, &[0xF7], 2, dst.number());
    }

    pub(crate) fn notq_r(&mut self, dst: Reg) {
        self.insn_rr(None, true, &[0xF7], 2, dst.number());
    }

    pub(crate) fn negl_r(&mut self, dst: Reg) {
        self.insn_rr(None, false, &[0xF7], 3, dst.number());
    }

    pub(crate) fn negq_r(&mut self, dst: Reg) {
        self.insn_rr(None, true, &[0xF7], 3, dst.number());
    }

    pub(crate) fn notl_m(&mut self, base: Reg, offset: i32) {
        self.insn_mem(None, false, &[0xF7], 2, base, offset);
    }

    pub(crate) fn testl_rr(&mut self, mask: Reg, value: Reg) {
        self.insn_rr(None, false, &[0x85], mask.number(), value.number());
    }

    pub(crate) fn testq_rr(&mut self, mask: Reg, value: Reg) {
        self.insn_rr(None, true, &[0x85], mask.number(), value.number());
    }

    pub(crate) fn testl_ir(&mut self, mask: i32, value: Reg) {
        if value == Reg::Rax {
            self.buffer.put_u8(0xA9);
        } else {
            self.insn_rr(None, false, &[0xF7], 0, value.number());
        }
        self.buffer.put_i32(mask);
    }

    pub(crate) fn testq_ir(&mut self, mask: i32, value: Reg) {
        self.insn_rr(None, true, &[0xF7], 0, value.number());
        self.buffer.put_i32(mask);
    }

    pub(crate) fn testb_ir(&mut self, mask: i8, value: Reg) {
        self.insn_rr_byte(&[0xF6], 0, value.number());
        self.buffer.put_i8(mask);
    }

    pub(crate) fn testb_im(&mut self, mask: i8, base: Reg, offset: i32) {
        self.insn_mem(None, false, &[0xF6], 0, base, offset);
        self.buffer.put_i8(mask);
    }

    pub(crate) fn testl_im(&mut self, mask: i32, base: Reg, offset: i32) {
        self.insn_mem(None, false, &[0xF7], 0, base, offset);
        self.buffer.put_i32(mask);
    }

    // -- multiply ----------------------------------------------------------

    pub(crate) fn imull_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr(None, false, &[0x0F, 0xAF], dst.number(), src.number());
    }

    pub(crate) fn imulq_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr(None, true, &[0x0F, 0xAF], dst.number(), src.number());
    }

    pub(crate) fn imull_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, false, &[0x0F, 0xAF], dst.number(), base, offset);
    }

    /// Three-operand immediate multiply: `imul r32, r/m32, imm32`.
    pub(crate) fn imull_i32(&mut self, src: Reg, imm: i32, dst: Reg) {
        if i8::try_from(imm).is_ok() {
            self.insn_rr(None, false, &[0x6B], dst.number(), src.number());
            self.buffer.put_i8(imm as i8);
        } else {
            self.insn_rr(None, false, &[0x69], dst.number(), src.number());
            self.buffer.put_i32(imm);
        }
    }

    pub(crate) fn imulq_i32(&mut self, src: Reg, imm: i32, dst: Reg) {
        if i8::try_from(imm).is_ok() {
            self.insn_rr(None, true, &[0x6B], dst.number(), src.number());
            self.buffer.put_i8(imm as i8);
        } else {
            self.insn_rr(None, true, &[0x69], dst.number(), src.number());
            self.buffer.put_i32(imm);
        }
    }

    // -- moves -------------------------------------------------------------

    pub(crate) fn movl_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr(None, false, &[0x89], src.number(), dst.number());
    }

    pub(crate) fn movq_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr(None, true, &[0x89], src.number(), dst.number());
    }

    /// `mov r32, imm32` (zero-extends into the full register).
    pub(crate) fn movl_i32r(&mut self, imm: i32, dst: Reg) {
        self.rex_if_needed(false, 0, 0, dst.number());
        self.buffer.put_u8(0xB8 | (dst.number() & 7));
        self.buffer.put_i32(imm);
    }

    /// `mov r/m64, imm32` (sign-extends).
    pub(crate) fn movq_i32r(&mut self, imm: i32, dst: Reg) {
        self.insn_rr(None, true, &[0xC7], 0, dst.number());
        self.buffer.put_i32(imm);
    }

    /// Full-width `movabs r64, imm64`.
    pub(crate) fn movq_i64r(&mut self, imm: i64, dst: Reg) {
        self.rex_if_needed(true, 0, 0, dst.number());
        self.buffer.put_u8(0xB8 | (dst.number() & 7));
        self.buffer.put_i64(imm);
    }

    pub(crate) fn movl_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, false, &[0x8B], dst.number(), base, offset);
    }

    /// 32-bit load with the displacement forced to the rewritable disp32
    /// form. Returns nothing; callers record labels around it.
    pub(crate) fn movl_mr_disp32(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.rex_if_needed(false, dst.number(), 0, base.number());
        self.opcode(&[0x8B]);
        self.modrm_mem(dst.number(), base, offset, true);
    }

    /// 32-bit load with the displacement forced to the compact disp8 form.
    pub(crate) fn movl_mr_disp8(&mut self, base: Reg, offset: i32, dst: Reg) {
        debug_assert!(i8::try_from(offset).is_ok(), "compact displacement out of range");
        self.rex_if_needed(false, dst.number(), 0, base.number());
        self.opcode(&[0x8B]);
        let base_low = base.number() & 7;
        if base_low == 4 {
            self.buffer.put_u8(0x40 | ((dst.number() & 7) << 3) | 4);
            self.buffer.put_u8(0x24);
        } else {
            self.buffer.put_u8(0x40 | ((dst.number() & 7) << 3) | base_low);
        }
        self.buffer.put_i8(offset as i8);
    }

    pub(crate) fn movq_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, true, &[0x8B], dst.number(), base, offset);
    }

    pub(crate) fn movl_sibr(&mut self, base: Reg, index: Reg, scale: Scale, offset: i32, dst: Reg) {
        self.insn_sib(None, false, &[0x8B], dst.number(), base, index, scale, offset);
    }

    pub(crate) fn movq_sibr(&mut self, base: Reg, index: Reg, scale: Scale, offset: i32, dst: Reg) {
        self.insn_sib(None, true, &[0x8B], dst.number(), base, index, scale, offset);
    }

    pub(crate) fn movl_rm(&mut self, src: Reg, base: Reg, offset: i32) {
        self.insn_mem(None, false, &[0x89], src.number(), base, offset);
    }

    pub(crate) fn movq_rm(&mut self, src: Reg, base: Reg, offset: i32) {
        self.insn_mem(None, true, &[0x89], src.number(), base, offset);
    }

    pub(crate) fn movl_rsib(&mut self, src: Reg, base: Reg, index: Reg, scale: Scale, offset: i32) {
        self.insn_sib(None, false, &[0x89], src.number(), base, index, scale, offset);
    }

    pub(crate) fn movq_rsib(&mut self, src: Reg, base: Reg, index: Reg, scale: Scale, offset: i32) {
        self.insn_sib(None, true, &[0x89], src.number(), base, index, scale, offset);
    }

    pub(crate) fn movb_rm(&mut self, src: Reg, base: Reg, offset: i32) {
        self.insn_mem_byte(&[0x88], src.number(), base, offset);
    }

    pub(crate) fn movb_rsib(&mut self, src: Reg, base: Reg, index: Reg, scale: Scale, offset: i32) {
        self.insn_sib_byte(&[0x88], src.number(), base, index, scale, offset);
    }

    pub(crate) fn movw_rm(&mut self, src: Reg, base: Reg, offset: i32) {
        self.insn_mem(Some(PRE_OPERAND_SIZE), false, &[0x89], src.number(), base, offset);
    }

    pub(crate) fn movw_rsib(&mut self, src: Reg, base: Reg, index: Reg, scale: Scale, offset: i32) {
        self.insn_sib(
            Some(PRE_OPERAND_SIZE),
            false,
            &[0x89],
            src.number(),
            base,
            index,
            scale,
            offset,
        );
    }

    pub(crate) fn movb_i8m(&mut self, imm: i8, base: Reg, offset: i32) {
        self.insn_mem(None, false, &[0xC6], 0, base, offset);
        self.buffer.put_i8(imm);
    }

    pub(crate) fn movw_i16m(&mut self, imm: i16, base: Reg, offset: i32) {
        self.insn_mem(Some(PRE_OPERAND_SIZE), false, &[0xC7], 0, base, offset);
        self.buffer.put_u16(imm as u16);
    }

    pub(crate) fn movl_i32m(&mut self, imm: i32, base: Reg, offset: i32) {
        self.insn_mem(None, false, &[0xC7], 0, base, offset);
        self.buffer.put_i32(imm);
    }

    pub(crate) fn movq_i32m(&mut self, imm: i32, base: Reg, offset: i32) {
        self.insn_mem(None, true, &[0xC7], 0, base, offset);
        self.buffer.put_i32(imm);
    }

    pub(crate) fn movl_i32sib(
        &mut self,
        imm: i32,
        base: Reg,
        index: Reg,
        scale: Scale,
        offset: i32,
    ) {
        self.insn_sib(None, false, &[0xC7], 0, base, index, scale, offset);
        self.buffer.put_i32(imm);
    }

    // zero/sign-extending loads

    pub(crate) fn movzbl_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, false, &[0x0F, 0xB6], dst.number(), base, offset);
    }

    pub(crate) fn movzbl_sibr(&mut self, base: Reg, index: Reg, scale: Scale, offset: i32, dst: Reg) {
        self.insn_sib(None, false, &[0x0F, 0xB6], dst.number(), base, index, scale, offset);
    }

    pub(crate) fn movsbl_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, false, &[0x0F, 0xBE], dst.number(), base, offset);
    }

    pub(crate) fn movsbq_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, true, &[0x0F, 0xBE], dst.number(), base, offset);
    }

    pub(crate) fn movzwl_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, false, &[0x0F, 0xB7], dst.number(), base, offset);
    }

    pub(crate) fn movzwl_sibr(&mut self, base: Reg, index: Reg, scale: Scale, offset: i32, dst: Reg) {
        self.insn_sib(None, false, &[0x0F, 0xB7], dst.number(), base, index, scale, offset);
    }

    pub(crate) fn movswl_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, false, &[0x0F, 0xBF], dst.number(), base, offset);
    }

    pub(crate) fn movswq_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, true, &[0x0F, 0xBF], dst.number(), base, offset);
    }

    pub(crate) fn movzbl_rr(&mut self, src: Reg, dst: Reg) {
        // movzx r32, r/m8 — the rm operand is a byte register.
        self.insn_rr_byte(&[0x0F, 0xB6], dst.number(), src.number());
    }

    pub(crate) fn movsbl_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr_byte(&[0x0F, 0xBE], dst.number(), src.number());
    }

    pub(crate) fn movzwl_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr(None, false, &[0x0F, 0xB7], dst.number(), src.number());
    }

    pub(crate) fn movswl_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr(None, false, &[0x0F, 0xBF], dst.number(), src.number());
    }

    /// `movsxd r64, r/m32`.
    pub(crate) fn movslq_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr(None, true, &[0x63], dst.number(), src.number());
    }

    /// `movsxd r64, r/m32` from memory.
    pub(crate) fn movslq_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, true, &[0x63], dst.number(), base, offset);
    }

    /// `cmp r/m8, imm8`.
    pub(crate) fn cmpb_im(&mut self, imm: i8, base: Reg, offset: i32) {
        self.insn_mem(None, false, &[0x80], 7, base, offset);
        self.buffer.put_i8(imm);
    }

    /// `btc r/m64, imm8` — complement one bit.
    pub(crate) fn btcq_i8r(&mut self, bit: u8, dst: Reg) {
        self.insn_rr(None, true, &[0x0F, 0xBA], 7, dst.number());
        self.buffer.put_u8(bit);
    }

    pub(crate) fn leal_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, false, &[0x8D], dst.number(), base, offset);
    }

    pub(crate) fn leal_sibr(&mut self, base: Reg, index: Reg, scale: Scale, offset: i32, dst: Reg) {
        self.insn_sib(None, false, &[0x8D], dst.number(), base, index, scale, offset);
    }

    pub(crate) fn leaq_mr(&mut self, base: Reg, offset: i32, dst: Reg) {
        self.insn_mem(None, true, &[0x8D], dst.number(), base, offset);
    }

    pub(crate) fn leaq_sibr(&mut self, base: Reg, index: Reg, scale: Scale, offset: i32, dst: Reg) {
        self.insn_sib(None, true, &[0x8D], dst.number(), base, index, scale, offset);
    }

    // segment-prefixed absolute loads/stores (thread-local storage)

    pub(crate) fn gs_movl_ar(&mut self, offset: i32, dst: Reg) {
        self.buffer.put_u8(PRE_GS);
        self.rex_if_needed(false, dst.number(), 0, 0);
        self.opcode(&[0x8B]);
        self.modrm_abs(dst.number(), offset);
    }

    pub(crate) fn gs_movq_ar(&mut self, offset: i32, dst: Reg) {
        self.buffer.put_u8(PRE_GS);
        self.rex_if_needed(true, dst.number(), 0, 0);
        self.opcode(&[0x8B]);
        self.modrm_abs(dst.number(), offset);
    }

    pub(crate) fn gs_movl_ra(&mut self, src: Reg, offset: i32) {
        self.buffer.put_u8(PRE_GS);
        self.rex_if_needed(false, src.number(), 0, 0);
        self.opcode(&[0x89]);
        self.modrm_abs(src.number(), offset);
    }

    pub(crate) fn gs_movq_ra(&mut self, src: Reg, offset: i32) {
        self.buffer.put_u8(PRE_GS);
        self.rex_if_needed(true, src.number(), 0, 0);
        self.opcode(&[0x89]);
        self.modrm_abs(src.number(), offset);
    }

    // exchange / stack

    pub(crate) fn xchgq_rr(&mut self, a: Reg, b: Reg) {
        if a == Reg::Rax {
            self.rex_if_needed(true, 0, 0, b.number());
            self.buffer.put_u8(0x90 | (b.number() & 7));
        } else if b == Reg::Rax {
            self.rex_if_needed(true, 0, 0, a.number());
            self.buffer.put_u8(0x90 | (a.number() & 7));
        } else {
            self.insn_rr(None, true, &[0x87], a.number(), b.number());
        }
    }

    pub(crate) fn push_r(&mut self, reg: Reg) {
        self.rex_if_needed(false, 0, 0, reg.number());
        self.buffer.put_u8(0x50 | (reg.number() & 7));
    }

    pub(crate) fn pop_r(&mut self, reg: Reg) {
        self.rex_if_needed(false, 0, 0, reg.number());
        self.buffer.put_u8(0x58 | (reg.number() & 7));
    }

    // -- bit counting / byte swap ------------------------------------------

    pub(crate) fn bswapl_r(&mut self, dst: Reg) {
        self.rex_if_needed(false, 0, 0, dst.number());
        self.opcode(&[0x0F]);
        self.buffer.put_u8(0xC8 | (dst.number() & 7));
    }

    pub(crate) fn bswapq_r(&mut self, dst: Reg) {
        self.rex_if_needed(true, 0, 0, dst.number());
        self.opcode(&[0x0F]);
        self.buffer.put_u8(0xC8 | (dst.number() & 7));
    }

    pub(crate) fn popcntl_rr(&mut self, src: Reg, dst: Reg) {
        self.buffer.put_u8(0xF3);
        self.rex_if_needed(false, dst.number(), 0, src.number());
        self.opcode(&[0x0F, 0xB8]);
        self.modrm_rr(dst.number(), src.number());
    }

    pub(crate) fn popcntq_rr(&mut self, src: Reg, dst: Reg) {
        self.buffer.put_u8(0xF3);
        self.rex_if_needed(true, dst.number(), 0, src.number());
        self.opcode(&[0x0F, 0xB8]);
        self.modrm_rr(dst.number(), src.number());
    }

    pub(crate) fn lzcntl_rr(&mut self, src: Reg, dst: Reg) {
        self.buffer.put_u8(0xF3);
        self.rex_if_needed(false, dst.number(), 0, src.number());
        self.opcode(&[0x0F, 0xBD]);
        self.modrm_rr(dst.number(), src.number());
    }

    pub(crate) fn lzcntq_rr(&mut self, src: Reg, dst: Reg) {
        self.buffer.put_u8(0xF3);
        self.rex_if_needed(true, dst.number(), 0, src.number());
        self.opcode(&[0x0F, 0xBD]);
        self.modrm_rr(dst.number(), src.number());
    }

    pub(crate) fn bsrl_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr(None, false, &[0x0F, 0xBD], dst.number(), src.number());
    }

    pub(crate) fn bsrq_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr(None, true, &[0x0F, 0xBD], dst.number(), src.number());
    }

    pub(crate) fn tzcntl_rr(&mut self, src: Reg, dst: Reg) {
        self.buffer.put_u8(0xF3);
        self.rex_if_needed(false, dst.number(), 0, src.number());
        self.opcode(&[0x0F, 0xBC]);
        self.modrm_rr(dst.number(), src.number());
    }

    pub(crate) fn tzcntq_rr(&mut self, src: Reg, dst: Reg) {
        self.buffer.put_u8(0xF3);
        self.rex_if_needed(true, dst.number(), 0, src.number());
        self.opcode(&[0x0F, 0xBC]);
        self.modrm_rr(dst.number(), src.number());
    }

    pub(crate) fn bsfl_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr(None, false, &[0x0F, 0xBC], dst.number(), src.number());
    }

    pub(crate) fn bsfq_rr(&mut self, src: Reg, dst: Reg) {
        self.insn_rr(None, true, &[0x0F, 0xBC], dst.number(), src.number());
    }

    // -- flag consumers ----------------------------------------------------

    pub(crate) fn setcc_r(&mut self, cc: Cc, dst: Reg) {
        self.insn_rr_byte(&[0x0F, 0x90 | cc as u8], 0, dst.number());
    }

    pub(crate) fn cmovccl_rr(&mut self, cc: Cc, src: Reg, dst: Reg) {
        self.insn_rr(None, false, &[0x0F, 0x40 | cc as u8], dst.number(), src.number());
    }

    pub(crate) fn cmovccq_rr(&mut self, cc: Cc, src: Reg, dst: Reg) {
        self.insn_rr(None, true, &[0x0F, 0x40 | cc as u8], dst.number(), src.number());
    }

    // -- control transfer --------------------------------------------------

    /// Conditional jump with a rel32 placeholder. Returns the offset just
    /// past the placeholder (the value a later link resolves against).
    pub(crate) fn jcc(&mut self, cc: Cc) -> u32 {
        self.opcode(&[0x0F, 0x80 | cc as u8]);
        self.buffer.put_i32(0);
        self.buffer.label().offset()
    }

    pub(crate) fn jmp_rel32(&mut self) -> u32 {
        self.buffer.put_u8(0xE9);
        self.buffer.put_i32(0);
        self.buffer.label().offset()
    }

    pub(crate) fn call_rel32(&mut self) -> u32 {
        self.buffer.put_u8(0xE8);
        self.buffer.put_i32(0);
        self.buffer.label().offset()
    }

    pub(crate) fn call_r(&mut self, target: Reg) {
        self.rex_if_needed(false, 0, 0, target.number());
        self.opcode(&[0xFF]);
        self.modrm_rr(2, target.number());
    }

    pub(crate) fn call_m(&mut self, base: Reg, offset: i32) {
        self.insn_mem(None, false, &[0xFF], 2, base, offset);
    }

    pub(crate) fn jmp_r(&mut self, target: Reg) {
        self.rex_if_needed(false, 0, 0, target.number());
        self.opcode(&[0xFF]);
        self.modrm_rr(4, target.number());
    }

    /// Resolve a rel32 placeholder: `from` is the offset just past the
    /// field, `to` the target offset.
    pub(crate) fn link_rel32(&mut self, from: u32, to: u32) {
        let rel = (to as i64) - (from as i64);
        let rel = i32::try_from(rel).expect("intra-buffer displacement overflows rel32");
        self.buffer.rewrite_u32(from as usize - 4, rel as u32);
    }

    pub(crate) fn ret(&mut self) {
        self.buffer.put_u8(0xC3);
    }

    pub(crate) fn int3(&mut self) {
        self.buffer.put_u8(0xCC);
    }

    pub(crate) fn ud2(&mut self) {
        self.opcode(&[0x0F, 0x0B]);
    }

    pub(crate) fn nop(&mut self) {
        self.buffer.put_u8(0x90);
    }

    pub(crate) fn mfence(&mut self) {
        self.opcode(&[0x0F, 0xAE, 0xF0]);
    }

    // -- atomics -----------------------------------------------------------

    pub(crate) fn xchgb_rm(&mut self, src: Reg, base: Reg, offset: i32) {
        self.insn_mem_byte(&[0x86], src.number(), base, offset);
    }

    pub(crate) fn xchgw_rm(&mut self, src: Reg, base: Reg, offset: i32) {
        self.insn_mem(Some(PRE_OPERAND_SIZE), false, &[0x87], src.number(), base, offset);
    }

    pub(crate) fn xchgl_rm(&mut self, src: Reg, base: Reg, offset: i32) {
        self.insn_mem(None, false, &[0x87], src.number(), base, offset);
    }

    pub(crate) fn xchgq_rm(&mut self, src: Reg, base: Reg, offset: i32) {
        self.insn_mem(None, true, &[0x87], src.number(), base, offset);
    }

    pub(crate) fn xaddb_rm_locked(&mut self, src: Reg, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.rex_for_byte(src.number(), 0, base.number());
        self.opcode(&[0x0F, 0xC0]);
        self.modrm_mem(src.number(), base, offset, false);
    }

    pub(crate) fn xaddw_rm_locked(&mut self, src: Reg, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(Some(PRE_OPERAND_SIZE), false, &[0x0F, 0xC1], src.number(), base, offset);
    }

    pub(crate) fn xaddl_rm_locked(&mut self, src: Reg, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, false, &[0x0F, 0xC1], src.number(), base, offset);
    }

    pub(crate) fn xaddq_rm_locked(&mut self, src: Reg, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, true, &[0x0F, 0xC1], src.number(), base, offset);
    }

    pub(crate) fn cmpxchgb_rm_locked(&mut self, src: Reg, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.rex_for_byte(src.number(), 0, base.number());
        self.opcode(&[0x0F, 0xB0]);
        self.modrm_mem(src.number(), base, offset, false);
    }

    pub(crate) fn cmpxchgw_rm_locked(&mut self, src: Reg, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(Some(PRE_OPERAND_SIZE), false, &[0x0F, 0xB1], src.number(), base, offset);
    }

    pub(crate) fn cmpxchgl_rm_locked(&mut self, src: Reg, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, false, &[0x0F, 0xB1], src.number(), base, offset);
    }

    pub(crate) fn cmpxchgq_rm_locked(&mut self, src: Reg, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, true, &[0x0F, 0xB1], src.number(), base, offset);
    }

    pub(crate) fn negl_m_locked(&mut self, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, false, &[0xF7], 3, base, offset);
    }

    pub(crate) fn negq_m_locked(&mut self, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, true, &[0xF7], 3, base, offset);
    }

    pub(crate) fn notl_m_locked(&mut self, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, false, &[0xF7], 2, base, offset);
    }

    pub(crate) fn notq_m_locked(&mut self, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, true, &[0xF7], 2, base, offset);
    }

    pub(crate) fn negb_m_locked(&mut self, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, false, &[0xF6], 3, base, offset);
    }

    pub(crate) fn notb_m_locked(&mut self, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(None, false, &[0xF6], 2, base, offset);
    }

    pub(crate) fn negw_m_locked(&mut self, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(Some(PRE_OPERAND_SIZE), false, &[0xF7], 3, base, offset);
    }

    pub(crate) fn notw_m_locked(&mut self, base: Reg, offset: i32) {
        self.buffer.put_u8(PRE_LOCK);
        self.insn_mem(Some(PRE_OPERAND_SIZE), false, &[0xF7], 2, base, offset);
    }

    // -- SSE scalar / vector ----------------------------------------------
    //
    // All SSE shapes funnel through these helpers: optional mandatory
    // prefix, then REX, then the 0F / 0F 38 / 0F 3A escape and opcode.

    fn sse_rr(&mut self, prefix: Option<u8>, opcode: &[u8], w: bool, reg: u8, rm: u8) {
        if let Some(prefix) = prefix {
            self.buffer.put_u8(prefix);
        }
        self.rex_if_needed(w, reg, 0, rm);
        self.opcode(opcode);
        self.modrm_rr(reg, rm);
    }

    fn sse_mem(
        &mut self,
        prefix: Option<u8>,
        opcode: &[u8],
        w: bool,
        reg: u8,
        base: Reg,
        offset: i32,
    ) {
        if let Some(prefix) = prefix {
            self.buffer.put_u8(prefix);
        }
        self.rex_if_needed(w, reg, 0, base.number());
        self.opcode(opcode);
        self.modrm_mem(reg, base, offset, false);
    }

    // scalar double/float moves

    pub(crate) fn movsd_rr(&mut self, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0xF2), &[0x0F, 0x10], false, dst.number(), src.number());
    }

    pub(crate) fn movsd_mr(&mut self, base: Reg, offset: i32, dst: FpReg) {
        self.sse_mem(Some(0xF2), &[0x0F, 0x10], false, dst.number(), base, offset);
    }

    pub(crate) fn movsd_rm(&mut self, src: FpReg, base: Reg, offset: i32) {
        self.sse_mem(Some(0xF2), &[0x0F, 0x11], false, src.number(), base, offset);
    }

    pub(crate) fn movss_mr(&mut self, base: Reg, offset: i32, dst: FpReg) {
        self.sse_mem(Some(0xF3), &[0x0F, 0x10], false, dst.number(), base, offset);
    }

    pub(crate) fn movss_rm(&mut self, src: FpReg, base: Reg, offset: i32) {
        self.sse_mem(Some(0xF3), &[0x0F, 0x11], false, src.number(), base, offset);
    }

    pub(crate) fn movaps_rr(&mut self, src: FpReg, dst: FpReg) {
        self.sse_rr(None, &[0x0F, 0x28], false, dst.number(), src.number());
    }

    pub(crate) fn movups_mr(&mut self, base: Reg, offset: i32, dst: FpReg) {
        self.sse_mem(None, &[0x0F, 0x10], false, dst.number(), base, offset);
    }

    pub(crate) fn movups_rm(&mut self, src: FpReg, base: Reg, offset: i32) {
        self.sse_mem(None, &[0x0F, 0x11], false, src.number(), base, offset);
    }

    /// `movd/movq xmm, r` — general register to vector register.
    pub(crate) fn movd_r2fp(&mut self, src: Reg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x6E], false, dst.number(), src.number());
    }

    pub(crate) fn movq_r2fp(&mut self, src: Reg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x6E], true, dst.number(), src.number());
    }

    /// `movd/movq r, xmm` — vector register to general register.
    pub(crate) fn movd_fp2r(&mut self, src: FpReg, dst: Reg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x7E], false, src.number(), dst.number());
    }

    pub(crate) fn movq_fp2r(&mut self, src: FpReg, dst: Reg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x7E], true, src.number(), dst.number());
    }

    // scalar arithmetic

    pub(crate) fn sse_op_sd(&mut self, opcode: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0xF2), &[0x0F, opcode], false, dst.number(), src.number());
    }

    pub(crate) fn sse_op_ss(&mut self, opcode: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0xF3), &[0x0F, opcode], false, dst.number(), src.number());
    }

    pub(crate) fn sse_op_sd_mem(&mut self, opcode: u8, base: Reg, offset: i32, dst: FpReg) {
        self.sse_mem(Some(0xF2), &[0x0F, opcode], false, dst.number(), base, offset);
    }

    pub(crate) fn sse_op_ss_mem(&mut self, opcode: u8, base: Reg, offset: i32, dst: FpReg) {
        self.sse_mem(Some(0xF3), &[0x0F, opcode], false, dst.number(), base, offset);
    }

    pub(crate) fn ucomisd_rr(&mut self, rhs: FpReg, lhs: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x2E], false, lhs.number(), rhs.number());
    }

    pub(crate) fn ucomiss_rr(&mut self, rhs: FpReg, lhs: FpReg) {
        self.sse_rr(None, &[0x0F, 0x2E], false, lhs.number(), rhs.number());
    }

    pub(crate) fn cvtsi2sdl_rr(&mut self, src: Reg, dst: FpReg) {
        self.sse_rr(Some(0xF2), &[0x0F, 0x2A], false, dst.number(), src.number());
    }

    pub(crate) fn cvtsi2sdq_rr(&mut self, src: Reg, dst: FpReg) {
        self.sse_rr(Some(0xF2), &[0x0F, 0x2A], true, dst.number(), src.number());
    }

    pub(crate) fn cvtsi2ssl_rr(&mut self, src: Reg, dst: FpReg) {
        self.sse_rr(Some(0xF3), &[0x0F, 0x2A], false, dst.number(), src.number());
    }

    pub(crate) fn cvtsi2ssq_rr(&mut self, src: Reg, dst: FpReg) {
        self.sse_rr(Some(0xF3), &[0x0F, 0x2A], true, dst.number(), src.number());
    }

    pub(crate) fn cvttsd2sil_rr(&mut self, src: FpReg, dst: Reg) {
        self.sse_rr(Some(0xF2), &[0x0F, 0x2C], false, dst.number(), src.number());
    }

    pub(crate) fn cvttsd2siq_rr(&mut self, src: FpReg, dst: Reg) {
        self.sse_rr(Some(0xF2), &[0x0F, 0x2C], true, dst.number(), src.number());
    }

    pub(crate) fn cvttss2sil_rr(&mut self, src: FpReg, dst: Reg) {
        self.sse_rr(Some(0xF3), &[0x0F, 0x2C], false, dst.number(), src.number());
    }

    pub(crate) fn cvttss2siq_rr(&mut self, src: FpReg, dst: Reg) {
        self.sse_rr(Some(0xF3), &[0x0F, 0x2C], true, dst.number(), src.number());
    }

    pub(crate) fn cvtsd2ss_rr(&mut self, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0xF2), &[0x0F, 0x5A], false, dst.number(), src.number());
    }

    pub(crate) fn cvtss2sd_rr(&mut self, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0xF3), &[0x0F, 0x5A], false, dst.number(), src.number());
    }

    /// SSE4.1 rounding with an immediate mode: 0=nearest, 1=floor, 2=ceil,
    /// 3=trunc (all with exceptions suppressed via bit 3).
    pub(crate) fn roundsd_rr(&mut self, mode: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x3A, 0x0B], false, dst.number(), src.number());
        self.buffer.put_u8(mode | 0x8);
    }

    pub(crate) fn roundss_rr(&mut self, mode: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x3A, 0x0A], false, dst.number(), src.number());
        self.buffer.put_u8(mode | 0x8);
    }

    // packed ops, generic shapes: 0F map with 66 prefix is the common case

    pub(crate) fn p66_rr(&mut self, opcode: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, opcode], false, dst.number(), src.number());
    }

    pub(crate) fn p66_38_rr(&mut self, opcode: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x38, opcode], false, dst.number(), src.number());
    }

    pub(crate) fn p66_3a_rr_i8(&mut self, opcode: u8, src: FpReg, dst: FpReg, imm: u8) {
        self.sse_rr(Some(0x66), &[0x0F, 0x3A, opcode], false, dst.number(), src.number());
        self.buffer.put_u8(imm);
    }

    pub(crate) fn pnone_rr(&mut self, opcode: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(None, &[0x0F, opcode], false, dst.number(), src.number());
    }

    /// Packed shift by immediate: group opcode 0x71/0x72/0x73 with /digit.
    pub(crate) fn pshift_i8(&mut self, opcode: u8, digit: u8, dst: FpReg, imm: u8) {
        self.buffer.put_u8(0x66);
        self.rex_if_needed(false, digit, 0, dst.number());
        self.opcode(&[0x0F, opcode]);
        self.modrm_rr(digit, dst.number());
        self.buffer.put_u8(imm);
    }

    /// Packed shift by the low 64 bits of an xmm count register.
    pub(crate) fn pshift_rr(&mut self, opcode: u8, count: FpReg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, opcode], false, dst.number(), count.number());
    }

    pub(crate) fn pshufd_rr(&mut self, order: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x70], false, dst.number(), src.number());
        self.buffer.put_u8(order);
    }

    pub(crate) fn pshuflw_rr(&mut self, order: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0xF2), &[0x0F, 0x70], false, dst.number(), src.number());
        self.buffer.put_u8(order);
    }

    pub(crate) fn shufpd_rr(&mut self, order: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0xC6], false, dst.number(), src.number());
        self.buffer.put_u8(order);
    }

    pub(crate) fn shufps_rr(&mut self, order: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(None, &[0x0F, 0xC6], false, dst.number(), src.number());
        self.buffer.put_u8(order);
    }

    pub(crate) fn cmpps_rr(&mut self, predicate: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(None, &[0x0F, 0xC2], false, dst.number(), src.number());
        self.buffer.put_u8(predicate);
    }

    pub(crate) fn cmppd_rr(&mut self, predicate: u8, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0xC2], false, dst.number(), src.number());
        self.buffer.put_u8(predicate);
    }

    // lane extract/insert

    pub(crate) fn pextrb_rr(&mut self, lane: u8, src: FpReg, dst: Reg) {
        // 66 0F 3A 14 /r ib: r/m8 gets the byte, reg field is the xmm.
        self.buffer.put_u8(0x66);
        self.rex_if_needed(false, src.number(), 0, dst.number());
        self.opcode(&[0x0F, 0x3A, 0x14]);
        self.modrm_rr(src.number(), dst.number());
        self.buffer.put_u8(lane);
    }

    pub(crate) fn pextrw_rr(&mut self, lane: u8, src: FpReg, dst: Reg) {
        // 66 0F C5 /r ib: reg field is the gpr destination.
        self.buffer.put_u8(0x66);
        self.rex_if_needed(false, dst.number(), 0, src.number());
        self.opcode(&[0x0F, 0xC5]);
        self.modrm_rr(dst.number(), src.number());
        self.buffer.put_u8(lane);
    }

    pub(crate) fn pextrd_rr(&mut self, lane: u8, src: FpReg, dst: Reg) {
        self.buffer.put_u8(0x66);
        self.rex_if_needed(false, src.number(), 0, dst.number());
        self.opcode(&[0x0F, 0x3A, 0x16]);
        self.modrm_rr(src.number(), dst.number());
        self.buffer.put_u8(lane);
    }

    pub(crate) fn pextrq_rr(&mut self, lane: u8, src: FpReg, dst: Reg) {
        self.buffer.put_u8(0x66);
        self.rex_if_needed(true, src.number(), 0, dst.number());
        self.opcode(&[0x0F, 0x3A, 0x16]);
        self.modrm_rr(src.number(), dst.number());
        self.buffer.put_u8(lane);
    }

    pub(crate) fn pinsrb_rr(&mut self, lane: u8, src: Reg, dst: FpReg) {
        self.buffer.put_u8(0x66);
        self.rex_if_needed(false, dst.number(), 0, src.number());
        self.opcode(&[0x0F, 0x3A, 0x20]);
        self.modrm_rr(dst.number(), src.number());
        self.buffer.put_u8(lane);
    }

    pub(crate) fn pinsrw_rr(&mut self, lane: u8, src: Reg, dst: FpReg) {
        self.buffer.put_u8(0x66);
        self.rex_if_needed(false, dst.number(), 0, src.number());
        self.opcode(&[0x0F, 0xC4]);
        self.modrm_rr(dst.number(), src.number());
        self.buffer.put_u8(lane);
    }

    pub(crate) fn pinsrd_rr(&mut self, lane: u8, src: Reg, dst: FpReg) {
        self.buffer.put_u8(0x66);
        self.rex_if_needed(false, dst.number(), 0, src.number());
        self.opcode(&[0x0F, 0x3A, 0x22]);
        self.modrm_rr(dst.number(), src.number());
        self.buffer.put_u8(lane);
    }

    pub(crate) fn pinsrq_rr(&mut self, lane: u8, src: Reg, dst: FpReg) {
        self.buffer.put_u8(0x66);
        self.rex_if_needed(true, dst.number(), 0, src.number());
        self.opcode(&[0x0F, 0x3A, 0x22]);
        self.modrm_rr(dst.number(), src.number());
        self.buffer.put_u8(lane);
    }

    pub(crate) fn pmovmskb_rr(&mut self, src: FpReg, dst: Reg) {
        self.sse_rr(Some(0x66), &[0x0F, 0xD7], false, dst.number(), src.number());
    }

    pub(crate) fn movmskps_rr(&mut self, src: FpReg, dst: Reg) {
        self.sse_rr(None, &[0x0F, 0x50], false, dst.number(), src.number());
    }

    pub(crate) fn movmskpd_rr(&mut self, src: FpReg, dst: Reg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x50], false, dst.number(), src.number());
    }

    pub(crate) fn ptest_rr(&mut self, mask: FpReg, value: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x38, 0x17], false, value.number(), mask.number());
    }

    // conversions, packed

    pub(crate) fn cvtdq2ps_rr(&mut self, src: FpReg, dst: FpReg) {
        self.sse_rr(None, &[0x0F, 0x5B], false, dst.number(), src.number());
    }

    pub(crate) fn cvttps2dq_rr(&mut self, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0xF3), &[0x0F, 0x5B], false, dst.number(), src.number());
    }

    pub(crate) fn cvtdq2pd_rr(&mut self, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0xF3), &[0x0F, 0xE6], false, dst.number(), src.number());
    }

    pub(crate) fn cvttpd2dq_rr(&mut self, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0xE6], false, dst.number(), src.number());
    }

    pub(crate) fn cvtps2pd_rr(&mut self, src: FpReg, dst: FpReg) {
        self.sse_rr(None, &[0x0F, 0x5A], false, dst.number(), src.number());
    }

    pub(crate) fn cvtpd2ps_rr(&mut self, src: FpReg, dst: FpReg) {
        self.sse_rr(Some(0x66), &[0x0F, 0x5A], false, dst.number(), src.number());
    }

    // -- VEX (AVX three-operand forms) -------------------------------------

    /// Two-byte VEX prefix + opcode for reg-reg forms in the 0F map.
    /// `pp` is the implied legacy prefix: 0=none, 1=66, 2=F3, 3=F2.
    pub(crate) fn vex_rr(&mut self, pp: u8, opcode: u8, src2: FpReg, src1: FpReg, dst: FpReg) {
        let r_inv = if dst.number() >= 8 { 0 } else { 0x80 };
        let vvvv_inv = (!src1.number() & 0xF) << 3;
        if src2.number() >= 8 {
            // The B bit forces the three-byte form (X̄ set, B̄ clear, 0F map).
            self.buffer.put_u8(0xC4);
            self.buffer.put_u8(r_inv | 0x40 | 0x01);
            self.buffer.put_u8(vvvv_inv | pp);
        } else {
            self.buffer.put_u8(0xC5);
            self.buffer.put_u8(r_inv | vvvv_inv | pp);
        }
        self.buffer.put_u8(opcode);
        self.modrm_rr(dst.number(), src2.number());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(build: impl FnOnce(&mut X86Assembler)) -> Vec<u8> {
        let mut asm = X86Assembler::new();
        build(&mut asm);
        asm.buffer.take()
    }

    #[test]
    fn group1_register_forms() {
        // add eax, ecx
        assert_eq!(
            bytes(|a| a.group1_rr32(Group1::Add, Reg::Rcx, Reg::Rax)),
            [0x01, 0xC8]
        );
        // add r11, r12 (REX.WRB)
        assert_eq!(
            bytes(|a| a.group1_rr64(Group1::Add, Reg::R12, Reg::R11)),
            [0x4D, 0x01, 0xE3]
        );
        // xor esi, esi
        assert_eq!(
            bytes(|a| a.group1_rr32(Group1::Xor, Reg::Rsi, Reg::Rsi)),
            [0x31, 0xF6]
        );
    }

    #[test]
    fn group1_immediate_shrinks_to_imm8() {
        // add eax, 1 → short form
        assert_eq!(
            bytes(|a| a.group1_ir32(Group1::Add, 1, true, Reg::Rax)),
            [0x83, 0xC0, 0x01]
        );
        // forced generic form
        assert_eq!(
            bytes(|a| a.group1_ir32(Group1::Add, 1, false, Reg::Rax)),
            [0x81, 0xC0, 0x01, 0x00, 0x00, 0x00]
        );
        // out-of-range value always generic
        assert_eq!(
            bytes(|a| a.group1_ir32(Group1::Add, 0x1234, true, Reg::Rax)),
            [0x81, 0xC0, 0x34, 0x12, 0x00, 0x00]
        );
    }

    #[test]
    fn memory_modrm_special_bases() {
        // mov eax, [rsp] needs a SIB escape
        assert_eq!(
            bytes(|a| a.movl_mr(Reg::Rsp, 0, Reg::Rax)),
            [0x8B, 0x04, 0x24]
        );
        // mov eax, [rbp] needs an explicit zero disp8
        assert_eq!(
            bytes(|a| a.movl_mr(Reg::Rbp, 0, Reg::Rax)),
            [0x8B, 0x45, 0x00]
        );
        // mov eax, [r13] likewise (low bits alias rbp)
        assert_eq!(
            bytes(|a| a.movl_mr(Reg::R13, 0, Reg::Rax)),
            [0x41, 0x8B, 0x45, 0x00]
        );
        // mov eax, [r12] needs REX.B and a SIB escape
        assert_eq!(
            bytes(|a| a.movl_mr(Reg::R12, 0, Reg::Rax)),
            [0x41, 0x8B, 0x04, 0x24]
        );
    }

    #[test]
    fn sib_encoding() {
        // mov rax, [rdi + rsi*8 + 0x40]
        assert_eq!(
            bytes(|a| a.movq_sibr(Reg::Rdi, Reg::Rsi, Scale::TimesEight, 0x40, Reg::Rax)),
            [0x48, 0x8B, 0x44, 0xF7, 0x40]
        );
    }

    #[test]
    fn byte_register_rex() {
        // setcc on sil requires an empty REX
        assert_eq!(
            bytes(|a| a.setcc_r(Cc::E, Reg::Rsi)),
            [0x40, 0x0F, 0x94, 0xC6]
        );
        // on al it does not
        assert_eq!(bytes(|a| a.setcc_r(Cc::E, Reg::Rax)), [0x0F, 0x94, 0xC0]);
    }

    #[test]
    fn movabs_form() {
        let code = bytes(|a| a.movq_i64r(0x1122_3344_5566_7788, Reg::R11));
        assert_eq!(code[..2], [0x49, 0xBB]);
        assert_eq!(&code[2..], &0x1122_3344_5566_7788i64.to_le_bytes());
    }

    #[test]
    fn rel32_linking() {
        let mut asm = X86Assembler::new();
        let jump = asm.jmp_rel32();
        asm.nop();
        let target = asm.label().offset();
        asm.link_rel32(jump, target);
        // jmp +1 over the nop
        assert_eq!(asm.buffer.code(), &[0xE9, 0x01, 0x00, 0x00, 0x00, 0x90]);
    }

    #[test]
    fn locked_prefix_ordering() {
        // lock add [rdi], eax
        assert_eq!(
            bytes(|a| a.group1_rm_locked(Group1::Add, false, Reg::Rax, Reg::Rdi, 0)),
            [0xF0, 0x01, 0x07]
        );
        // lock cmpxchg [rdi], rcx
        assert_eq!(
            bytes(|a| a.cmpxchgq_rm_locked(Reg::Rcx, Reg::Rdi, 0)),
            [0xF0, 0x48, 0x0F, 0xB1, 0x0F]
        );
    }

    #[test]
    fn fence_and_traps() {
        assert_eq!(bytes(|a| a.mfence()), [0x0F, 0xAE, 0xF0]);
        assert_eq!(bytes(|a| a.int3()), [0xCC]);
        assert_eq!(bytes(|a| a.ud2()), [0x0F, 0x0B]);
    }

    #[test]
    fn compact_displacement_form() {
        // forced disp8 even for zero offset
        assert_eq!(
            bytes(|a| a.movl_mr_disp8(Reg::Rdi, 0, Reg::Rax)),
            [0x8B, 0x47, 0x00]
        );
        // forced disp32 even for a tiny offset
        assert_eq!(
            bytes(|a| a.movl_mr_disp32(Reg::Rdi, 4, Reg::Rax)),
            [0x8B, 0x87, 0x04, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn vex_two_byte_form() {
        // vaddsd xmm0, xmm1, xmm2
        assert_eq!(
            bytes(|a| a.vex_rr(3, 0x58, FpReg::Xmm2, FpReg::Xmm1, FpReg::Xmm0)),
            [0xC5, 0xF3, 0x58, 0xC2]
        );
    }
}
