//! x86_64 macro-assembler backend.
//!
//! Exposes the architecture-neutral operation surface and lowers it onto the
//! [`asm::X86Assembler`] encoder, selecting the cheapest correct encoding per
//! operand combination. Composite operations may channel values through the
//! reserved scratch registers; that use is gated by the driver-controlled
//! scratch-allowed flag.

use tracing::trace;

use crate::buffer::AssemblerLabel;
use crate::cpu::CpuFeatures;
use crate::masm::{Imm32, Imm64, Jump, JumpKind, JumpList, Label, Scale};

pub(crate) mod asm;
mod atomic;
mod branch;
mod fp;
mod int;
mod mem;
pub mod patch;
mod simd;

use asm::{Cc, X86Assembler};

/// General-purpose registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    pub const ALL: [Reg; 16] = [
        Reg::Rax,
        Reg::Rcx,
        Reg::Rdx,
        Reg::Rbx,
        Reg::Rsp,
        Reg::Rbp,
        Reg::Rsi,
        Reg::Rdi,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
    ];

    pub const fn number(self) -> u8 {
        self as u8
    }
}

/// Floating-point / vector registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FpReg {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
    Xmm8 = 8,
    Xmm9 = 9,
    Xmm10 = 10,
    Xmm11 = 11,
    Xmm12 = 12,
    Xmm13 = 13,
    Xmm14 = 14,
    Xmm15 = 15,
}

impl FpReg {
    pub const fn number(self) -> u8 {
        self as u8
    }
}

/// Integer scratch register, reserved for composite-operation emission.
pub const SCRATCH: Reg = Reg::R11;

/// Floating-point scratch register.
pub const FP_SCRATCH: FpReg = FpReg::Xmm15;

/// Byte distance from the start of a patchable call's immediate-load
/// instruction to its call instruction (the movabs is exactly this long).
/// External patching code locates the immediate slot by subtracting this
/// from the call site.
pub const PATCHABLE_CALL_SPAN: u32 = 10;

/// Byte distance from the start of a full-width patchable immediate load to
/// the immediate field itself (REX + opcode).
pub const MOVE_WITH_PATCH_IMM_OFFSET: u32 = 2;

/// A memory operand, in one of the three supported shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Address {
    /// base + displacement
    Base { base: Reg, offset: i32 },
    /// base + index * scale + displacement
    BaseIndex {
        base: Reg,
        index: Reg,
        scale: Scale,
        offset: i32,
    },
    /// A raw process address; lowered through the scratch register.
    Absolute { ptr: usize },
}

impl Address {
    pub const fn base(base: Reg, offset: i32) -> Self {
        Address::Base { base, offset }
    }

    pub const fn base_index(base: Reg, index: Reg, scale: Scale, offset: i32) -> Self {
        Address::BaseIndex {
            base,
            index,
            scale,
            offset,
        }
    }

    pub const fn absolute(ptr: usize) -> Self {
        Address::Absolute { ptr }
    }
}

/// An address after absolute lowering: something the encoder can take.
#[derive(Clone, Copy)]
pub(crate) enum Mem {
    Base(Reg, i32),
    Sib(Reg, Reg, Scale, i32),
}

pub struct MacroAssemblerX86_64 {
    pub(crate) asm: X86Assembler,
    features: CpuFeatures,
    allow_scratch: bool,
}

impl MacroAssemblerX86_64 {
    pub fn new() -> Self {
        Self::with_features(CpuFeatures::detect())
    }

    /// Build against an explicit feature set. Tests use this to force the
    /// multi-instruction fallback lowerings on hardware that has the fast
    /// paths; the semantics of every operation are identical either way.
    pub fn with_features(features: CpuFeatures) -> Self {
        Self {
            asm: X86Assembler::new(),
            features,
            allow_scratch: true,
        }
    }

    pub fn features(&self) -> CpuFeatures {
        self.features
    }

    /// Permit or forbid internal use of the scratch registers. While
    /// forbidden, any composite lowering that would clobber them asserts in
    /// debug builds instead of silently destroying a live value.
    pub fn set_scratch_register_allowed(&mut self, allowed: bool) {
        self.allow_scratch = allowed;
    }

    pub(crate) fn scratch(&self) -> Reg {
        debug_assert!(
            self.allow_scratch,
            "composite operation needs the scratch register but its use is not permitted"
        );
        SCRATCH
    }

    pub(crate) fn fp_scratch(&self) -> FpReg {
        debug_assert!(
            self.allow_scratch,
            "composite operation needs the fp scratch register but its use is not permitted"
        );
        FP_SCRATCH
    }

    /// Lower an [`Address`] to an encoder-ready operand. Absolute addresses
    /// are materialized into the scratch register.
    pub(crate) fn resolve(&mut self, address: Address) -> Mem {
        match address {
            Address::Base { base, offset } => Mem::Base(base, offset),
            Address::BaseIndex {
                base,
                index,
                scale,
                offset,
            } => Mem::Sib(base, index, scale, offset),
            Address::Absolute { ptr } => {
                let scratch = self.scratch();
                self.asm.movq_i64r(ptr as i64, scratch);
                Mem::Base(scratch, 0)
            }
        }
    }

    // -- buffer ------------------------------------------------------------

    pub fn label(&mut self) -> Label {
        Label {
            label: self.asm.label(),
        }
    }

    pub(crate) fn assembler_label(&self) -> AssemblerLabel {
        self.asm.label()
    }

    pub fn buffer_len(&self) -> usize {
        self.asm.buffer.len()
    }

    pub fn code(&self) -> &[u8] {
        self.asm.buffer.code()
    }

    /// Consume the assembler and return the finished code bytes. All jump
    /// and call handles must have been linked by now.
    pub fn finalize(self) -> Vec<u8> {
        trace!(len = self.asm.buffer.len(), "finalized code buffer");
        self.asm.buffer.take()
    }

    // -- moves -------------------------------------------------------------

    pub fn move32(&mut self, src: Reg, dest: Reg) {
        // Writing the 32-bit register clears the upper half; a same-register
        // move is still emitted since callers use it as a zero-extension.
        self.asm.movl_rr(src, dest);
    }

    pub fn move64(&mut self, src: Reg, dest: Reg) {
        if src != dest {
            self.asm.movq_rr(src, dest);
        }
    }

    pub fn move_imm32(&mut self, imm: Imm32, dest: Reg) {
        if imm.value == 0 && !imm.patchable {
            // xor is the canonical zero idiom; also shorter.
            self.asm.group1_rr32(asm::Group1::Xor, dest, dest);
        } else {
            self.asm.movl_i32r(imm.value, dest);
        }
    }

    pub fn move_imm64(&mut self, imm: Imm64, dest: Reg) {
        if imm.patchable {
            self.asm.movq_i64r(imm.value, dest);
        } else if imm.value == 0 {
            self.asm.group1_rr32(asm::Group1::Xor, dest, dest);
        } else if u32::try_from(imm.value).is_ok() {
            // Fits unsigned 32: the 32-bit move zero-extends.
            self.asm.movl_i32r(imm.value as i32, dest);
        } else if i32::try_from(imm.value).is_ok() {
            self.asm.movq_i32r(imm.value as i32, dest);
        } else {
            self.asm.movq_i64r(imm.value, dest);
        }
    }

    pub fn move_ptr(&mut self, ptr: usize, dest: Reg) {
        self.move_imm64(Imm64::from_ptr(ptr), dest);
    }

    /// Full-width immediate load whose value will be rewritten after
    /// generation. Always the movabs encoding regardless of the initial
    /// value; returns the label external patchers resolve against.
    pub fn move_with_patch(&mut self, initial: Imm64, dest: Reg) -> crate::masm::DataLabelPtr {
        let label = self.asm.label();
        self.asm.movq_i64r(initial.value, dest);
        crate::masm::DataLabelPtr { label }
    }

    pub fn swap(&mut self, a: Reg, b: Reg) {
        if a != b {
            self.asm.xchgq_rr(a, b);
        }
    }

    pub fn zero_extend8_to_32(&mut self, src: Reg, dest: Reg) {
        self.asm.movzbl_rr(src, dest);
    }

    pub fn sign_extend8_to_32(&mut self, src: Reg, dest: Reg) {
        self.asm.movsbl_rr(src, dest);
    }

    pub fn zero_extend16_to_32(&mut self, src: Reg, dest: Reg) {
        self.asm.movzwl_rr(src, dest);
    }

    pub fn sign_extend16_to_32(&mut self, src: Reg, dest: Reg) {
        self.asm.movswl_rr(src, dest);
    }

    pub fn zero_extend32_to_64(&mut self, src: Reg, dest: Reg) {
        self.asm.movl_rr(src, dest);
    }

    pub fn sign_extend32_to_64(&mut self, src: Reg, dest: Reg) {
        self.asm.movslq_rr(src, dest);
    }

    // -- byte swap ---------------------------------------------------------

    pub fn byte_swap16(&mut self, reg: Reg) {
        // Rotate the low word by 8 and clear the upper bits, so the result
        // is a well-defined zero-extended 16-bit value.
        self.asm.group2_i8r16(asm::Group2::Ror, 8, reg);
        self.asm.movzwl_rr(reg, reg);
    }

    pub fn byte_swap32(&mut self, reg: Reg) {
        self.asm.bswapl_r(reg);
    }

    pub fn byte_swap64(&mut self, reg: Reg) {
        self.asm.bswapq_r(reg);
    }

    // -- bit counting ------------------------------------------------------

    pub fn count_leading_zeros32(&mut self, src: Reg, dest: Reg) {
        if self.features.lzcnt {
            self.asm.lzcntl_rr(src, dest);
            return;
        }
        // bsr finds the highest set bit; clz is 31 ^ index for non-zero
        // input, 32 for zero input.
        self.asm.bsrl_rr(src, dest);
        let src_is_non_zero = self.jump_if(Cc::NE);
        self.move_imm32(Imm32::new(32), dest);
        let done = self.jump();
        self.link(src_is_non_zero);
        self.asm.group1_ir32(asm::Group1::Xor, 31, true, dest);
        self.link(done);
    }

    pub fn count_leading_zeros64(&mut self, src: Reg, dest: Reg) {
        if self.features.lzcnt {
            self.asm.lzcntq_rr(src, dest);
            return;
        }
        self.asm.bsrq_rr(src, dest);
        let src_is_non_zero = self.jump_if(Cc::NE);
        self.move_imm32(Imm32::new(64), dest);
        let done = self.jump();
        self.link(src_is_non_zero);
        self.asm.group1_ir64(asm::Group1::Xor, 63, true, dest);
        self.link(done);
    }

    pub fn count_trailing_zeros32(&mut self, src: Reg, dest: Reg) {
        if self.features.bmi1 {
            self.asm.tzcntl_rr(src, dest);
            return;
        }
        self.asm.bsfl_rr(src, dest);
        let src_is_non_zero = self.jump_if(Cc::NE);
        self.move_imm32(Imm32::new(32), dest);
        self.link(src_is_non_zero);
    }

    pub fn count_trailing_zeros64(&mut self, src: Reg, dest: Reg) {
        if self.features.bmi1 {
            self.asm.tzcntq_rr(src, dest);
            return;
        }
        self.asm.bsfq_rr(src, dest);
        let src_is_non_zero = self.jump_if(Cc::NE);
        self.move_imm32(Imm32::new(64), dest);
        self.link(src_is_non_zero);
    }

    // -- thread-local storage ----------------------------------------------

    /// Load from the thread segment base plus offset (the %gs segment on
    /// x86_64 Linux userland as configured here).
    pub fn load_from_tls32(&mut self, offset: i32, dest: Reg) {
        self.asm.gs_movl_ar(offset, dest);
    }

    pub fn load_from_tls64(&mut self, offset: i32, dest: Reg) {
        self.asm.gs_movq_ar(offset, dest);
    }

    pub fn store_to_tls32(&mut self, src: Reg, offset: i32) {
        self.asm.gs_movl_ra(src, offset);
    }

    pub fn store_to_tls64(&mut self, src: Reg, offset: i32) {
        self.asm.gs_movq_ra(src, offset);
    }

    // -- misc --------------------------------------------------------------

    pub fn nop(&mut self) {
        self.asm.nop();
    }

    /// Emit `len` bytes of single-byte nops.
    pub fn nop_filled(&mut self, len: usize) {
        for _ in 0..len {
            self.asm.nop();
        }
    }

    pub fn breakpoint(&mut self) {
        self.asm.int3();
    }

    /// A guaranteed-faulting instruction, for unreachable paths.
    pub fn illegal_instruction(&mut self) {
        self.asm.ud2();
    }

    pub fn ret(&mut self) {
        self.asm.ret();
    }

    pub fn push(&mut self, reg: Reg) {
        self.asm.push_r(reg);
    }

    pub fn pop(&mut self, reg: Reg) {
        self.asm.pop_r(reg);
    }

    // -- capability queries -------------------------------------------------

    /// Whether ceil/floor/trunc/round-nearest have a hardware lowering.
    /// There is no fallback; drivers must check before emitting them.
    pub fn supports_floating_point_rounding(&self) -> bool {
        self.features.sse4_1
    }

    /// Whether the single-instruction population count is available. The
    /// fallback sequences work regardless; this only predicts which
    /// lowering the emission will pick.
    pub fn supports_count_population(&self) -> bool {
        self.features.popcnt
    }

    /// Whether the zero-input-defined trailing-zero count instruction is
    /// available (the fallback handles zero inputs with an explicit check).
    pub fn supports_count_trailing_zeros(&self) -> bool {
        self.features.bmi1
    }

    /// Vector operations below the SSE4.1 baseline are always available;
    /// this reports whether the single-instruction forms of the gated
    /// members will be used.
    pub fn supports_vector_ops_fast_paths(&self) -> bool {
        self.features.sse4_1
    }

    /// Whether 64-bit lane greater-than compares have a single-instruction
    /// lowering.
    pub fn supports_vector_compare_int64(&self) -> bool {
        self.features.sse4_2
    }

    pub fn supports_avx(&self) -> bool {
        self.features.avx
    }

    // -- jumps (shared plumbing; the public branch surface is in branch.rs) -

    pub(crate) fn jump_if(&mut self, cc: Cc) -> Jump {
        Jump::new(self.asm.jcc(cc), JumpKind::Conditional)
    }

    /// Unconditional jump, linked later.
    pub fn jump(&mut self) -> Jump {
        Jump::new(self.asm.jmp_rel32(), JumpKind::Plain)
    }

    /// Link a jump to the current end of the buffer.
    pub fn link(&mut self, jump: Jump) {
        let at = jump.consume();
        let to = self.asm.label().offset();
        self.asm.link_rel32(at, to);
    }

    /// Link a jump to a previously recorded label.
    pub fn link_to(&mut self, jump: Jump, target: Label) {
        let at = jump.consume();
        self.asm.link_rel32(at, target.label.offset());
    }

    pub fn link_jump_list(&mut self, list: &mut JumpList) {
        for jump in list.drain() {
            self.link(jump);
        }
    }

    pub fn link_jump_list_to(&mut self, list: &mut JumpList, target: Label) {
        for jump in list.drain() {
            self.link_to(jump, target);
        }
    }

    /// Indirect jump through a register.
    pub fn jump_to_reg(&mut self, target: Reg) {
        self.asm.jmp_r(target);
    }
}

impl Default for MacroAssemblerX86_64 {
    fn default() -> Self {
        Self::new()
    }
}
