//! Machine-code emission layer for a JIT compiler.
//!
//! A driving compiler calls the architecture-neutral operations on
//! [`MacroAssembler`] in program order to fill a code buffer, links the
//! jump and call handles those operations return, finalizes the buffer into
//! an [`ExecutableMemory`] region, and may later rewrite the patchable
//! slots it recorded. The active architecture backend is chosen at compile
//! time; x86_64 is the one implemented here.

pub mod buffer;
pub mod cpu;
pub mod exec;
pub mod masm;

pub use buffer::{AssemblerBuffer, AssemblerLabel};
pub use cpu::CpuFeatures;
pub use exec::{ExecError, ExecResult, ExecutableMemory};
pub use masm::{
    Call, CallKind, DataLabel32, DataLabelCompact, DataLabelPtr, DoubleCondition, Imm32, Imm64,
    Jump, JumpKind, JumpList, Label, RelationalCondition, ResultCondition, Scale, StatusCondition,
    commute_compare_to_zero_into_test, supported,
};

#[cfg(target_arch = "x86_64")]
pub use masm::x86_64::{
    Address, FP_SCRATCH, FpReg, MOVE_WITH_PATCH_IMM_OFFSET, MacroAssemblerX86_64,
    PATCHABLE_CALL_SPAN, Reg, SCRATCH, patch,
};

#[cfg(target_arch = "x86_64")]
pub use masm::MacroAssembler;
