//! Post-generation patching of finalized code.
//!
//! These rewrite instructions inside an executable region after it has been
//! handed out, and are only valid at locations the emission phase sized for
//! patching: the full-width and compact patchable loads, the patchable-call
//! immediate slots, and patchable jumps. Patching arbitrary instructions is
//! undefined.
//!
//! Thread-safety: rewriting a thread-safe patchable call's target is a
//! single naturally-aligned 8-byte store, which this architecture performs
//! atomically; executing threads observe either the old or the new target,
//! never a torn mix. Every other primitive here requires the caller to
//! ensure no thread is executing the patched range.

use tracing::trace;

use crate::exec;

use super::{MOVE_WITH_PATCH_IMM_OFFSET, PATCHABLE_CALL_SPAN};

/// Rewrite the 64-bit immediate of a `move_with_patch` /
/// `patchable_call` slot. `at` is the executable address of the
/// instruction start (the recorded `DataLabelPtr` position).
///
/// # Safety
///
/// `at` must be the address of a full-width patchable immediate load
/// emitted by this crate, inside a live executable region.
pub unsafe fn repatch_pointer(at: *mut u8, new_value: usize) {
    trace!(?at, new_value, "repatch pointer slot");
    let field = unsafe { at.add(MOVE_WITH_PATCH_IMM_OFFSET as usize) };
    exec::with_writable_region(field, 8, || {
        if (field as usize) % 8 == 0 {
            // The thread-safe call variant lands here: an aligned 8-byte
            // store is atomic on this architecture.
            unsafe {
                (field as *mut u64).write_volatile(new_value as u64);
            }
        } else {
            // Plain patchable slots carry no alignment guarantee and may
            // only be rewritten while no thread executes the range.
            unsafe {
                (field as *mut u64).write_unaligned(new_value as u64);
            }
        }
    });
    exec::flush_instruction_cache(field, 8);
}

/// Rewrite the disp32 field of a load emitted with
/// `load32_with_address_offset_patch`. `at` is the address of the
/// rewritable field (the label's `field_offset`).
///
/// # Safety
///
/// `at` must be the field address of a full-width patchable load inside a
/// live executable region, and no thread may execute the range meanwhile.
pub unsafe fn repatch_int32(at: *mut u8, new_value: i32) {
    trace!(?at, new_value, "repatch int32 slot");
    exec::with_writable_region(at, 4, || unsafe {
        (at as *mut i32).write_unaligned(new_value);
    });
    exec::flush_instruction_cache(at, 4);
}

/// Rewrite the disp8 field of a compact patchable load.
///
/// # Safety
///
/// As [`repatch_int32`], for a compact-form slot; `new_value` must fit the
/// compact displacement range (checked only by debug assertion).
pub unsafe fn repatch_compact_offset(at: *mut u8, new_value: i32) {
    debug_assert!(
        i8::try_from(new_value).is_ok(),
        "compact displacement out of range"
    );
    trace!(?at, new_value, "repatch compact slot");
    exec::with_writable_region(at, 1, || unsafe {
        at.write(new_value as i8 as u8);
    });
    exec::flush_instruction_cache(at, 1);
}

/// Redirect a patchable call (the movabs+call pair) to a new target.
/// `call_site` is the executable address just past the call instruction —
/// the recorded `Call::at` position.
///
/// # Safety
///
/// `call_site` must come from a `patchable_call` emission inside a live
/// executable region. Safe under concurrent execution only for the
/// thread-safe variant.
pub unsafe fn relink_call(call_site: *mut u8, new_target: usize) {
    // The immediate load starts at the documented constant distance before
    // the call; the call itself is three bytes.
    let imm_load = unsafe { call_site.sub(3 + PATCHABLE_CALL_SPAN as usize) };
    unsafe { repatch_pointer(imm_load, new_target) };
}

/// Replace a patchable jump with a jump to `new_target`. `at` is the
/// executable address of the jump instruction (its recorded `Label`).
///
/// # Safety
///
/// `at` must be a patchable jump's recorded position; no thread may be
/// executing the range.
pub unsafe fn repatch_jump(at: *mut u8, new_target: *const u8) {
    let rel = (new_target as i64) - (at as i64 + 5);
    let rel = i32::try_from(rel).expect("patched jump target out of rel32 range");
    trace!(?at, ?new_target, "repatch jump");
    exec::with_writable_region(at, 5, || unsafe {
        at.write(0xE9);
        (at.add(1) as *mut i32).write_unaligned(rel);
    });
    exec::flush_instruction_cache(at, 5);
}

/// Overwrite a patchable jump with no-ops, disabling it. Used for
/// inline-cache invalidation: the guarded fast path falls through.
///
/// # Safety
///
/// As [`repatch_jump`].
pub unsafe fn replace_jump_with_nops(at: *mut u8) {
    trace!(?at, "replace jump with nops");
    exec::with_writable_region(at, 5, || unsafe {
        for i in 0..5 {
            at.add(i).write(0x90);
        }
    });
    exec::flush_instruction_cache(at, 5);
}

/// Overwrite an instruction boundary with a trap, so execution reaching it
/// faults immediately. Used for deoptimization guards.
///
/// # Safety
///
/// `at` must be an instruction boundary the emission phase reserved at
/// least one byte for; no thread may be executing the range.
pub unsafe fn replace_with_breakpoint(at: *mut u8) {
    trace!(?at, "replace with breakpoint");
    exec::with_writable_region(at, 1, || unsafe {
        at.write(0xCC);
    });
    exec::flush_instruction_cache(at, 1);
}
