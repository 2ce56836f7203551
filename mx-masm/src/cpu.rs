//! CPU feature detection.
//!
//! Features are probed once per process and memoized. The probe is
//! idempotent, so concurrent first readers racing on the cell all converge
//! to the same value; no lock is needed. Features never change for the
//! lifetime of the process and the cache is never invalidated.

use std::sync::OnceLock;

use tracing::debug;

/// Optional instruction-set extensions the macro-assembler keys lowering
/// decisions on. Everything not listed here (SSE2, cmpxchg, mfence) is part
/// of the x86_64 baseline and is assumed present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuFeatures {
    pub sse4_1: bool,
    pub sse4_2: bool,
    pub avx: bool,
    pub avx2: bool,
    pub popcnt: bool,
    pub lzcnt: bool,
    pub bmi1: bool,
}

impl CpuFeatures {
    /// The running processor's features, probed once per process.
    pub fn detect() -> CpuFeatures {
        static DETECTED: OnceLock<CpuFeatures> = OnceLock::new();
        *DETECTED.get_or_init(|| {
            let features = Self::detect_uncached();
            debug!(?features, "probed cpu features");
            features
        })
    }

    /// A feature set with every optional extension absent. Forces every
    /// fallback lowering; used by tests on hardware that has the fast paths.
    pub fn baseline() -> CpuFeatures {
        CpuFeatures {
            sse4_1: false,
            sse4_2: false,
            avx: false,
            avx2: false,
            popcnt: false,
            lzcnt: false,
            bmi1: false,
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn detect_uncached() -> CpuFeatures {
        use core::arch::x86_64::{__cpuid, __cpuid_count};

        // Leaf 1: ECX feature bits.
        let leaf1 = unsafe { __cpuid(1) };
        let sse4_1 = leaf1.ecx & (1 << 19) != 0;
        let sse4_2 = leaf1.ecx & (1 << 20) != 0;
        let popcnt = leaf1.ecx & (1 << 23) != 0;
        let osxsave = leaf1.ecx & (1 << 27) != 0;
        let avx_bit = leaf1.ecx & (1 << 28) != 0;

        // AVX additionally requires the OS to have enabled YMM state.
        let avx = avx_bit && osxsave && xgetbv0() & 0x6 == 0x6;

        // Leaf 7 subleaf 0: EBX feature bits.
        let leaf7 = unsafe { __cpuid_count(7, 0) };
        let bmi1 = leaf7.ebx & (1 << 3) != 0;
        let avx2 = avx && leaf7.ebx & (1 << 5) != 0;

        // Extended leaf 0x80000001: ECX bit 5 is LZCNT/ABM.
        let ext1 = unsafe { __cpuid(0x8000_0001) };
        let lzcnt = ext1.ecx & (1 << 5) != 0;

        CpuFeatures {
            sse4_1,
            sse4_2,
            avx,
            avx2,
            popcnt,
            lzcnt,
            bmi1,
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn detect_uncached() -> CpuFeatures {
        CpuFeatures::baseline()
    }
}

#[cfg(target_arch = "x86_64")]
fn xgetbv0() -> u64 {
    // XGETBV with ECX=0 reads XCR0. Safe here: only called after the
    // OSXSAVE bit confirmed the instruction is available.
    unsafe { core::arch::x86_64::_xgetbv(0) }
}
