//! Vector (128-bit SIMD) operations.
//!
//! SSE2 is the baseline; everything gated above it checks the feature set
//! and either emits the single wide instruction or a semantically identical
//! multi-instruction sequence. Operations whose fallback would be
//! unreasonable panic instead — wrong code is worse than stopping the
//! compiler, and the driver is expected to have consulted the capability
//! queries first.
//!
//! Operations that need more than the reserved scratch register take an
//! explicit `tmp` register from the driver; it must not alias the operands
//! or the scratch.
//!
//! A note on gating: the handful of SSSE3 instructions used here (pshufb,
//! pabs*) are gated under the SSE4.1 flag. That is deliberately
//! conservative — an SSSE3-only machine takes the SSE2 fallback, which is
//! merely slower, never wrong.

use crate::masm::{Imm32, Imm64};

use super::{Address, FpReg, MacroAssemblerX86_64, Reg};

// Packed opcode bytes in the 66 0F map.
const PADDB: u8 = 0xFC;
const PADDW: u8 = 0xFD;
const PADDD: u8 = 0xFE;
const PADDQ: u8 = 0xD4;
const PSUBB: u8 = 0xF8;
const PSUBW: u8 = 0xF9;
const PSUBD: u8 = 0xFA;
const PSUBQ: u8 = 0xFB;
const PAND: u8 = 0xDB;
const PANDN: u8 = 0xDF;
const POR: u8 = 0xEB;
const PXOR: u8 = 0xEF;
const PCMPEQB: u8 = 0x74;
const PCMPEQW: u8 = 0x75;
const PCMPEQD: u8 = 0x76;
const PCMPGTB: u8 = 0x64;
const PCMPGTW: u8 = 0x65;
const PCMPGTD: u8 = 0x66;
const PMULUDQ: u8 = 0xF4;
const PMULLW: u8 = 0xD5;
const PUNPCKLBW: u8 = 0x60;
const PUNPCKLWD: u8 = 0x61;
const PUNPCKLDQ: u8 = 0x62;
const PUNPCKHBW: u8 = 0x68;
const PUNPCKHWD: u8 = 0x69;
const PUNPCKHDQ: u8 = 0x6A;
const PUNPCKLQDQ: u8 = 0x6C;
const PACKSSWB: u8 = 0x63;
const PACKSSDW: u8 = 0x6B;
const PACKUSWB: u8 = 0x67;

impl MacroAssemblerX86_64 {
    // -- moves / loads / stores ---------------------------------------------

    pub fn vector_move(&mut self, src: FpReg, dest: FpReg) {
        self.move_double(src, dest);
    }

    pub fn vector_load(&mut self, src: Address, dest: FpReg) {
        let (base, offset) = self.resolve_to_base(src);
        self.asm.movups_mr(base, offset, dest);
    }

    pub fn vector_store(&mut self, src: FpReg, dest: Address) {
        let (base, offset) = self.resolve_to_base(dest);
        self.asm.movups_rm(src, base, offset);
    }

    /// Splat a 32-bit pattern from a general register across all four
    /// lanes, through the fp scratch register when `dest` must stay clean.
    fn splat32_pattern(&mut self, pattern: i32, dest: FpReg) {
        let scratch = self.scratch();
        self.move_imm32(Imm32::new(pattern), scratch);
        self.asm.movd_r2fp(scratch, dest);
        self.asm.pshufd_rr(0x00, dest, dest);
    }

    fn splat64_pattern(&mut self, pattern: i64, dest: FpReg) {
        let scratch = self.scratch();
        self.move_imm64(Imm64::new(pattern), scratch);
        self.asm.movq_r2fp(scratch, dest);
        self.asm.p66_rr(PUNPCKLQDQ, dest, dest);
    }

    // -- lane splats ---------------------------------------------------------

    pub fn vector_splat8(&mut self, src: Reg, dest: FpReg) {
        self.asm.movd_r2fp(src, dest);
        self.asm.p66_rr(PUNPCKLBW, dest, dest);
        self.asm.pshuflw_rr(0x00, dest, dest);
        self.asm.p66_rr(PUNPCKLQDQ, dest, dest);
    }

    pub fn vector_splat16(&mut self, src: Reg, dest: FpReg) {
        self.asm.movd_r2fp(src, dest);
        self.asm.pshuflw_rr(0x00, dest, dest);
        self.asm.p66_rr(PUNPCKLQDQ, dest, dest);
    }

    pub fn vector_splat32(&mut self, src: Reg, dest: FpReg) {
        self.asm.movd_r2fp(src, dest);
        self.asm.pshufd_rr(0x00, dest, dest);
    }

    pub fn vector_splat64(&mut self, src: Reg, dest: FpReg) {
        self.asm.movq_r2fp(src, dest);
        self.asm.p66_rr(PUNPCKLQDQ, dest, dest);
    }

    pub fn vector_splat_float(&mut self, src: FpReg, dest: FpReg) {
        self.move_double(src, dest);
        self.asm.shufps_rr(0x00, dest, dest);
    }

    pub fn vector_splat_double(&mut self, src: FpReg, dest: FpReg) {
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKLQDQ, dest, dest);
    }

    // -- lanewise integer arithmetic ----------------------------------------

    pub fn vector_add8(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PADDB, src, dest);
    }

    pub fn vector_add16(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PADDW, src, dest);
    }

    pub fn vector_add32(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PADDD, src, dest);
    }

    pub fn vector_add64(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PADDQ, src, dest);
    }

    pub fn vector_sub8(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PSUBB, src, dest);
    }

    pub fn vector_sub16(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PSUBW, src, dest);
    }

    pub fn vector_sub32(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PSUBD, src, dest);
    }

    pub fn vector_sub64(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PSUBQ, src, dest);
    }

    pub fn vector_add_sat_signed8(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xEC, src, dest);
    }

    pub fn vector_add_sat_signed16(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xED, src, dest);
    }

    pub fn vector_add_sat_unsigned8(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xDC, src, dest);
    }

    pub fn vector_add_sat_unsigned16(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xDD, src, dest);
    }

    pub fn vector_sub_sat_signed8(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xE8, src, dest);
    }

    pub fn vector_sub_sat_signed16(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xE9, src, dest);
    }

    pub fn vector_sub_sat_unsigned8(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xD8, src, dest);
    }

    pub fn vector_sub_sat_unsigned16(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xD9, src, dest);
    }

    pub fn vector_mul16(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PMULLW, src, dest);
    }

    /// 32-bit lane multiply: single instruction on SSE4.1, otherwise the
    /// even/odd pmuludq decomposition.
    pub fn vector_mul32(&mut self, src: FpReg, dest: FpReg, tmp: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x40, src, dest); // pmulld
            return;
        }
        let t = self.fp_scratch();
        debug_assert!(tmp != src && tmp != dest && tmp != t, "tmp must be disjoint");
        self.asm.pshufd_rr(0xF5, src, tmp); // odd lanes of src
        self.asm.pshufd_rr(0xF5, dest, t); // odd lanes of dest
        self.asm.p66_rr(PMULUDQ, t, tmp); // odd products
        self.asm.p66_rr(PMULUDQ, src, dest); // even products
        self.asm.pshufd_rr(0xE8, dest, dest); // compact low dwords
        self.asm.pshufd_rr(0xE8, tmp, tmp);
        self.asm.p66_rr(PUNPCKLDQ, tmp, dest); // interleave even/odd
    }

    /// 64-bit lane multiply has no SSE encoding at all; always the
    /// cross-product synthesis.
    pub fn vector_mul64(&mut self, src: FpReg, dest: FpReg, tmp: FpReg) {
        let t = self.fp_scratch();
        debug_assert!(tmp != src && tmp != dest && tmp != t, "tmp must be disjoint");
        if src == dest {
            // Squaring: lo*lo + 2*(hi*lo << 32).
            self.asm.movaps_rr(dest, t);
            self.asm.p66_rr(PMULUDQ, dest, t); // t = lo*lo
            self.asm.movaps_rr(dest, tmp);
            self.asm.pshift_i8(0x73, 2, tmp, 32); // hi
            self.asm.p66_rr(PMULUDQ, dest, tmp); // tmp = hi*lo
            self.asm.p66_rr(PADDQ, tmp, tmp); // doubled cross term
            self.asm.pshift_i8(0x73, 6, tmp, 32); // psllq 32
            self.asm.movaps_rr(t, dest);
            self.asm.p66_rr(PADDQ, tmp, dest);
            return;
        }
        self.asm.movaps_rr(dest, t);
        self.asm.p66_rr(PMULUDQ, src, t); // lo(a)*lo(b)
        self.asm.movaps_rr(src, tmp);
        self.asm.pshift_i8(0x73, 2, tmp, 32); // psrlq: hi(b)
        self.asm.p66_rr(PMULUDQ, dest, tmp); // hi(b)*lo(a)
        self.asm.pshift_i8(0x73, 2, dest, 32); // hi(a)
        self.asm.p66_rr(PMULUDQ, src, dest); // hi(a)*lo(b)
        self.asm.p66_rr(PADDQ, tmp, dest); // cross terms
        self.asm.pshift_i8(0x73, 6, dest, 32); // psllq 32
        self.asm.p66_rr(PADDQ, t, dest); // + lo*lo
    }

    // -- lanewise float arithmetic ------------------------------------------

    pub fn vector_add_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.pnone_rr(0x58, src, dest);
    }

    pub fn vector_add_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0x58, src, dest);
    }

    pub fn vector_sub_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.pnone_rr(0x5C, src, dest);
    }

    pub fn vector_sub_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0x5C, src, dest);
    }

    pub fn vector_mul_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.pnone_rr(0x59, src, dest);
    }

    pub fn vector_mul_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0x59, src, dest);
    }

    pub fn vector_div_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.pnone_rr(0x5E, src, dest);
    }

    pub fn vector_div_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0x5E, src, dest);
    }

    pub fn vector_sqrt_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.pnone_rr(0x51, src, dest);
    }

    pub fn vector_sqrt_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0x51, src, dest);
    }

    /// Lane minimum with the raw hardware NaN rule: when either input is
    /// NaN (or both are zeros of differing sign) the second operand wins.
    pub fn vector_min_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.pnone_rr(0x5D, src, dest);
    }

    pub fn vector_min_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0x5D, src, dest);
    }

    pub fn vector_max_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.pnone_rr(0x5F, src, dest);
    }

    pub fn vector_max_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0x5F, src, dest);
    }

    // -- abs / neg -----------------------------------------------------------

    pub fn vector_abs8(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x1C, src, dest); // pabsb
            return;
        }
        // min_u(x, -x) is |x| for i8 lanes.
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t); // xorps: zero
        self.asm.p66_rr(PSUBB, src, t); // t = -x
        self.move_double(src, dest);
        self.asm.p66_rr(0xDA, t, dest); // pminub
    }

    pub fn vector_abs16(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x1D, src, dest); // pabsw
            return;
        }
        let t = self.fp_scratch();
        self.asm.movaps_rr(src, t);
        self.asm.pshift_i8(0x71, 4, t, 15); // psraw: sign mask
        self.move_double(src, dest);
        self.asm.p66_rr(PXOR, t, dest);
        self.asm.p66_rr(PSUBW, t, dest);
    }

    pub fn vector_abs32(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x1E, src, dest); // pabsd
            return;
        }
        let t = self.fp_scratch();
        self.asm.movaps_rr(src, t);
        self.asm.pshift_i8(0x72, 4, t, 31); // psrad
        self.move_double(src, dest);
        self.asm.p66_rr(PXOR, t, dest);
        self.asm.p66_rr(PSUBD, t, dest);
    }

    pub fn vector_abs64(&mut self, src: FpReg, dest: FpReg) {
        // No pre-AVX-512 single instruction exists; always synthesized.
        let t = self.fp_scratch();
        self.asm.pshufd_rr(0xF5, src, t); // duplicate high dwords
        self.asm.pshift_i8(0x72, 4, t, 31); // psrad: per-lane sign
        self.move_double(src, dest);
        self.asm.p66_rr(PXOR, t, dest);
        self.asm.p66_rr(PSUBQ, t, dest);
    }

    pub fn vector_neg8(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t);
        self.asm.p66_rr(PSUBB, src, t);
        self.move_double(t, dest);
    }

    pub fn vector_neg16(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t);
        self.asm.p66_rr(PSUBW, src, t);
        self.move_double(t, dest);
    }

    pub fn vector_neg32(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t);
        self.asm.p66_rr(PSUBD, src, t);
        self.move_double(t, dest);
    }

    pub fn vector_neg64(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t);
        self.asm.p66_rr(PSUBQ, src, t);
        self.move_double(t, dest);
    }

    pub fn vector_abs_float(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        self.splat32_pattern(0x7FFF_FFFF, t);
        self.move_double(src, dest);
        self.asm.pnone_rr(0x54, t, dest); // andps
    }

    pub fn vector_neg_float(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        self.splat32_pattern(i32::MIN, t);
        self.move_double(src, dest);
        self.asm.pnone_rr(0x57, t, dest); // xorps
    }

    pub fn vector_abs_double(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        self.splat64_pattern(0x7FFF_FFFF_FFFF_FFFF, t);
        self.move_double(src, dest);
        self.asm.p66_rr(0x54, t, dest); // andpd
    }

    pub fn vector_neg_double(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        self.splat64_pattern(i64::MIN, t);
        self.move_double(src, dest);
        self.asm.p66_rr(0x57, t, dest); // xorpd
    }

    // -- integer min/max -----------------------------------------------------

    /// Shared compare-and-blend select: `dest = mask ? dest : src` where
    /// the mask in the scratch register marks lanes in which `src` wins.
    /// Consumes the scratch.
    fn blend_by_scratch_mask(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        self.asm.p66_rr(PAND, t, dest); // wrong-side lanes cleared below
        self.asm.p66_rr(PANDN, src, t); // t = src & ~mask
        self.asm.p66_rr(POR, t, dest);
    }

    pub fn vector_min_signed8(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x38, src, dest); // pminsb
            return;
        }
        // mask = src > dest keeps dest lanes (they are smaller).
        let t = self.fp_scratch();
        self.asm.movaps_rr(src, t);
        self.asm.p66_rr(PCMPGTB, dest, t);
        self.blend_by_scratch_mask(src, dest);
    }

    pub fn vector_max_signed8(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x3C, src, dest); // pmaxsb
            return;
        }
        // mask = dest > src keeps dest lanes (they are larger).
        let t = self.fp_scratch();
        self.asm.movaps_rr(dest, t);
        self.asm.p66_rr(PCMPGTB, src, t);
        self.blend_by_scratch_mask(src, dest);
    }

    pub fn vector_min_signed16(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xEA, src, dest); // pminsw, baseline
    }

    pub fn vector_max_signed16(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xEE, src, dest); // pmaxsw, baseline
    }

    pub fn vector_min_signed32(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x39, src, dest); // pminsd
            return;
        }
        let t = self.fp_scratch();
        self.asm.movaps_rr(src, t);
        self.asm.p66_rr(PCMPGTD, dest, t);
        self.blend_by_scratch_mask(src, dest);
    }

    pub fn vector_max_signed32(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x3D, src, dest); // pmaxsd
            return;
        }
        let t = self.fp_scratch();
        self.asm.movaps_rr(dest, t);
        self.asm.p66_rr(PCMPGTD, src, t);
        self.blend_by_scratch_mask(src, dest);
    }

    pub fn vector_min_unsigned8(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xDA, src, dest); // pminub, baseline
    }

    pub fn vector_max_unsigned8(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(0xDE, src, dest); // pmaxub, baseline
    }

    pub fn vector_min_unsigned16(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x3A, src, dest); // pminuw
            return;
        }
        // min_u(a,b) = a - sat_sub_u(a,b)
        let t = self.fp_scratch();
        self.asm.movaps_rr(dest, t);
        self.asm.p66_rr(0xD9, src, t); // psubusw: t = sat(dest - src)
        self.asm.p66_rr(PSUBW, t, dest);
    }

    pub fn vector_max_unsigned16(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x3E, src, dest); // pmaxuw
            return;
        }
        // max_u(a,b) = b + sat_sub_u(a,b)
        let t = self.fp_scratch();
        self.asm.movaps_rr(dest, t);
        self.asm.p66_rr(0xD9, src, t);
        self.move_double(src, dest);
        self.asm.p66_rr(PADDW, t, dest);
    }

    /// Unsigned 32-bit min: bias both operands into signed range for the
    /// compare, then blend. Needs a driver temporary.
    pub fn vector_min_unsigned32(&mut self, src: FpReg, dest: FpReg, tmp: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x3B, src, dest); // pminud
            return;
        }
        let t = self.fp_scratch();
        debug_assert!(tmp != src && tmp != dest && tmp != t);
        self.splat32_pattern(i32::MIN, t);
        self.asm.movaps_rr(src, tmp);
        self.asm.p66_rr(PXOR, t, tmp); // tmp = src ^ bias
        self.asm.p66_rr(PXOR, t, dest); // dest biased
        self.asm.p66_rr(PCMPGTD, dest, tmp); // tmp = biased src > biased dest
        self.asm.p66_rr(PXOR, t, dest); // dest restored
        self.asm.movaps_rr(tmp, t); // mask into the scratch
        self.blend_by_scratch_mask(src, dest);
    }

    pub fn vector_max_unsigned32(&mut self, src: FpReg, dest: FpReg, tmp: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x3F, src, dest); // pmaxud
            return;
        }
        let t = self.fp_scratch();
        debug_assert!(tmp != src && tmp != dest && tmp != t);
        self.splat32_pattern(i32::MIN, t);
        self.asm.movaps_rr(src, tmp);
        self.asm.p66_rr(PXOR, t, tmp); // tmp = src ^ bias
        self.asm.p66_rr(PXOR, t, dest); // dest biased
        self.asm.p66_rr(PCMPGTD, dest, tmp); // tmp = lanes where src wins
        self.asm.p66_rr(PXOR, t, dest); // dest restored
        // dest = (src & mask) | (dest & ~mask)
        self.asm.movaps_rr(tmp, t);
        self.asm.p66_rr(PAND, src, t); // t = src & mask
        self.asm.p66_rr(PANDN, dest, tmp); // tmp = dest & ~mask
        self.asm.p66_rr(POR, t, tmp);
        self.asm.movaps_rr(tmp, dest);
    }

    // -- integer compares ----------------------------------------------------

    pub fn vector_compare_eq8(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PCMPEQB, src, dest);
    }

    pub fn vector_compare_eq16(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PCMPEQW, src, dest);
    }

    pub fn vector_compare_eq32(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PCMPEQD, src, dest);
    }

    pub fn vector_compare_eq64(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x29, src, dest); // pcmpeqq
            return;
        }
        // Compare dwords, then AND each half with its partner.
        let t = self.fp_scratch();
        self.asm.p66_rr(PCMPEQD, src, dest);
        self.asm.pshufd_rr(0xB1, dest, t); // swap dword pairs
        self.asm.p66_rr(PAND, t, dest);
    }

    pub fn vector_compare_gt_signed8(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PCMPGTB, src, dest);
    }

    pub fn vector_compare_gt_signed16(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PCMPGTW, src, dest);
    }

    pub fn vector_compare_gt_signed32(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PCMPGTD, src, dest);
    }

    /// 64-bit signed greater-than: SSE4.2 single instruction, SSE4.1 lane
    /// extraction, otherwise no viable fallback.
    pub fn vector_compare_gt_signed64(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_2 {
            self.asm.p66_38_rr(0x37, src, dest); // pcmpgtq
            return;
        }
        if !self.features().sse4_1 {
            panic!("vector 64-bit compare requires SSE4.1; check supports_vector_compare_int64()");
        }
        let scratch = self.scratch();
        let tmp_gpr = if scratch == Reg::R11 { Reg::R10 } else { Reg::R11 };
        self.push(tmp_gpr);
        for lane in 0..2u8 {
            self.asm.pextrq_rr(lane, dest, scratch);
            self.asm.pextrq_rr(lane, src, tmp_gpr);
            self.cmp64(scratch, tmp_gpr);
            self.asm.setcc_r(super::asm::Cc::G, scratch);
            self.asm.movzbl_rr(scratch, scratch);
            self.neg64(scratch); // 0 or all-ones
            self.asm.pinsrq_rr(lane, scratch, dest);
        }
        self.pop(tmp_gpr);
    }

    /// Lane inequality: equality compare followed by a full invert.
    pub fn vector_compare_ne32(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PCMPEQD, src, dest);
        let t = self.fp_scratch();
        self.asm.p66_rr(PCMPEQD, t, t); // all ones
        self.asm.p66_rr(PXOR, t, dest);
    }

    /// Float lane compares via the cmpps predicate immediates.
    pub fn vector_compare_eq_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cmpps_rr(0, src, dest);
    }

    pub fn vector_compare_lt_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cmpps_rr(1, src, dest);
    }

    pub fn vector_compare_le_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cmpps_rr(2, src, dest);
    }

    pub fn vector_compare_ne_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cmpps_rr(4, src, dest);
    }

    pub fn vector_compare_eq_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cmppd_rr(0, src, dest);
    }

    pub fn vector_compare_lt_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cmppd_rr(1, src, dest);
    }

    pub fn vector_compare_le_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cmppd_rr(2, src, dest);
    }

    pub fn vector_compare_ne_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cmppd_rr(4, src, dest);
    }

    // -- shifts --------------------------------------------------------------

    pub fn vector_lshift16_imm(&mut self, amount: u8, dest: FpReg) {
        self.asm.pshift_i8(0x71, 6, dest, amount & 15);
    }

    pub fn vector_lshift32_imm(&mut self, amount: u8, dest: FpReg) {
        self.asm.pshift_i8(0x72, 6, dest, amount & 31);
    }

    pub fn vector_lshift64_imm(&mut self, amount: u8, dest: FpReg) {
        self.asm.pshift_i8(0x73, 6, dest, amount & 63);
    }

    pub fn vector_urshift16_imm(&mut self, amount: u8, dest: FpReg) {
        self.asm.pshift_i8(0x71, 2, dest, amount & 15);
    }

    pub fn vector_urshift32_imm(&mut self, amount: u8, dest: FpReg) {
        self.asm.pshift_i8(0x72, 2, dest, amount & 31);
    }

    pub fn vector_urshift64_imm(&mut self, amount: u8, dest: FpReg) {
        self.asm.pshift_i8(0x73, 2, dest, amount & 63);
    }

    pub fn vector_rshift16_imm(&mut self, amount: u8, dest: FpReg) {
        self.asm.pshift_i8(0x71, 4, dest, amount & 15);
    }

    pub fn vector_rshift32_imm(&mut self, amount: u8, dest: FpReg) {
        self.asm.pshift_i8(0x72, 4, dest, amount & 31);
    }

    /// Arithmetic 64-bit right shift has no SSE encoding; synthesized from
    /// the logical shift and a shifted-in sign mask.
    pub fn vector_rshift64_imm(&mut self, amount: u8, dest: FpReg) {
        let amount = amount & 63;
        if amount == 0 {
            return;
        }
        let t = self.fp_scratch();
        self.asm.pshufd_rr(0xF5, dest, t); // high dwords duplicated
        self.asm.pshift_i8(0x72, 4, t, 31); // psrad 31: per-lane sign
        self.asm.pshift_i8(0x73, 2, dest, amount); // psrlq
        self.asm.pshift_i8(0x73, 6, t, 64 - amount); // psllq
        self.asm.p66_rr(POR, t, dest);
    }

    /// Byte shifts are synthesized from the word shift plus a lane mask.
    pub fn vector_lshift8_imm(&mut self, amount: u8, dest: FpReg) {
        let amount = amount & 7;
        if amount == 0 {
            return;
        }
        self.asm.pshift_i8(0x71, 6, dest, amount);
        let mask = (0xFFu32 << amount) & 0xFF;
        let t = self.fp_scratch();
        self.splat32_pattern((mask.wrapping_mul(0x0101_0101)) as i32, t);
        self.asm.p66_rr(PAND, t, dest);
    }

    pub fn vector_urshift8_imm(&mut self, amount: u8, dest: FpReg) {
        let amount = amount & 7;
        if amount == 0 {
            return;
        }
        self.asm.pshift_i8(0x71, 2, dest, amount);
        let mask = 0xFFu32 >> amount;
        let t = self.fp_scratch();
        self.splat32_pattern((mask.wrapping_mul(0x0101_0101)) as i32, t);
        self.asm.p66_rr(PAND, t, dest);
    }

    pub fn vector_rshift8_imm(&mut self, amount: u8, dest: FpReg) {
        let amount = amount & 7;
        let t = self.fp_scratch();
        // Widen each half to words, shift with sign, pack back.
        self.asm.movaps_rr(dest, t);
        self.asm.p66_rr(PUNPCKLBW, t, t);
        self.asm.p66_rr(PUNPCKHBW, dest, dest);
        self.asm.pshift_i8(0x71, 4, t, amount + 8);
        self.asm.pshift_i8(0x71, 4, dest, amount + 8);
        self.asm.p66_rr(PACKSSWB, dest, t);
        self.asm.movaps_rr(t, dest);
    }

    /// Shift all lanes by a scalar register count. The hardware consumes
    /// the full 64-bit count and zeroes the lanes when it exceeds the lane
    /// width, so the count is masked first, as the neutral semantics
    /// require.
    pub fn vector_lshift32(&mut self, amount: Reg, dest: FpReg) {
        let scratch = self.scratch();
        let t = self.fp_scratch();
        self.move32(amount, scratch);
        self.and32_imm(Imm32::new(31), scratch);
        self.asm.movd_r2fp(scratch, t);
        self.asm.pshift_rr(0xF2, t, dest); // pslld
    }

    pub fn vector_urshift32(&mut self, amount: Reg, dest: FpReg) {
        let scratch = self.scratch();
        let t = self.fp_scratch();
        self.move32(amount, scratch);
        self.and32_imm(Imm32::new(31), scratch);
        self.asm.movd_r2fp(scratch, t);
        self.asm.pshift_rr(0xD2, t, dest); // psrld
    }

    pub fn vector_rshift32(&mut self, amount: Reg, dest: FpReg) {
        let scratch = self.scratch();
        let t = self.fp_scratch();
        self.move32(amount, scratch);
        self.and32_imm(Imm32::new(31), scratch);
        self.asm.movd_r2fp(scratch, t);
        self.asm.pshift_rr(0xE2, t, dest); // psrad
    }

    pub fn vector_lshift64(&mut self, amount: Reg, dest: FpReg) {
        let scratch = self.scratch();
        let t = self.fp_scratch();
        self.move32(amount, scratch);
        self.and32_imm(Imm32::new(63), scratch);
        self.asm.movd_r2fp(scratch, t);
        self.asm.pshift_rr(0xF3, t, dest); // psllq
    }

    pub fn vector_urshift64(&mut self, amount: Reg, dest: FpReg) {
        let scratch = self.scratch();
        let t = self.fp_scratch();
        self.move32(amount, scratch);
        self.and32_imm(Imm32::new(63), scratch);
        self.asm.movd_r2fp(scratch, t);
        self.asm.pshift_rr(0xD3, t, dest); // psrlq
    }

    // -- lane extract / replace ---------------------------------------------

    pub fn vector_extract_lane8_unsigned(&mut self, lane: u8, src: FpReg, dest: Reg) {
        debug_assert!(lane < 16);
        if self.features().sse4_1 {
            self.asm.pextrb_rr(lane, src, dest);
            return;
        }
        self.asm.pextrw_rr(lane >> 1, src, dest);
        if lane & 1 != 0 {
            self.urshift32_imm(Imm32::new(8), dest);
        }
        self.and32_imm(Imm32::new(0xFF), dest);
    }

    pub fn vector_extract_lane8_signed(&mut self, lane: u8, src: FpReg, dest: Reg) {
        self.vector_extract_lane8_unsigned(lane, src, dest);
        self.sign_extend8_to_32(dest, dest);
    }

    pub fn vector_extract_lane16_unsigned(&mut self, lane: u8, src: FpReg, dest: Reg) {
        debug_assert!(lane < 8);
        self.asm.pextrw_rr(lane, src, dest);
    }

    pub fn vector_extract_lane16_signed(&mut self, lane: u8, src: FpReg, dest: Reg) {
        self.asm.pextrw_rr(lane, src, dest);
        self.sign_extend16_to_32(dest, dest);
    }

    pub fn vector_extract_lane32(&mut self, lane: u8, src: FpReg, dest: Reg) {
        debug_assert!(lane < 4);
        if self.features().sse4_1 {
            self.asm.pextrd_rr(lane, src, dest);
            return;
        }
        if lane == 0 {
            self.asm.movd_fp2r(src, dest);
            return;
        }
        let t = self.fp_scratch();
        let order = lane | (lane << 2) | (lane << 4) | (lane << 6);
        self.asm.pshufd_rr(order, src, t);
        self.asm.movd_fp2r(t, dest);
    }

    pub fn vector_extract_lane64(&mut self, lane: u8, src: FpReg, dest: Reg) {
        debug_assert!(lane < 2);
        if self.features().sse4_1 {
            self.asm.pextrq_rr(lane, src, dest);
            return;
        }
        if lane == 0 {
            self.asm.movq_fp2r(src, dest);
            return;
        }
        let t = self.fp_scratch();
        self.asm.pshufd_rr(0xEE, src, t); // high qword to both halves
        self.asm.movq_fp2r(t, dest);
    }

    pub fn vector_extract_lane_float(&mut self, lane: u8, src: FpReg, dest: FpReg) {
        debug_assert!(lane < 4);
        if lane == 0 {
            self.move_double(src, dest);
            return;
        }
        let order = lane | (lane << 2) | (lane << 4) | (lane << 6);
        self.asm.pshufd_rr(order, src, dest);
    }

    pub fn vector_extract_lane_double(&mut self, lane: u8, src: FpReg, dest: FpReg) {
        debug_assert!(lane < 2);
        if lane == 0 {
            self.move_double(src, dest);
        } else {
            self.asm.pshufd_rr(0xEE, src, dest);
        }
    }

    pub fn vector_replace_lane8(&mut self, lane: u8, src: Reg, dest: FpReg) {
        debug_assert!(lane < 16);
        if self.features().sse4_1 {
            self.asm.pinsrb_rr(lane, src, dest);
            return;
        }
        // Merge the byte into its containing word through a spare general
        // register, then reinsert the word.
        let scratch = self.scratch();
        let spare = if src == Reg::Rax { Reg::Rcx } else { Reg::Rax };
        self.push(spare);
        self.asm.pextrw_rr(lane >> 1, dest, scratch);
        self.zero_extend8_to_32(src, spare);
        if lane & 1 == 0 {
            self.and32_imm(Imm32::new(0xFF00u32 as i32), scratch);
        } else {
            self.and32_imm(Imm32::new(0x00FF), scratch);
            self.lshift32_imm(Imm32::new(8), spare);
        }
        self.or32(spare, scratch);
        self.asm.pinsrw_rr(lane >> 1, scratch, dest);
        self.pop(spare);
    }

    pub fn vector_replace_lane16(&mut self, lane: u8, src: Reg, dest: FpReg) {
        debug_assert!(lane < 8);
        self.asm.pinsrw_rr(lane, src, dest);
    }

    pub fn vector_replace_lane32(&mut self, lane: u8, src: Reg, dest: FpReg) {
        debug_assert!(lane < 4);
        if self.features().sse4_1 {
            self.asm.pinsrd_rr(lane, src, dest);
            return;
        }
        // Two word inserts cover one dword lane.
        let scratch = self.scratch();
        self.asm.pinsrw_rr(lane * 2, src, dest);
        self.move32(src, scratch);
        self.urshift32_imm(Imm32::new(16), scratch);
        self.asm.pinsrw_rr(lane * 2 + 1, scratch, dest);
    }

    pub fn vector_replace_lane64(&mut self, lane: u8, src: Reg, dest: FpReg) {
        debug_assert!(lane < 2);
        if self.features().sse4_1 {
            self.asm.pinsrq_rr(lane, src, dest);
            return;
        }
        let t = self.fp_scratch();
        self.asm.movq_r2fp(src, t);
        if lane == 0 {
            self.asm.movsd_rr(t, dest); // merges the low qword only
        } else {
            self.asm.shufpd_rr(0x0, t, dest); // keep low, take t's low as high
        }
    }

    // -- bitwise -------------------------------------------------------------

    pub fn vector_and(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PAND, src, dest);
    }

    pub fn vector_or(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(POR, src, dest);
    }

    pub fn vector_xor(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PXOR, src, dest);
    }

    pub fn vector_not(&mut self, dest: FpReg) {
        let t = self.fp_scratch();
        self.asm.p66_rr(PCMPEQD, t, t); // all ones
        self.asm.p66_rr(PXOR, t, dest);
    }

    /// `dest = (NOT dest) AND src` — the raw pandn shape.
    pub fn vector_and_not(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PANDN, src, dest);
    }

    /// `mask_and_dest = (then_case & mask) | (else_case & ~mask)`. Always
    /// the and/andn/or sequence: the variable-blend instruction pins its
    /// mask to a fixed register the driver may be using.
    pub fn vector_bitselect(&mut self, then_case: FpReg, else_case: FpReg, mask_and_dest: FpReg) {
        let t = self.fp_scratch();
        self.asm.movaps_rr(mask_and_dest, t);
        self.asm.p66_rr(PAND, then_case, t); // t = then & mask
        self.asm.p66_rr(PANDN, else_case, mask_and_dest); // dest = ~mask & else
        self.asm.p66_rr(POR, t, mask_and_dest);
    }

    /// Materialize "any lane bit set" as a 0/1 boolean.
    pub fn vector_any_true(&mut self, src: FpReg, dest: Reg) {
        if self.features().sse4_1 {
            self.asm.ptest_rr(src, src);
            self.asm.setcc_r(super::asm::Cc::NE, dest);
            self.asm.movzbl_rr(dest, dest);
            return;
        }
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t); // zero
        self.asm.p66_rr(PCMPEQB, src, t); // t = bytes equal to zero
        self.asm.pmovmskb_rr(t, dest);
        self.xor32_imm(Imm32::new(0xFFFF), dest);
        self.asm.setcc_r(super::asm::Cc::NE, dest);
        self.asm.movzbl_rr(dest, dest);
    }

    /// Materialize "every lane non-zero" for 8-bit lanes.
    pub fn vector_all_true8(&mut self, src: FpReg, dest: Reg) {
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t);
        self.asm.p66_rr(PCMPEQB, src, t); // t = lanes that are zero
        self.asm.pmovmskb_rr(t, dest);
        self.test32(
            crate::masm::ResultCondition::Zero,
            dest,
            Imm32::new(-1),
            dest,
        );
    }

    pub fn vector_all_true16(&mut self, src: FpReg, dest: Reg) {
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t);
        self.asm.p66_rr(PCMPEQW, src, t);
        self.asm.pmovmskb_rr(t, dest);
        self.test32(
            crate::masm::ResultCondition::Zero,
            dest,
            Imm32::new(-1),
            dest,
        );
    }

    pub fn vector_all_true32(&mut self, src: FpReg, dest: Reg) {
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t);
        self.asm.p66_rr(PCMPEQD, src, t);
        self.asm.pmovmskb_rr(t, dest);
        self.test32(
            crate::masm::ResultCondition::Zero,
            dest,
            Imm32::new(-1),
            dest,
        );
    }

    /// One bit per byte lane, from the lane sign bits.
    pub fn vector_bitmask8(&mut self, src: FpReg, dest: Reg) {
        self.asm.pmovmskb_rr(src, dest);
    }

    pub fn vector_bitmask32(&mut self, src: FpReg, dest: Reg) {
        self.asm.movmskps_rr(src, dest);
    }

    pub fn vector_bitmask64(&mut self, src: FpReg, dest: Reg) {
        self.asm.movmskpd_rr(src, dest);
    }

    // -- widening / narrowing -----------------------------------------------

    pub fn vector_extend_low_signed8to16(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x20, src, dest); // pmovsxbw
            return;
        }
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKLBW, dest, dest);
        self.asm.pshift_i8(0x71, 4, dest, 8); // psraw 8
    }

    pub fn vector_extend_high_signed8to16(&mut self, src: FpReg, dest: FpReg) {
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKHBW, dest, dest);
        self.asm.pshift_i8(0x71, 4, dest, 8);
    }

    pub fn vector_extend_low_unsigned8to16(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x30, src, dest); // pmovzxbw
            return;
        }
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t);
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKLBW, t, dest);
    }

    pub fn vector_extend_high_unsigned8to16(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t);
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKHBW, t, dest);
    }

    pub fn vector_extend_low_signed16to32(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x23, src, dest); // pmovsxwd
            return;
        }
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKLWD, dest, dest);
        self.asm.pshift_i8(0x72, 4, dest, 16); // psrad 16
    }

    pub fn vector_extend_high_signed16to32(&mut self, src: FpReg, dest: FpReg) {
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKHWD, dest, dest);
        self.asm.pshift_i8(0x72, 4, dest, 16);
    }

    pub fn vector_extend_low_unsigned16to32(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x33, src, dest); // pmovzxwd
            return;
        }
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t);
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKLWD, t, dest);
    }

    pub fn vector_extend_low_signed32to64(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x25, src, dest); // pmovsxdq
            return;
        }
        let t = self.fp_scratch();
        self.asm.movaps_rr(src, t);
        self.asm.pshift_i8(0x72, 4, t, 31); // sign dwords
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKLDQ, t, dest);
    }

    pub fn vector_extend_high_signed32to64(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        self.asm.movaps_rr(src, t);
        self.asm.pshift_i8(0x72, 4, t, 31);
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKHDQ, t, dest);
    }

    pub fn vector_extend_low_unsigned32to64(&mut self, src: FpReg, dest: FpReg) {
        if self.features().sse4_1 {
            self.asm.p66_38_rr(0x35, src, dest); // pmovzxdq
            return;
        }
        let t = self.fp_scratch();
        self.asm.pnone_rr(0x57, t, t);
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKLDQ, t, dest);
    }

    /// Narrow word lanes to bytes with signed saturation; `dest` supplies
    /// the low eight lanes, `src` the high eight.
    pub fn vector_narrow_signed16to8_sat(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PACKSSWB, src, dest);
    }

    pub fn vector_narrow_signed16to8_sat_unsigned(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PACKUSWB, src, dest);
    }

    pub fn vector_narrow_signed32to16_sat(&mut self, src: FpReg, dest: FpReg) {
        self.asm.p66_rr(PACKSSDW, src, dest);
    }

    /// Unsigned 32→16 narrowing saturation is SSE4.1-only; there is no
    /// reasonable SSE2 fallback that preserves the unsigned clamp.
    pub fn vector_narrow_signed32to16_sat_unsigned(&mut self, src: FpReg, dest: FpReg) {
        if !self.features().sse4_1 {
            panic!("packusdw requires SSE4.1; check supports_vector_ops_fast_paths() before emitting");
        }
        self.asm.p66_38_rr(0x2B, src, dest);
    }

    // -- int/float conversions ----------------------------------------------

    pub fn vector_convert_int32_to_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cvtdq2ps_rr(src, dest);
    }

    /// Unsigned 32-bit lanes to float: split into halves that each convert
    /// exactly, then recombine. Needs a driver temporary.
    pub fn vector_convert_uint32_to_float(&mut self, src: FpReg, dest: FpReg, tmp: FpReg) {
        let t = self.fp_scratch();
        debug_assert!(tmp != src && tmp != dest && tmp != t);
        self.asm.movaps_rr(src, tmp);
        self.asm.pshift_i8(0x72, 2, tmp, 16); // psrld 16: high halves
        self.asm.cvtdq2ps_rr(tmp, tmp);
        self.splat32_pattern(0x4780_0000, t); // 65536.0f
        self.asm.pnone_rr(0x59, t, tmp); // mulps
        // low halves; works in place when src == dest.
        self.splat32_pattern(0xFFFF, t);
        self.move_double(src, dest);
        self.asm.p66_rr(PAND, t, dest);
        self.asm.cvtdq2ps_rr(dest, dest);
        self.asm.pnone_rr(0x58, tmp, dest); // addps
    }

    pub fn vector_convert_low_int32_to_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cvtdq2pd_rr(src, dest);
    }

    /// Unsigned low 32-bit lanes to double via the 2^52 mantissa trick.
    pub fn vector_convert_low_uint32_to_double(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        // Pair each value with the 2^52 exponent pattern, then subtract
        // 2^52: the mantissa holds the integer exactly.
        self.splat32_pattern(0x4330_0000, t);
        self.move_double(src, dest);
        self.asm.p66_rr(PUNPCKLDQ, t, dest); // [v0, hi, v1, hi]
        self.splat64_pattern(0x4330_0000_0000_0000, t);
        self.asm.p66_rr(0x5C, t, dest); // subpd
    }

    pub fn vector_convert_low_float_to_double(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cvtps2pd_rr(src, dest);
    }

    pub fn vector_convert_double_to_float(&mut self, src: FpReg, dest: FpReg) {
        self.asm.cvtpd2ps_rr(src, dest);
    }

    // -- saturating truncation (the four-step synthesis) ---------------------
    //
    // Each (source width, signedness) pair follows the same structure:
    //   (a) neutralize NaN lanes before the native conversion,
    //   (b) detect positive overflow against the boundary constant,
    //   (c) run the native, NaN/overflow-undefined conversion,
    //   (d) merge the boundary value into the overflowing lanes.

    /// f32x4 → i32x4, saturating. NaN → 0, ±overflow → INT32_MIN/MAX.
    pub fn vector_trunc_sat_float_to_int32(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        // (a) NaN lanes to zero: mask of ordered lanes, AND through.
        self.asm.movaps_rr(src, t);
        self.asm.cmpps_rr(0, src, t); // t = (src == src)
        self.move_double(src, dest);
        self.asm.pnone_rr(0x54, t, dest); // andps
        // (b) positive-overflow mask: lanes >= 2^31.
        self.splat32_pattern(0x4F00_0000, t); // 2^31 as float
        self.asm.cmpps_rr(2, dest, t); // t = (2^31 <= value)
        // (c) native conversion; overflow lanes produce INT32_MIN.
        self.asm.cvttps2dq_rr(dest, dest);
        // (d) flip overflowing lanes from INT32_MIN to INT32_MAX.
        self.asm.p66_rr(PXOR, t, dest);
    }

    /// f32x4 → u32x4, saturating. NaN and negatives → 0, overflow →
    /// u32::MAX. Needs a driver temporary beyond the scratch.
    pub fn vector_trunc_sat_float_to_uint32(&mut self, src: FpReg, dest: FpReg, tmp: FpReg) {
        let t = self.fp_scratch();
        debug_assert!(tmp != src && tmp != dest && tmp != t);
        // (a) NaN and negative lanes to zero via max(x, 0).
        self.asm.pnone_rr(0x57, t, t); // zeros
        self.move_double(src, dest);
        self.asm.pnone_rr(0x5F, t, dest); // maxps: NaN → second operand = 0
        // (b) boundary 2^31, built without a constant pool: all-ones >> 1
        // is INT32_MAX whose float conversion is exactly 2^31.
        self.asm.p66_rr(PCMPEQD, t, t);
        self.asm.pshift_i8(0x72, 2, t, 1); // psrld 1 → 0x7FFFFFFF
        self.asm.cvtdq2ps_rr(t, t); // 2^31f
        // Split: tmp = value - 2^31 (negative where value < 2^31).
        self.asm.movaps_rr(dest, tmp);
        self.asm.pnone_rr(0x5C, t, tmp); // subps
        // t = mask of lanes >= 2^32 (tmp >= 2^31).
        self.asm.cmpps_rr(2, tmp, t); // t = (2^31 <= tmp)
        // (c) native conversions of both halves.
        self.asm.cvttps2dq_rr(tmp, tmp); // high half; sentinel where >= 2^32
        self.asm.p66_rr(PXOR, t, tmp); // sentinel ^ ones = INT32_MAX there
        // clamp the (negative) below-2^31 lanes of the high half to zero
        self.asm.movaps_rr(tmp, t);
        self.asm.pshift_i8(0x72, 4, t, 31); // psrad 31: sign mask
        self.asm.p66_rr(PANDN, tmp, t); // t = tmp where positive else 0
        self.asm.cvttps2dq_rr(dest, dest); // low half; sentinel where >= 2^31
        // (d) combine: sentinel (0x80000000 = 2^31 unsigned) + excess.
        self.asm.p66_rr(PADDD, t, dest);
    }

    /// f64x2 → i32x4 (low lanes), saturating; upper lanes zeroed.
    pub fn vector_trunc_sat_double_to_int32_zero(&mut self, src: FpReg, dest: FpReg) {
        let t = self.fp_scratch();
        // (a) NaN lanes to zero.
        self.asm.movaps_rr(src, t);
        self.asm.cmppd_rr(0, src, t); // ordered mask
        self.move_double(src, dest);
        self.asm.p66_rr(0x54, t, dest); // andpd
        // (b) clamp the positive side to INT32_MAX (exactly representable),
        // which makes step (d) unnecessary on this path: negative overflow
        // already converts to the INT32_MIN sentinel.
        self.splat64_pattern(0x41DF_FFFF_FFC0_0000, t); // 2147483647.0
        self.asm.p66_rr(0x5D, t, dest); // minpd
        // (c) convert; zeroes the upper two lanes by definition.
        self.asm.cvttpd2dq_rr(dest, dest);
    }

    /// f64x2 → u32x4 (low lanes), saturating; upper lanes zeroed.
    /// SSE4.1-gated: the truncation step needs the directed-rounding
    /// instruction.
    pub fn vector_trunc_sat_double_to_uint32_zero(&mut self, src: FpReg, dest: FpReg) {
        if !self.features().sse4_1 {
            panic!("f64→u32 saturating vector truncation requires SSE4.1; check supports_vector_ops_fast_paths()");
        }
        let t = self.fp_scratch();
        // (a) NaN and negatives to zero.
        self.asm.pnone_rr(0x57, t, t);
        self.move_double(src, dest);
        self.asm.p66_rr(0x5F, t, dest); // maxpd
        // (b) clamp above to u32::MAX (exactly representable as double).
        self.splat64_pattern(0x41EF_FFFF_FFE0_0000, t); // 4294967295.0
        self.asm.p66_rr(0x5D, t, dest); // minpd
        // (c) truncate to integers, then add 2^52 so the value lands in
        // the low mantissa bits.
        self.asm.p66_3a_rr_i8(0x09, dest, dest, 0x3 | 0x8); // roundpd trunc
        self.splat64_pattern(0x4330_0000_0000_0000, t); // 2^52
        self.asm.p66_rr(0x58, t, dest); // addpd
        // (d) compact the low dwords of both lanes and zero the rest.
        self.asm.pnone_rr(0x57, t, t);
        self.asm.shufps_rr(0x08, t, dest); // [lo0, lo1, 0, 0]
    }

    // -- horizontal reduction -------------------------------------------------

    /// Sum all four 32-bit lanes into a general register.
    pub fn vector_horizontal_add32(&mut self, src: FpReg, dest: Reg, tmp: FpReg) {
        let t = self.fp_scratch();
        debug_assert!(tmp != src && tmp != t);
        self.asm.pshufd_rr(0x4E, src, tmp); // swap 64-bit halves
        self.asm.p66_rr(PADDD, src, tmp); // pairwise
        self.asm.pshufd_rr(0xB1, tmp, t); // swap dword pairs
        self.asm.p66_rr(PADDD, tmp, t); // total in every lane
        self.asm.movd_fp2r(t, dest);
    }
}
