//! Flag engine (C2): width-specialized primitives computing CF/PF/AF/ZF/SF/OF
//! from arithmetic/logical/shift results. Always computes in a wider integer
//! and derives CF/OF from that, per `spec.md` §9's design note; never relies
//! on host integer-overflow UB.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Eflags: u32 {
        const CF      = 1 << 0;
        const RESERVED1 = 1 << 1;
        const PF      = 1 << 2;
        const AF      = 1 << 4;
        const ZF      = 1 << 6;
        const SF      = 1 << 7;
        const TF      = 1 << 8;
        const IF      = 1 << 9;
        const DF      = 1 << 10;
        const OF      = 1 << 11;
        const IOPL0   = 1 << 12;
        const IOPL1   = 1 << 13;
        const NT      = 1 << 14;
        const RF      = 1 << 16;
        const VM      = 1 << 17;
        const AC      = 1 << 18;
        const VIF     = 1 << 19;
        const VIP     = 1 << 20;
        const ID      = 1 << 21;
    }
}

/// Bits POPF/IRET are architecturally required to leave alone (reserved
/// bits that must round-trip, plus bit 1 which is always forced set).
pub const EFLAGS_FIXED_ONE: u32 = 1 << 1;
pub const EFLAGS_IOPL_MASK: u32 = 0x3000;

impl Eflags {
    pub fn reset() -> Self {
        Eflags::from_bits_truncate(EFLAGS_FIXED_ONE)
    }

    /// Force bit 1 set, as required on every serialization of EFLAGS.
    pub fn normalized(self) -> Self {
        Eflags::from_bits_truncate(self.bits() | EFLAGS_FIXED_ONE)
    }

    pub fn iopl(&self) -> u8 {
        ((self.bits() & EFLAGS_IOPL_MASK) >> 12) as u8
    }
}

fn parity_even(low_byte: u8) -> bool {
    low_byte.count_ones() % 2 == 0
}

/// Common tail: given the truncated result, carry and overflow, assemble
/// the ZF/SF/PF/CF/OF quintet. AF is left untouched by the caller (callers
/// that need AF compute and OR it in themselves, since not every consumer
/// of these helpers wants it clobbered).
fn finish(result: u64, width: u32, carry: bool, overflow: bool) -> Eflags {
    let mask = if width == 32 {
        u32::MAX as u64
    } else {
        (1u64 << width) - 1
    };
    let trunc = result & mask;
    let sign_bit = 1u64 << (width - 1);
    let mut f = Eflags::empty();
    if trunc == 0 {
        f |= Eflags::ZF;
    }
    if trunc & sign_bit != 0 {
        f |= Eflags::SF;
    }
    if parity_even(trunc as u8) {
        f |= Eflags::PF;
    }
    if carry {
        f |= Eflags::CF;
    }
    if overflow {
        f |= Eflags::OF;
    }
    f
}

fn af_add(a: u32, b: u32) -> bool {
    ((a & 0xF) + (b & 0xF)) & 0x10 != 0
}

fn af_sub(a: u32, b: u32) -> bool {
    (a & 0xF) < (b & 0xF)
}

/// `result = a + b` (ignoring any incoming carry; ADC folds that in before
/// calling this with `b' = b + cf`, which is what the executor does).
pub fn add_flags(a: u32, b: u32, width: u32) -> (u32, Eflags) {
    let wide = a as u64 + b as u64;
    let mask: u64 = if width == 32 {
        u32::MAX as u64
    } else {
        (1u64 << width) - 1
    };
    let result = (wide & mask) as u32;
    let carry = wide > mask;
    let sign_shift = width - 1;
    let a_s = (a as u64) & mask;
    let b_s = (b as u64) & mask;
    let r_s = wide & mask;
    let overflow = (((a_s ^ r_s) & (b_s ^ r_s)) >> sign_shift) & 1 != 0;
    let mut flags = finish(wide, width, carry, overflow);
    if af_add(a, b) {
        flags |= Eflags::AF;
    }
    (result, flags)
}

/// `result = a - b`.
pub fn sub_flags(a: u32, b: u32, width: u32) -> (u32, Eflags) {
    let mask: u64 = if width == 32 {
        u32::MAX as u64
    } else {
        (1u64 << width) - 1
    };
    let wide = (a as i64) - (b as i64);
    let result = (wide & mask as i64) as u32;
    let sign_shift = width - 1;
    let a_s = (a as u64) & mask;
    let b_s = (b as u64) & mask;
    let carry = a_s < b_s;
    let r_s = (result as u64) & mask;
    let overflow = (((a_s ^ b_s) & (a_s ^ r_s)) >> sign_shift) & 1 != 0;
    let mut flags = finish(result as u64, width, carry, overflow);
    if af_sub(a, b) {
        flags |= Eflags::AF;
    }
    (result, flags)
}

/// AND/OR/XOR/TEST: CF=OF=0, AF undefined (left clear), ZF/SF/PF from result.
pub fn logic_flags(result: u32, width: u32) -> Eflags {
    finish(result as u64, width, false, false)
}

/// INC: like ADD by 1 but CF is preserved by the caller (not touched here).
pub fn inc_flags(a: u32, width: u32) -> (u32, Eflags) {
    let (result, flags) = add_flags(a, 1, width);
    (result, flags & !Eflags::CF)
}

/// DEC: like SUB by 1 but CF is preserved by the caller.
pub fn dec_flags(a: u32, width: u32) -> (u32, Eflags) {
    let (result, flags) = sub_flags(a, 1, width);
    (result, flags & !Eflags::CF)
}

/// ADC: `result = a + b + cf_in`, with CF/OF derived from the full
/// three-term addition rather than composed from two separate `add_flags`
/// calls (which would mis-handle `b + cf_in` itself overflowing the width).
pub fn adc_flags(a: u32, b: u32, cf_in: bool, width: u32) -> (u32, Eflags) {
    let mask: u64 = if width == 32 {
        u32::MAX as u64
    } else {
        (1u64 << width) - 1
    };
    let wide = a as u64 + b as u64 + cf_in as u64;
    let result = (wide & mask) as u32;
    let carry = wide > mask;
    let sign_shift = width - 1;
    let a_s = (a as u64) & mask;
    let b_s = (b as u64) & mask;
    let r_s = wide & mask;
    let overflow = (((a_s ^ r_s) & (b_s ^ r_s)) >> sign_shift) & 1 != 0;
    let mut flags = finish(wide, width, carry, overflow);
    if ((a & 0xF) + (b & 0xF) + cf_in as u32) & 0x10 != 0 {
        flags |= Eflags::AF;
    }
    (result, flags)
}

/// SBB: `result = a - b - cf_in`.
pub fn sbb_flags(a: u32, b: u32, cf_in: bool, width: u32) -> (u32, Eflags) {
    let mask: u64 = if width == 32 {
        u32::MAX as u64
    } else {
        (1u64 << width) - 1
    };
    let wide = (a as i64) - (b as i64) - (cf_in as i64);
    let result = (wide & mask as i64) as u32;
    let sign_shift = width - 1;
    let a_s = (a as u64) & mask;
    let b_s = (b as u64) & mask;
    let r_s = (result as u64) & mask;
    let carry = a_s < b_s + cf_in as u64;
    let overflow = (((a_s ^ b_s) & (a_s ^ r_s)) >> sign_shift) & 1 != 0;
    let mut flags = finish(result as u64, width, carry, overflow);
    if (a & 0xF) < (b & 0xF) + cf_in as u32 {
        flags |= Eflags::AF;
    }
    (result, flags)
}

/// NEG: CF = (operand != 0); OF = (operand == min-signed for this width).
pub fn neg_flags(a: u32, width: u32) -> (u32, Eflags) {
    let (result, mut flags) = sub_flags(0, a, width);
    flags.set(Eflags::CF, a != 0);
    let min_signed = 1u32 << (width - 1);
    flags.set(Eflags::OF, a == min_signed);
    (result, flags)
}
