//! Group 2 shift/rotate family (C8): C0/C1/D0/D1/D2/D3. `spec.md` §4.6.

use super::{read_rm, write_rm};
use crate::bus::LinearBus;
use crate::decode::{self, decode_modrm};
use crate::error::Exception;
use crate::flags::{logic_flags, Eflags};
use crate::gpr::idx;
use crate::state::CpuState;
use i686_mmu::MemoryBus;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Op {
    Rol,
    Ror,
    Rcl,
    Rcr,
    Shl,
    Shr,
    Sar,
}

fn op_for_reg(reg: u8) -> Op {
    match reg {
        0 => Op::Rol,
        1 => Op::Ror,
        2 => Op::Rcl,
        3 => Op::Rcr,
        5 => Op::Shr,
        7 => Op::Sar,
        // reg=6 (SAL) is an undocumented alias for SHL.
        _ => Op::Shl,
    }
}

pub fn exec<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    opcode: u8,
) -> Result<(), Exception> {
    let width = if matches!(opcode, 0xC0 | 0xD0 | 0xD2) {
        8
    } else {
        decode::operand_size(state)
    };

    let m = decode_modrm(state, bus)?;
    let op = op_for_reg(m.reg);

    // Count masked to 5 bits per `spec.md` §4.6.
    let count: u32 = match opcode {
        0xC0 | 0xC1 => (decode::fetch_u8(state, bus)? as u32) & 0x1F,
        0xD0 | 0xD1 => 1,
        _ => (state.gpr.read8(idx::ECX) as u32) & 0x1F,
    };

    if count == 0 {
        return Ok(());
    }

    let val = read_rm(state, bus, &m, width)?;
    let cf_in = state.eflags.contains(Eflags::CF);
    let (result, cf, of_if_one) = apply(op, val, count, width, cf_in);

    state.eflags.set(Eflags::CF, cf);
    // OF is architecturally undefined for count != 1; we simply leave it
    // alone in that case rather than synthesize a value.
    if count == 1 {
        state.eflags.set(Eflags::OF, of_if_one);
    }
    if matches!(op, Op::Shl | Op::Shr | Op::Sar) {
        let f = logic_flags(result, width);
        state.eflags.set(Eflags::ZF, f.contains(Eflags::ZF));
        state.eflags.set(Eflags::SF, f.contains(Eflags::SF));
        state.eflags.set(Eflags::PF, f.contains(Eflags::PF));
    }

    write_rm(state, bus, &m, width, result)?;
    Ok(())
}

fn mask_for(width: u32) -> u32 {
    if width == 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

/// Returns (result, new CF, OF-if-count-was-1). OF is only meaningful when
/// count==1; the caller only applies it in that case. `cf_in` is the
/// incoming EFLAGS.CF, the bit RCL/RCR rotate through (the only two ops
/// here that consult it).
fn apply(op: Op, val: u32, count: u32, width: u32, cf_in: bool) -> (u32, bool, bool) {
    let mask = mask_for(width);
    let v = val & mask;
    let top_bit = 1u32 << (width - 1);

    match op {
        Op::Shl => {
            let shifted = (v as u64) << count.min(width + 1);
            let result = (shifted as u32) & mask;
            let cf = count <= width && (shifted & (1u64 << width)) != 0;
            // OF for count==1: top two bits of the result differ.
            let of = ((result & top_bit) != 0) ^ ((result & (top_bit >> 1).max(1)) != 0);
            (result, cf, of)
        }
        Op::Shr => {
            let cf = count > 0 && (v >> (count - 1).min(width - 1)) & 1 != 0;
            let result = if count >= width { 0 } else { v >> count };
            let of = (v & top_bit) != 0; // OF for count==1: original sign bit.
            (result, cf, of)
        }
        Op::Sar => {
            let signed = sign_extend(v, width);
            let shift_amt = count.min(width - 1);
            let cf = count > 0 && (signed >> (count - 1).min(width - 1)) & 1 != 0;
            let shifted = signed >> shift_amt;
            let result = (shifted as u32) & mask;
            (result, cf, false)
        }
        Op::Rol => {
            let n = count % width;
            let result = if n == 0 {
                v
            } else {
                ((v << n) | (v >> (width - n))) & mask
            };
            let cf = result & 1 != 0;
            let of = (result & top_bit != 0) != cf;
            (result, cf, of)
        }
        Op::Ror => {
            let n = count % width;
            let result = if n == 0 {
                v
            } else {
                ((v >> n) | (v << (width - n))) & mask
            };
            let cf = result & top_bit != 0;
            let second_bit = (result & (top_bit >> 1)) != 0;
            let of = cf != second_bit;
            (result, cf, of)
        }
        Op::Rcl => rcl(v, count, width, cf_in),
        Op::Rcr => rcr(v, count, width, cf_in),
    }
}

fn sign_extend(v: u32, width: u32) -> i64 {
    let shift = 64 - width;
    ((v as i64) << shift) >> shift
}

fn rcl(v: u32, count: u32, width: u32, cf_in: bool) -> (u32, bool, bool) {
    let mask = mask_for(width);
    let n = count % (width + 1);
    let mut cf = cf_in as u64;
    let mut wide = v as u64;
    for _ in 0..n {
        let top = (wide >> (width - 1)) & 1;
        wide = ((wide << 1) | cf) & mask as u64;
        cf = top;
    }
    let result = wide as u32;
    let of = ((result & top_bit(width)) != 0) ^ (cf != 0);
    (result, cf != 0, of)
}

fn rcr(v: u32, count: u32, width: u32, cf_in: bool) -> (u32, bool, bool) {
    let mask = mask_for(width);
    let n = count % (width + 1);
    let mut cf = cf_in as u64;
    let mut prev_cf = cf;
    let mut wide = v as u64;
    for _ in 0..n {
        prev_cf = cf;
        let bottom = wide & 1;
        wide = (wide >> 1) | (cf << (width - 1));
        cf = bottom;
    }
    let result = (wide as u32) & mask;
    let of = if n == 1 {
        ((result & top_bit(width)) != 0) != (prev_cf != 0)
    } else {
        false
    };
    (result, cf != 0, of)
}

fn top_bit(width: u32) -> u32 {
    1u32 << (width - 1)
}
