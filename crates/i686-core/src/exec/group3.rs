//! Group 3 unary family (C8): F6/F7 — TEST, NOT, NEG, MUL, IMUL, DIV, IDIV.
//! `spec.md` §4.6.

use super::{read_reg_index, read_rm, write_reg_index, write_rm};
use crate::bus::LinearBus;
use crate::decode::{self, decode_modrm};
use crate::error::Exception;
use crate::flags::{logic_flags, neg_flags, Eflags};
use crate::gpr::idx;
use crate::state::CpuState;
use i686_mmu::MemoryBus;

pub fn exec<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    opcode: u8,
) -> Result<(), Exception> {
    let width = if opcode == 0xF6 {
        8
    } else {
        decode::operand_size(state)
    };
    let m = decode_modrm(state, bus)?;

    match m.reg {
        0 | 1 => {
            // TEST r/m, imm
            let imm = if width == 8 {
                decode::fetch_u8(state, bus)? as u32
            } else if width == 16 {
                decode::fetch_u16(state, bus)? as u32
            } else {
                decode::fetch_u32(state, bus)?
            };
            let val = read_rm(state, bus, &m, width)?;
            let f = logic_flags(val & imm, width);
            apply_logic(state, f);
            Ok(())
        }
        2 => {
            // NOT: flags unaffected.
            let val = read_rm(state, bus, &m, width)?;
            let mask = mask_for(width);
            write_rm(state, bus, &m, width, (!val) & mask)?;
            Ok(())
        }
        3 => {
            // NEG
            let val = read_rm(state, bus, &m, width)?;
            let (result, f) = neg_flags(val, width);
            apply_arith(state, f);
            write_rm(state, bus, &m, width, result)?;
            Ok(())
        }
        4 => mul(state, bus, &m, width),
        5 => imul(state, bus, &m, width),
        6 => div(state, bus, &m, width),
        _ => idiv(state, bus, &m, width),
    }
}

fn mask_for(width: u32) -> u32 {
    if width == 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

fn apply_logic(state: &mut CpuState, f: Eflags) {
    state.eflags = (state.eflags & !Eflags::from_bits_truncate(0x8D5)) | (f & Eflags::from_bits_truncate(0x8D5));
}

fn apply_arith(state: &mut CpuState, f: Eflags) {
    state.eflags = (state.eflags & !Eflags::from_bits_truncate(0x8D5)) | (f & Eflags::from_bits_truncate(0x8D5));
}

/// Unsigned multiply: result into (DX:AX), (EDX:EAX) or (AH:AL) depending on
/// width. CF/OF set when the upper half is nonzero.
fn mul<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    m: &crate::decode::ModRm,
    width: u32,
) -> Result<(), Exception> {
    let src = read_rm(state, bus, m, width)? as u64;
    let a = read_reg_index(state, idx::EAX, width) as u64;
    let product = a * src;
    let mask = mask_for(width) as u64;
    let lo = (product & mask) as u32;
    let hi = ((product >> width) & mask) as u32;
    write_reg_index(state, idx::EAX, width, lo);
    store_high_half(state, width, hi);
    let overflow = hi != 0;
    state.eflags.set(Eflags::CF, overflow);
    state.eflags.set(Eflags::OF, overflow);
    Ok(())
}

/// Signed multiply, Group 3 one-operand form (reg field == 5).
fn imul<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    m: &crate::decode::ModRm,
    width: u32,
) -> Result<(), Exception> {
    let src = sign_extend(read_rm(state, bus, m, width)?, width);
    let a = sign_extend(read_reg_index(state, idx::EAX, width), width);
    let product = a * src;
    let mask = mask_for(width) as i64;
    let lo = (product & mask) as u32;
    let hi = ((product >> width) & mask) as u32;
    write_reg_index(state, idx::EAX, width, lo);
    store_high_half(state, width, hi);
    let lo_sign_extended = sign_extend(lo, width);
    let overflow = product != lo_sign_extended;
    state.eflags.set(Eflags::CF, overflow);
    state.eflags.set(Eflags::OF, overflow);
    Ok(())
}

fn sign_extend(v: u32, width: u32) -> i64 {
    let shift = 64 - width;
    (((v as i64) << shift) >> shift) as i64
}

fn store_high_half(state: &mut CpuState, width: u32, hi: u32) {
    match width {
        8 => state.gpr.write8(idx::EAX + 4, hi as u8), // AH, per the ModR/M 8-bit field convention
        16 => state.gpr.write16(idx::EDX, hi),
        _ => state.gpr.write32(idx::EDX, hi),
    }
}

fn div<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    m: &crate::decode::ModRm,
    width: u32,
) -> Result<(), Exception> {
    let divisor = read_rm(state, bus, m, width)? as u64;
    if divisor == 0 {
        return Err(Exception::DivideError);
    }
    let dividend = dividend_for(state, width);
    let quotient = dividend / divisor;
    let remainder = dividend % divisor;
    if quotient > mask_for(width) as u64 {
        return Err(Exception::DivideError);
    }
    write_reg_index(state, idx::EAX, width, quotient as u32);
    store_high_half(state, width, remainder as u32);
    Ok(())
}

fn idiv<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    m: &crate::decode::ModRm,
    width: u32,
) -> Result<(), Exception> {
    let divisor = sign_extend(read_rm(state, bus, m, width)?, width);
    if divisor == 0 {
        return Err(Exception::DivideError);
    }
    let dividend = signed_dividend_for(state, width);
    let quotient = dividend / divisor;
    let remainder = dividend % divisor;
    let min = -(1i64 << (width - 1));
    let max = (1i64 << (width - 1)) - 1;
    if quotient < min || quotient > max {
        return Err(Exception::DivideError);
    }
    write_reg_index(state, idx::EAX, width, (quotient as u32) & mask_for(width));
    store_high_half(state, width, (remainder as u32) & mask_for(width));
    Ok(())
}

/// The combined dividend register pair: AX for 8-bit (AH:AL), DX:AX for
/// 16-bit, EDX:EAX for 32-bit.
fn dividend_for(state: &CpuState, width: u32) -> u64 {
    match width {
        8 => state.gpr.read16(idx::EAX) as u64,
        16 => ((state.gpr.read16(idx::EDX) as u64) << 16) | state.gpr.read16(idx::EAX) as u64,
        _ => ((state.gpr.read32(idx::EDX) as u64) << 32) | state.gpr.read32(idx::EAX) as u64,
    }
}

fn signed_dividend_for(state: &CpuState, width: u32) -> i64 {
    match width {
        8 => state.gpr.read16(idx::EAX) as i16 as i64,
        16 => {
            let v = ((state.gpr.read16(idx::EDX) as u32) << 16) | state.gpr.read16(idx::EAX) as u32;
            v as i32 as i64
        }
        _ => {
            let v = ((state.gpr.read32(idx::EDX) as u64) << 32) | state.gpr.read32(idx::EAX) as u64;
            v as i64
        }
    }
}
