//! ALU/logic family (C8): opcode-embedded ADD/OR/ADC/SBB/AND/SUB/XOR/CMP,
//! Group 1 immediate forms, INC/DEC, DAA/DAS, and (secondary-map)
//! CMOVcc/SETcc/BT-family/MOVZX-MOVSX. `spec.md` §4.6.

use super::{
    data::movzx_movsx, read_reg_field, read_rm, write_reg_field, write_rm,
};
use crate::bus::LinearBus;
use crate::decode::{self, decode_modrm};
use crate::error::Exception;
use crate::flags::{
    adc_flags, add_flags, dec_flags, inc_flags, logic_flags, sbb_flags, sub_flags, Eflags,
};
use crate::gpr::idx;
use crate::state::CpuState;
use i686_mmu::MemoryBus;

#[derive(Clone, Copy)]
enum AluOp {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

fn apply(state: &mut CpuState, op: AluOp, a: u32, b: u32, width: u32) -> (u32, bool) {
    let cf_in = state.eflags.contains(Eflags::CF);
    let (result, flags) = match op {
        AluOp::Add => add_flags(a, b, width),
        AluOp::Adc => adc_flags(a, b, cf_in, width),
        AluOp::Sbb => sbb_flags(a, b, cf_in, width),
        AluOp::Sub | AluOp::Cmp => sub_flags(a, b, width),
        AluOp::And => (a & b & mask(width), logic_flags(a & b, width)),
        AluOp::Or => (a | b, logic_flags(a | b, width)),
        AluOp::Xor => (a ^ b, logic_flags(a ^ b, width)),
    };
    state.eflags = Eflags::from_bits_truncate(
        (state.eflags.bits() & !0x8D5) | (flags.bits() & 0x8D5),
    );
    (result, matches!(op, AluOp::Cmp))
}

fn mask(width: u32) -> u32 {
    if width == 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

/// Opcodes `base+0..=5` for each of the 8 ALU ops, in encoding order
/// (/r r/m8,r8; /r r/m,r; /r r8,r/m8; /r r,r/m; ib AL,imm8; iz eAX,imm).
fn op_for_base(opcode: u8) -> Option<(AluOp, u8)> {
    let table = [
        (0x00u8, AluOp::Add),
        (0x08, AluOp::Or),
        (0x10, AluOp::Adc),
        (0x18, AluOp::Sbb),
        (0x20, AluOp::And),
        (0x28, AluOp::Sub),
        (0x30, AluOp::Xor),
        (0x38, AluOp::Cmp),
    ];
    for (base, op) in table {
        if opcode >= base && opcode <= base + 5 {
            return Some((op, opcode - base));
        }
    }
    None
}

pub fn exec_primary<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    opcode: u8,
) -> Result<Option<()>, Exception> {
    let width = decode::operand_size(state);

    if let Some((op, variant)) = op_for_base(opcode) {
        match variant {
            0 => {
                let m = decode_modrm(state, bus)?;
                let a = read_rm(state, bus, &m, 8)?;
                let b = read_reg_field(state, &m, 8);
                let (result, is_cmp) = apply(state, op, a, b, 8);
                if !is_cmp {
                    write_rm(state, bus, &m, 8, result)?;
                }
            }
            1 => {
                let m = decode_modrm(state, bus)?;
                let a = read_rm(state, bus, &m, width)?;
                let b = read_reg_field(state, &m, width);
                let (result, is_cmp) = apply(state, op, a, b, width);
                if !is_cmp {
                    write_rm(state, bus, &m, width, result)?;
                }
            }
            2 => {
                let m = decode_modrm(state, bus)?;
                let a = read_reg_field(state, &m, 8);
                let b = read_rm(state, bus, &m, 8)?;
                let (result, is_cmp) = apply(state, op, a, b, 8);
                if !is_cmp {
                    write_reg_field(state, &m, 8, result);
                }
            }
            3 => {
                let m = decode_modrm(state, bus)?;
                let a = read_reg_field(state, &m, width);
                let b = read_rm(state, bus, &m, width)?;
                let (result, is_cmp) = apply(state, op, a, b, width);
                if !is_cmp {
                    write_reg_field(state, &m, width, result);
                }
            }
            4 => {
                let a = state.gpr.read8(idx::EAX) as u32;
                let b = decode::fetch_u8(state, bus)? as u32;
                let (result, is_cmp) = apply(state, op, a, b, 8);
                if !is_cmp {
                    state.gpr.write8(idx::EAX, result as u8);
                }
            }
            _ => {
                let a = super::read_reg_index(state, idx::EAX, width);
                let b = if width == 16 {
                    decode::fetch_u16(state, bus)? as u32
                } else {
                    decode::fetch_u32(state, bus)?
                };
                let (result, is_cmp) = apply(state, op, a, b, width);
                if !is_cmp {
                    super::write_reg_index(state, idx::EAX, width, result);
                }
            }
        }
        return Ok(Some(()));
    }

    match opcode {
        0x80 => {
            let m = decode_modrm(state, bus)?;
            let op = group1_op(m.reg);
            let a = read_rm(state, bus, &m, 8)?;
            let imm = decode::fetch_u8(state, bus)? as u32;
            let (result, is_cmp) = apply(state, op, a, imm, 8);
            if !is_cmp {
                write_rm(state, bus, &m, 8, result)?;
            }
            Ok(Some(()))
        }
        0x81 => {
            let m = decode_modrm(state, bus)?;
            let op = group1_op(m.reg);
            let a = read_rm(state, bus, &m, width)?;
            let imm = if width == 16 {
                decode::fetch_u16(state, bus)? as u32
            } else {
                decode::fetch_u32(state, bus)?
            };
            let (result, is_cmp) = apply(state, op, a, imm, width);
            if !is_cmp {
                write_rm(state, bus, &m, width, result)?;
            }
            Ok(Some(()))
        }
        0x82 | 0x83 => {
            let m = decode_modrm(state, bus)?;
            let op = group1_op(m.reg);
            let a = read_rm(state, bus, &m, width)?;
            let imm8 = decode::fetch_u8(state, bus)?;
            let imm = decode::sign_extend8(imm8) as u32;
            let (result, is_cmp) = apply(state, op, a, imm, width);
            if !is_cmp {
                write_rm(state, bus, &m, width, result)?;
            }
            Ok(Some(()))
        }
        0xA8 => {
            let a = state.gpr.read8(idx::EAX) as u32;
            let imm = decode::fetch_u8(state, bus)? as u32;
            state.eflags = Eflags::from_bits_truncate(
                (state.eflags.bits() & !0x8D5) | (logic_flags(a & imm, 8).bits() & 0x8D5),
            );
            Ok(Some(()))
        }
        0xA9 => {
            let a = super::read_reg_index(state, idx::EAX, width);
            let imm = if width == 16 {
                decode::fetch_u16(state, bus)? as u32
            } else {
                decode::fetch_u32(state, bus)?
            };
            state.eflags = Eflags::from_bits_truncate(
                (state.eflags.bits() & !0x8D5) | (logic_flags(a & imm, width).bits() & 0x8D5),
            );
            Ok(Some(()))
        }
        0x40..=0x47 => {
            let i = (opcode - 0x40) as usize;
            let width = decode::operand_size(state);
            let a = super::read_reg_index(state, i, width);
            let (result, flags) = inc_flags(a, width);
            let cf = state.eflags.contains(Eflags::CF);
            state.eflags = Eflags::from_bits_truncate(
                (state.eflags.bits() & !0x8D4) | (flags.bits() & 0x8D4),
            );
            state.eflags.set(Eflags::CF, cf);
            super::write_reg_index(state, i, width, result);
            Ok(Some(()))
        }
        0x48..=0x4F => {
            let i = (opcode - 0x48) as usize;
            let width = decode::operand_size(state);
            let a = super::read_reg_index(state, i, width);
            let (result, flags) = dec_flags(a, width);
            let cf = state.eflags.contains(Eflags::CF);
            state.eflags = Eflags::from_bits_truncate(
                (state.eflags.bits() & !0x8D4) | (flags.bits() & 0x8D4),
            );
            state.eflags.set(Eflags::CF, cf);
            super::write_reg_index(state, i, width, result);
            Ok(Some(()))
        }
        0x27 => {
            daa(state);
            Ok(Some(()))
        }
        0x2F => {
            das(state);
            Ok(Some(()))
        }
        0x69 => {
            let m = decode_modrm(state, bus)?;
            let a = read_rm(state, bus, &m, width)? as i32 as i64;
            let imm = if width == 16 {
                decode::fetch_u16(state, bus)? as i16 as i64
            } else {
                decode::fetch_u32(state, bus)? as i32 as i64
            };
            imul3(state, &m, a, imm, width);
            Ok(Some(()))
        }
        0x6B => {
            let m = decode_modrm(state, bus)?;
            let a = read_rm(state, bus, &m, width)? as i32 as i64;
            let imm = decode::sign_extend8(decode::fetch_u8(state, bus)?) as i64;
            imul3(state, &m, a, imm, width);
            Ok(Some(()))
        }
        _ => Ok(None),
    }
}

fn imul3(state: &mut CpuState, m: &crate::decode::ModRm, a: i64, b: i64, width: u32) {
    let product = a * b;
    let mask = mask(width) as i64;
    let truncated = product & mask;
    let fits = product == sign_extend_to(truncated, width);
    write_reg_field(state, m, width, truncated as u32);
    state.eflags.set(Eflags::CF, !fits);
    state.eflags.set(Eflags::OF, !fits);
}

fn sign_extend_to(v: i64, width: u32) -> i64 {
    match width {
        16 => v as i16 as i64,
        _ => v as i32 as i64,
    }
}

fn group1_op(reg: u8) -> AluOp {
    match reg {
        0 => AluOp::Add,
        1 => AluOp::Or,
        2 => AluOp::Adc,
        3 => AluOp::Sbb,
        4 => AluOp::And,
        5 => AluOp::Sub,
        6 => AluOp::Xor,
        _ => AluOp::Cmp,
    }
}

/// Intel SDM Vol 1 §3A DAA: decimal-adjust AL after addition.
fn daa(state: &mut CpuState) {
    let al = state.gpr.read8(idx::EAX);
    let old_cf = state.eflags.contains(Eflags::CF);
    let old_af = state.eflags.contains(Eflags::AF);
    let mut cf = false;
    let mut af = false;
    let mut result = al;

    if (al & 0x0F) > 9 || old_af {
        result = result.wrapping_add(6);
        af = true;
        cf = old_cf || (al as u16 + 6) > 0xFF;
    }
    if (al > 0x99) || old_cf {
        result = result.wrapping_add(0x60);
        cf = true;
    }

    state.gpr.write8(idx::EAX, result);
    state.eflags.set(Eflags::CF, cf);
    state.eflags.set(Eflags::AF, af);
    state.eflags.set(Eflags::ZF, result == 0);
    state.eflags.set(Eflags::SF, result & 0x80 != 0);
    state
        .eflags
        .set(Eflags::PF, result.count_ones() % 2 == 0);
}

/// Intel SDM Vol 1 §3A DAS: decimal-adjust AL after subtraction.
fn das(state: &mut CpuState) {
    let al = state.gpr.read8(idx::EAX);
    let old_cf = state.eflags.contains(Eflags::CF);
    let old_af = state.eflags.contains(Eflags::AF);
    let mut cf = false;
    let mut af = false;
    let mut result = al;

    if (al & 0x0F) > 9 || old_af {
        cf = old_cf || al < 6;
        result = result.wrapping_sub(6);
        af = true;
    }
    if (al > 0x99) || old_cf {
        result = result.wrapping_sub(0x60);
        cf = true;
    }

    state.gpr.write8(idx::EAX, result);
    state.eflags.set(Eflags::CF, cf);
    state.eflags.set(Eflags::AF, af);
    state.eflags.set(Eflags::ZF, result == 0);
    state.eflags.set(Eflags::SF, result & 0x80 != 0);
    state
        .eflags
        .set(Eflags::PF, result.count_ones() % 2 == 0);
}

pub(crate) fn condition_holds(state: &CpuState, cc: u8) -> bool {
    let f = &state.eflags;
    let cf = f.contains(Eflags::CF);
    let zf = f.contains(Eflags::ZF);
    let sf = f.contains(Eflags::SF);
    let of = f.contains(Eflags::OF);
    let pf = f.contains(Eflags::PF);
    match cc & 0xF {
        0x0 => of,
        0x1 => !of,
        0x2 => cf,
        0x3 => !cf,
        0x4 => zf,
        0x5 => !zf,
        0x6 => cf || zf,
        0x7 => !cf && !zf,
        0x8 => sf,
        0x9 => !sf,
        0xA => pf,
        0xB => !pf,
        0xC => sf != of,
        0xD => sf == of,
        0xE => zf || (sf != of),
        _ => !zf && (sf == of),
    }
}

pub fn exec_secondary<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    opcode2: u8,
) -> Result<Option<()>, Exception> {
    let width = decode::operand_size(state);
    match opcode2 {
        0x40..=0x4F => {
            // CMOVcc: the ModR/M operand is always read (advancing EIP),
            // written only when the condition holds (`spec.md` §4.6).
            let m = decode_modrm(state, bus)?;
            let src = read_rm(state, bus, &m, width)?;
            if condition_holds(state, opcode2) {
                write_reg_field(state, &m, width, src);
            }
            Ok(Some(()))
        }
        0x90..=0x9F => {
            let m = decode_modrm(state, bus)?;
            let v = condition_holds(state, opcode2) as u32;
            write_rm(state, bus, &m, 8, v)?;
            Ok(Some(()))
        }
        0xB6 => {
            movzx_movsx(state, bus, 8, false)?;
            Ok(Some(()))
        }
        0xB7 => {
            movzx_movsx(state, bus, 16, false)?;
            Ok(Some(()))
        }
        0xBE => {
            movzx_movsx(state, bus, 8, true)?;
            Ok(Some(()))
        }
        0xBF => {
            movzx_movsx(state, bus, 16, true)?;
            Ok(Some(()))
        }
        0xAF => {
            let m = decode_modrm(state, bus)?;
            let a = read_reg_field(state, &m, width) as i32 as i64;
            let b = read_rm(state, bus, &m, width)? as i32 as i64;
            imul3(state, &m, a, b, width);
            Ok(Some(()))
        }
        0xA3 | 0xAB | 0xB3 | 0xBB => {
            // BT/BTS/BTR/BTC r/m, r
            let m = decode_modrm(state, bus)?;
            let bit_index = read_reg_field(state, &m, width) % width;
            let val = read_rm(state, bus, &m, width)?;
            let bit = (val >> bit_index) & 1 != 0;
            state.eflags.set(Eflags::CF, bit);
            let new_val = match opcode2 {
                0xAB => val | (1 << bit_index),
                0xB3 => val & !(1 << bit_index),
                0xBB => val ^ (1 << bit_index),
                _ => val,
            };
            if opcode2 != 0xA3 {
                write_rm(state, bus, &m, width, new_val)?;
            }
            Ok(Some(()))
        }
        0xBC | 0xBD => {
            // BSF/BSR
            let m = decode_modrm(state, bus)?;
            let src = read_rm(state, bus, &m, width)?;
            if src == 0 {
                state.eflags.insert(Eflags::ZF);
                // destination left unchanged, per spec.md §4.6.
            } else {
                state.eflags.remove(Eflags::ZF);
                let index = if opcode2 == 0xBC {
                    src.trailing_zeros()
                } else {
                    width - 1 - src.leading_zeros().saturating_sub(32 - width)
                };
                write_reg_field(state, &m, width, index);
            }
            Ok(Some(()))
        }
        0xBA => {
            // Group 8: BT/BTS/BTR/BTC r/m, imm8
            let m = decode_modrm(state, bus)?;
            let imm = decode::fetch_u8(state, bus)?;
            let bit_index = (imm as u32) % width;
            let val = read_rm(state, bus, &m, width)?;
            let bit = (val >> bit_index) & 1 != 0;
            state.eflags.set(Eflags::CF, bit);
            let new_val = match m.reg {
                5 => val | (1 << bit_index),
                6 => val & !(1 << bit_index),
                7 => val ^ (1 << bit_index),
                _ => val,
            };
            if m.reg != 4 {
                write_rm(state, bus, &m, width, new_val)?;
            }
            Ok(Some(()))
        }
        _ => Ok(None),
    }
}
