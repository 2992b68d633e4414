//! Data-movement family (C8): MOV, LEA, XCHG, MOVZX/MOVSX, LES/LDS/LSS/LFS/LGS,
//! PUSH/POP, PUSHF/POPF. `spec.md` §4.6 "Data movement" / "Stack".

use super::{
    pop_val, push_val, read_reg_field, read_reg_index, read_rm, stack_operand_size,
    write_reg_field, write_reg_index, write_rm,
};
use crate::bus::LinearBus;
use crate::decode::{self, decode_modrm};
use crate::error::Exception;
use crate::flags::{Eflags, EFLAGS_FIXED_ONE, EFLAGS_IOPL_MASK};
use crate::gpr::idx;
use crate::segmentation::{self, LoadReason};
use crate::state::{CpuState, Seg};
use i686_mmu::MemoryBus;

pub fn exec<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    opcode: u8,
) -> Result<Option<()>, Exception> {
    let width = decode::operand_size(state);
    match opcode {
        0x88 => {
            let m = decode_modrm(state, bus)?;
            let v = read_reg_field(state, &m, 8);
            write_rm(state, bus, &m, 8, v)?;
            Ok(Some(()))
        }
        0x89 => {
            let m = decode_modrm(state, bus)?;
            let v = read_reg_field(state, &m, width);
            write_rm(state, bus, &m, width, v)?;
            Ok(Some(()))
        }
        0x8A => {
            let m = decode_modrm(state, bus)?;
            let v = read_rm(state, bus, &m, 8)?;
            write_reg_field(state, &m, 8, v);
            Ok(Some(()))
        }
        0x8B => {
            let m = decode_modrm(state, bus)?;
            let v = read_rm(state, bus, &m, width)?;
            write_reg_field(state, &m, width, v);
            Ok(Some(()))
        }
        0x8D => {
            let m = decode_modrm(state, bus)?;
            // LEA: the computed address, no memory access.
            write_reg_field(state, &m, width, m.offset);
            Ok(Some(()))
        }
        0xA0 => {
            let off = decode::fetch_u32(state, bus)?;
            let linear = segmentation::linear(state, Seg::Ds, off);
            let v = bus.read_u8(linear)?;
            state.gpr.write8(idx::EAX, v);
            Ok(Some(()))
        }
        0xA1 => {
            let off = decode::fetch_u32(state, bus)?;
            let linear = segmentation::linear(state, Seg::Ds, off);
            let v = if width == 16 {
                bus.read_u16(linear)? as u32
            } else {
                bus.read_u32(linear)?
            };
            write_reg_index(state, idx::EAX, width, v);
            Ok(Some(()))
        }
        0xA2 => {
            let off = decode::fetch_u32(state, bus)?;
            let linear = segmentation::linear(state, Seg::Ds, off);
            bus.write_u8(linear, state.gpr.read8(idx::EAX))?;
            Ok(Some(()))
        }
        0xA3 => {
            let off = decode::fetch_u32(state, bus)?;
            let linear = segmentation::linear(state, Seg::Ds, off);
            let v = read_reg_index(state, idx::EAX, width);
            if width == 16 {
                bus.write_u16(linear, v as u16)?;
            } else {
                bus.write_u32(linear, v)?;
            }
            Ok(Some(()))
        }
        0xB0..=0xB7 => {
            let i = (opcode - 0xB0) as usize;
            let imm = decode::fetch_u8(state, bus)?;
            state.gpr.write8(i, imm);
            Ok(Some(()))
        }
        0xB8..=0xBF => {
            let i = (opcode - 0xB8) as usize;
            let imm = if width == 16 {
                decode::fetch_u16(state, bus)? as u32
            } else {
                decode::fetch_u32(state, bus)?
            };
            write_reg_index(state, i, width, imm);
            Ok(Some(()))
        }
        0xC6 => {
            let m = decode_modrm(state, bus)?;
            let imm = decode::fetch_u8(state, bus)?;
            write_rm(state, bus, &m, 8, imm as u32)?;
            Ok(Some(()))
        }
        0xC7 => {
            let m = decode_modrm(state, bus)?;
            let imm = if width == 16 {
                decode::fetch_u16(state, bus)? as u32
            } else {
                decode::fetch_u32(state, bus)?
            };
            write_rm(state, bus, &m, width, imm)?;
            Ok(Some(()))
        }
        0x86 => {
            let m = decode_modrm(state, bus)?;
            let a = read_reg_field(state, &m, 8);
            let b = read_rm(state, bus, &m, 8)?;
            write_reg_field(state, &m, 8, b);
            write_rm(state, bus, &m, 8, a)?;
            Ok(Some(()))
        }
        0x87 => {
            let m = decode_modrm(state, bus)?;
            let a = read_reg_field(state, &m, width);
            let b = read_rm(state, bus, &m, width)?;
            write_reg_field(state, &m, width, b);
            write_rm(state, bus, &m, width, a)?;
            Ok(Some(()))
        }
        0x90..=0x97 => {
            let i = (opcode - 0x90) as usize;
            if i == 0 {
                // 0x90 with an implicit reg-encoding of 0 is NOP.
                return Ok(Some(()));
            }
            let a = read_reg_index(state, idx::EAX, width);
            let b = read_reg_index(state, i, width);
            write_reg_index(state, idx::EAX, width, b);
            write_reg_index(state, i, width, a);
            Ok(Some(()))
        }
        0x50..=0x57 => {
            let i = (opcode - 0x50) as usize;
            let v = state.gpr.read32(i);
            push_val(state, bus, v)?;
            Ok(Some(()))
        }
        0x58..=0x5F => {
            let i = (opcode - 0x58) as usize;
            let v = pop_val(state, bus)?;
            state.gpr.write32(i, v);
            Ok(Some(()))
        }
        0x9C => {
            let width = stack_operand_size(state);
            let bits = state.eflags.normalized().bits();
            let v = if width == 16 { bits & 0xFFFF } else { bits };
            push_val(state, bus, v)?;
            Ok(Some(()))
        }
        0x9D => {
            let width = stack_operand_size(state);
            let popped = pop_val(state, bus)?;
            // Reserved bits round-trip except bit 1, which is always set;
            // VM/IOPL may only change from a sufficiently privileged
            // context, which this single-CPL-0-guest core does not police.
            let preserved_high = state.eflags.bits() & !0xFFFF;
            let new_bits = if width == 16 {
                (preserved_high | (popped & 0xFFFF)) | EFLAGS_FIXED_ONE
            } else {
                popped | EFLAGS_FIXED_ONE
            };
            state.eflags = Eflags::from_bits_truncate(new_bits);
            let _ = EFLAGS_IOPL_MASK;
            Ok(Some(()))
        }
        0xC4 => {
            let m = decode_modrm(state, bus)?;
            load_far_pointer(state, bus, &m, Seg::Es, width)?;
            Ok(Some(()))
        }
        0xC5 => {
            let m = decode_modrm(state, bus)?;
            load_far_pointer(state, bus, &m, Seg::Ds, width)?;
            Ok(Some(()))
        }
        _ => Ok(None),
    }
}

/// LES/LDS/LSS/LFS/LGS: read a far pointer {offset, selector} from memory
/// and load the selector into `seg`, writing `offset` into the ModR/M reg
/// field register.
pub fn load_far_pointer<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    m: &crate::decode::ModRm,
    seg: Seg,
    width: u32,
) -> Result<(), Exception> {
    if !m.is_mem {
        return Err(Exception::InvalidOpcode);
    }
    let src_seg = decode::modrm_segment(state, m);
    let linear = segmentation::linear(state, src_seg, m.offset);
    let offset = if width == 16 {
        bus.read_u16(linear)? as u32
    } else {
        bus.read_u32(linear)?
    };
    let sel_addr = linear.wrapping_add(width / 8);
    let selector = bus.read_u16(sel_addr)?;
    segmentation::load_seg_reason(state, bus, seg, selector, LoadReason::Data)?;
    write_reg_field(state, m, width, offset);
    Ok(())
}

/// MOVZX/MOVSX (0F B6/B7/BE/BF): always widen into a 32-bit destination
/// register per the ModR/M reg field, regardless of the 0x66 prefix for the
/// B7/BF forms (`spec.md` §4.6: "0F B7 and 0F BF are always 32-bit
/// destination").
pub fn movzx_movsx<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    src_width: u32,
    signed: bool,
) -> Result<(), Exception> {
    let m = decode_modrm(state, bus)?;
    let raw = read_rm(state, bus, &m, src_width)?;
    let widened = if signed {
        match src_width {
            8 => raw as u8 as i8 as i32 as u32,
            _ => raw as u16 as i16 as i32 as u32,
        }
    } else {
        raw
    };
    write_reg_field(state, &m, 32, widened);
    Ok(())
}
