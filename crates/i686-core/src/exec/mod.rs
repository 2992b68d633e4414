//! Executor (C8): ~200 instruction behaviors grouped by opcode family.
//! Grounded on `spec.md` §4.6 and on the organization of
//! `libcorevm::executor::{mod,system}` (primary 256-entry dispatch,
//! secondary 0F-escape table, a separate Group 2 shift/rotate dispatch, and
//! system instructions split into their own module).

mod alu;
mod control;
mod data;
mod group3;
mod shift;
mod string;
mod system;

use crate::bus::{IoBus, LinearBus};
use crate::decode::{self, ModRm};
use crate::error::Exception;
use crate::gpr::idx;
use crate::state::{CpuState, Seg};
use i686_mmu::MemoryBus;

/// Read an r/m operand (register or memory) at the given bit width.
pub fn read_rm<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    modrm: &ModRm,
    width: u32,
) -> Result<u32, Exception> {
    if !modrm.is_mem {
        return Ok(read_reg_index(state, modrm.rm as usize, width));
    }
    let seg = decode::modrm_segment(state, modrm);
    let linear = crate::segmentation::linear(state, seg, modrm.offset);
    match width {
        8 => bus.read_u8(linear).map(|v| v as u32),
        16 => bus.read_u16(linear).map(|v| v as u32),
        _ => bus.read_u32(linear),
    }
}

pub fn write_rm<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    modrm: &ModRm,
    width: u32,
    value: u32,
) -> Result<(), Exception> {
    if !modrm.is_mem {
        write_reg_index(state, modrm.rm as usize, width, value);
        return Ok(());
    }
    let seg = decode::modrm_segment(state, modrm);
    let linear = crate::segmentation::linear(state, seg, modrm.offset);
    match width {
        8 => bus.write_u8(linear, value as u8),
        16 => bus.write_u16(linear, value as u16),
        _ => bus.write_u32(linear, value),
    }
}

pub fn read_reg_index(state: &CpuState, i: usize, width: u32) -> u32 {
    match width {
        8 => state.gpr.read8(i) as u32,
        16 => state.gpr.read16(i) as u32,
        _ => state.gpr.read32(i),
    }
}

pub fn write_reg_index(state: &mut CpuState, i: usize, width: u32, value: u32) {
    match width {
        8 => state.gpr.write8(i, value as u8),
        16 => state.gpr.write16(i, value as u16),
        _ => state.gpr.write32(i, value),
    }
}

pub fn read_reg_field(state: &CpuState, modrm: &ModRm, width: u32) -> u32 {
    read_reg_index(state, modrm.reg as usize, width)
}

pub fn write_reg_field(state: &mut CpuState, modrm: &ModRm, width: u32, value: u32) {
    write_reg_index(state, modrm.reg as usize, width, value)
}

/// The operand size stack push/pop uses: governed by the 0x66 prefix same
/// as any other operand, per `spec.md` §4.6 "Stack".
pub fn stack_operand_size(state: &CpuState) -> u32 {
    decode::operand_size(state)
}

pub fn push_val<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    value: u32,
) -> Result<(), Exception> {
    let width = stack_operand_size(state);
    let esp = state.gpr.read32(idx::ESP);
    let new_esp = esp.wrapping_sub(width / 8);
    state.gpr.write32(idx::ESP, new_esp);
    let linear = crate::segmentation::linear(state, Seg::Ss, new_esp);
    if width == 16 {
        bus.write_u16(linear, value as u16)
    } else {
        bus.write_u32(linear, value)
    }
}

pub fn pop_val<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
) -> Result<u32, Exception> {
    let width = stack_operand_size(state);
    let esp = state.gpr.read32(idx::ESP);
    let linear = crate::segmentation::linear(state, Seg::Ss, esp);
    let value = if width == 16 {
        bus.read_u16(linear)? as u32
    } else {
        bus.read_u32(linear)?
    };
    state.gpr.write32(idx::ESP, esp.wrapping_add(width / 8));
    Ok(value)
}

/// Dispatch and execute one instruction whose primary opcode has already
/// been fetched; the 0x0F secondary opcode, if any, is fetched here and
/// returned to the caller for history-ring bookkeeping. Everything else
/// (ModR/M, displacement, immediates) is fetched lazily by each opcode
/// handler, mirroring the teacher's own monolithic `execute()` entry point.
pub fn dispatch<M: MemoryBus, IO: IoBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    io: &mut IO,
    opcode: u8,
) -> Result<Option<u8>, Exception> {
    if opcode == 0x0F {
        let opcode2 = decode::fetch_u8(state, bus)?;
        exec_secondary(state, bus, io, opcode2)?;
        return Ok(Some(opcode2));
    }
    exec_primary(state, bus, io, opcode)?;
    Ok(None)
}

fn exec_primary<M: MemoryBus, IO: IoBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    io: &mut IO,
    opcode: u8,
) -> Result<(), Exception> {
    if let Some(r) = data::exec(state, bus, opcode)? {
        return Ok(r);
    }
    if let Some(r) = alu::exec_primary(state, bus, opcode)? {
        return Ok(r);
    }
    if let Some(r) = control::exec_primary(state, bus, opcode)? {
        return Ok(r);
    }
    if let Some(r) = string::exec(state, bus, opcode)? {
        return Ok(r);
    }
    if let Some(r) = system::exec_primary(state, bus, opcode)? {
        return Ok(r);
    }
    match opcode {
        0xC0 | 0xC1 | 0xD0 | 0xD1 | 0xD2 | 0xD3 => shift::exec(state, bus, opcode),
        0xF6 | 0xF7 => group3::exec(state, bus, opcode),
        0xE4 | 0xE5 | 0xE6 | 0xE7 | 0xEC | 0xED | 0xEE | 0xEF => {
            system::exec_io(state, bus, io, opcode)
        }
        0xF4 => {
            state.halted = true;
            Ok(())
        }
        _ => Err(unhandled(state, opcode, None)),
    }
}

fn exec_secondary<M: MemoryBus, IO: IoBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    io: &mut IO,
    opcode2: u8,
) -> Result<(), Exception> {
    if let Some(r) = control::exec_secondary(state, bus, opcode2)? {
        return Ok(r);
    }
    if let Some(r) = alu::exec_secondary(state, bus, opcode2)? {
        return Ok(r);
    }
    if let Some(r) = system::exec_secondary(state, bus, io, opcode2)? {
        return Ok(r);
    }
    Err(unhandled(state, opcode2, Some(opcode2)))
}

/// Every opcode that falls through dispatch raises `InvalidOpcode`; the
/// caller (the step driver) is responsible for building the diagnostic dump
/// from the history ring, per `spec.md` §4.6/§7.
fn unhandled(_state: &CpuState, _opcode: u8, _opcode2: Option<u8>) -> Exception {
    Exception::InvalidOpcode
}
