//! Control transfer family (C8): Jcc, JMP, CALL, RET, LOOP family, ENTER,
//! LEAVE. `spec.md` §4.6 "Control transfer".

use super::alu::condition_holds;
use super::{pop_val, push_val, read_reg_index, write_reg_index};
use crate::bus::LinearBus;
use crate::decode::{self, sign_extend8};
use crate::error::Exception;
use crate::gpr::idx;
use i686_mmu::MemoryBus;

pub fn exec_primary<M: MemoryBus>(
    state: &mut crate::state::CpuState,
    bus: &mut LinearBus<M>,
    opcode: u8,
) -> Result<Option<()>, Exception> {
    match opcode {
        0x70..=0x7F => {
            let rel = sign_extend8(decode::fetch_u8(state, bus)?);
            if condition_holds(state, opcode & 0x0F) {
                state.eip = state.eip.wrapping_add(rel as u32);
            }
            Ok(Some(()))
        }
        0xE9 => {
            let width = decode::operand_size(state);
            let rel = if width == 16 {
                decode::fetch_u16(state, bus)? as i16 as i32
            } else {
                decode::fetch_u32(state, bus)? as i32
            };
            state.eip = state.eip.wrapping_add(rel as u32);
            Ok(Some(()))
        }
        0xEB => {
            let rel = sign_extend8(decode::fetch_u8(state, bus)?);
            state.eip = state.eip.wrapping_add(rel as u32);
            Ok(Some(()))
        }
        0xE8 => {
            let width = decode::operand_size(state);
            let rel = if width == 16 {
                decode::fetch_u16(state, bus)? as i16 as i32
            } else {
                decode::fetch_u32(state, bus)? as i32
            };
            push_val(state, bus, state.eip)?;
            state.eip = state.eip.wrapping_add(rel as u32);
            Ok(Some(()))
        }
        0xC3 => {
            let ret = pop_val(state, bus)?;
            state.eip = ret;
            Ok(Some(()))
        }
        0xC2 => {
            let imm = decode::fetch_u16(state, bus)?;
            let ret = pop_val(state, bus)?;
            state.eip = ret;
            let esp = state.gpr.read32(idx::ESP);
            state.gpr.write32(idx::ESP, esp.wrapping_add(imm as u32));
            Ok(Some(()))
        }
        0xE0 | 0xE1 | 0xE2 => {
            let rel = sign_extend8(decode::fetch_u8(state, bus)?);
            let addr_width = decode::address_size(state);
            let ecx = read_reg_index(state, idx::ECX, addr_width);
            let new_ecx = ecx.wrapping_sub(1);
            write_reg_index(state, idx::ECX, addr_width, new_ecx);
            let zf = state
                .eflags
                .contains(crate::flags::Eflags::ZF);
            let take = match opcode {
                0xE0 => new_ecx != 0 && !zf, // LOOPNE/LOOPNZ
                0xE1 => new_ecx != 0 && zf,  // LOOPE/LOOPZ
                _ => new_ecx != 0,           // LOOP
            };
            if take {
                state.eip = state.eip.wrapping_add(rel as u32);
            }
            Ok(Some(()))
        }
        0xC8 => {
            let alloc_size = decode::fetch_u16(state, bus)?;
            let nesting = decode::fetch_u8(state, bus)?;
            enter(state, bus, alloc_size, nesting)?;
            Ok(Some(()))
        }
        0xC9 => {
            let ebp = state.gpr.read32(idx::EBP);
            state.gpr.write32(idx::ESP, ebp);
            let new_ebp = pop_val(state, bus)?;
            state.gpr.write32(idx::EBP, new_ebp);
            Ok(Some(()))
        }
        _ => Ok(None),
    }
}

pub fn exec_secondary<M: MemoryBus>(
    state: &mut crate::state::CpuState,
    bus: &mut LinearBus<M>,
    opcode2: u8,
) -> Result<Option<()>, Exception> {
    if (0x80..=0x8F).contains(&opcode2) {
        let width = decode::operand_size(state);
        let rel = if width == 16 {
            decode::fetch_u16(state, bus)? as i16 as i32
        } else {
            decode::fetch_u32(state, bus)? as i32
        };
        if condition_holds(state, opcode2 & 0x0F) {
            state.eip = state.eip.wrapping_add(rel as u32);
        }
        return Ok(Some(()));
    }
    Ok(None)
}

/// ENTER imm16,imm8: push EBP; frame_ptr=ESP; for level in [1,nesting) push
/// `[EBP - level*4]`; push frame_ptr; EBP<-frame_ptr; ESP-=alloc_size.
fn enter<M: MemoryBus>(
    state: &mut crate::state::CpuState,
    bus: &mut LinearBus<M>,
    alloc_size: u16,
    nesting: u8,
) -> Result<(), Exception> {
    let ebp = state.gpr.read32(idx::EBP);
    push_val(state, bus, ebp)?;
    let frame_ptr = state.gpr.read32(idx::ESP);

    let level = nesting & 0x1F;
    for l in 1..level {
        let src = ebp.wrapping_sub((l as u32) * 4);
        let linear = crate::segmentation::linear(state, crate::state::Seg::Ss, src);
        let v = bus.read_u32(linear)?;
        push_val(state, bus, v)?;
    }
    if level > 0 {
        push_val(state, bus, frame_ptr)?;
    }

    state.gpr.write32(idx::EBP, frame_ptr);
    let esp = state.gpr.read32(idx::ESP);
    state
        .gpr
        .write32(idx::ESP, esp.wrapping_sub(alloc_size as u32));
    Ok(())
}
