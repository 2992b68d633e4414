//! String instruction family (C8): MOVS/CMPS/STOS/LODS/SCAS with REP/REPE/
//! REPNE. `spec.md` §4.6 "String ops", §8 invariant 7, §9 REP MOVS note.

use crate::bus::LinearBus;
use crate::decode;
use crate::error::Exception;
use crate::flags::{sub_flags, Eflags};
use crate::gpr::idx;
use crate::state::{CpuState, RepKind, Seg};
use i686_mmu::MemoryBus;

fn step_size(width: u32) -> u32 {
    width / 8
}

fn advance(state: &mut CpuState, reg: usize, width: u32) {
    let delta = step_size(width);
    let df = state.eflags.contains(Eflags::DF);
    let v = state.gpr.read32(reg);
    let nv = if df {
        v.wrapping_sub(delta)
    } else {
        v.wrapping_add(delta)
    };
    state.gpr.write32(reg, nv);
}

fn dec_ecx(state: &mut CpuState) {
    let ecx = state.gpr.read32(idx::ECX);
    state.gpr.write32(idx::ECX, ecx.wrapping_sub(1));
}

pub fn exec<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    opcode: u8,
) -> Result<Option<()>, Exception> {
    let (width, is_string_op) = match opcode {
        0xA4 | 0xA6 | 0xAA | 0xAC | 0xAE => (8, true),
        0xA5 | 0xA7 | 0xAB | 0xAD | 0xAF => (decode::operand_size(state), true),
        _ => (0, false),
    };
    if !is_string_op {
        return Ok(None);
    }

    let rep = state.prefix.rep;
    let zf_check = match (opcode, rep) {
        (0xA6 | 0xA7 | 0xAE | 0xAF, RepKind::Rep) => Some(true),
        (0xA6 | 0xA7 | 0xAE | 0xAF, RepKind::Repne) => Some(false),
        _ => None,
    };

    if rep == RepKind::None {
        run_one(state, bus, opcode, width)?;
        return Ok(Some(()));
    }

    // The REP-prefix loop checks ECX!=0 before every iteration including the
    // first; the ZF-vs-expected check for REPE/REPNE only applies to
    // *continuing* past an iteration that has already run once.
    while state.gpr.read32(idx::ECX) != 0 {
        run_one(state, bus, opcode, width)?;
        dec_ecx(state);
        if let Some(expected) = zf_check {
            if state.eflags.contains(Eflags::ZF) != expected {
                break;
            }
        }
    }
    Ok(Some(()))
}

fn run_one<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    opcode: u8,
    width: u32,
) -> Result<(), Exception> {
    match opcode {
        0xA4 | 0xA5 => {
            // MOVS: [ES:EDI] <- [DS:ESI] (or segment-override on source).
            let src_seg = state.prefix.segment_override.unwrap_or(Seg::Ds);
            let src = crate::segmentation::linear(state, src_seg, state.gpr.read32(idx::ESI));
            let dst = crate::segmentation::linear(state, Seg::Es, state.gpr.read32(idx::EDI));
            let v = read_width(bus, src, width)?;
            write_width(bus, dst, width, v)?;
            advance(state, idx::ESI, width);
            advance(state, idx::EDI, width);
            Ok(())
        }
        0xAA | 0xAB => {
            // STOS: [ES:EDI] <- AL/AX/EAX.
            let dst = crate::segmentation::linear(state, Seg::Es, state.gpr.read32(idx::EDI));
            let v = super::read_reg_index(state, idx::EAX, width);
            write_width(bus, dst, width, v)?;
            advance(state, idx::EDI, width);
            Ok(())
        }
        0xAC | 0xAD => {
            // LODS: AL/AX/EAX <- [DS:ESI].
            let src_seg = state.prefix.segment_override.unwrap_or(Seg::Ds);
            let src = crate::segmentation::linear(state, src_seg, state.gpr.read32(idx::ESI));
            let v = read_width(bus, src, width)?;
            super::write_reg_index(state, idx::EAX, width, v);
            advance(state, idx::ESI, width);
            Ok(())
        }
        0xA6 | 0xA7 => {
            // CMPS: compare [DS:ESI] - [ES:EDI].
            let src_seg = state.prefix.segment_override.unwrap_or(Seg::Ds);
            let src = crate::segmentation::linear(state, src_seg, state.gpr.read32(idx::ESI));
            let dst = crate::segmentation::linear(state, Seg::Es, state.gpr.read32(idx::EDI));
            let a = read_width(bus, src, width)?;
            let b = read_width(bus, dst, width)?;
            let (_, flags) = sub_flags(a, b, width);
            merge_flags(state, flags);
            advance(state, idx::ESI, width);
            advance(state, idx::EDI, width);
            Ok(())
        }
        _ => {
            // SCAS: compare AL/AX/EAX - [ES:EDI].
            let dst = crate::segmentation::linear(state, Seg::Es, state.gpr.read32(idx::EDI));
            let a = super::read_reg_index(state, idx::EAX, width);
            let b = read_width(bus, dst, width)?;
            let (_, flags) = sub_flags(a, b, width);
            merge_flags(state, flags);
            advance(state, idx::EDI, width);
            Ok(())
        }
    }
}

fn merge_flags(state: &mut CpuState, flags: Eflags) {
    state.eflags = Eflags::from_bits_truncate(
        (state.eflags.bits() & !0x8D5) | (flags.bits() & 0x8D5),
    );
}

fn read_width<M: MemoryBus>(bus: &mut LinearBus<M>, addr: u32, width: u32) -> Result<u32, Exception> {
    match width {
        8 => bus.read_u8(addr).map(|v| v as u32),
        16 => bus.read_u16(addr).map(|v| v as u32),
        _ => bus.read_u32(addr),
    }
}

fn write_width<M: MemoryBus>(
    bus: &mut LinearBus<M>,
    addr: u32,
    width: u32,
    v: u32,
) -> Result<(), Exception> {
    match width {
        8 => bus.write_u8(addr, v as u8),
        16 => bus.write_u16(addr, v as u16),
        _ => bus.write_u32(addr, v),
    }
}
