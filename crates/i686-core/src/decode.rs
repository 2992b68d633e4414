//! Decoder / addressing (C7): the prefix loop, code-fetch helpers, and
//! ModR/M + SIB effective-address computation. Expressed as a bounded loop
//! rather than tail recursion (`spec.md` §4.5/§9).

use crate::bus::LinearBus;
use crate::error::Exception;
use crate::gpr::idx;
use crate::state::{CpuState, RepKind, Seg};
use i686_mmu::MemoryBus;

/// Consume fetch-prefix bytes until the first non-prefix byte, which is
/// left unread (the caller fetches it as the opcode). Updates
/// `state.prefix` in place. Bounded at 15 bytes total, matching the Intel
/// architectural limit on instruction length.
pub fn consume_prefixes<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
) -> Result<(), Exception> {
    for _ in 0..15 {
        let eip = state.eip;
        let linear = crate::segmentation::linear(state, Seg::Cs, eip);
        let byte = bus.read_u8(linear)?;
        match byte {
            0x66 => state.prefix.operand_size_override = true,
            0x67 => state.prefix.address_size_override = true,
            0x26 => state.prefix.segment_override = Some(Seg::Es),
            0x2E => state.prefix.segment_override = Some(Seg::Cs),
            0x36 => state.prefix.segment_override = Some(Seg::Ss),
            0x3E => state.prefix.segment_override = Some(Seg::Ds),
            0x64 => state.prefix.segment_override = Some(Seg::Fs),
            0x65 => state.prefix.segment_override = Some(Seg::Gs),
            0xF0 => state.prefix.lock = true,
            0xF2 => state.prefix.rep = RepKind::Repne,
            0xF3 => state.prefix.rep = RepKind::Rep,
            _ => return Ok(()),
        }
        state.eip = state.eip.wrapping_add(1);
    }
    Ok(())
}

pub fn fetch_u8<M: MemoryBus>(state: &mut CpuState, bus: &mut LinearBus<M>) -> Result<u8, Exception> {
    let linear = crate::segmentation::linear(state, Seg::Cs, state.eip);
    let v = bus.read_u8(linear)?;
    state.eip = state.eip.wrapping_add(1);
    Ok(v)
}

pub fn fetch_u16<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
) -> Result<u16, Exception> {
    let linear = crate::segmentation::linear(state, Seg::Cs, state.eip);
    let v = bus.read_u16(linear)?;
    state.eip = state.eip.wrapping_add(2);
    Ok(v)
}

pub fn fetch_u32<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
) -> Result<u32, Exception> {
    let linear = crate::segmentation::linear(state, Seg::Cs, state.eip);
    let v = bus.read_u32(linear)?;
    state.eip = state.eip.wrapping_add(4);
    Ok(v)
}

/// Sign-extend an 8-bit immediate to 32 bits, used by e.g. opcode 0x83 and
/// `Jcc rel8`.
pub fn sign_extend8(v: u8) -> i32 {
    v as i8 as i32
}

/// Operand size in bits for the current prefix state (32-bit code segment
/// is the only supported case per `spec.md` §4.5).
pub fn operand_size(state: &CpuState) -> u32 {
    if state.prefix.operand_size_override {
        16
    } else {
        32
    }
}

pub fn address_size(state: &CpuState) -> u32 {
    if state.prefix.address_size_override {
        16
    } else {
        32
    }
}

/// A decoded ModR/M byte, plus (for memory operands) the effective address
/// already resolved to an unsegmented offset. `reg` always names a
/// register-field operand (instruction-dependent meaning: a register
/// operand or an opcode extension).
#[derive(Debug, Clone, Copy)]
pub struct ModRm {
    pub reg: u8,
    pub is_mem: bool,
    /// Valid only if `is_mem`: the register index for a register-direct
    /// r/m operand (mod==3).
    pub rm: u8,
    /// Valid only if `is_mem`: the unsegmented effective offset.
    pub offset: u32,
    /// Default segment for this memory operand (SS for EBP/ESP-based
    /// 32-bit addressing, DS otherwise), before any segment-override
    /// prefix is applied.
    pub default_seg: Seg,
}

/// Decode ModR/M (and, if present, SIB) plus any displacement, using
/// 32-bit addressing forms (`spec.md` §4.5). 16-bit addressing (under the
/// 0x67 prefix) is not implemented: this core only targets 32-bit code
/// segments, matching `spec.md` §4.5's statement that 32-bit addressing is
/// "currently the only supported case".
pub fn decode_modrm<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
) -> Result<ModRm, Exception> {
    let byte = fetch_u8(state, bus)?;
    let md = byte >> 6;
    let reg = (byte >> 3) & 0x7;
    let rm = byte & 0x7;

    if md == 3 {
        return Ok(ModRm {
            reg,
            is_mem: false,
            rm,
            offset: 0,
            default_seg: Seg::Ds,
        });
    }

    let mut default_seg = Seg::Ds;
    let mut base: i64 = 0;
    let mut has_base = true;

    if rm == 4 {
        let sib = fetch_u8(state, bus)?;
        let scale = 1u32 << (sib >> 6);
        let index = (sib >> 3) & 0x7;
        let sib_base = sib & 0x7;

        let index_val: i64 = if index == 4 {
            0
        } else {
            state.gpr.read32(index as usize) as i64
        };

        if sib_base == 5 && md == 0 {
            let disp32 = fetch_u32(state, bus)? as i32 as i64;
            base = disp32;
        } else {
            if sib_base == idx::ESP || sib_base == idx::EBP {
                default_seg = Seg::Ss;
            }
            base = state.gpr.read32(sib_base as usize) as i64;
        }
        base = base.wrapping_add(index_val.wrapping_mul(scale as i64));
    } else if rm == 5 && md == 0 {
        let disp32 = fetch_u32(state, bus)? as i32 as i64;
        base = disp32;
        has_base = false;
    } else {
        if rm == idx::ESP || rm == idx::EBP {
            default_seg = Seg::Ss;
        }
        base = state.gpr.read32(rm as usize) as i64;
    }

    let disp: i64 = match md {
        0 => 0,
        1 => sign_extend8(fetch_u8(state, bus)?) as i64,
        2 => fetch_u32(state, bus)? as i32 as i64,
        _ => unreachable!("mod==3 handled above"),
    };

    let _ = has_base;
    let offset = (base.wrapping_add(disp)) as u32;

    Ok(ModRm {
        reg,
        is_mem: true,
        rm,
        offset,
        default_seg,
    })
}

/// Resolve a decoded ModR/M memory operand's segment, honoring any
/// segment-override prefix.
pub fn modrm_segment(state: &CpuState, modrm: &ModRm) -> Seg {
    state.prefix.segment_override.unwrap_or(modrm.default_seg)
}
