//! Segmentation unit (C4): linear-address formation and descriptor-cache
//! loading. `spec.md` §4.3.

use crate::bus::LinearBus;
use crate::descriptor::SegmentDescriptor;
use crate::error::Exception;
use crate::state::{CpuState, Mode, Seg, SegmentCache};
use i686_mmu::MemoryBus;

/// Why a selector is being loaded; distinguishes data/stack loads (which
/// may target a null selector in protected mode) from code loads (which may
/// not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadReason {
    Data,
    Stack,
    Code,
}

/// `linear(seg, offset)` per `spec.md` §4.3: real/vm86 mode uses
/// `(selector << 4) + offset`; protected mode uses the cached descriptor
/// base plus offset, wrapping modulo 2^32.
pub fn linear(state: &CpuState, seg: Seg, offset: u32) -> u32 {
    match state.mode {
        Mode::Real | Mode::Vm86 => {
            let sel = state.seg(seg).selector as u32;
            (sel << 4).wrapping_add(offset & 0xFFFF)
        }
        Mode::Protected => state.seg(seg).base.wrapping_add(offset),
    }
}

/// Load a selector into a segment register (`spec.md` §4.3). In real/vm86
/// mode this only ever synthesizes the flat `(selector<<4)` cache entry; in
/// protected mode it reads the GDT (TI=0) through `bus`, which means a GDT
/// read is itself paging-translated like any other memory access.
///
/// LDT loads (TI=1) are not implemented (`DESIGN.md` open question 1): they
/// raise `#GP` rather than silently aliasing to the GDT.
pub fn load_seg<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    seg: Seg,
    selector: u16,
) -> Result<(), Exception> {
    load_seg_reason(state, bus, seg, selector, LoadReason::Data)
}

pub fn load_seg_reason<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    seg: Seg,
    selector: u16,
    reason: LoadReason,
) -> Result<(), Exception> {
    match state.mode {
        Mode::Real | Mode::Vm86 => {
            *state.seg_mut(seg) = SegmentCache::real_mode(selector);
            Ok(())
        }
        Mode::Protected => {
            if selector & !0x7 == 0 {
                if reason == LoadReason::Code || reason == LoadReason::Stack {
                    return Err(Exception::GeneralProtection(0));
                }
                *state.seg_mut(seg) = SegmentCache::null();
                return Ok(());
            }

            if selector & 0x4 != 0 {
                // TI=1: LDT load, unimplemented.
                return Err(Exception::GeneralProtection(selector as u32 & !0x7));
            }

            let index = (selector >> 3) as u32;
            let table_offset = index * 8;
            if table_offset + 7 > state.tables.gdtr.limit {
                return Err(Exception::GeneralProtection(selector as u32 & !0x7));
            }

            let entry_linear = state.tables.gdtr.base.wrapping_add(table_offset);
            let lo = bus.read_u32(entry_linear)?;
            let hi = bus.read_u32(entry_linear.wrapping_add(4))?;
            let mut raw = [0u8; 8];
            raw[0..4].copy_from_slice(&lo.to_le_bytes());
            raw[4..8].copy_from_slice(&hi.to_le_bytes());
            let desc = SegmentDescriptor::from_raw(&raw);

            if !desc.is_present() {
                return Err(Exception::SegmentNotPresent(selector as u32 & !0x7));
            }

            *state.seg_mut(seg) = SegmentCache::from_descriptor(selector, desc);
            Ok(())
        }
    }
}

/// `get_effective_address(seg, off)`, part of the control surface (`spec.md`
/// §6): expose the linear address computation without performing a memory
/// access.
pub fn effective_address(state: &CpuState, seg: Seg, offset: u32) -> u32 {
    linear(state, seg, offset)
}
