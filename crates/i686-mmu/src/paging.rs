//! Two-level i686 paging (component C5): PDE -> PTE, with 4 KiB pages and
//! (under CR4.PSE) 4 MiB pages rooted directly at the PDE.

use crate::bus::{MemoryBus, MemoryFault};
use bitflags::bitflags;

bitflags! {
    /// Bit layout shared by PDEs and PTEs (the PS bit is only meaningful in a PDE).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const PWT      = 1 << 3;
        const PCD      = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY    = 1 << 6;
        const PS       = 1 << 7;
        const GLOBAL   = 1 << 8;
    }
}

/// The kind of access that triggered a translation, used to decide whether a
/// miss should fault and how to encode the #PF error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    /// Instruction fetch. i686 has no NX bit, so this behaves like `Read`;
    /// kept distinct for future extension and for accurate error-code bits.
    Fetch,
}

/// Reported by a failed translation; the caller (the segmentation/bus layer)
/// is responsible for latching CR2 and raising `#PF` with the right error
/// code for the current privilege level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFaultInfo {
    pub linear: u32,
    /// Set if the miss was a protection violation rather than a not-present entry.
    pub present: bool,
    pub write: bool,
    pub user: bool,
}

impl PageFaultInfo {
    /// Intel error-code bit layout: bit0=P, bit1=W/R, bit2=U/S.
    pub fn error_code(&self) -> u32 {
        (self.present as u32) | ((self.write as u32) << 1) | ((self.user as u32) << 2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateError {
    Fault(PageFaultInfo),
    Memory(MemoryFault),
}

impl From<MemoryFault> for TranslateError {
    fn from(e: MemoryFault) -> Self {
        TranslateError::Memory(e)
    }
}

/// Counters tracked when the `stats` feature is enabled; otherwise a
/// zero-sized type so the walker carries no overhead.
#[derive(Debug, Default, Clone, Copy)]
#[cfg(feature = "stats")]
pub struct WalkStats {
    pub walks: u64,
    pub faults: u64,
}

#[cfg(feature = "stats")]
impl WalkStats {
    pub fn record_walk(&mut self) {
        self.walks += 1;
    }
    pub fn record_fault(&mut self) {
        self.faults += 1;
    }
}

/// Walk a two-level page table rooted at `cr3_base` (the page-directory
/// physical base, already masked to its 4 KiB alignment by the caller).
///
/// `cpl == 3` is treated as a user access, anything else as supervisor,
/// matching the architectural U/S check (CPL 0-2 are all "supervisor" for
/// paging purposes).
pub fn translate(
    mem: &mut impl MemoryBus,
    cr3_base: u32,
    linear: u32,
    access: Access,
    cpl: u8,
    pse_enabled: bool,
    wp: bool,
) -> Result<u32, TranslateError> {
    let is_write = matches!(access, Access::Write);
    let is_user = cpl == 3;

    let pde_addr = cr3_base.wrapping_add((linear >> 22) * 4);
    let pde_raw = mem.read_u32(pde_addr)?;
    let pde = EntryFlags::from_bits_truncate(pde_raw);

    if !pde.contains(EntryFlags::PRESENT) {
        return Err(TranslateError::Fault(PageFaultInfo {
            linear,
            present: false,
            write: is_write,
            user: is_user,
        }));
    }

    if pde.contains(EntryFlags::PS) && pse_enabled {
        let us = pde.contains(EntryFlags::USER);
        let rw = pde.contains(EntryFlags::WRITABLE);
        if is_user && !us {
            return Err(TranslateError::Fault(PageFaultInfo {
                linear,
                present: true,
                write: is_write,
                user: is_user,
            }));
        }
        if is_write && !rw && (wp || is_user) {
            return Err(TranslateError::Fault(PageFaultInfo {
                linear,
                present: true,
                write: is_write,
                user: is_user,
            }));
        }
        let frame_base = pde_raw & 0xFFC0_0000;
        let offset = linear & 0x003F_FFFF;
        return Ok(frame_base | offset);
    }

    let pt_base = pde_raw & 0xFFFF_F000;
    let pte_addr = pt_base.wrapping_add(((linear >> 12) & 0x3FF) * 4);
    let pte_raw = mem.read_u32(pte_addr)?;
    let pte = EntryFlags::from_bits_truncate(pte_raw);

    if !pte.contains(EntryFlags::PRESENT) {
        return Err(TranslateError::Fault(PageFaultInfo {
            linear,
            present: false,
            write: is_write,
            user: is_user,
        }));
    }

    let us = pde.contains(EntryFlags::USER) && pte.contains(EntryFlags::USER);
    let rw = pde.contains(EntryFlags::WRITABLE) && pte.contains(EntryFlags::WRITABLE);

    if is_user && !us {
        return Err(TranslateError::Fault(PageFaultInfo {
            linear,
            present: true,
            write: is_write,
            user: is_user,
        }));
    }
    if is_write && !rw && (wp || is_user) {
        return Err(TranslateError::Fault(PageFaultInfo {
            linear,
            present: true,
            write: is_write,
            user: is_user,
        }));
    }

    let frame_base = pte_raw & 0xFFFF_F000;
    let offset = linear & 0x0000_0FFF;
    Ok(frame_base | offset)
}
