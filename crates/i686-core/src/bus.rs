//! Linear-address memory port (C6): each access traverses paging (C5) over
//! the embedder's physical `MemoryBus`, turning a page-table miss into a
//! dispatchable `Exception::PageFault` and latching CR2 on the owning
//! `CpuState`. A failure of the embedder's own backing store — whether hit
//! while walking the page tables or on the final physical access — is a
//! different condition and is carried as `Exception::MemoryFault` instead;
//! `Cpu::step` intercepts that variant before it can reach the interrupt
//! dispatcher and surfaces it to the embedder unchanged as `Fault::Memory`
//! (`spec.md` §7).
//!
//! Segmentation (C4) is a separate, earlier step: callers first turn a
//! `(segment, offset)` pair into a linear address via `segmentation::linear`,
//! then pass that linear address to this bus. Grounded on the teacher's
//! `PagingBus` (`aero-cpu-core/tests/descriptors_paging.rs`,
//! `tests/paging.rs`): `PagingBus::new(..)`, `.sync(&state)`,
//! `.read_u8(linear)`.

use crate::error::Exception;
use crate::state::CpuState;
use i686_mmu::{paging, Access, MemoryBus, TranslateError};

pub struct LinearBus<'a, M: MemoryBus> {
    mem: &'a mut M,
    cr0_pg: bool,
    cr3_base: u32,
    pse: bool,
    wp: bool,
    cpl: u8,
}

impl<'a, M: MemoryBus> LinearBus<'a, M> {
    pub fn new(mem: &'a mut M) -> Self {
        LinearBus {
            mem,
            cr0_pg: false,
            cr3_base: 0,
            pse: false,
            wp: false,
            cpl: 0,
        }
    }

    /// Refresh the paging-relevant control bits from the owning `CpuState`.
    /// Call before every instruction (or whenever CR0/CR3/CR4/CPL change).
    pub fn sync(&mut self, state: &CpuState) {
        self.cr0_pg = state.paging_enabled();
        self.cr3_base = state.control.cr3 & 0xFFFF_F000;
        self.pse = state.pse_enabled();
        self.wp = state.wp();
        self.cpl = state.cpl();
    }

    pub fn inner_mut(&mut self) -> &mut M {
        self.mem
    }

    fn resolve(&mut self, linear: u32, access: Access) -> Result<u32, Exception> {
        if !self.cr0_pg {
            return Ok(linear);
        }
        match paging::translate(
            self.mem,
            self.cr3_base,
            linear,
            access,
            self.cpl,
            self.pse,
            self.wp,
        ) {
            Ok(phys) => Ok(phys),
            Err(TranslateError::Fault(info)) => Err(Exception::PageFault {
                addr: linear,
                error_code: info.error_code(),
            }),
            // The page table itself was unreadable — a failure of the
            // embedder's backing store, not a missing/protected mapping.
            // Surface the real fault rather than a synthesized #PF.
            Err(TranslateError::Memory(e)) => Err(Exception::MemoryFault(e)),
        }
    }

    pub fn read_u8(&mut self, linear: u32) -> Result<u8, Exception> {
        let phys = self.resolve(linear, Access::Read)?;
        self.mem.read_u8(phys).map_err(Exception::MemoryFault)
    }

    pub fn write_u8(&mut self, linear: u32, v: u8) -> Result<(), Exception> {
        let phys = self.resolve(linear, Access::Write)?;
        self.mem.write_u8(phys, v).map_err(Exception::MemoryFault)
    }

    /// Word/dword accesses are composed byte-wise, which means each byte
    /// is independently translated: a word that straddles a page boundary
    /// is not handled atomically, matching `spec.md` §4.4's explicit note.
    pub fn read_u16(&mut self, linear: u32) -> Result<u16, Exception> {
        let lo = self.read_u8(linear)?;
        let hi = self.read_u8(linear.wrapping_add(1))?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    pub fn write_u16(&mut self, linear: u32, v: u16) -> Result<(), Exception> {
        let [lo, hi] = v.to_le_bytes();
        self.write_u8(linear, lo)?;
        self.write_u8(linear.wrapping_add(1), hi)?;
        Ok(())
    }

    pub fn read_u32(&mut self, linear: u32) -> Result<u32, Exception> {
        let b0 = self.read_u8(linear)?;
        let b1 = self.read_u8(linear.wrapping_add(1))?;
        let b2 = self.read_u8(linear.wrapping_add(2))?;
        let b3 = self.read_u8(linear.wrapping_add(3))?;
        Ok(u32::from_le_bytes([b0, b1, b2, b3]))
    }

    pub fn write_u32(&mut self, linear: u32, v: u32) -> Result<(), Exception> {
        let [b0, b1, b2, b3] = v.to_le_bytes();
        self.write_u8(linear, b0)?;
        self.write_u8(linear.wrapping_add(1), b1)?;
        self.write_u8(linear.wrapping_add(2), b2)?;
        self.write_u8(linear.wrapping_add(3), b3)?;
        Ok(())
    }

    pub fn read_u64(&mut self, linear: u32) -> Result<u64, Exception> {
        let lo = self.read_u32(linear)?;
        let hi = self.read_u32(linear.wrapping_add(4))?;
        Ok((lo as u64) | ((hi as u64) << 32))
    }
}

/// The I/O port bus (consumed by the executor for IN/OUT). Reads from
/// unmapped ports return 0xFF; writes to unmapped ports are discarded
/// (`spec.md` §6) — both handled by the embedder's implementation, not
/// enforced here.
pub trait IoBus {
    fn in_u8(&mut self, port: u16) -> u8;
    fn out_u8(&mut self, port: u16, v: u8);

    fn in_u16(&mut self, port: u16) -> u16 {
        u16::from_le_bytes([self.in_u8(port), self.in_u8(port.wrapping_add(1))])
    }

    fn out_u16(&mut self, port: u16, v: u16) {
        let [lo, hi] = v.to_le_bytes();
        self.out_u8(port, lo);
        self.out_u8(port.wrapping_add(1), hi);
    }

    fn in_u32(&mut self, port: u16) -> u32 {
        u32::from_le_bytes([
            self.in_u8(port),
            self.in_u8(port.wrapping_add(1)),
            self.in_u8(port.wrapping_add(2)),
            self.in_u8(port.wrapping_add(3)),
        ])
    }

    fn out_u32(&mut self, port: u16, v: u32) {
        let [b0, b1, b2, b3] = v.to_le_bytes();
        self.out_u8(port, b0);
        self.out_u8(port.wrapping_add(1), b1);
        self.out_u8(port.wrapping_add(2), b2);
        self.out_u8(port.wrapping_add(3), b3);
    }
}
