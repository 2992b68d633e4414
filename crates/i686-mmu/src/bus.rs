//! Physical memory port: the narrow byte/word/dword contract an embedder's
//! RAM buffer implements. Word and dword accesses are little-endian and
//! composed from the byte primitives using wrapping address arithmetic, so a
//! scalar access that runs off the end of the 32-bit address space wraps
//! rather than panics.

use thiserror::Error;

/// Raised by an embedder's memory implementation when an address is
/// unmapped or otherwise inaccessible. Opaque to the core: the embedder
/// supplies whatever `reason` is useful for its own diagnostics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("memory access fault at {addr:#010x}: {reason}")]
pub struct MemoryFault {
    pub addr: u32,
    pub reason: &'static str,
}

impl MemoryFault {
    pub fn new(addr: u32, reason: &'static str) -> Self {
        Self { addr, reason }
    }
}

/// The embedder-facing physical memory port (component C6's lower half).
///
/// Only the byte-level accessors are required; word/dword accesses have
/// default implementations built from them with little-endian byte order
/// and wrapping address arithmetic, matching the teacher's `legacy-interp`
/// `Bus` trait convention.
pub trait MemoryBus {
    fn read_u8(&mut self, addr: u32) -> Result<u8, MemoryFault>;
    fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), MemoryFault>;

    fn read_u16(&mut self, addr: u32) -> Result<u16, MemoryFault> {
        let lo = self.read_u8(addr)?;
        let hi = self.read_u8(addr.wrapping_add(1))?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn write_u16(&mut self, addr: u32, value: u16) -> Result<(), MemoryFault> {
        let [lo, hi] = value.to_le_bytes();
        self.write_u8(addr, lo)?;
        self.write_u8(addr.wrapping_add(1), hi)?;
        Ok(())
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32, MemoryFault> {
        let b0 = self.read_u8(addr)?;
        let b1 = self.read_u8(addr.wrapping_add(1))?;
        let b2 = self.read_u8(addr.wrapping_add(2))?;
        let b3 = self.read_u8(addr.wrapping_add(3))?;
        Ok(u32::from_le_bytes([b0, b1, b2, b3]))
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), MemoryFault> {
        let [b0, b1, b2, b3] = value.to_le_bytes();
        self.write_u8(addr, b0)?;
        self.write_u8(addr.wrapping_add(1), b1)?;
        self.write_u8(addr.wrapping_add(2), b2)?;
        self.write_u8(addr.wrapping_add(3), b3)?;
        Ok(())
    }
}

/// Flat `Vec<u8>`-backed `MemoryBus` used by tests and benches. Out-of-range
/// accesses wrap modulo the buffer length rather than faulting, which is
/// sufficient for a fixture that never legitimately runs off the end.
pub struct FlatMemory {
    bytes: Vec<u8>,
}

impl FlatMemory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size],
        }
    }

    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn load(&mut self, at: u32, data: &[u8]) {
        let start = at as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl MemoryBus for FlatMemory {
    fn read_u8(&mut self, addr: u32) -> Result<u8, MemoryFault> {
        let len = self.bytes.len() as u32;
        Ok(self.bytes[(addr % len) as usize])
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), MemoryFault> {
        let len = self.bytes.len() as u32;
        self.bytes[(addr % len) as usize] = value;
        Ok(())
    }
}
