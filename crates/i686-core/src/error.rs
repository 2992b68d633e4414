//! The two error enums the core uses: `Exception` for architectural
//! conditions the interrupt dispatcher can absorb, and `Fault` for what
//! actually crosses the `step()` boundary back to the embedder.

use i686_mmu::MemoryFault;
use thiserror::Error;

/// An architectural exception. Dispatchable: the interrupt dispatcher (C9)
/// catches these during `step()` and attempts to deliver them through the
/// IVT/IDT. Only escalation to a double fault that itself cannot be
/// delivered ever turns into a `Fault` returned to the embedder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Exception {
    #[error("#DE divide error")]
    DivideError,
    #[error("#UD invalid opcode")]
    InvalidOpcode,
    #[error("#GP general protection fault (error code {0:#x})")]
    GeneralProtection(u32),
    #[error("#NP segment not present (error code {0:#x})")]
    SegmentNotPresent(u32),
    #[error("#SS stack fault (error code {0:#x})")]
    StackFault(u32),
    #[error("#TS invalid TSS (error code {0:#x})")]
    InvalidTss(u32),
    #[error("#PF page fault at {addr:#010x} (error code {error_code:#x})")]
    PageFault { addr: u32, error_code: u32 },
    #[error("#DF double fault")]
    DoubleFault,
    /// A direct request to dispatch vector `.0` with no error code: either
    /// `INT imm8` (`spec.md` §4.6 defines it in terms of "the current mode's
    /// vector table (§4.8)") or an externally-injected interrupt delivered
    /// via the `dispatch_interrupt` control-surface call (`spec.md` §6).
    /// Not an architectural fault condition in its own right, but routed
    /// through the same dispatcher (C9) either way.
    #[error("vector interrupt {0:#04x}")]
    Software(u8),
    /// Not an architectural exception: the embedder's own memory backing
    /// store faulted servicing a linear access, either mid page-table walk
    /// or on the final read/write. Carried through the same `Result<_,
    /// Exception>` plumbing every other executor error takes so `bus.rs`
    /// doesn't need a parallel channel, but intercepted in `Cpu::step`
    /// before reaching the interrupt dispatcher: `spec.md` §7 requires this
    /// to surface to the embedder unchanged as `Fault::Memory`, never as a
    /// synthesized `#PF`.
    #[error("{0}")]
    MemoryFault(MemoryFault),
}

impl Exception {
    /// Intel vector number for this exception.
    pub fn vector(&self) -> u8 {
        match self {
            Exception::DivideError => 0,
            Exception::InvalidOpcode => 6,
            Exception::StackFault(_) => 12,
            Exception::GeneralProtection(_) => 13,
            Exception::PageFault { .. } => 14,
            Exception::SegmentNotPresent(_) => 11,
            Exception::InvalidTss(_) => 10,
            Exception::DoubleFault => 8,
            Exception::Software(v) => *v,
            // Never actually dispatched; `Cpu::step` intercepts this
            // variant before any vector lookup happens.
            Exception::MemoryFault(_) => 0xFF,
        }
    }

    /// Whether Intel defines this vector as pushing a hardware error code.
    pub fn has_error_code(&self) -> bool {
        matches!(
            self,
            Exception::GeneralProtection(_)
                | Exception::SegmentNotPresent(_)
                | Exception::StackFault(_)
                | Exception::InvalidTss(_)
                | Exception::PageFault { .. }
                | Exception::DoubleFault
        )
    }

    /// The error code to push, or 0 for vectors that carry one by
    /// convention but for which no specific value applies here (e.g. a
    /// synthesized double fault).
    pub fn error_code(&self) -> u32 {
        match self {
            Exception::GeneralProtection(c)
            | Exception::SegmentNotPresent(c)
            | Exception::StackFault(c)
            | Exception::InvalidTss(c) => *c,
            Exception::PageFault { error_code, .. } => *error_code,
            Exception::DoubleFault => 0,
            _ => 0,
        }
    }
}

/// Terminal/propagated conditions that actually cross the `step()` boundary
/// back to the embedder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("cpu is halted")]
    Halted,
    #[error("triple fault: {0}")]
    TripleFault(Exception),
    #[error("memory error: {0}")]
    Memory(#[from] MemoryFault),
    #[error("io error on port {port:#06x}")]
    Io { port: u16 },
    #[error("unhandled opcode")]
    UnhandledOpcode(Box<crate::history::Diagnostic>),
}
