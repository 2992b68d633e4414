//! `i686-emu`: a single-core i686/Pentium-Pro-class CPU software emulator.
//!
//! This root crate is a thin facade: the register/flag/descriptor/paging
//! model lives in `i686-core` (on top of `i686-mmu`'s physical memory port
//! and paging walker). Most embedders only need this crate's re-exports.

pub use i686_core::bus::{IoBus, LinearBus};
pub use i686_core::cpu::Cpu;
pub use i686_core::descriptor::{GateDescriptor, GateType, SegmentDescriptor};
pub use i686_core::error::{Exception, Fault};
pub use i686_core::history::{Diagnostic, RetiredInstruction};
pub use i686_core::segmentation::LoadReason;
pub use i686_core::state::{CpuState, Mode, Seg, StateSnapshot};

pub use i686_mmu::{Access, FlatMemory, MemoryBus, MemoryFault, TranslateError};
