//! Low-level i686 memory primitives: the embedder-facing physical memory
//! port (`MemoryBus`) and the two-level paging walker (`paging`). No
//! knowledge of segments, registers, or instructions lives here; that is
//! `i686-core`'s job.

pub mod bus;
pub mod paging;

pub use bus::{FlatMemory, MemoryBus, MemoryFault};
pub use paging::{translate, Access, EntryFlags, PageFaultInfo, TranslateError};
