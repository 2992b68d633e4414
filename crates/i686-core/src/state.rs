//! Architectural state (C1): everything the CPU owns between instructions.

use crate::descriptor::SegmentDescriptor;
use crate::flags::Eflags;
use crate::gpr::GprFile;
use crate::history::HistoryRing;

pub const CR0_PE: u32 = 1 << 0;
pub const CR0_MP: u32 = 1 << 1;
pub const CR0_EM: u32 = 1 << 2;
pub const CR0_TS: u32 = 1 << 3;
pub const CR0_ET: u32 = 1 << 4;
pub const CR0_NE: u32 = 1 << 5;
pub const CR0_WP: u32 = 1 << 16;
pub const CR0_AM: u32 = 1 << 18;
pub const CR0_NW: u32 = 1 << 29;
pub const CR0_CD: u32 = 1 << 30;
pub const CR0_PG: u32 = 1 << 31;

pub const CR4_VME: u32 = 1 << 0;
pub const CR4_PVI: u32 = 1 << 1;
pub const CR4_TSD: u32 = 1 << 2;
pub const CR4_DE: u32 = 1 << 3;
pub const CR4_PSE: u32 = 1 << 4;
pub const CR4_PAE: u32 = 1 << 5;

pub const MSR_SYSENTER_CS: u32 = 0x174;
pub const MSR_SYSENTER_ESP: u32 = 0x175;
pub const MSR_SYSENTER_EIP: u32 = 0x176;

/// The CPU's current operating mode (C10). VM86 is recognized as a tag only;
/// no virtual-8086 semantics are implemented (see `spec.md` §1 Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Real,
    Protected,
    Vm86,
}

/// Stable segment-register enumeration, indexing the 6-entry descriptor
/// cache array (`spec.md` §9 design note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seg {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
    Fs = 4,
    Gs = 5,
}

impl Seg {
    pub const ALL: [Seg; 6] = [Seg::Es, Seg::Cs, Seg::Ss, Seg::Ds, Seg::Fs, Seg::Gs];
}

/// One entry of the segment-descriptor cache: the architectural selector
/// plus the shadow copy of its descriptor fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCache {
    pub selector: u16,
    pub base: u32,
    pub limit: u32,
    pub access: u8,
    pub flags: u8,
    pub valid: bool,
}

impl SegmentCache {
    pub fn null() -> Self {
        SegmentCache {
            selector: 0,
            base: 0,
            limit: 0,
            access: 0,
            flags: 0,
            valid: false,
        }
    }

    pub fn from_descriptor(selector: u16, d: SegmentDescriptor) -> Self {
        SegmentCache {
            selector,
            base: d.base,
            limit: d.effective_limit(),
            access: d.access,
            flags: d.flags,
            valid: true,
        }
    }

    /// A flat, always-valid descriptor synthesized for real/vm86 mode,
    /// where segmentation never actually consults the descriptor cache for
    /// limit checks; `base` follows the `(selector << 4)` rule elsewhere.
    pub fn real_mode(selector: u16) -> Self {
        SegmentCache {
            selector,
            base: (selector as u32) << 4,
            limit: 0xFFFF,
            access: 0,
            flags: 0,
            valid: true,
        }
    }

    pub fn is_present(&self) -> bool {
        self.access & 0x80 != 0
    }

    pub fn dpl(&self) -> u8 {
        (self.access >> 5) & 0x3
    }

    pub fn is_code(&self) -> bool {
        self.access & 0x18 == 0x18
    }

    pub fn is_unusable(&self) -> bool {
        !self.valid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRegister {
    pub base: u32,
    pub limit: u32,
}

impl TableRegister {
    pub fn new() -> Self {
        TableRegister { base: 0, limit: 0 }
    }
}

impl Default for TableRegister {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlRegisters {
    pub cr0: u32,
    pub cr2: u32,
    pub cr3: u32,
    pub cr4: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorTables {
    pub gdtr: TableRegister,
    pub idtr: TableRegister,
    /// LDTR/TR are plain 16-bit selectors; LDT loads are not implemented
    /// (see `DESIGN.md` open question 1), so only the selector value is
    /// tracked for SLDT/STR round-tripping.
    pub ldtr: u16,
    pub tr: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsrFile {
    pub sysenter_cs: u32,
    pub sysenter_esp: u32,
    pub sysenter_eip: u32,
}

/// Per-instruction scratch reset at the top of every `step()` (C7 prefix
/// state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixState {
    pub operand_size_override: bool,
    pub address_size_override: bool,
    pub segment_override: Option<Seg>,
    pub rep: RepKind,
    pub lock: bool,
}

impl PrefixState {
    pub fn reset() -> Self {
        PrefixState {
            operand_size_override: false,
            address_size_override: false,
            segment_override: None,
            rep: RepKind::None,
            lock: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepKind {
    None,
    Rep,
    Repne,
}

/// The full architectural state the CPU owns (C1, C4's cache, C11's
/// bookkeeping). Memory and I/O are borrowed, not owned, for the duration of
/// a call into `step()`.
pub struct CpuState {
    pub gpr: GprFile,
    pub eip: u32,
    pub eflags: Eflags,
    pub segments: [SegmentCache; 6],
    pub control: ControlRegisters,
    pub tables: DescriptorTables,
    pub msr: MsrFile,
    pub mode: Mode,
    pub halted: bool,
    pub history: HistoryRing,
    pub prefix: PrefixState,
    pub cycle: u64,
}

impl CpuState {
    pub fn new() -> Self {
        let mut s = CpuState {
            gpr: GprFile::new(),
            eip: 0,
            eflags: Eflags::reset(),
            segments: [SegmentCache::null(); 6],
            control: ControlRegisters {
                cr0: CR0_ET,
                ..Default::default()
            },
            tables: DescriptorTables::default(),
            msr: MsrFile::default(),
            mode: Mode::Real,
            halted: false,
            history: HistoryRing::new(),
            prefix: PrefixState::reset(),
            cycle: 0,
        };
        s.reset(0xF000, 0xFFF0);
        s
    }

    /// `reset(cs, ip)`: the only way to restart a halted CPU. Reinitializes
    /// registers, flags, system registers, prefix state, segment cache, and
    /// the history ring to deterministic values (`spec.md` §5, §8
    /// invariant 10).
    pub fn reset(&mut self, cs: u16, ip: u32) {
        self.gpr = GprFile::new();
        self.eip = ip;
        self.eflags = Eflags::reset();
        for seg in Seg::ALL {
            self.segments[seg as usize] = SegmentCache::null();
        }
        self.segments[Seg::Cs as usize] = SegmentCache::real_mode(cs);
        self.segments[Seg::Ss as usize] = SegmentCache::real_mode(0);
        self.segments[Seg::Ds as usize] = SegmentCache::real_mode(0);
        self.segments[Seg::Es as usize] = SegmentCache::real_mode(0);
        self.segments[Seg::Fs as usize] = SegmentCache::real_mode(0);
        self.segments[Seg::Gs as usize] = SegmentCache::real_mode(0);
        self.control = ControlRegisters {
            cr0: CR0_ET,
            ..Default::default()
        };
        self.tables = DescriptorTables::default();
        self.msr = MsrFile::default();
        self.mode = Mode::Real;
        self.halted = false;
        self.history = HistoryRing::new();
        self.prefix = PrefixState::reset();
        self.cycle = 0;
    }

    pub fn seg(&self, s: Seg) -> &SegmentCache {
        &self.segments[s as usize]
    }

    pub fn seg_mut(&mut self, s: Seg) -> &mut SegmentCache {
        &mut self.segments[s as usize]
    }

    pub fn cpl(&self) -> u8 {
        match self.mode {
            Mode::Real => 0,
            Mode::Vm86 => 3,
            Mode::Protected => self.seg(Seg::Cs).dpl(),
        }
    }

    /// C10: consult CR0.PE to refresh the mode tag. Called after any write
    /// to CR0.
    pub fn update_mode(&mut self) {
        self.mode = if self.control.cr0 & CR0_PE != 0 {
            Mode::Protected
        } else {
            Mode::Real
        };
    }

    pub fn pse_enabled(&self) -> bool {
        self.control.cr4 & CR4_PSE != 0
    }

    pub fn paging_enabled(&self) -> bool {
        self.control.cr0 & CR0_PG != 0
    }

    pub fn wp(&self) -> bool {
        self.control.cr0 & CR0_WP != 0
    }
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

/// A plain-old-data snapshot of user-visible architectural state
/// (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub eip: u32,
    pub eflags: u32,
    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub ss: u16,
    pub mode: Mode,
}
