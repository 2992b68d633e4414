//! `Cpu` (C1 assembly) and the step driver (C11). `spec.md` §4.9, §6.
//! Grounded on `libcorevm::cpu::Cpu` for the overall shape (`reset`,
//! `step`/`run`, mode bookkeeping) adapted to this core's borrowed-bus
//! calling convention (`spec.md` §5: memory and I/O are borrowed for the
//! duration of a single access, never owned by the CPU).

use crate::bus::{IoBus, LinearBus};
use crate::error::{Exception, Fault};
use crate::exec;
use crate::history::{Diagnostic, RetiredInstruction};
use crate::segmentation;
use crate::state::{CpuState, Seg, SegmentCache, StateSnapshot, CR0_PE};
use i686_mmu::MemoryBus;

/// The CPU: owns all architectural state. Memory and the I/O bus are
/// supplied per-`step` rather than stored, so the same `Cpu` can be driven
/// against different backing stores without re-wiring anything.
pub struct Cpu {
    state: CpuState,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            state: CpuState::new(),
        }
    }

    /// `reset(cs, ip)`: the only way to restart a halted CPU.
    pub fn reset(&mut self, cs: u16, ip: u32) {
        self.state.reset(cs, ip);
    }

    pub fn get_state(&self) -> StateSnapshot {
        use crate::gpr::idx;
        let g = &self.state.gpr;
        StateSnapshot {
            eax: g.read32(idx::EAX),
            ebx: g.read32(idx::EBX),
            ecx: g.read32(idx::ECX),
            edx: g.read32(idx::EDX),
            esi: g.read32(idx::ESI),
            edi: g.read32(idx::EDI),
            ebp: g.read32(idx::EBP),
            esp: g.read32(idx::ESP),
            eip: self.state.eip,
            eflags: self.state.eflags.normalized().bits(),
            cs: self.state.seg(Seg::Cs).selector,
            ds: self.state.seg(Seg::Ds).selector,
            es: self.state.seg(Seg::Es).selector,
            fs: self.state.seg(Seg::Fs).selector,
            gs: self.state.seg(Seg::Gs).selector,
            ss: self.state.seg(Seg::Ss).selector,
            mode: self.state.mode,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted
    }

    /// `get_effective_address(seg, off)`: expose linear-address formation
    /// without performing a memory access.
    pub fn get_effective_address(&self, seg: Seg, offset: u32) -> u32 {
        segmentation::effective_address(&self.state, seg, offset)
    }

    /// `load_segment_descriptor(sel, cache_index)`: force-load a selector
    /// into the named segment cache entry, bypassing instruction decode.
    /// Used by embedders bootstrapping a protected-mode guest's initial
    /// segment state directly rather than via MOV-to-Sreg.
    pub fn load_segment_descriptor<M: MemoryBus>(
        &mut self,
        mem: &mut M,
        seg: Seg,
        selector: u16,
    ) -> Result<(), Exception> {
        let mut bus = LinearBus::new(mem);
        bus.sync(&self.state);
        segmentation::load_seg(&mut self.state, &mut bus, seg, selector)
    }

    /// Force CR0.PE=1 and refresh the mode tag, without requiring the
    /// architectural LGDT-then-CR0-write-then-far-JMP sequence (`spec.md`
    /// §4.7: "the core models the bookkeeping but does not require a far
    /// JMP to reload CS").
    pub fn enter_protected_mode(&mut self) {
        self.state.control.cr0 |= CR0_PE;
        self.state.update_mode();
    }

    /// Force CR0.PE=0 and refresh the mode tag.
    pub fn enter_real_mode(&mut self) {
        self.state.control.cr0 &= !CR0_PE;
        self.state.update_mode();
        for seg in Seg::ALL {
            let selector = self.state.seg(seg).selector;
            *self.state.seg_mut(seg) = SegmentCache::real_mode(selector);
        }
    }

    /// `dispatch_interrupt(vec)`: deliver an externally-sourced interrupt
    /// vector (e.g. a PIC/APIC IRQ) through the same C9 machinery used for
    /// architectural exceptions and `INT imm8`.
    pub fn dispatch_interrupt<M: MemoryBus>(
        &mut self,
        mem: &mut M,
        vector: u8,
    ) -> Result<(), Fault> {
        let mut bus = LinearBus::new(mem);
        bus.sync(&self.state);
        crate::interrupt::dispatch(&mut self.state, &mut bus, Exception::Software(vector))
    }

    /// `raise_exception(exc, error_code?)`: force dispatch of a specific
    /// architectural exception, for embedder-driven fault injection
    /// (distinct from a fault the executor raised mid-instruction).
    pub fn raise_exception<M: MemoryBus>(
        &mut self,
        mem: &mut M,
        exc: Exception,
    ) -> Result<(), Fault> {
        let mut bus = LinearBus::new(mem);
        bus.sync(&self.state);
        crate::interrupt::dispatch(&mut self.state, &mut bus, exc)
    }

    /// Parse and install a GDT/IDT-style table register directly, for
    /// embedders that want to set up descriptor tables without executing
    /// LGDT/LIDT.
    pub fn set_gdtr(&mut self, base: u32, limit: u32) {
        self.state.tables.gdtr = crate::state::TableRegister { base, limit };
    }

    pub fn set_idtr(&mut self, base: u32, limit: u32) {
        self.state.tables.idtr = crate::state::TableRegister { base, limit };
    }

    fn take_diagnostic(&self, opcode: u8, opcode2: Option<u8>) -> Box<Diagnostic> {
        use crate::gpr::idx;
        let g = &self.state.gpr;
        Box::new(Diagnostic {
            entries: self.state.history.iter_oldest_first().copied().collect(),
            eax: g.read32(idx::EAX),
            ebx: g.read32(idx::EBX),
            ecx: g.read32(idx::ECX),
            edx: g.read32(idx::EDX),
            esi: g.read32(idx::ESI),
            edi: g.read32(idx::EDI),
            ebp: g.read32(idx::EBP),
            esp: g.read32(idx::ESP),
            eip: self.state.eip,
            cs: self.state.seg(Seg::Cs).selector,
            fault_opcode: opcode,
            fault_opcode2: opcode2,
        })
    }

    /// `step() -> () | fault` (`spec.md` §4.9): execute exactly one
    /// instruction. Architectural exceptions raised mid-instruction are
    /// dispatched through the vector table and do not themselves end the
    /// step with an error; only a true double/triple fault, an unhandled
    /// opcode, or a halted CPU surface as `Fault`.
    pub fn step<M: MemoryBus, IO: IoBus>(&mut self, mem: &mut M, io: &mut IO) -> Result<(), Fault> {
        if self.state.halted {
            return Err(Fault::Halted);
        }

        self.state.prefix = crate::state::PrefixState::reset();

        let mut bus = LinearBus::new(mem);
        bus.sync(&self.state);

        let start_cs = self.state.seg(Seg::Cs).selector;
        let start_eip = self.state.eip;

        let result = self.run_one(&mut bus, io);

        match result {
            Ok((opcode, opcode2)) => {
                self.state.history.push(RetiredInstruction {
                    cs: start_cs,
                    eip: start_eip,
                    opcode,
                    opcode2,
                });
                self.state.cycle = self.state.cycle.wrapping_add(1);
                Ok(())
            }
            Err((Exception::InvalidOpcode, opcode, opcode2)) => {
                // Decoder fell through to an opcode this core does not
                // implement: a terminal diagnostic, not a dispatchable #UD
                // (`spec.md` §4.6/§7: "every opcode that falls through the
                // decoder dumps the history ring and halts").
                self.state.halted = true;
                Err(Fault::UnhandledOpcode(self.take_diagnostic(opcode, opcode2)))
            }
            Err((Exception::MemoryFault(e), _, _)) => {
                // Not an architectural exception at all: the embedder's own
                // backing store faulted. Never dispatched through the
                // IVT/IDT; surfaces unchanged (`spec.md` §7).
                Err(Fault::Memory(e))
            }
            Err((exc, _, _)) => {
                crate::interrupt::dispatch(&mut self.state, &mut bus, exc)?;
                self.state.cycle = self.state.cycle.wrapping_add(1);
                Ok(())
            }
        }
    }

    /// Fetch and dispatch exactly one instruction, returning the opcode
    /// pair retired (for the history ring) on success, or on failure, the
    /// exception plus the opcode pair that raised it.
    #[allow(clippy::type_complexity)]
    fn run_one<M: MemoryBus, IO: IoBus>(
        &mut self,
        bus: &mut LinearBus<M>,
        io: &mut IO,
    ) -> Result<(u8, Option<u8>), (Exception, u8, Option<u8>)> {
        let fetch = crate::decode::consume_prefixes(&mut self.state, bus)
            .and_then(|_| crate::decode::fetch_u8(&mut self.state, bus));
        let opcode = match fetch {
            Ok(op) => op,
            Err(e) => return Err((e, 0, None)),
        };

        match exec::dispatch(&mut self.state, bus, io, opcode) {
            Ok(opcode2) => Ok((opcode, opcode2)),
            // A failure inside `dispatch` doesn't report back whether a
            // secondary opcode byte was consumed before the fault; the
            // diagnostic is still useful with just the primary/escape byte.
            Err(e) => Err((e, opcode, None)),
        }
    }

    pub fn state(&self) -> &CpuState {
        &self.state
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
