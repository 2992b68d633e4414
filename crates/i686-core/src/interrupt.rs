//! Interrupt / exception dispatcher (C9): `spec.md` §4.8. Grounded on
//! `libcorevm`'s `deliver_interrupt`/`deliver_interrupt_real` split and on
//! `aero-cpu-core/tests/interrupts.rs`'s expectations for the stack frame
//! shape and double/triple-fault escalation.

use crate::bus::LinearBus;
use crate::descriptor::{GateDescriptor, GateType};
use crate::error::{Exception, Fault};
use crate::flags::Eflags;
use crate::state::{CpuState, Mode, Seg};
use i686_mmu::MemoryBus;

/// Push a 16-bit word onto the stack through SS, independent of the current
/// operand-size prefix: the interrupt frame's CS slot is always a word
/// (`spec.md` §8 property 9), never the generic stack-operand-size push.
fn push16<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    v: u16,
) -> Result<(), Exception> {
    let esp = state.gpr.read32(crate::gpr::idx::ESP);
    let new_esp = esp.wrapping_sub(2);
    state.gpr.write32(crate::gpr::idx::ESP, new_esp);
    let linear = crate::segmentation::linear(state, Seg::Ss, new_esp);
    bus.write_u16(linear, v)
}

fn push32<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    v: u32,
) -> Result<(), Exception> {
    let esp = state.gpr.read32(crate::gpr::idx::ESP);
    let new_esp = esp.wrapping_sub(4);
    state.gpr.write32(crate::gpr::idx::ESP, new_esp);
    let linear = crate::segmentation::linear(state, Seg::Ss, new_esp);
    bus.write_u32(linear, v)
}

fn pop16<M: MemoryBus>(state: &mut CpuState, bus: &mut LinearBus<M>) -> Result<u16, Exception> {
    let esp = state.gpr.read32(crate::gpr::idx::ESP);
    let linear = crate::segmentation::linear(state, Seg::Ss, esp);
    let v = bus.read_u16(linear)?;
    state
        .gpr
        .write32(crate::gpr::idx::ESP, esp.wrapping_add(2));
    Ok(v)
}

fn pop32<M: MemoryBus>(state: &mut CpuState, bus: &mut LinearBus<M>) -> Result<u32, Exception> {
    let esp = state.gpr.read32(crate::gpr::idx::ESP);
    let linear = crate::segmentation::linear(state, Seg::Ss, esp);
    let v = bus.read_u32(linear)?;
    state
        .gpr
        .write32(crate::gpr::idx::ESP, esp.wrapping_add(4));
    Ok(v)
}

/// Dispatch `exc` through the current mode's vector table. On success,
/// CS:EIP and (for interrupt gates) IF have already been updated to point at
/// the handler. Escalates to `#DF` and then to a triple fault per `spec.md`
/// §4.8's recursion rule, which is why this can itself return a `Fault`.
pub fn dispatch<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    exc: Exception,
) -> Result<(), Fault> {
    // `spec.md` §4.4: a page fault latches CR2 to the faulting linear
    // address; this is the one point every dispatch path funnels through.
    if let Exception::PageFault { addr, .. } = exc.clone() {
        state.control.cr2 = addr;
    }
    match state.mode {
        Mode::Real | Mode::Vm86 => dispatch_real(state, bus, exc),
        Mode::Protected => dispatch_protected(state, bus, exc),
    }
}

fn escalate<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    exc: Exception,
) -> Result<(), Fault> {
    if exc == Exception::DoubleFault {
        return Err(Fault::TripleFault(exc));
    }
    dispatch(state, bus, Exception::DoubleFault)
}

fn dispatch_real<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    exc: Exception,
) -> Result<(), Fault> {
    let vector = exc.vector() as u32;
    let vector_addr = vector * 4;
    // The IVT lives at physical 0 and is read through the flat real-mode
    // linear space, which is identity-mapped to physical addresses here
    // since paging is never enabled in real mode.
    let (new_ip, new_cs) = match (
        bus.read_u16(vector_addr),
        bus.read_u16(vector_addr.wrapping_add(2)),
    ) {
        (Ok(ip), Ok(cs)) => (ip, cs),
        _ => return escalate(state, bus, exc),
    };

    let eflags = state.eflags.normalized().bits() as u16;
    let cs = state.seg(Seg::Cs).selector;
    let ip = state.eip as u16;

    let pushed = push16(state, bus, eflags)
        .and_then(|_| push16(state, bus, cs))
        .and_then(|_| push16(state, bus, ip));
    if pushed.is_err() {
        return escalate(state, bus, exc);
    }

    crate::segmentation::load_seg(state, bus, Seg::Cs, new_cs).ok();
    state.eip = new_ip as u32;
    state.eflags.remove(Eflags::IF);
    Ok(())
}

fn dispatch_protected<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    exc: Exception,
) -> Result<(), Fault> {
    let vector = exc.vector() as u32;
    let gate_offset = vector * 8;
    if gate_offset + 7 > state.tables.idtr.limit {
        return escalate(state, bus, exc);
    }

    let entry_linear = state.tables.idtr.base.wrapping_add(gate_offset);
    let (lo, hi) = match (bus.read_u32(entry_linear), bus.read_u32(entry_linear.wrapping_add(4))) {
        (Ok(lo), Ok(hi)) => (lo, hi),
        _ => return escalate(state, bus, exc),
    };
    let mut raw = [0u8; 8];
    raw[0..4].copy_from_slice(&lo.to_le_bytes());
    raw[4..8].copy_from_slice(&hi.to_le_bytes());
    let gate = GateDescriptor::from_raw(&raw);

    if !gate.present {
        return escalate(state, bus, exc);
    }

    let eflags = state.eflags.normalized().bits();
    let cs = state.seg(Seg::Cs).selector;
    let eip = state.eip;

    let pushed = push32(state, bus, eflags)
        .and_then(|_| push16(state, bus, cs))
        .and_then(|_| push32(state, bus, eip))
        .and_then(|_| {
            if exc.has_error_code() {
                push32(state, bus, exc.error_code())
            } else {
                Ok(())
            }
        });
    if pushed.is_err() {
        return escalate(state, bus, exc);
    }

    if crate::segmentation::load_seg_reason(
        state,
        bus,
        Seg::Cs,
        gate.selector,
        crate::segmentation::LoadReason::Code,
    )
    .is_err()
    {
        return escalate(state, bus, exc);
    }
    state.eip = gate.offset;

    if gate.gate_type == GateType::Interrupt {
        state.eflags.remove(Eflags::IF);
    }
    Ok(())
}

/// IRET (`spec.md` §4.6 "Interrupts"): pops EIP, CS, EFLAGS under the
/// current stack operand size. Task-gate and privilege-level-changing
/// returns are out of scope.
pub fn iret<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    operand_size_16: bool,
) -> Result<(), Exception> {
    if operand_size_16 {
        let ip = pop16(state, bus)?;
        let cs = pop16(state, bus)?;
        let fl = pop16(state, bus)?;
        crate::segmentation::load_seg_reason(
            state,
            bus,
            Seg::Cs,
            cs,
            crate::segmentation::LoadReason::Code,
        )?;
        state.eip = ip as u32;
        let preserved_high = state.eflags.bits() & !0xFFFF;
        state.eflags = Eflags::from_bits_truncate(preserved_high | fl as u32).normalized();
    } else {
        let eip = pop32(state, bus)?;
        let cs = pop16(state, bus)?;
        let fl = pop32(state, bus)?;
        crate::segmentation::load_seg_reason(
            state,
            bus,
            Seg::Cs,
            cs,
            crate::segmentation::LoadReason::Code,
        )?;
        state.eip = eip;
        state.eflags = Eflags::from_bits_truncate(fl).normalized();
    }
    Ok(())
}
