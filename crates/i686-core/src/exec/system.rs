//! System instruction family (C8): descriptor-table pointer loads/stores,
//! CR/MSR access, mode-affecting instructions, CPUID/RDTSC, SYSENTER/
//! SYSEXIT, INT/IRET, and I/O. `spec.md` §4.6 "System" / "Fast system call"
//! / "Interrupts".

use super::{read_reg_index, write_reg_index};
use crate::bus::{IoBus, LinearBus};
use crate::decode::{self, decode_modrm};
use crate::error::Exception;
use crate::gpr::idx;
use crate::state::{
    CpuState, Seg, TableRegister, CR0_PE, MSR_SYSENTER_CS, MSR_SYSENTER_EIP,
    MSR_SYSENTER_ESP,
};
use i686_mmu::MemoryBus;

const CPUID_VENDOR: [u8; 12] = *b"GenuineIntel";

pub fn exec_primary<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    opcode: u8,
) -> Result<Option<()>, Exception> {
    match opcode {
        0xCD => {
            let vector = decode::fetch_u8(state, bus)?;
            Err(Exception::Software(vector))
        }
        0xCF => {
            let operand_size_16 = decode::operand_size(state) == 16;
            crate::interrupt::iret(state, bus, operand_size_16)?;
            Ok(Some(()))
        }
        _ => Ok(None),
    }
}

/// IN/OUT (opcodes E4-E7, EC-EF), referenced directly from `exec::mod`'s
/// primary dispatch (they are not grouped with any other family).
pub fn exec_io<M: MemoryBus, IO: IoBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    io: &mut IO,
    opcode: u8,
) -> Result<(), Exception> {
    let width = decode::operand_size(state);
    match opcode {
        0xE4 => {
            let port = decode::fetch_u8(state, bus)? as u16;
            state.gpr.write8(idx::EAX, io.in_u8(port));
        }
        0xE5 => {
            let port = decode::fetch_u8(state, bus)? as u16;
            let v = if width == 16 {
                io.in_u16(port) as u32
            } else {
                io.in_u32(port)
            };
            write_reg_index(state, idx::EAX, width, v);
        }
        0xE6 => {
            let port = decode::fetch_u8(state, bus)? as u16;
            io.out_u8(port, state.gpr.read8(idx::EAX));
        }
        0xE7 => {
            let port = decode::fetch_u8(state, bus)? as u16;
            let v = read_reg_index(state, idx::EAX, width);
            if width == 16 {
                io.out_u16(port, v as u16);
            } else {
                io.out_u32(port, v);
            }
        }
        0xEC => {
            let port = state.gpr.read16(idx::EDX);
            state.gpr.write8(idx::EAX, io.in_u8(port));
        }
        0xED => {
            let port = state.gpr.read16(idx::EDX);
            let v = if width == 16 {
                io.in_u16(port) as u32
            } else {
                io.in_u32(port)
            };
            write_reg_index(state, idx::EAX, width, v);
        }
        0xEE => {
            let port = state.gpr.read16(idx::EDX);
            io.out_u8(port, state.gpr.read8(idx::EAX));
        }
        _ => {
            let port = state.gpr.read16(idx::EDX);
            let v = read_reg_index(state, idx::EAX, width);
            if width == 16 {
                io.out_u16(port, v as u16);
            } else {
                io.out_u32(port, v);
            }
        }
    }
    Ok(())
}

pub fn exec_secondary<M: MemoryBus, IO: IoBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    _io: &mut IO,
    opcode2: u8,
) -> Result<Option<()>, Exception> {
    match opcode2 {
        0x00 => group6(state, bus),
        0x01 => group7(state, bus),
        0x20 => {
            // MOV r32, CRn: the CR number is the ModR/M reg field, the GPR
            // destination is the rm field (always register-direct).
            let m = decode_modrm(state, bus)?;
            let v = read_cr(state, m.reg);
            write_reg_index(state, m.rm as usize, 32, v);
            Ok(Some(()))
        }
        0x22 => {
            let m = decode_modrm(state, bus)?;
            let v = read_reg_index(state, m.rm as usize, 32);
            write_cr(state, m.reg, v);
            Ok(Some(()))
        }
        0x08 | 0x09 => {
            // INVD, WBINVD: no-op, no operands to consume.
            Ok(Some(()))
        }
        0x30 => {
            wrmsr(state);
            Ok(Some(()))
        }
        0x32 => {
            rdmsr(state);
            Ok(Some(()))
        }
        0x31 => {
            rdtsc(state);
            Ok(Some(()))
        }
        0xA2 => {
            cpuid(state);
            Ok(Some(()))
        }
        0x34 => {
            sysenter(state);
            Ok(Some(()))
        }
        0x35 => {
            sysexit(state);
            Ok(Some(()))
        }
        _ => Ok(None),
    }
}

/// Group 6 (0F 00): SLDT/STR/LLDT/LTR/VERR/VERW. Only the selector
/// round-trip forms are modeled; VERR/VERW and a real LDT/TSS load are out
/// of scope (`DESIGN.md` open question 1).
fn group6<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
) -> Result<Option<()>, Exception> {
    let m = decode_modrm(state, bus)?;
    match m.reg {
        0 => {
            super::write_rm(state, bus, &m, 16, state.tables.ldtr as u32)?;
        }
        1 => {
            super::write_rm(state, bus, &m, 16, state.tables.tr as u32)?;
        }
        2 => {
            let sel = super::read_rm(state, bus, &m, 16)? as u16;
            state.tables.ldtr = sel;
        }
        3 => {
            let sel = super::read_rm(state, bus, &m, 16)? as u16;
            state.tables.tr = sel;
        }
        _ => {}
    }
    Ok(Some(()))
}

/// Group 7 (0F 01): SGDT/SIDT/LGDT/LIDT/SMSW/LMSW/INVLPG.
fn group7<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
) -> Result<Option<()>, Exception> {
    let m = decode_modrm(state, bus)?;
    match m.reg {
        0 => store_table_register(state, bus, &m, state.tables.gdtr),
        1 => store_table_register(state, bus, &m, state.tables.idtr),
        2 => {
            state.tables.gdtr = load_table_register(state, bus, &m)?;
            Ok(Some(()))
        }
        3 => {
            state.tables.idtr = load_table_register(state, bus, &m)?;
            Ok(Some(()))
        }
        4 => {
            let v = state.control.cr0 & 0xFFFF;
            super::write_rm(state, bus, &m, 16, v)?;
            Ok(Some(()))
        }
        6 => {
            let v = super::read_rm(state, bus, &m, 16)?;
            // LMSW can set PE but never clear it (`spec.md` §4.6 "System").
            let pe_was_set = state.control.cr0 & CR0_PE != 0;
            state.control.cr0 = (state.control.cr0 & !0xFFFF) | (v & 0xFFFF);
            if pe_was_set {
                state.control.cr0 |= CR0_PE;
            }
            state.update_mode();
            Ok(Some(()))
        }
        _ => {
            // INVLPG: consumes its memory operand, no TLB to invalidate.
            let _ = m.offset;
            Ok(Some(()))
        }
    }
}

fn store_table_register<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    m: &crate::decode::ModRm,
    reg: TableRegister,
) -> Result<Option<()>, Exception> {
    if !m.is_mem {
        return Err(Exception::InvalidOpcode);
    }
    let seg = decode::modrm_segment(state, m);
    let linear = crate::segmentation::linear(state, seg, m.offset);
    bus.write_u16(linear, reg.limit as u16)?;
    bus.write_u32(linear.wrapping_add(2), reg.base)?;
    Ok(Some(()))
}

fn load_table_register<M: MemoryBus>(
    state: &mut CpuState,
    bus: &mut LinearBus<M>,
    m: &crate::decode::ModRm,
) -> Result<TableRegister, Exception> {
    if !m.is_mem {
        return Err(Exception::InvalidOpcode);
    }
    let seg = decode::modrm_segment(state, m);
    let linear = crate::segmentation::linear(state, seg, m.offset);
    let limit = bus.read_u16(linear)? as u32;
    let base = bus.read_u32(linear.wrapping_add(2))?;
    Ok(TableRegister { base, limit })
}

fn read_cr(state: &CpuState, reg: u8) -> u32 {
    match reg {
        0 => state.control.cr0,
        2 => state.control.cr2,
        3 => state.control.cr3,
        4 => state.control.cr4,
        _ => 0,
    }
}

fn write_cr(state: &mut CpuState, reg: u8, v: u32) {
    match reg {
        0 => {
            state.control.cr0 = v;
            state.update_mode();
        }
        2 => state.control.cr2 = v,
        3 => state.control.cr3 = v,
        4 => state.control.cr4 = v,
        _ => {}
    }
}

fn rdmsr(state: &mut CpuState) {
    let index = state.gpr.read32(idx::ECX);
    let value = match index {
        MSR_SYSENTER_CS => state.msr.sysenter_cs,
        MSR_SYSENTER_ESP => state.msr.sysenter_esp,
        MSR_SYSENTER_EIP => state.msr.sysenter_eip,
        _ => 0,
    };
    state.gpr.write32(idx::EAX, value);
    state.gpr.write32(idx::EDX, 0);
}

fn wrmsr(state: &mut CpuState) {
    let index = state.gpr.read32(idx::ECX);
    let value = state.gpr.read32(idx::EAX);
    match index {
        MSR_SYSENTER_CS => state.msr.sysenter_cs = value,
        MSR_SYSENTER_ESP => state.msr.sysenter_esp = value,
        MSR_SYSENTER_EIP => state.msr.sysenter_eip = value,
        _ => {}
    }
}

fn rdtsc(state: &mut CpuState) {
    let tsc = state.cycle;
    state.gpr.write32(idx::EAX, tsc as u32);
    state.gpr.write32(idx::EDX, (tsc >> 32) as u32);
}

/// CPUID: vendor string for EAX=0, family/model/stepping/features for
/// EAX=1, zeros otherwise (`spec.md` §4.6 "System").
fn cpuid(state: &mut CpuState) {
    let leaf = state.gpr.read32(idx::EAX);
    match leaf {
        0 => {
            state.gpr.write32(idx::EAX, 1);
            state
                .gpr
                .write32(idx::EBX, u32::from_le_bytes(CPUID_VENDOR[0..4].try_into().unwrap()));
            state
                .gpr
                .write32(idx::EDX, u32::from_le_bytes(CPUID_VENDOR[4..8].try_into().unwrap()));
            state
                .gpr
                .write32(idx::ECX, u32::from_le_bytes(CPUID_VENDOR[8..12].try_into().unwrap()));
        }
        1 => {
            // Family 6 (P6), model 10, stepping 0; a minimal feature bitmap
            // (FPU, PAE, MSR, PSE) rather than a full modern feature set.
            let family = 6u32;
            let model = 10u32;
            let stepping = 0u32;
            let signature = (family << 8) | (model << 4) | stepping;
            state.gpr.write32(idx::EAX, signature);
            state.gpr.write32(idx::EBX, 0);
            state.gpr.write32(idx::ECX, 0);
            let features = (1 << 0) /* FPU */ | (1 << 3) /* PSE */ | (1 << 5) /* MSR */ | (1 << 6) /* PAE */;
            state.gpr.write32(idx::EDX, features);
        }
        _ => {
            state.gpr.write32(idx::EAX, 0);
            state.gpr.write32(idx::EBX, 0);
            state.gpr.write32(idx::ECX, 0);
            state.gpr.write32(idx::EDX, 0);
        }
    }
}

/// SYSENTER: CS<-(SYSENTER_CS & ~3), SS<-CS+8, ESP<-SYSENTER_ESP,
/// EIP<-SYSENTER_EIP; forces protected mode and clears VM.
fn sysenter(state: &mut CpuState) {
    let cs_sel = state.msr.sysenter_cs & !3;
    state.segments[Seg::Cs as usize] = crate::state::SegmentCache {
        selector: cs_sel as u16,
        base: 0,
        limit: 0xFFFF_FFFF,
        access: 0x9B,
        flags: 0xC,
        valid: true,
    };
    state.segments[Seg::Ss as usize] = crate::state::SegmentCache {
        selector: (cs_sel + 8) as u16,
        base: 0,
        limit: 0xFFFF_FFFF,
        access: 0x93,
        flags: 0xC,
        valid: true,
    };
    state.gpr.write32(idx::ESP, state.msr.sysenter_esp);
    state.eip = state.msr.sysenter_eip;
    state.control.cr0 |= CR0_PE;
    state.update_mode();
    state.eflags.remove(crate::flags::Eflags::VM);
}

/// SYSEXIT: CS<-(SYSENTER_CS & ~3)+16+3 (arithmetic addition, matched to the
/// source exactly per `DESIGN.md` open question 3), SS<-CS_base+24+3 i.e.
/// the same base plus 8, ESP<-ECX, EIP<-EDX.
fn sysexit(state: &mut CpuState) {
    let cs_sel = (state.msr.sysenter_cs & !3) + 16 + 3;
    let ss_sel = (state.msr.sysenter_cs & !3) + 24 + 3;
    state.segments[Seg::Cs as usize] = crate::state::SegmentCache {
        selector: cs_sel as u16,
        base: 0,
        limit: 0xFFFF_FFFF,
        access: 0xFB,
        flags: 0xC,
        valid: true,
    };
    state.segments[Seg::Ss as usize] = crate::state::SegmentCache {
        selector: ss_sel as u16,
        base: 0,
        limit: 0xFFFF_FFFF,
        access: 0xF3,
        flags: 0xC,
        valid: true,
    };
    state.gpr.write32(idx::ESP, state.gpr.read32(idx::ECX));
    state.eip = state.gpr.read32(idx::EDX);
}
