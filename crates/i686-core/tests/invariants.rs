//! The universally-quantified properties from the testable-properties
//! section: these hold for every run, not just one literal scenario.

use i686_core::bus::IoBus;
use i686_core::descriptor::{GateDescriptor, GateType, SegmentDescriptor};
use i686_core::flags::{add_flags, sub_flags, Eflags};
use i686_core::state::{Mode, Seg};
use i686_core::{Cpu, Exception};
use i686_mmu::{FlatMemory, MemoryBus};

struct NullIo;

impl IoBus for NullIo {
    fn in_u8(&mut self, _port: u16) -> u8 {
        0xFF
    }
    fn out_u8(&mut self, _port: u16, _v: u8) {}
}

fn run_to_halt(cpu: &mut Cpu, mem: &mut FlatMemory, io: &mut NullIo) {
    loop {
        match cpu.step(mem, io) {
            Ok(()) => {}
            Err(_) => break,
        }
    }
}

/// 1. EFLAGS bit 1 is always set on serialization, whether or not the raw
/// value being normalized carries it.
#[test]
fn invariant_eflags_bit1_always_set() {
    assert_ne!(Eflags::from_bits_truncate(0).normalized().bits() & 0x2, 0);

    let cpu = Cpu::new();
    assert_ne!(cpu.get_state().eflags & 0x2, 0);
}

fn write_flat_gdt(mem: &mut FlatMemory, gdt_base: u32) {
    let null = SegmentDescriptor {
        base: 0,
        limit_raw: 0,
        access: 0,
        flags: 0,
    };
    let code = SegmentDescriptor {
        base: 0,
        limit_raw: 0xFFFFF,
        access: 0x9A,
        flags: 0xC,
    };
    let data = SegmentDescriptor {
        base: 0x1_0000,
        limit_raw: 0xFFFFF,
        access: 0x92,
        flags: 0xC,
    };
    mem.load(gdt_base, &null.to_raw());
    mem.load(gdt_base + 8, &code.to_raw());
    mem.load(gdt_base + 16, &data.to_raw());
}

/// 2. Loading a selector in protected mode reloads base/limit from the GDT
/// entry it names; a null selector clears the cache to unusable instead.
#[test]
fn invariant_selector_reload_from_gdt() {
    let mut mem = FlatMemory::new(0x2000);
    write_flat_gdt(&mut mem, 0x1000);

    let mut cpu = Cpu::new();
    cpu.reset(0x0000, 0x0000);
    cpu.enter_protected_mode();
    cpu.set_gdtr(0x1000, 0x17);

    cpu.load_segment_descriptor(&mut mem, Seg::Ds, 0x10).unwrap();
    assert_eq!(cpu.state().seg(Seg::Ds).base, 0x1_0000);
    assert_eq!(cpu.state().seg(Seg::Ds).limit, 0xFFFF_FFFF);
    assert!(cpu.state().seg(Seg::Ds).valid);

    cpu.load_segment_descriptor(&mut mem, Seg::Ds, 0x00).unwrap();
    assert!(!cpu.state().seg(Seg::Ds).valid);
}

/// 3. A not-present PDE latches CR2 to the faulting linear address before
/// the fault is dispatched, even when dispatch itself cannot complete (no
/// IDT installed here, so the page fault escalates all the way to a triple
/// fault; CR2 must still reflect the original address).
#[test]
fn invariant_page_fault_latches_cr2() {
    let mut mem = FlatMemory::new(0x4000);

    // Page directory at 0x2000: entry 0 (covers linear 0..0x3FFFFF, where
    // the code lives) maps to a page table at 0x3000 that identity-maps the
    // first 16 frames; entry 1 (covers linear 0x400000..) is left absent.
    mem.write_u32(0x2000, 0x3000 | 0x7).unwrap();
    for i in 0u32..16 {
        mem.write_u32(0x3000 + i * 4, (i << 12) | 0x7).unwrap();
    }

    mem.load(
        0x0000,
        &[
            0xB8, 0x00, 0x20, 0x00, 0x00, // mov eax, 0x2000
            0x0F, 0x22, 0xD8, // mov cr3, eax
            0x0F, 0x20, 0xC0, // mov eax, cr0
            0x0D, 0x00, 0x00, 0x00, 0x80, // or eax, 0x80000000
            0x0F, 0x22, 0xC0, // mov cr0, eax          (PG=1)
            0xA1, 0x00, 0x00, 0x40, 0x00, // mov eax, [0x400000]   -> #PF
            0xF4, // hlt (never reached)
        ],
    );

    let mut cpu = Cpu::new();
    cpu.reset(0x0000, 0x0000);
    cpu.enter_protected_mode();
    let mut io = NullIo;

    let mut fault = None;
    loop {
        match cpu.step(&mut mem, &mut io) {
            Ok(()) => {}
            Err(e) => {
                fault = Some(e);
                break;
            }
        }
    }

    assert!(matches!(
        fault,
        Some(i686_core::Fault::TripleFault(Exception::DoubleFault))
    ));
    assert_eq!(cpu.state().control.cr2, 0x0040_0000);
}

/// 4. The flag formulas hold at every supported operand width.
#[test]
fn invariant_flag_formulas_across_widths() {
    let (r, f) = add_flags(0xFF, 1, 8);
    assert_eq!(r, 0);
    assert!(f.contains(Eflags::CF));
    assert!(f.contains(Eflags::ZF));

    let (r, f) = add_flags(0x7F, 1, 8);
    assert_eq!(r, 0x80);
    assert!(!f.contains(Eflags::CF));
    assert!(f.contains(Eflags::OF));

    let (r, f) = add_flags(0xFFFF, 1, 16);
    assert_eq!(r, 0);
    assert!(f.contains(Eflags::CF));
    assert!(f.contains(Eflags::ZF));

    let (r, f) = add_flags(0xFFFF_FFFF, 1, 32);
    assert_eq!(r, 0);
    assert!(f.contains(Eflags::CF));
    assert!(f.contains(Eflags::ZF));

    let (r, f) = sub_flags(0, 1, 8);
    assert_eq!(r, 0xFF);
    assert!(f.contains(Eflags::CF));
    assert!(f.contains(Eflags::SF));

    let (r, f) = sub_flags(0, 1, 32);
    assert_eq!(r, 0xFFFF_FFFF);
    assert!(f.contains(Eflags::CF));
}

/// 5. INC/DEC leave CF exactly as they found it.
#[test]
fn invariant_inc_dec_preserve_cf() {
    let mut mem = FlatMemory::new(0x100);
    mem.load(
        0x0000,
        &[
            0xB0, 0xFF, // mov al, 0xff
            0x04, 0x01, // add al, 1      -> CF=1, AL=0
            0x41, // inc ecx             -> must not touch CF
            0x49, // dec ecx             -> must not touch CF
            0xF4, // hlt
        ],
    );
    let mut cpu = Cpu::new();
    cpu.reset(0x0000, 0x0000);
    let mut io = NullIo;
    run_to_halt(&mut cpu, &mut mem, &mut io);

    assert!(cpu.is_halted());
    assert_ne!(cpu.get_state().eflags & 0x1, 0, "CF must still be set");
    assert_eq!(cpu.get_state().ecx, 0);
}

/// RCL/RCR rotate *through* CF, unlike ROL/ROR: with AL=0 and CF=1 going
/// in, RCL must bring that 1 in at the bottom and RCR must bring it in at
/// the top, each leaving CF set to the bit rotated out the other end.
#[test]
fn rcl_rcr_rotate_through_carry() {
    let mut mem = FlatMemory::new(0x100);
    mem.load(
        0x0000,
        &[
            0xB0, 0xFF, // mov al, 0xff
            0x04, 0x01, // add al, 1    -> al=0, cf=1
            0xD0, 0xD0, // rcl al, 1    -> al=1, cf=0
            0xB0, 0xFF, // mov al, 0xff
            0x04, 0x01, // add al, 1    -> al=0, cf=1
            0xD0, 0xD8, // rcr al, 1    -> al=0x80, cf=0
            0xF4, // hlt
        ],
    );
    let mut cpu = Cpu::new();
    cpu.reset(0x0000, 0x0000);
    let mut io = NullIo;

    cpu.step(&mut mem, &mut io).unwrap(); // mov al, 0xff
    cpu.step(&mut mem, &mut io).unwrap(); // add al, 1
    assert_ne!(cpu.get_state().eflags & 0x1, 0, "cf must be set going in");

    cpu.step(&mut mem, &mut io).unwrap(); // rcl al, 1
    assert_eq!(cpu.get_state().eax & 0xFF, 1);
    assert_eq!(cpu.get_state().eflags & 0x1, 0, "cf rotated out to 0");

    cpu.step(&mut mem, &mut io).unwrap(); // mov al, 0xff
    cpu.step(&mut mem, &mut io).unwrap(); // add al, 1
    assert_ne!(cpu.get_state().eflags & 0x1, 0, "cf must be set going in");

    cpu.step(&mut mem, &mut io).unwrap(); // rcr al, 1
    assert_eq!(cpu.get_state().eax & 0xFF, 0x80);
    assert_eq!(cpu.get_state().eflags & 0x1, 0, "cf rotated out to 0");

    cpu.step(&mut mem, &mut io).unwrap(); // hlt
    assert!(cpu.is_halted());
}

/// 6. Segment/gate descriptors round-trip through their raw 8-byte
/// encoding for a variety of bit patterns, not just one flat example.
#[test]
fn invariant_descriptor_roundtrip_variety() {
    for (base, limit_raw, access, flags) in [
        (0u32, 0u32, 0u8, 0u8),
        (0x0010_0000, 0xFFFFF, 0x9A, 0xC),
        (0xFFFF_FFFF & 0x00FF_FFFF, 0x0, 0x92, 0x0),
        (0x1234_5678 & 0x00FF_FFFF, 0xABCDE, 0xF3, 0xF),
    ] {
        let d = SegmentDescriptor {
            base,
            limit_raw,
            access,
            flags,
        };
        let raw = d.to_raw();
        assert_eq!(SegmentDescriptor::from_raw(&raw), d);
    }

    for gate_type in [
        GateType::Interrupt,
        GateType::Trap,
        GateType::Call,
        GateType::Task,
    ] {
        let g = GateDescriptor {
            offset: 0xDEAD_0000,
            selector: 0x0028,
            gate_type,
            dpl: 3,
            present: true,
        };
        assert_eq!(GateDescriptor::from_raw(&g.to_raw()), g);
    }
}

/// 7. REP MOVS transfers exactly ECX elements and leaves ECX at zero and
/// ESI/EDI advanced by exactly that many bytes.
#[test]
fn invariant_rep_movs_exact_count() {
    let mut mem = FlatMemory::new(0x1000);
    mem.load(0x0100, b"HELLO");
    mem.load(
        0x0000,
        &[
            0xBE, 0x00, 0x01, 0x00, 0x00, // mov esi, 0x100
            0xBF, 0x00, 0x02, 0x00, 0x00, // mov edi, 0x200
            0xB9, 0x05, 0x00, 0x00, 0x00, // mov ecx, 5
            0xF3, 0xA4, // rep movsb
            0xF4, // hlt
        ],
    );
    let mut cpu = Cpu::new();
    cpu.reset(0x0000, 0x0000);
    let mut io = NullIo;
    run_to_halt(&mut cpu, &mut mem, &mut io);

    assert!(cpu.is_halted());
    let snap = cpu.get_state();
    assert_eq!(snap.ecx, 0);
    assert_eq!(snap.esi, 0x105);
    assert_eq!(snap.edi, 0x205);
    let mut copied = [0u8; 5];
    for (i, b) in copied.iter_mut().enumerate() {
        *b = mem.read_u8(0x200 + i as u32).unwrap();
    }
    assert_eq!(&copied, b"HELLO");
}

/// 8. SYSENTER/SYSEXIT round-trip through the MSR-derived CS/SS/ESP/EIP
/// formulas.
#[test]
fn invariant_sysenter_sysexit_round_trip() {
    let mut mem = FlatMemory::new(0x1000);
    mem.load(
        0x0000,
        &[
            0xB9, 0x74, 0x01, 0x00, 0x00, // mov ecx, 0x174 (SYSENTER_CS)
            0xB8, 0x08, 0x00, 0x00, 0x00, // mov eax, 0x8
            0x0F, 0x30, // wrmsr
            0xB9, 0x75, 0x01, 0x00, 0x00, // mov ecx, 0x175 (SYSENTER_ESP)
            0xB8, 0x00, 0x30, 0x00, 0x00, // mov eax, 0x3000
            0x0F, 0x30, // wrmsr
            0xB9, 0x76, 0x01, 0x00, 0x00, // mov ecx, 0x176 (SYSENTER_EIP)
            0xB8, 0x00, 0x02, 0x00, 0x00, // mov eax, 0x200
            0x0F, 0x30, // wrmsr
            0x0F, 0x34, // sysenter -> jumps to 0x200
        ],
    );
    mem.load(
        0x0200,
        &[
            0xB9, 0x00, 0x40, 0x00, 0x00, // mov ecx, 0x4000 (new ESP)
            0xBA, 0x00, 0x03, 0x00, 0x00, // mov edx, 0x300 (return EIP)
            0x0F, 0x35, // sysexit
        ],
    );
    mem.load(0x0300, &[0xF4]); // hlt

    let mut cpu = Cpu::new();
    cpu.reset(0x0000, 0x0000);
    let mut io = NullIo;
    run_to_halt(&mut cpu, &mut mem, &mut io);

    assert!(cpu.is_halted());
    let snap = cpu.get_state();
    assert_eq!(snap.mode, Mode::Protected);
    assert_eq!(snap.cs, 27); // (8 & !3) + 16 + 3
    assert_eq!(snap.ss, 35); // (8 & !3) + 24 + 3
    assert_eq!(snap.esp, 0x4000);
    assert_eq!(snap.eip, 0x300);
}

/// 9. Dispatching an exception pushes exactly 10 bytes of frame with no
/// error code, 14 with one.
#[test]
fn invariant_exception_stack_depth() {
    let mut mem = FlatMemory::new(0x2000);
    write_flat_gdt(&mut mem, 0x1000);

    // Two present interrupt gates, both through GDT selector 0x08 (flat
    // code), at vectors 0 (#DE, no error code) and 13 (#GP, error code).
    let gate = GateDescriptor {
        offset: 0x0000,
        selector: 0x08,
        gate_type: GateType::Interrupt,
        dpl: 0,
        present: true,
    };
    mem.load(0x0000, &gate.to_raw());
    mem.load(13 * 8, &gate.to_raw());

    mem.load(
        0x0100,
        &[0xBC, 0x00, 0x10, 0x00, 0x00, 0xF4], // mov esp, 0x1000; hlt
    );

    let mut cpu = Cpu::new();
    cpu.reset(0x0000, 0x0100);
    cpu.enter_protected_mode();
    cpu.set_gdtr(0x1000, 0x17);
    cpu.set_idtr(0x0000, 0x3FF);
    let mut io = NullIo;
    cpu.step(&mut mem, &mut io).unwrap(); // mov esp, 0x1000
    assert!(!cpu.is_halted());

    let esp_before = cpu.get_state().esp;
    cpu.raise_exception(&mut mem, Exception::DivideError).unwrap();
    let esp_after = cpu.get_state().esp;
    assert_eq!(esp_before.wrapping_sub(esp_after), 10);

    let esp_before = cpu.get_state().esp;
    cpu.raise_exception(&mut mem, Exception::GeneralProtection(0))
        .unwrap();
    let esp_after = cpu.get_state().esp;
    assert_eq!(esp_before.wrapping_sub(esp_after), 14);
}

/// 10. `reset(cs, ip)` always returns the CPU to the same deterministic
/// postconditions, regardless of what state preceded it.
#[test]
fn invariant_reset_postconditions() {
    let mut mem = FlatMemory::new(0x100);
    mem.load(0x0000, &[0xB0, 0x42, 0x04, 0x01, 0xF4]); // mov al,0x42; add al,1; hlt
    let mut cpu = Cpu::new();
    cpu.reset(0x0000, 0x0000);
    let mut io = NullIo;
    run_to_halt(&mut cpu, &mut mem, &mut io);
    assert!(cpu.is_halted());

    cpu.reset(0x1234, 0x5678);

    assert!(!cpu.is_halted());
    let snap = cpu.get_state();
    assert_eq!(snap.eip, 0x5678);
    assert_eq!(snap.cs, 0x1234);
    assert_eq!(snap.eax, 0);
    assert_eq!(snap.ecx, 0);
    assert_eq!(snap.esp, 0);
    assert_eq!(snap.eflags, 0x2);
    assert_eq!(snap.mode, Mode::Real);
}
