use i686_mmu::{translate, Access, FlatMemory, MemoryBus, TranslateError};

const PRESENT: u32 = 1 << 0;
const WRITABLE: u32 = 1 << 1;
const USER: u32 = 1 << 2;
const PS: u32 = 1 << 7;

fn setup_4k(mem: &mut FlatMemory, pd_base: u32, pt_base: u32, pte_flags: u32) {
    mem.write_u32(pd_base, pt_base | PRESENT | WRITABLE | USER)
        .unwrap();
    mem.write_u32(pt_base, 0x0005_0000 | pte_flags).unwrap();
}

#[test]
fn identity_translate_4k_page_offset_preserved() {
    let mut mem = FlatMemory::new(1024 * 1024);
    setup_4k(&mut mem, 0x1000, 0x2000, PRESENT | WRITABLE | USER);

    let phys = translate(&mut mem, 0x1000, 0x0000_0abc, Access::Read, 0, false, false).unwrap();
    assert_eq!(phys, 0x0005_0abc);
}

#[test]
fn not_present_pde_faults_with_present_bit_clear() {
    let mut mem = FlatMemory::new(1024 * 1024);
    // PDE left zeroed: not present.
    let err = translate(&mut mem, 0x1000, 0x0000_1000, Access::Read, 0, false, false).unwrap_err();
    match err {
        TranslateError::Fault(info) => {
            assert!(!info.present);
            assert_eq!(info.error_code() & 1, 0);
        }
        _ => panic!("expected page fault"),
    }
}

#[test]
fn user_access_to_supervisor_page_faults() {
    let mut mem = FlatMemory::new(1024 * 1024);
    setup_4k(&mut mem, 0x1000, 0x2000, PRESENT | WRITABLE); // no USER bit
    let err = translate(&mut mem, 0x1000, 0x0000_0000, Access::Read, 3, false, false).unwrap_err();
    match err {
        TranslateError::Fault(info) => {
            assert!(info.present);
            assert!(info.user);
        }
        _ => panic!("expected page fault"),
    }
}

#[test]
fn supervisor_write_to_readonly_page_is_allowed_when_wp_clear() {
    let mut mem = FlatMemory::new(1024 * 1024);
    setup_4k(&mut mem, 0x1000, 0x2000, PRESENT | USER); // read-only
    let phys = translate(&mut mem, 0x1000, 0x0000_0010, Access::Write, 0, false, false).unwrap();
    assert_eq!(phys, 0x0005_0010);
}

#[test]
fn supervisor_write_to_readonly_page_faults_when_wp_set() {
    let mut mem = FlatMemory::new(1024 * 1024);
    setup_4k(&mut mem, 0x1000, 0x2000, PRESENT | USER);
    let err = translate(&mut mem, 0x1000, 0x0000_0010, Access::Write, 0, false, true).unwrap_err();
    assert!(matches!(err, TranslateError::Fault(_)));
}

#[test]
fn four_megabyte_pse_page_uses_pde_directly() {
    let mut mem = FlatMemory::new(16 * 1024 * 1024);
    mem.write_u32(0x1000, 0x0040_0000 | PRESENT | WRITABLE | USER | PS)
        .unwrap();
    let phys = translate(&mut mem, 0x1000, 0x0000_1234, Access::Read, 3, true, false).unwrap();
    assert_eq!(phys, 0x0040_1234);
}

#[test]
fn four_megabyte_pde_ignored_without_pse_enabled() {
    // Without PSE, a PS=1 PDE is walked as if it named a page table; the
    // caller (pse_enabled=false) treats it as a normal PDE whose low bits
    // happen to include the PS flag, which this walker ignores.
    let mut mem = FlatMemory::new(16 * 1024 * 1024);
    mem.write_u32(0x1000, 0x0002_0000 | PRESENT | WRITABLE | USER | PS)
        .unwrap();
    mem.write_u32(0x0002_0000, 0x0005_0000 | PRESENT | WRITABLE | USER)
        .unwrap();
    let phys = translate(&mut mem, 0x1000, 0x0000_0abc, Access::Read, 0, false, false).unwrap();
    assert_eq!(phys, 0x0005_0abc);
}
