use criterion::{criterion_group, criterion_main, Criterion};
use i686_core::bus::IoBus;
use i686_core::Cpu;
use i686_mmu::FlatMemory;

struct NullIo;

impl IoBus for NullIo {
    fn in_u8(&mut self, _port: u16) -> u8 {
        0xFF
    }
    fn out_u8(&mut self, _port: u16, _v: u8) {}
}

/// `ADD AL, 1` repeated in place: a four-byte loop (`04 01 EB FC`) so the
/// same instruction retires over and over without ever halting.
fn bench_add_al_imm8(c: &mut Criterion) {
    let mut mem = FlatMemory::new(0x1000);
    mem.load(0x7C00, &[0x04, 0x01, 0xEB, 0xFC]);
    let mut io = NullIo;

    c.bench_function("step_add_al_imm8", |b| {
        let mut cpu = Cpu::new();
        cpu.reset(0x0000, 0x7C00);
        b.iter(|| {
            cpu.step(&mut mem, &mut io).unwrap();
        })
    });
}

criterion_group!(benches, bench_add_al_imm8);
criterion_main!(benches);
