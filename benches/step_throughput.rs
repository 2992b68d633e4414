use criterion::{criterion_group, criterion_main, Criterion};
use i686_emu::{Cpu, IoBus};
use i686_mmu::FlatMemory;

struct NullIo;

impl IoBus for NullIo {
    fn in_u8(&mut self, _port: u16) -> u8 {
        0xFF
    }
    fn out_u8(&mut self, _port: u16, _v: u8) {}
}

/// Scenario C's loop body (`spec.md` §8) without the UART write: `mov ecx,N;
/// out dx,al; dec ecx; jnz back; hlt`, run to completion each iteration.
fn bench_loop_scenario(c: &mut Criterion) {
    let mut io = NullIo;
    let code: &[u8] = &[
        0xB9, 0x64, 0x00, 0x00, 0x00, // mov ecx, 100
        0xBA, 0xF8, 0x03, 0x00, 0x00, // mov edx, 0x3F8
        0xB0, 0x41, // mov al, 'A'
        0xEE, // out dx, al
        0x49, // dec ecx
        0x75, 0xFA, // jnz back (to the `out`)
        0xF4, // hlt
    ];

    c.bench_function("step_loop_scenario_100_iters", |b| {
        b.iter(|| {
            let mut mem = FlatMemory::new(0x1_0000);
            mem.load(0x7C00, code);
            let mut cpu = Cpu::new();
            cpu.reset(0x0000, 0x7C00);
            loop {
                match cpu.step(&mut mem, &mut io) {
                    Ok(()) => {}
                    Err(_) => break,
                }
            }
        })
    });
}

criterion_group!(benches, bench_loop_scenario);
criterion_main!(benches);
