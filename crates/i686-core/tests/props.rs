#![cfg(not(target_arch = "wasm32"))]

use i686_core::descriptor::{GateDescriptor, GateType, SegmentDescriptor};
use i686_core::flags::{add_flags, sub_flags, Eflags};
use proptest::prelude::*;

fn gate_type() -> impl Strategy<Value = GateType> {
    prop_oneof![
        Just(GateType::Interrupt),
        Just(GateType::Trap),
        Just(GateType::Task),
        Just(GateType::Call),
    ]
}

proptest! {
    // `add_flags`/`sub_flags` must never disagree with a same-width
    // computation carried out at full 64-bit precision: CF is exactly
    // "the wide result didn't fit", OF only ever fires when both operands
    // share a sign the result doesn't, and ZF/SF always match the masked
    // result bits directly.
    #[test]
    fn add_flags_agree_with_wide_arithmetic(a: u32, b: u32, width in prop_oneof![Just(8u32), Just(16u32), Just(32u32)]) {
        let mask: u64 = if width == 32 { u32::MAX as u64 } else { (1u64 << width) - 1 };
        let a = a as u64 & mask;
        let b = b as u64 & mask;
        let (result, flags) = add_flags(a as u32, b as u32, width);
        let wide = a + b;
        prop_assert_eq!(result as u64, wide & mask);
        prop_assert_eq!(flags.contains(Eflags::CF), wide > mask);
        prop_assert_eq!(flags.contains(Eflags::ZF), (wide & mask) == 0);
        let sign_bit = 1u64 << (width - 1);
        prop_assert_eq!(flags.contains(Eflags::SF), (wide & mask) & sign_bit != 0);
    }

    #[test]
    fn sub_flags_agree_with_wide_arithmetic(a: u32, b: u32, width in prop_oneof![Just(8u32), Just(16u32), Just(32u32)]) {
        let mask: u64 = if width == 32 { u32::MAX as u64 } else { (1u64 << width) - 1 };
        let a = a as u64 & mask;
        let b = b as u64 & mask;
        let (result, flags) = sub_flags(a as u32, b as u32, width);
        prop_assert_eq!(result as u64, (a.wrapping_sub(b)) & mask);
        prop_assert_eq!(flags.contains(Eflags::CF), a < b);
        prop_assert_eq!(flags.contains(Eflags::ZF), result == 0);
    }

    // Segment descriptors only carry 20 bits of limit and a 4-bit flags
    // nibble through the wire format; within that range, from_raw(to_raw(d))
    // must reproduce `d` exactly for any base/access byte.
    #[test]
    fn segment_descriptor_roundtrips(
        base: u32,
        limit_raw in 0u32..=0xFFFFF,
        access: u8,
        flags in 0u8..=0xF,
    ) {
        let d = SegmentDescriptor { base, limit_raw, access, flags };
        prop_assert_eq!(SegmentDescriptor::from_raw(&d.to_raw()), d);
    }

    #[test]
    fn gate_descriptor_roundtrips(
        offset: u32,
        selector: u16,
        gate_type in gate_type(),
        dpl in 0u8..=3,
        present: bool,
    ) {
        let g = GateDescriptor { offset, selector, gate_type, dpl, present };
        prop_assert_eq!(GateDescriptor::from_raw(&g.to_raw()), g);
    }
}
