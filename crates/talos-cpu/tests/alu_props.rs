//! Property tests for the DCPU-16N ALU, driven through real programs.

use std::sync::Arc;

use proptest::prelude::*;
use talos_cpu::{Cpu, Dcpu16n};
use talos_memory::MemoryBus;

const NW: u16 = 0x1F;
const HLT: u16 = 0x0000;

fn bin(op: u16, b: u16, a: u16) -> u16 {
    (a << 10) | (b << 5) | op
}

/// Runs `op r0, <a>` with `r0 = b` and returns `(r0, EX)`.
fn run_binop(op: u16, b: u16, a: u16) -> (u16, u16) {
    let words = [
        bin(0x01, 0x00, NW), // SET r0, b
        b,
        bin(op, 0x00, NW), // op r0, a
        a,
        HLT,
    ];
    let mut rom = Vec::with_capacity(words.len() * 2);
    for w in words {
        rom.extend_from_slice(&w.to_le_bytes());
    }
    let mut bus = MemoryBus::new(64 * 1024);
    bus.set_rom(Arc::from(rom.into_boxed_slice()));

    let mut cpu = Dcpu16n::new();
    for _ in 0..8 {
        cpu.step(&mut bus);
        if cpu.is_sleeping() {
            break;
        }
    }
    assert!(cpu.is_sleeping(), "program did not halt");
    (cpu.r(0), cpu.ex())
}

proptest! {
    #[test]
    fn add_carry(x: u16, y: u16) {
        let (r, ex) = run_binop(0x02, x, y);
        let wide = x as u32 + y as u32;
        prop_assert_eq!(r, wide as u16);
        prop_assert_eq!(ex, (wide >> 16) as u16);
    }

    #[test]
    fn sub_is_signed_difference(x: u16, y: u16) {
        let (r, ex) = run_binop(0x03, x, y);
        let wide = (x as i16 as i32) - (y as i16 as i32);
        prop_assert_eq!(r, wide as u16);
        prop_assert_eq!(ex, (wide >> 16) as u16);
    }

    #[test]
    fn mul_splits_the_product(x: u16, y: u16) {
        let (r, ex) = run_binop(0x04, x, y);
        let wide = x as u32 * y as u32;
        prop_assert_eq!(r, wide as u16);
        prop_assert_eq!(ex, (wide >> 16) as u16);
    }

    #[test]
    fn dvi_truncates_toward_zero(x: u16, y in proptest::num::u16::ANY.prop_filter("non-zero", |v| *v != 0)) {
        let (r, _ex) = run_binop(0x07, x, y);
        let expected = (x as i16).wrapping_div(y as i16);
        prop_assert_eq!(r as i16, expected);
    }

    #[test]
    fn divide_by_zero_is_zero(x: u16) {
        for op in [0x06u16, 0x07] {
            let (r, ex) = run_binop(op, x, 0);
            prop_assert_eq!(r, 0);
            prop_assert_eq!(ex, 0);
        }
        for op in [0x08u16, 0x09] {
            let (r, _) = run_binop(op, x, 0);
            prop_assert_eq!(r, 0);
        }
    }

    #[test]
    fn mod_matches_unsigned_remainder(x: u16, y in proptest::num::u16::ANY.prop_filter("non-zero", |v| *v != 0)) {
        let (r, _) = run_binop(0x08, x, y);
        prop_assert_eq!(r, x % y);
    }
}
