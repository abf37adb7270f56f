//! Full-stack boot tests: DCPU-16N programs assembled into ROM, executed
//! through the machine's clock loop.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use talos_cpu::Dcpu16n;
use talos_machine::VComputer;

// Instruction builders for the three opcode groups.
fn bin(op: u16, b: u16, a: u16) -> u16 {
    (a << 10) | (b << 5) | op
}

fn unr(op: u16, a: u16) -> u16 {
    (a << 10) | (op << 5)
}

fn lit(v: i32) -> u16 {
    assert!((-1..=30).contains(&v));
    0x20 | ((v + 1) as u16)
}

const NW: u16 = 0x1F;
const HLT: u16 = 0x0000;
const SLP: u16 = 0x01 << 10;

// State-blob offsets (documented layout of the DCPU-16N blob).
const BLOB_R0: usize = 0;
const BLOB_PHASE: usize = 12 * 2 + 16 * 4;
const PHASE_SLEEP: u8 = 8;

fn machine(words: &[u16]) -> VComputer {
    let mut rom = Vec::with_capacity(words.len() * 2);
    for w in words {
        rom.extend_from_slice(&w.to_le_bytes());
    }
    let mut vc = VComputer::new(128 * 1024);
    vc.set_rom(Arc::from(rom.into_boxed_slice()));
    vc.set_cpu(Box::new(Dcpu16n::new()));
    vc
}

fn blob_r0(vc: &VComputer) -> u16 {
    let blob = vc.cpu_state_blob().expect("cpu installed");
    u16::from_le_bytes([blob[BLOB_R0], blob[BLOB_R0 + 1]])
}

fn blob_phase(vc: &VComputer) -> u8 {
    vc.cpu_state_blob().expect("cpu installed")[BLOB_PHASE]
}

#[test]
fn set_add_halt_leaves_two_in_r0_and_sleeps() {
    let mut vc = machine(&[
        bin(0x01, 0x00, lit(1)), // SET r0, 1
        bin(0x02, 0x00, lit(1)), // ADD r0, 1
        HLT,
    ]);

    let t1 = vc.step(0.0);
    assert!(t1 > 0);
    vc.step(0.0);
    assert_eq!(blob_r0(&vc), 2);

    vc.step(0.0);
    assert_eq!(blob_phase(&vc), PHASE_SLEEP);
    assert_eq!(blob_r0(&vc), 2);
}

#[test]
fn step_scales_cpu_ticks_to_base_ticks() {
    // The default core runs at 100 kHz against the 1 MHz base clock, so a
    // 2-tick instruction costs 20 base ticks.
    let mut vc = machine(&[bin(0x01, 0x00, lit(1)), HLT]);
    assert_eq!(vc.step(0.0), 20);
}

#[test]
fn pit_interrupt_reaches_the_handler_with_its_message() {
    // The guest programs the PIT through HWW (ports map to
    // 0x110000 | port): reload 100 at +0, message 0x1234 at +0xA,
    // enable periodic at +8; then sleeps. The handler stores r0 (the
    // message) to logical 0x1100 (physical 0x001100).
    let mut vc = machine(&[
        bin(0x01, 0x1B, NW), // SET SP, 0x2000
        0x2000,
        unr(0x0A, NW), // IAS 0x0020
        0x0020,
        bin(0x1C, NW, NW), // HWW 0xE000, 100  (reload)
        100,
        0xE000,
        bin(0x1C, NW, NW), // HWW 0xE00A, 0x1234  (message)
        0x1234,
        0xE00A,
        bin(0x1C, NW, NW), // HWW 0xE008, 3  (enable | periodic)
        0x0003,
        0xE008,
        SLP,  // 0x001A
        HLT,  // 0x001C
        0,    // pad
        bin(0x01, 0x1E, 0x00), // 0x0020: SET [0x1100], r0
        0x1100,
        HLT,
    ]);

    for _ in 0..50 {
        vc.tick(1000, 0.0);
    }
    assert_eq!(vc.read_w(0x00_1100), 0x1234);
}

#[test]
fn hwr_reads_a_peripheral_port() {
    // Read the PIT message register back through HWR after the host set
    // it through the bus, then store it to RAM for inspection.
    let mut vc = machine(&[
        bin(0x01, 0x01, NW), // SET r1, 0xE00A
        0xE00A,
        bin(0x1D, 0x01, 0x00), // HWR: port in r1, result into r0
        bin(0x01, 0x1E, 0x00), // SET [0x1200], r0
        0x1200,
        HLT,
    ]);
    vc.write_w(0x0011_E00A, 0xBEEF);

    for _ in 0..20 {
        vc.step(0.0);
    }
    assert_eq!(vc.read_w(0x00_1200), 0xBEEF);
}

#[test]
fn guest_and_host_see_the_same_ram() {
    let mut vc = machine(&[
        bin(0x01, 0x1E, NW), // SET [0x1000], 0x55AA
        0x55AA,
        0x1000,
        HLT,
    ]);
    for _ in 0..10 {
        vc.step(0.0);
    }
    assert_eq!(vc.read_w(0x00_1000), 0x55AA);
    assert_eq!(vc.ram()[0x1000], 0xAA);
    assert_eq!(vc.ram()[0x1001], 0x55);
}

#[test]
fn reset_restarts_the_program_but_keeps_ram() {
    let mut vc = machine(&[
        bin(0x01, 0x1E, NW), // SET [0x1000], 0x1111
        0x1111,
        0x1000,
        HLT,
    ]);
    for _ in 0..10 {
        vc.step(0.0);
    }
    assert_eq!(vc.read_w(0x00_1000), 0x1111);

    // Scribble over the mailbox, reset, re-run: RAM survived the reset
    // and the program overwrites the scribble again.
    vc.write_w(0x00_1000, 0xDEAD);
    vc.reset();
    assert_eq!(vc.read_w(0x00_1000), 0xDEAD);
    for _ in 0..10 {
        vc.step(0.0);
    }
    assert_eq!(vc.read_w(0x00_1000), 0x1111);
}
