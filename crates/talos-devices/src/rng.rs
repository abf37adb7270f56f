//! Pseudorandom number port.
//!
//! A 32-bit xorshift generator behind a dword window: every read returns
//! a freshly generated value, any write reseeds the state. Deterministic
//! from its seed by design (snapshots and replay depend on it); this is
//! emulated hardware, not a security primitive.

use talos_memory::AddrListener;

pub const RNG_BASE: u32 = 0x0011_E040;
pub const RNG_WINDOW: u32 = 0x4;

/// Substitute state for a zero seed; xorshift has a fixed point at zero.
const SEED_FIXUP: u32 = 0x2545_F491;

#[derive(Debug)]
pub struct Rng {
    seed: u32,
    state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        let mut rng = Self { seed, state: 0 };
        rng.reset();
        rng
    }

    /// Returns to the last programmed seed.
    pub fn reset(&mut self) {
        self.state = if self.seed == 0 { SEED_FIXUP } else { self.seed };
    }

    pub fn reseed(&mut self, seed: u32) {
        self.seed = seed;
        self.reset();
    }

    fn next(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}

impl AddrListener for Rng {
    fn read_b(&mut self, _addr: u32) -> u8 {
        self.next() as u8
    }

    fn read_w(&mut self, _addr: u32) -> u16 {
        self.next() as u16
    }

    fn read_dw(&mut self, _addr: u32) -> u32 {
        self.next()
    }

    fn write_b(&mut self, _addr: u32, val: u8) {
        self.reseed(val as u32);
    }

    fn write_w(&mut self, _addr: u32, val: u16) {
        self.reseed(val as u32);
    }

    fn write_dw(&mut self, _addr: u32, val: u32) {
        self.reseed(val);
    }
}
