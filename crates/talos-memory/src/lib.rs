//! Physical memory model for the Talos virtual computer.
//!
//! The machine exposes a flat 24-bit physical address space: RAM at the
//! bottom, a fixed ROM window at `0x100000`, and everything else routed
//! through registered address listeners (memory-mapped devices). Every
//! access masks its address to 24 bits first; reads of unmapped space
//! return zero and writes to it are dropped, which is observable guest
//! behavior and deliberately not an error.

#![forbid(unsafe_code)]

mod bus;
mod range;

pub use bus::{AddrListener, MemoryBus, SharedListener};
pub use range::{AddrRange, ListenerId, MapError, RangeMap};

/// Physical addresses are 24-bit; every bus access masks with this first.
pub const ADDR_MASK: u32 = 0x00FF_FFFF;

/// Upper bound on RAM size (the RAM region is `0x000000..0x100000`).
pub const MAX_RAM_SIZE: usize = 1024 * 1024;

/// Upper bound on the ROM image; larger images are clamped.
pub const MAX_ROM_SIZE: usize = 32 * 1024;

/// First address of the ROM window.
pub const ROM_BASE: u32 = 0x0010_0000;

/// Last address of the ROM window.
pub const ROM_END: u32 = 0x0010_FFFF;
