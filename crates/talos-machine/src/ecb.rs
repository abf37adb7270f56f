//! Per-slot enumeration and control blocks.
//!
//! Every occupied slot exposes a 20-byte block at
//! `0x110000 + slot * 0x20` through which guests identify and command the
//! device:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | `+0x00` | b  | device class |
//! | `+0x01` | b  | device subclass |
//! | `+0x02` | w  | device version |
//! | `+0x04` | dw | vendor id |
//! | `+0x08` | w  | command (writes forward to the device) |
//! | `+0x0A` | w  | pending interrupt message (read-only peek) |
//! | `+0x0C` |    | reserved, reads as zero |

use talos_memory::{AddrListener, AddrRange};

use crate::SharedDevice;

pub const ECB_BASE: u32 = 0x0011_0000;
pub const ECB_STRIDE: u32 = 0x20;
pub const ECB_SIZE: u32 = 20;

pub(crate) fn ecb_range(slot: usize) -> AddrRange {
    let base = ECB_BASE + slot as u32 * ECB_STRIDE;
    AddrRange::with_len(base, ECB_SIZE)
}

/// The bus listener serving one slot's block. Shares the device with the
/// slot table; reads of an empty slot never reach here (no listener is
/// registered for empty slots), so every read can consult the device.
pub(crate) struct EnumCtrlBlk {
    dev: SharedDevice,
    base: u32,
}

impl EnumCtrlBlk {
    pub(crate) fn new(dev: SharedDevice, slot: usize) -> Self {
        Self {
            dev,
            base: ECB_BASE + slot as u32 * ECB_STRIDE,
        }
    }
}

impl AddrListener for EnumCtrlBlk {
    fn read_b(&mut self, addr: u32) -> u8 {
        let dev = self.dev.borrow();
        match addr.wrapping_sub(self.base) {
            0x00 => dev.dev_class(),
            0x01 => dev.dev_subclass(),
            0x02 => dev.dev_version() as u8,
            0x03 => (dev.dev_version() >> 8) as u8,
            off @ 0x04..=0x07 => (dev.dev_vendor() >> (8 * (off - 0x04))) as u8,
            0x0A => dev.poll_interrupt().unwrap_or(0) as u8,
            0x0B => (dev.poll_interrupt().unwrap_or(0) >> 8) as u8,
            _ => 0, // the command word is write-only
        }
    }

    fn write_b(&mut self, addr: u32, val: u8) {
        // Byte-wide command writes are honoured with a zero high byte;
        // everything else in the block is read-only.
        if addr.wrapping_sub(self.base) == 0x08 {
            self.dev.borrow_mut().command(val as u16);
        }
    }

    fn write_w(&mut self, addr: u32, val: u16) {
        if addr.wrapping_sub(self.base) == 0x08 {
            self.dev.borrow_mut().command(val);
        }
    }
}
