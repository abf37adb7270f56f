//! Built-in peripherals and the pluggable-device contract for the Talos
//! virtual computer.
//!
//! The built-ins (PIT, RNG, RTC) are owned by the machine and registered
//! directly as bus listeners at fixed windows. Pluggable devices go into
//! one of the 32 slots and additionally expose a 20-byte enumeration and
//! control block through which guests discover and command them.

#![forbid(unsafe_code)]

pub mod disk;
pub mod pit;
pub mod rng;
pub mod rtc;

pub use disk::{Disk, DiskDescriptor, DiskError, DiskType, DISK_MAGIC, HEADER_VERSION};
pub use pit::{Pit, PIT_BASE, PIT_WINDOW};
pub use rng::{Rng, RNG_BASE, RNG_WINDOW};
pub use rtc::{Rtc, RTC_BASE, RTC_WINDOW};

use talos_memory::{AddrListener, AddrRange};

/// Devices run at one tenth of the machine base clock.
pub const DEVICE_CLOCK_HZ: u32 = 100_000;

/// A pluggable device occupying one of the computer's slots.
///
/// A device is a bus listener over its MMIO window plus clock and
/// interrupt hooks. Slot devices are shared between the machine and the
/// bus map (`Rc<RefCell<dyn Device>>`); the machine adapts them into the
/// listener map when they are plugged and tears the listeners down when
/// they are removed.
pub trait Device: AddrListener {
    /// Power-on reset.
    fn reset(&mut self);

    /// True when the device wants [`Device::tick`] at the device clock.
    fn is_sync(&self) -> bool {
        false
    }

    /// Advances the device by `n` device-clock ticks; `delta` is the host
    /// seconds elapsed since the previous call.
    fn tick(&mut self, _n: u32, _delta: f64) {}

    /// The pending interrupt message, if any, without consuming it.
    fn poll_interrupt(&self) -> Option<u16> {
        None
    }

    /// The CPU accepted the pending interrupt; drop the line.
    fn iack(&mut self) {}

    /// A command word written to the slot's control block.
    fn command(&mut self, _cmd: u16) {}

    /// The MMIO window registered with the bus when the device is plugged.
    fn mmio_range(&self) -> AddrRange;

    // Identification, surfaced through the enumeration block.
    fn dev_class(&self) -> u8;
    fn dev_subclass(&self) -> u8;
    fn dev_vendor(&self) -> u32;
    fn dev_version(&self) -> u16;
}
