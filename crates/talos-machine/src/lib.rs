//! The Talos virtual computer.
//!
//! Composes the physical bus, an installable CPU core, the built-in
//! peripherals (PIT, RNG, RTC) and up to 32 pluggable devices into a
//! single deterministically clocked machine. The host drives everything
//! from its main loop through [`VComputer::tick`] or [`VComputer::step`];
//! no threads are spawned and nothing blocks.
//!
//! Clocking: the base clock is 1 MHz. A batch of `n` base ticks advances
//! the CPU by `n` divided by the base-to-CPU clock ratio, and the
//! peripherals plus every sync device by `n / 10` device ticks. After the
//! clocks run, at most one pending interrupt is offered to the CPU per
//! batch: the PIT outranks everything, then slots in index order; the
//! source gets its acknowledgement only when the CPU takes the message.

#![forbid(unsafe_code)]

mod ecb;

pub use ecb::{ECB_BASE, ECB_SIZE, ECB_STRIDE};
pub use talos_memory::{AddrListener, AddrRange, ListenerId, MapError, SharedListener};

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use talos_cpu::Cpu;
use talos_devices::{Device, Pit, Rng, Rtc, PIT_BASE, PIT_WINDOW, RNG_BASE, RNG_WINDOW, RTC_BASE, RTC_WINDOW};
use talos_memory::MemoryBus;
use tracing::{debug, warn};

use ecb::{ecb_range, EnumCtrlBlk};

/// Machine base clock in Hz.
pub const BASE_CLOCK_HZ: u32 = 1_000_000;

/// Device clock divider: peripherals run at base / 10.
const DEVICE_CLOCK_DIV: u32 = 10;

/// Number of device slots.
pub const MAX_DEVICES: usize = 32;

/// Slot devices are shared between the machine and the bus listener map.
pub type SharedDevice = Rc<RefCell<dyn Device>>;

#[derive(Debug, Clone)]
pub struct VComputerConfig {
    /// RAM size in bytes, clamped to 1 MiB.
    pub ram_size: usize,
    /// Seed for the built-in RNG; fixed default so two machines built from
    /// the same config behave identically.
    pub rng_seed: u32,
}

impl Default for VComputerConfig {
    fn default() -> Self {
        Self {
            ram_size: 128 * 1024,
            rng_seed: 1,
        }
    }
}

struct Slot {
    device: SharedDevice,
    ecb_listener: ListenerId,
    mmio_listener: ListenerId,
}

/// Adapts a shared slot device into the bus listener map.
struct DeviceWindow(SharedDevice);

impl AddrListener for DeviceWindow {
    fn read_b(&mut self, addr: u32) -> u8 {
        self.0.borrow_mut().read_b(addr)
    }

    fn read_w(&mut self, addr: u32) -> u16 {
        self.0.borrow_mut().read_w(addr)
    }

    fn read_dw(&mut self, addr: u32) -> u32 {
        self.0.borrow_mut().read_dw(addr)
    }

    fn write_b(&mut self, addr: u32, val: u8) {
        self.0.borrow_mut().write_b(addr, val)
    }

    fn write_w(&mut self, addr: u32, val: u16) {
        self.0.borrow_mut().write_w(addr, val)
    }

    fn write_dw(&mut self, addr: u32, val: u32) {
        self.0.borrow_mut().write_dw(addr, val)
    }
}

pub struct VComputer {
    bus: MemoryBus,
    cpu: Option<Box<dyn Cpu>>,
    slots: [Option<Slot>; MAX_DEVICES],
    pit: Rc<RefCell<Pit>>,
    rng: Rc<RefCell<Rng>>,
    rtc: Rc<RefCell<Rtc>>,
}

impl VComputer {
    pub fn new(ram_size: usize) -> Self {
        Self::with_config(VComputerConfig {
            ram_size,
            ..VComputerConfig::default()
        })
    }

    pub fn with_config(config: VComputerConfig) -> Self {
        let mut bus = MemoryBus::new(config.ram_size);

        let pit = Rc::new(RefCell::new(Pit::new()));
        let rng = Rc::new(RefCell::new(Rng::new(config.rng_seed)));
        let rtc = Rc::new(RefCell::new(Rtc::new()));

        // The built-in windows are fixed and disjoint; registration
        // cannot fail on an empty map.
        bus.add_listener(AddrRange::with_len(PIT_BASE, PIT_WINDOW), pit.clone())
            .expect("built-in PIT window");
        bus.add_listener(AddrRange::with_len(RTC_BASE, RTC_WINDOW), rtc.clone())
            .expect("built-in RTC window");
        bus.add_listener(AddrRange::with_len(RNG_BASE, RNG_WINDOW), rng.clone())
            .expect("built-in RNG window");

        Self {
            bus,
            cpu: None,
            slots: std::array::from_fn(|_| None),
            pit,
            rng,
            rtc,
        }
    }

    /// Installs the CPU, returning the one it replaces, if any.
    pub fn set_cpu(&mut self, cpu: Box<dyn Cpu>) -> Option<Box<dyn Cpu>> {
        self.cpu.replace(cpu)
    }

    /// Uninstalls and returns the CPU.
    pub fn rm_cpu(&mut self) -> Option<Box<dyn Cpu>> {
        self.cpu.take()
    }

    /// Plugs `device` into `slot`, registering its MMIO window and the
    /// slot's enumeration block with the bus. Fails (returning `false`)
    /// when the slot is out of range or occupied, or when the device's
    /// window collides with an existing one.
    pub fn add_device(&mut self, slot: usize, device: SharedDevice) -> bool {
        if slot >= MAX_DEVICES {
            debug!(slot, "device slot out of range");
            return false;
        }
        if self.slots[slot].is_some() {
            debug!(slot, "device slot already in use");
            return false;
        }

        let range = device.borrow().mmio_range();
        let mmio_listener = match self
            .bus
            .add_listener(range, Rc::new(RefCell::new(DeviceWindow(device.clone()))))
        {
            Ok(id) => id,
            Err(err) => {
                warn!(slot, %err, "cannot map device MMIO window");
                return false;
            }
        };

        let ecb = Rc::new(RefCell::new(EnumCtrlBlk::new(device.clone(), slot)));
        let ecb_listener = match self.bus.add_listener(ecb_range(slot), ecb) {
            Ok(id) => id,
            Err(err) => {
                warn!(slot, %err, "cannot map device enumeration block");
                self.bus.remove_listener(mmio_listener);
                return false;
            }
        };

        self.slots[slot] = Some(Slot {
            device,
            ecb_listener,
            mmio_listener,
        });
        true
    }

    pub fn get_device(&self, slot: usize) -> Option<SharedDevice> {
        self.slots.get(slot)?.as_ref().map(|s| s.device.clone())
    }

    /// Unplugs the device in `slot`, tearing down both of its bus
    /// listeners. The range map never keeps a listener for an absent
    /// device.
    pub fn rm_device(&mut self, slot: usize) {
        if let Some(entry) = self.slots.get_mut(slot).and_then(Option::take) {
            self.bus.remove_listener(entry.mmio_listener);
            self.bus.remove_listener(entry.ecb_listener);
        }
    }

    /// Installs a ROM image; at most 32 KiB of it is visible.
    pub fn set_rom(&mut self, rom: Arc<[u8]>) {
        let total = rom.len();
        let visible = self.bus.set_rom(rom);
        if visible < total {
            warn!(total, visible, "ROM image truncated to the window size");
        }
    }

    /// Resets the CPU and every peripheral and device. RAM is deliberately
    /// not cleared.
    pub fn reset(&mut self) {
        if let Some(cpu) = self.cpu.as_mut() {
            cpu.reset();
        }
        self.pit.borrow_mut().reset();
        self.rng.borrow_mut().reset();
        self.rtc.borrow_mut().reset();
        for slot in self.slots.iter().flatten() {
            slot.device.borrow_mut().reset();
        }
    }

    /// Runs the CPU until one instruction retires (or it faults or
    /// sleeps), keeps the peripherals in step, and returns the base-clock
    /// ticks the instruction consumed.
    pub fn step(&mut self, delta: f64) -> u32 {
        let Some(cpu) = self.cpu.as_mut() else {
            return 0;
        };
        let cpu = cpu.as_mut();
        let divisor = (BASE_CLOCK_HZ / cpu.clock_hz()).max(1);
        let cpu_ticks = cpu.step(&mut self.bus);
        let base_ticks = cpu_ticks.saturating_mul(divisor);

        let dev_ticks = base_ticks / DEVICE_CLOCK_DIV;
        Self::clock_peripherals(
            cpu,
            &mut self.bus,
            &self.pit,
            &self.rtc,
            &self.slots,
            dev_ticks,
            delta,
        );
        base_ticks
    }

    /// Advances the machine by `n` base-clock ticks; `delta` is the host
    /// seconds since the previous call (used by the RTC and passed to sync
    /// devices).
    pub fn tick(&mut self, n: u32, delta: f64) {
        debug_assert!(n > 0);
        let Some(cpu) = self.cpu.as_mut() else {
            return;
        };
        let cpu = cpu.as_mut();
        let divisor = (BASE_CLOCK_HZ / cpu.clock_hz()).max(1);
        cpu.tick(&mut self.bus, n / divisor);

        let dev_ticks = n / DEVICE_CLOCK_DIV;
        Self::clock_peripherals(
            cpu,
            &mut self.bus,
            &self.pit,
            &self.rtc,
            &self.slots,
            dev_ticks,
            delta,
        );
    }

    /// Advances peripherals and sync devices, then offers at most one
    /// pending interrupt to the CPU: the PIT first, then the slots in
    /// index order. The source is acknowledged only when the CPU accepts.
    fn clock_peripherals(
        cpu: &mut dyn Cpu,
        bus: &mut MemoryBus,
        pit: &Rc<RefCell<Pit>>,
        rtc: &Rc<RefCell<Rtc>>,
        slots: &[Option<Slot>; MAX_DEVICES],
        dev_ticks: u32,
        delta: f64,
    ) {
        pit.borrow_mut().tick(dev_ticks);
        rtc.borrow_mut().tick(delta);

        let mut interrupted = false;
        let pending = pit.borrow().poll();
        if let Some(msg) = pending {
            interrupted = true;
            if cpu.send_interrupt(bus, msg) {
                pit.borrow_mut().iack();
            }
        }

        for slot in slots.iter().flatten() {
            let is_sync = slot.device.borrow().is_sync();
            if is_sync {
                slot.device.borrow_mut().tick(dev_ticks, delta);
            }
            if !interrupted {
                let pending = slot.device.borrow().poll_interrupt();
                if let Some(msg) = pending {
                    interrupted = true;
                    if cpu.send_interrupt(bus, msg) {
                        slot.device.borrow_mut().iack();
                    }
                }
            }
        }
    }

    /// Clock rate of the installed CPU, if any.
    pub fn cpu_clock_hz(&self) -> Option<u32> {
        self.cpu.as_ref().map(|cpu| cpu.clock_hz())
    }

    /// The CPU-defined opaque state blob, for snapshotting.
    pub fn cpu_state_blob(&self) -> Option<Vec<u8>> {
        self.cpu.as_ref().map(|cpu| cpu.state_blob())
    }

    pub fn cpu_faulted(&self) -> bool {
        self.cpu.as_ref().is_some_and(|cpu| cpu.faulted())
    }

    // Host-side bus access; identical dispatch rules to the CPU's.

    pub fn read_b(&self, addr: u32) -> u8 {
        self.bus.read_b(addr)
    }

    pub fn read_w(&self, addr: u32) -> u16 {
        self.bus.read_w(addr)
    }

    pub fn read_dw(&self, addr: u32) -> u32 {
        self.bus.read_dw(addr)
    }

    pub fn write_b(&mut self, addr: u32, val: u8) {
        self.bus.write_b(addr, val)
    }

    pub fn write_w(&mut self, addr: u32, val: u16) {
        self.bus.write_w(addr, val)
    }

    pub fn write_dw(&mut self, addr: u32, val: u32) {
        self.bus.write_dw(addr, val)
    }

    /// Registers a host listener window on the bus.
    pub fn add_addr_listener(
        &mut self,
        range: AddrRange,
        listener: SharedListener,
    ) -> Result<ListenerId, MapError> {
        self.bus.add_listener(range, listener)
    }

    pub fn rm_addr_listener(&mut self, id: ListenerId) -> bool {
        self.bus.remove_listener(id)
    }

    pub fn ram_size(&self) -> usize {
        self.bus.ram_size()
    }

    /// Raw RAM for snapshotting.
    pub fn ram(&self) -> &[u8] {
        self.bus.ram()
    }

    /// Raw RAM for restoring a snapshot.
    pub fn ram_mut(&mut self) -> &mut [u8] {
        self.bus.ram_mut()
    }
}

impl Default for VComputer {
    fn default() -> Self {
        Self::with_config(VComputerConfig::default())
    }
}
