use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::range::{AddrRange, ListenerId, MapError, RangeMap};
use crate::{ADDR_MASK, MAX_RAM_SIZE, MAX_ROM_SIZE, ROM_BASE, ROM_END};

/// A device window on the physical bus.
///
/// Listeners receive the accesses whose (masked) address falls inside the
/// range they were registered with. Word and dword accesses are delivered
/// whole, not split into byte accesses; the default methods compose the
/// wider accesses from bytes for devices that only care about byte lanes.
pub trait AddrListener {
    fn read_b(&mut self, addr: u32) -> u8;

    fn read_w(&mut self, addr: u32) -> u16 {
        let lo = self.read_b(addr);
        let hi = self.read_b(addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    fn read_dw(&mut self, addr: u32) -> u32 {
        let lo = self.read_w(addr);
        let hi = self.read_w(addr.wrapping_add(2));
        (lo as u32) | ((hi as u32) << 16)
    }

    fn write_b(&mut self, addr: u32, val: u8);

    fn write_w(&mut self, addr: u32, val: u16) {
        let [lo, hi] = val.to_le_bytes();
        self.write_b(addr, lo);
        self.write_b(addr.wrapping_add(1), hi);
    }

    fn write_dw(&mut self, addr: u32, val: u32) {
        self.write_w(addr, val as u16);
        self.write_w(addr.wrapping_add(2), (val >> 16) as u16);
    }
}

/// Listeners are shared between the machine (which owns the peripheral) and
/// the bus map; single-threaded by design, hence `Rc<RefCell<_>>`.
pub type SharedListener = Rc<RefCell<dyn AddrListener>>;

/// The 24-bit physical bus.
///
/// Read dispatch: RAM, then the ROM window, then a covering listener, then
/// zero. Writes go to RAM when the whole access fits below the RAM size
/// (a straddling write drops its RAM portion), and are *also* delivered to
/// a covering listener, in that order; ROM is never written through the
/// bus.
pub struct MemoryBus {
    ram: Box<[u8]>,
    rom: Arc<[u8]>,
    rom_len: usize,
    listeners: RangeMap<SharedListener>,
}

impl MemoryBus {
    /// Creates a bus backed by `ram_size` bytes of zeroed RAM, clamped to
    /// [`MAX_RAM_SIZE`]. No ROM is installed.
    pub fn new(ram_size: usize) -> Self {
        let ram_size = ram_size.min(MAX_RAM_SIZE);
        Self {
            ram: vec![0u8; ram_size].into_boxed_slice(),
            rom: Arc::from(Vec::new()),
            rom_len: 0,
            listeners: RangeMap::new(),
        }
    }

    /// Installs a ROM image, keeping a shared handle to the bytes.
    ///
    /// Returns the number of bytes actually visible in the window: images
    /// larger than [`MAX_ROM_SIZE`] are silently truncated to it.
    pub fn set_rom(&mut self, rom: Arc<[u8]>) -> usize {
        self.rom_len = rom.len().min(MAX_ROM_SIZE);
        self.rom = rom;
        self.rom_len
    }

    pub fn ram_size(&self) -> usize {
        self.ram.len()
    }

    pub fn rom_len(&self) -> usize {
        self.rom_len
    }

    /// Raw RAM, for snapshotting.
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Raw RAM, for restoring a snapshot.
    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    pub fn add_listener(
        &mut self,
        range: AddrRange,
        listener: SharedListener,
    ) -> Result<ListenerId, MapError> {
        self.listeners.add(range, listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    #[inline]
    fn rom_byte(&self, offset: usize) -> u8 {
        if offset < self.rom_len {
            self.rom[offset]
        } else {
            0
        }
    }

    #[inline]
    fn ram_byte(&self, addr: usize) -> u8 {
        self.ram.get(addr).copied().unwrap_or(0)
    }

    pub fn read_b(&self, addr: u32) -> u8 {
        let addr = addr & ADDR_MASK;
        if (addr as usize) < self.ram.len() {
            return self.ram[addr as usize];
        }
        if (ROM_BASE..=ROM_END).contains(&addr) {
            return self.rom_byte((addr - ROM_BASE) as usize);
        }
        if let Some(listener) = self.listeners.lookup(addr) {
            return listener.borrow_mut().read_b(addr);
        }
        0
    }

    pub fn read_w(&self, addr: u32) -> u16 {
        let addr = addr & ADDR_MASK;
        if (addr as usize) < self.ram.len() {
            // Little-endian assembly byte by byte; the second byte of a
            // read straddling the end of RAM reads as zero.
            let lo = self.ram[addr as usize];
            let hi = self.ram_byte(addr as usize + 1);
            return u16::from_le_bytes([lo, hi]);
        }
        if (ROM_BASE..=ROM_END).contains(&addr) {
            let off = (addr - ROM_BASE) as usize;
            return u16::from_le_bytes([self.rom_byte(off), self.rom_byte(off + 1)]);
        }
        if let Some(listener) = self.listeners.lookup(addr) {
            return listener.borrow_mut().read_w(addr);
        }
        0
    }

    pub fn read_dw(&self, addr: u32) -> u32 {
        let addr = addr & ADDR_MASK;
        if (addr as usize) < self.ram.len() {
            let a = addr as usize;
            return u32::from_le_bytes([
                self.ram[a],
                self.ram_byte(a + 1),
                self.ram_byte(a + 2),
                self.ram_byte(a + 3),
            ]);
        }
        if (ROM_BASE..=ROM_END).contains(&addr) {
            let off = (addr - ROM_BASE) as usize;
            return u32::from_le_bytes([
                self.rom_byte(off),
                self.rom_byte(off + 1),
                self.rom_byte(off + 2),
                self.rom_byte(off + 3),
            ]);
        }
        if let Some(listener) = self.listeners.lookup(addr) {
            return listener.borrow_mut().read_dw(addr);
        }
        0
    }

    pub fn write_b(&mut self, addr: u32, val: u8) {
        let addr = addr & ADDR_MASK;
        if (addr as usize) < self.ram.len() {
            self.ram[addr as usize] = val;
        }
        // A listener covering the address observes the write even when RAM
        // also took it; guest-visible ordering is RAM first.
        if let Some(listener) = self.listeners.lookup(addr) {
            listener.borrow_mut().write_b(addr, val);
        }
    }

    pub fn write_w(&mut self, addr: u32, val: u16) {
        let addr = addr & ADDR_MASK;
        let a = addr as usize;
        if a + 2 <= self.ram.len() {
            self.ram[a..a + 2].copy_from_slice(&val.to_le_bytes());
        }
        // A write straddling the end of RAM drops its RAM portion whole.
        if let Some(listener) = self.listeners.lookup(addr) {
            listener.borrow_mut().write_w(addr, val);
        }
    }

    pub fn write_dw(&mut self, addr: u32, val: u32) {
        let addr = addr & ADDR_MASK;
        let a = addr as usize;
        if a + 4 <= self.ram.len() {
            self.ram[a..a + 4].copy_from_slice(&val.to_le_bytes());
        }
        if let Some(listener) = self.listeners.lookup(addr) {
            listener.borrow_mut().write_dw(addr, val);
        }
    }
}
