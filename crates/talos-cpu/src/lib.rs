//! CPU engines for the Talos virtual computer.
//!
//! The machine installs at most one CPU and drives it through the [`Cpu`]
//! trait. The bus is passed by handle into every call instead of being
//! stored on the core, which keeps the CPU/computer ownership graph
//! acyclic.

#![forbid(unsafe_code)]

pub mod dcpu16n;
pub mod tr3200;

pub use dcpu16n::Dcpu16n;

use talos_memory::MemoryBus;

/// A CPU core installable in the virtual computer.
pub trait Cpu {
    /// Core clock rate in Hz. The orchestrator divides the base clock by
    /// this to decide how many CPU ticks a batch of base ticks is worth.
    fn clock_hz(&self) -> u32;

    /// Power-on reset of the architectural state. Does not touch the bus.
    fn reset(&mut self);

    /// Advances the core by `n` CPU clock ticks.
    fn tick(&mut self, bus: &mut MemoryBus, n: u32);

    /// Runs until one instruction retires (or the core faults or sleeps);
    /// returns the CPU ticks consumed.
    fn step(&mut self, bus: &mut MemoryBus) -> u32;

    /// Offers an interrupt message to the core. Returns `true` when the
    /// message was consumed (serviced, queued, or deliberately discarded);
    /// the caller acknowledges the source only on `true`.
    fn send_interrupt(&mut self, bus: &mut MemoryBus, msg: u16) -> bool;

    /// Catastrophic-fault latch; once set, only [`Cpu::reset`] clears it.
    fn faulted(&self) -> bool;

    /// Serializes the architectural state into an opaque, CPU-defined
    /// blob. The layout is stable per engine and documented there.
    fn state_blob(&self) -> Vec<u8>;
}
