// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction layer traits.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::determinism;

/// Abstraction for a monotonic timer.
pub trait Timer {
    /// Returns the current time in nanoseconds.
    fn now(&self) -> u64;
    /// Programs the next wake-up time in nanoseconds.
    fn set_wakeup(&self, deadline: u64);
}

/// Byte sink behind the console-write kernel service.
pub trait Console {
    /// Writes a single byte.
    fn write_byte(&mut self, byte: u8);
}

/// Console that forwards to the log UART.
#[derive(Clone, Copy, Debug, Default)]
pub struct UartConsole;

impl Console for UartConsole {
    fn write_byte(&mut self, byte: u8) {
        crate::uart::KernelUart::lock().write_byte(byte);
    }
}

/// In-memory console, used on the host.
impl Console for alloc::vec::Vec<u8> {
    fn write_byte(&mut self, byte: u8) {
        self.push(byte);
    }
}

/// Timer advanced by the tick interrupt in fixed quanta.
///
/// The PIT handler calls [`TickTimer::tick`]; there is no free-running counter.
#[derive(Debug)]
pub struct TickTimer {
    now: AtomicU64,
    wakeup: AtomicU64,
}

impl TickTimer {
    /// Creates a timer reading zero.
    pub const fn new() -> Self {
        Self { now: AtomicU64::new(0), wakeup: AtomicU64::new(u64::MAX) }
    }

    /// Advances the clock by one quantum and returns the new time.
    pub fn tick(&self) -> u64 {
        self.advance(determinism::fixed_tick_ns())
    }

    /// Advances the clock by `ns` and returns the new time.
    pub fn advance(&self, ns: u64) -> u64 {
        self.now.fetch_add(ns, Ordering::Relaxed).saturating_add(ns)
    }

    /// Last programmed wake-up, `u64::MAX` when none.
    pub fn wakeup(&self) -> u64 {
        self.wakeup.load(Ordering::Relaxed)
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for TickTimer {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    fn set_wakeup(&self, deadline: u64) {
        self.wakeup.store(deadline, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_advances_by_fixed_quantum() {
        let timer = TickTimer::new();
        let t = timer.tick();
        assert_eq!(t, determinism::fixed_tick_ns());
        assert_eq!(timer.now(), t);
        assert_eq!(timer.advance(5), t + 5);
    }

    #[test]
    fn wakeup_is_recorded() {
        let timer = TickTimer::new();
        assert_eq!(timer.wakeup(), u64::MAX);
        timer.set_wakeup(42);
        assert_eq!(timer.wakeup(), 42);
    }
}
