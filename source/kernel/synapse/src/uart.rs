// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Minimal 16550 UART support for kernel logs.
//!
//! On bare-metal x86 the UART is COM1 driven through port I/O. Host builds
//! capture the bytes in memory instead so tests can inspect log output.

use core::fmt::{self, Write};
use spin::Mutex;

/// I/O port base of COM1.
pub const COM1: u16 = 0x3F8;
/// I/O port base of COM2 (debug mirror).
#[cfg_attr(not(feature = "debug_uart"), allow(dead_code))]
pub const COM2: u16 = 0x2F8;

#[cfg_attr(not(all(target_arch = "x86", target_os = "none")), allow(dead_code))]
const UART_TX: u16 = 0x0;
#[cfg_attr(not(all(target_arch = "x86", target_os = "none")), allow(dead_code))]
const UART_LSR: u16 = 0x5;
#[cfg_attr(not(all(target_arch = "x86", target_os = "none")), allow(dead_code))]
const LSR_TX_IDLE: u8 = 1 << 5;

/// Global UART writer used for kernel logs.
static UART0: Mutex<KernelUart> = Mutex::new(KernelUart::new(COM1));

/// UART implementation capable of formatted writes.
#[derive(Clone, Copy)]
pub struct KernelUart {
    port: u16,
}

impl KernelUart {
    /// Creates a UART rooted at I/O port `port`.
    pub const fn new(port: u16) -> Self {
        Self { port }
    }

    /// Returns a guard for the log UART singleton.
    pub fn lock() -> spin::MutexGuard<'static, KernelUart> {
        UART0.lock()
    }

    /// Transmits one byte, translating `\n` to `\r\n`.
    pub fn write_byte(&self, byte: u8) {
        if byte == b'\n' {
            self.transmit(b'\r');
        }
        self.transmit(byte);
    }

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    fn transmit(&self, byte: u8) {
        // SAFETY: COM ports are fixed legacy I/O ports owned by the kernel.
        unsafe {
            while crate::arch::x86::inb(self.port + UART_LSR) & LSR_TX_IDLE == 0 {}
            crate::arch::x86::outb(self.port + UART_TX, byte);
            #[cfg(feature = "debug_uart")]
            if self.port == COM1 {
                crate::arch::x86::outb(COM2 + UART_TX, byte);
            }
        }
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    fn transmit(&self, byte: u8) {
        if byte == b'\r' {
            return;
        }
        let _ = self.port;
        host::push(byte);
    }
}

impl Write for KernelUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod host {
    use alloc::vec::Vec;
    use spin::Mutex;

    const CAPTURE_LIMIT: usize = 64 * 1024;

    static CAPTURE: Mutex<Vec<u8>> = Mutex::new(Vec::new());

    pub(super) fn push(byte: u8) {
        let mut buf = CAPTURE.lock();
        if buf.len() >= CAPTURE_LIMIT {
            buf.drain(..CAPTURE_LIMIT / 2);
        }
        buf.push(byte);
    }

    pub(super) fn take() -> Vec<u8> {
        core::mem::take(&mut *CAPTURE.lock())
    }
}

/// Drains the host capture buffer (host builds only).
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn take_captured() -> alloc::string::String {
    alloc::string::String::from_utf8_lossy(&host::take()).into_owned()
}
