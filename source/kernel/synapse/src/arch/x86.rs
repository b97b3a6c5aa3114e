// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Port I/O and halt primitives for 32-bit x86.

/// Writes `value` to I/O port `port`.
///
/// # Safety
/// The caller must own the device behind `port`.
#[inline(always)]
pub unsafe fn outb(port: u16, value: u8) {
    core::arch::asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
}

/// Reads a byte from I/O port `port`.
///
/// # Safety
/// The caller must own the device behind `port`.
#[inline(always)]
pub unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    core::arch::asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
    value
}

/// Halts until the next interrupt.
#[inline(always)]
pub fn wait_for_interrupt() {
    // SAFETY: `hlt` only parks the CPU.
    unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
}
