// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Panic handler for bare-metal kernel images
//! OWNERS: @kernel-team
//! PUBLIC API: panic handler (no_std)
//! DEPENDS_ON: uart::KernelUart, arch::x86
//! INVARIANTS: Never takes the log lock; no allocations; halts forever

use core::fmt::Write;
use core::panic::PanicInfo;

use crate::uart::{KernelUart, COM1};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    // A fresh writer: the panicking path may already hold the log lock.
    let mut w = KernelUart::new(COM1);
    let _ = w.write_str("\nPANIC: ");
    if let Some(location) = info.location() {
        let _ = write!(w, "{}:{}: ", location.file(), location.line());
    }
    let _ = writeln!(w, "{}", info.message());
    loop {
        crate::arch::x86::wait_for_interrupt();
    }
}
