// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(all(target_arch = "x86", target_os = "none")), forbid(unsafe_code))]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared IPC ABI between the SYNAPSE kernel and userland
//! OWNERS: @runtime
//! PUBLIC API: ThreadId, Envelope, Flags, Message, Operation, Timeout, Rights,
//!             IpcError, Reply, Trap, syscall(), syscall0() and the typed wrappers
//! DEPENDS_ON: no_std, bitflags; x86 `int 0x30` asm (OS only)
//! INVARIANTS: Envelope is four little-endian words; thread address shifts the
//!             task by 8 bits; timeout is out-of-band; codecs never fail

pub mod envelope;
pub mod reply;
pub mod rights;
pub mod thread;
pub mod timeout;
pub mod trap;

#[cfg(test)]
mod tests_prop;

pub use envelope::{flags, Envelope, Flags, Message, Operation};
pub use reply::{IpcError, Reply};
pub use rights::Rights;
pub use thread::ThreadId;
pub use timeout::Timeout;
pub use trap::{syscall, syscall0, Received, Trap};

/// Result type returned by ABI helpers.
pub type Result<T> = core::result::Result<T, IpcError>;

/// Service selectors for messages addressed to [`ThreadId::KERNEL`] (in `payload0`).
pub mod service {
    /// Write up to four bytes from `payload1`; `user_flags & 0x3` is the count minus one.
    pub const CONSOLE_WRITE: u32 = 1;
    /// Terminate the calling thread.
    pub const EXIT_THREAD: u32 = 2;
}
