// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(clippy::unwrap_used)]

//! CONTEXT: SYNAPSE kernel core: rendezvous IPC for a single-core 32-bit x86 microkernel
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel, ipc::Engine, syscall::dispatch, collaborator traits
//!             (mm::MemoryMapper, sched::Scheduler, hal::{Timer, Console})
//! DEPENDS_ON: synapse-abi, spin, bitflags, static_assertions, linked_list_allocator (OS only)
//! INVARIANTS: One mutator at a time; every kernel service is an IPC call

extern crate alloc;

pub mod arch;
pub mod config;
pub mod determinism;
pub mod diag;
pub mod hal;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod heap;
pub mod ipc;
pub mod kernel;
pub mod mm;
#[cfg(all(target_arch = "x86", target_os = "none", feature = "panic_handler"))]
mod panic;
pub mod sched;
pub mod syscall;
pub mod uart;

pub use kernel::Kernel;
