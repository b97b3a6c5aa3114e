// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Deterministic timer knobs shared across the kernel
//! OWNERS: @kernel-team
//! PUBLIC API: fixed_tick_ns(), set_fixed_tick_ns()
//! DEPENDS_ON: core::sync::atomic
//! INVARIANTS: Relaxed atomics sufficient; default values stable across boots
//!
//! Timeouts are compared against a tick-driven clock. Both the PIT handler
//! and host tests advance that clock by the same fixed quantum, so the order
//! in which deadlines expire is reproducible.

use core::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_TICK_NS: u64 = 1_000_000; // 1 ms, PIT programmed at 1 kHz

static FIXED_TICK_NS: AtomicU64 = AtomicU64::new(DEFAULT_TICK_NS);

/// Returns the fixed timer quantum in nanoseconds.
#[inline]
pub fn fixed_tick_ns() -> u64 {
    FIXED_TICK_NS.load(Ordering::Relaxed)
}

/// Overrides the fixed timer quantum in nanoseconds. Zero is ignored.
#[inline]
pub fn set_fixed_tick_ns(value: u64) {
    if value != 0 {
        FIXED_TICK_NS.store(value, Ordering::Relaxed);
    }
}
