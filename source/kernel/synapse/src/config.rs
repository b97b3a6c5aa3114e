// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Build-time engine configuration.

/// Default number of live threads the rendezvous arena admits.
pub const DEFAULT_THREAD_CAPACITY: usize = 256;

/// Sizing knobs for the rendezvous engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum live threads; registration beyond it is rejected.
    pub thread_capacity: usize,
}

impl EngineConfig {
    /// Configuration with an explicit thread capacity.
    pub const fn with_capacity(thread_capacity: usize) -> Self {
        Self { thread_capacity }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_THREAD_CAPACITY)
    }
}
