// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Two-level thread address (task, thread-within-task) packed into one word
//! OWNERS: @runtime
//! PUBLIC API: ThreadId, encode(), decode()
//! DEPENDS_ON: core only
//! INVARIANTS: task id occupies bits 31..8, local id bits 7..0; no validation at this layer

use core::fmt;

/// Number of bits the task id is shifted left by in the packed word.
pub const TASK_SHIFT: u32 = 8;
/// Mask for the 24-bit task id before shifting.
pub const TASK_MASK: u32 = 0x00FF_FFFF;
/// Mask for the 8-bit thread-within-task id.
pub const LOCAL_MASK: u32 = 0xFF;

/// Packs `(task_id, local_id)` into a single word.
///
/// Bits of `task_id` above the 24-bit field are discarded.
#[inline]
pub const fn encode(task_id: u32, local_id: u8) -> u32 {
    ((task_id & TASK_MASK) << TASK_SHIFT) | local_id as u32
}

/// Unpacks a word produced by [`encode`].
#[inline]
pub const fn decode(word: u32) -> (u32, u8) {
    (word >> TASK_SHIFT, (word & LOCAL_MASK) as u8)
}

/// Identifier of exactly one schedulable thread within one task.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ThreadId(u32);

impl ThreadId {
    /// The kernel service endpoint (task 0, local 0).
    pub const KERNEL: Self = Self(0);

    /// Builds an identifier from its two components.
    #[inline]
    pub const fn new(task_id: u32, local_id: u8) -> Self {
        Self(encode(task_id, local_id))
    }

    /// Wraps a packed word without validation.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the packed word.
    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Owning task (address space).
    #[inline]
    pub const fn task(self) -> u32 {
        decode(self.0).0
    }

    /// Thread index within the owning task.
    #[inline]
    pub const fn local(self) -> u8 {
        decode(self.0).1
    }

    /// Returns `true` for the kernel service endpoint.
    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 == Self::KERNEL.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({}.{})", self.task(), self.local())
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.task(), self.local())
    }
}

impl From<u32> for ThreadId {
    fn from(raw: u32) -> Self {
        Self::from_raw(raw)
    }
}

impl From<ThreadId> for u32 {
    fn from(tid: ThreadId) -> Self {
        tid.as_raw()
    }
}
