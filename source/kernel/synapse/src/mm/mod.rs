// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Memory-mapper collaborator interface and the in-kernel page-rights ledger
//! OWNERS: @kernel-mm-team
//! PUBLIC API: MemoryMapper, MapError, PteFlags, PageRightsTable, PAGE_SIZE, PAGE_LIMIT
//! DEPENDS_ON: synapse_abi::Rights, bitflags
//! INVARIANTS: install_mapping is all-or-nothing; rights are looked up, never cached

extern crate alloc;

use alloc::collections::BTreeMap;
use bitflags::bitflags;
use synapse_abi::Rights;

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Number of page indices in a 32-bit address space.
pub const PAGE_LIMIT: u32 = 1 << 20;

/// Task (address space) identifier, the upper 24 bits of a thread address.
pub type TaskId = u32;

/// Error returned by mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Range runs past the end of the address space.
    OutOfRange,
    /// Mapping overlaps an existing entry in the destination.
    Overlap,
    /// Provided rights are not suitable for installing a mapping.
    InvalidFlags,
    /// No frames left to back the mapping.
    OutOfMemory,
}

impl core::fmt::Display for MapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

/// Page-rights lookup and mapping installation, owned outside the IPC core.
pub trait MemoryMapper {
    /// Current rights of `task` over page `page`, or `None` if unmapped.
    fn rights_of(&self, task: TaskId, page: u32) -> Option<Rights>;

    /// Maps `count` pages from `first` into `dest` with `rights`.
    fn install_mapping(&mut self, dest: TaskId, first: u32, count: u32, rights: Rights) -> Result<(), MapError>;
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Flags stored in a 32-bit (non-PAE) x86 page-table entry.
    pub struct PteFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
    }
}

impl PteFlags {
    /// Encodes user-page rights. Without PAE there is no NX bit, so every
    /// present page is executable and `EXECUTABLE` needs no bit of its own.
    pub fn from_rights(rights: Rights) -> Self {
        let mut flags = PteFlags::PRESENT | PteFlags::USER;
        if rights.contains(Rights::WRITABLE) {
            flags |= PteFlags::WRITABLE;
        }
        flags
    }
}

/// Per-task page → rights ledger backing the memory mapper on this kernel.
#[derive(Debug, Default)]
pub struct PageRightsTable {
    pages: BTreeMap<(TaskId, u32), Rights>,
    frame_budget: Option<usize>,
    #[cfg(feature = "failpoints")]
    deny_next_install: bool,
}

impl PageRightsTable {
    /// Creates an empty ledger with unlimited frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger that can back at most `frames` pages in total.
    pub fn with_frame_budget(frames: usize) -> Self {
        Self { frame_budget: Some(frames), ..Self::default() }
    }

    /// Records ownership of a fresh range for `task` (loader and bootstrap path).
    pub fn map_range(&mut self, task: TaskId, first: u32, count: u32, rights: Rights) -> Result<(), MapError> {
        let end = Self::checked_end(first, count)?;
        if rights.is_empty() {
            return Err(MapError::InvalidFlags);
        }
        if (first..end).any(|page| self.pages.contains_key(&(task, page))) {
            return Err(MapError::Overlap);
        }
        if let Some(budget) = self.frame_budget {
            if self.pages.len() + count as usize > budget {
                return Err(MapError::OutOfMemory);
            }
        }
        for page in first..end {
            self.pages.insert((task, page), rights);
        }
        Ok(())
    }

    /// Replaces the rights on one page; returns the previous rights.
    pub fn set_rights(&mut self, task: TaskId, page: u32, rights: Rights) -> Option<Rights> {
        self.pages.get_mut(&(task, page)).map(|slot| core::mem::replace(slot, rights))
    }

    /// Removes one page from `task`.
    pub fn unmap(&mut self, task: TaskId, page: u32) -> Option<Rights> {
        self.pages.remove(&(task, page))
    }

    /// Pages mapped in `task`, in ascending order.
    pub fn pages_of(&self, task: TaskId) -> impl Iterator<Item = (u32, Rights)> + '_ {
        self.pages.range((task, 0)..=(task, u32::MAX)).map(|(&(_, page), &rights)| (page, rights))
    }

    /// Hardware encoding of one page, if mapped.
    pub fn pte_flags(&self, task: TaskId, page: u32) -> Option<PteFlags> {
        self.pages.get(&(task, page)).copied().map(PteFlags::from_rights)
    }

    /// Makes the next `install_mapping` fail with `OutOfMemory`.
    #[cfg(feature = "failpoints")]
    pub fn deny_next_install(&mut self) {
        self.deny_next_install = true;
    }

    fn checked_end(first: u32, count: u32) -> Result<u32, MapError> {
        match first.checked_add(count) {
            Some(end) if end <= PAGE_LIMIT => Ok(end),
            _ => Err(MapError::OutOfRange),
        }
    }
}

impl MemoryMapper for PageRightsTable {
    fn rights_of(&self, task: TaskId, page: u32) -> Option<Rights> {
        self.pages.get(&(task, page)).copied()
    }

    fn install_mapping(&mut self, dest: TaskId, first: u32, count: u32, rights: Rights) -> Result<(), MapError> {
        #[cfg(feature = "failpoints")]
        if core::mem::take(&mut self.deny_next_install) {
            return Err(MapError::OutOfMemory);
        }
        self.map_range(dest, first, count, rights)
    }
}

#[cfg(test)]
mod tests;
