// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unit tests for the page-rights ledger
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; verify range, flags, overlap, budget, PTE encoding

use super::{MapError, MemoryMapper, PageRightsTable, PteFlags, PAGE_LIMIT};
use synapse_abi::Rights;

#[test]
fn rights_lookup_reflects_map_range() {
    let mut table = PageRightsTable::new();
    table.map_range(0, 5, 2, Rights::READ_WRITE).expect("map");
    assert_eq!(table.rights_of(0, 5), Some(Rights::READ_WRITE));
    assert_eq!(table.rights_of(0, 6), Some(Rights::READ_WRITE));
    assert_eq!(table.rights_of(0, 7), None);
    assert_eq!(table.rights_of(1, 5), None);
}

#[test]
fn rejects_empty_rights() {
    let mut table = PageRightsTable::new();
    assert_eq!(table.install_mapping(1, 0, 1, Rights::empty()), Err(MapError::InvalidFlags));
}

#[test]
fn out_of_range_rejected() {
    let mut table = PageRightsTable::new();
    assert_eq!(table.map_range(0, PAGE_LIMIT - 1, 2, Rights::READABLE), Err(MapError::OutOfRange));
    assert_eq!(table.map_range(0, u32::MAX, 2, Rights::READABLE), Err(MapError::OutOfRange));
    assert!(table.map_range(0, PAGE_LIMIT - 1, 1, Rights::READABLE).is_ok());
}

#[test]
fn overlap_is_all_or_nothing() {
    let mut table = PageRightsTable::new();
    table.map_range(1, 6, 1, Rights::READABLE).expect("first mapping");
    assert_eq!(table.install_mapping(1, 5, 2, Rights::READABLE), Err(MapError::Overlap));
    assert_eq!(table.rights_of(1, 5), None);
}

#[test]
fn frame_budget_reports_out_of_memory() {
    let mut table = PageRightsTable::with_frame_budget(2);
    table.map_range(0, 0, 2, Rights::READABLE).expect("fits");
    assert_eq!(table.install_mapping(1, 0, 1, Rights::READABLE), Err(MapError::OutOfMemory));
}

#[test]
fn set_rights_and_unmap() {
    let mut table = PageRightsTable::new();
    table.map_range(0, 1, 1, Rights::READ_WRITE).expect("map");
    assert_eq!(table.set_rights(0, 1, Rights::READABLE), Some(Rights::READ_WRITE));
    assert_eq!(table.rights_of(0, 1), Some(Rights::READABLE));
    assert_eq!(table.unmap(0, 1), Some(Rights::READABLE));
    assert_eq!(table.set_rights(0, 1, Rights::READABLE), None);
}

#[test]
fn pages_of_is_scoped_to_task() {
    let mut table = PageRightsTable::new();
    table.map_range(0, 3, 1, Rights::READABLE).expect("map");
    table.map_range(1, 1, 2, Rights::READ_WRITE).expect("map");
    let pages: Vec<_> = table.pages_of(1).collect();
    assert_eq!(pages, vec![(1, Rights::READ_WRITE), (2, Rights::READ_WRITE)]);
}

#[test]
fn pte_encoding() {
    assert_eq!(PteFlags::from_rights(Rights::READABLE), PteFlags::PRESENT | PteFlags::USER);
    assert_eq!(
        PteFlags::from_rights(Rights::READ_WRITE),
        PteFlags::PRESENT | PteFlags::USER | PteFlags::WRITABLE
    );
    assert!(!PteFlags::from_rights(Rights::EXECUTABLE).contains(PteFlags::WRITABLE));
}

#[cfg(feature = "failpoints")]
#[test]
fn failpoint_denies_exactly_one_install() {
    let mut table = PageRightsTable::new();
    table.deny_next_install();
    assert_eq!(table.install_mapping(1, 0, 1, Rights::READABLE), Err(MapError::OutOfMemory));
    assert!(table.install_mapping(1, 0, 1, Rights::READABLE).is_ok());
}
