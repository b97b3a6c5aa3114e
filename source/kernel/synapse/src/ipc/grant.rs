// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Memory-grant validation for mapping requests riding on IPC
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: GrantRequest, Grant, validate()
//! DEPENDS_ON: mm::MemoryMapper
//! INVARIANTS: Rights are read from the mapper on every call; a grant never carries
//!             rights the sender lacks on any page of the range; no privileged bypass

use synapse_abi::{IpcError, Message, Rights};

use crate::mm::{MapError, MemoryMapper, TaskId, PAGE_LIMIT};

impl From<MapError> for IpcError {
    fn from(_: MapError) -> Self {
        IpcError::MapError
    }
}

/// Page range and rights named by a mapping request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrantRequest {
    /// First page index.
    pub first_page: u32,
    /// Number of pages.
    pub page_count: u32,
    /// Rights asked for on every page.
    pub rights: Rights,
}

impl GrantRequest {
    /// Reads the request out of a mapping message. `None` for plain messages.
    pub fn from_message(msg: &Message) -> Option<Self> {
        msg.is_mapping_request.then(|| Self {
            first_page: msg.payload.0,
            page_count: msg.payload.1,
            rights: msg.requested_rights(),
        })
    }
}

/// A validated grant, ready for the mapper to install.
///
/// Only [`validate`] builds one, so holding a `Grant` proves the rights check ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grant {
    first_page: u32,
    page_count: u32,
    rights: Rights,
}

impl Grant {
    /// First page index.
    pub fn first_page(&self) -> u32 {
        self.first_page
    }

    /// Number of pages.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Rights the receiver gets.
    pub fn rights(&self) -> Rights {
        self.rights
    }

    /// Installs the grant into `dest`.
    pub fn install(self, mapper: &mut dyn MemoryMapper, dest: TaskId) -> Result<(), IpcError> {
        mapper.install_mapping(dest, self.first_page, self.page_count, self.rights).map_err(|err| {
            crate::log_warn!(target: "ipc::grant", "install into task {} failed: {}", dest, err);
            IpcError::from(err)
        })
    }
}

/// Checks `req` against the sender's current rights.
///
/// An empty range, a range past the address space, or any unmapped page is
/// `InvalidRange`. A page lacking any requested right is `PermissionDenied`.
/// Range errors take precedence over rights errors.
pub fn validate(mapper: &dyn MemoryMapper, sender: TaskId, req: GrantRequest) -> Result<Grant, IpcError> {
    if req.page_count == 0 {
        return Err(IpcError::InvalidRange);
    }
    let end = match req.first_page.checked_add(req.page_count) {
        Some(end) if end <= PAGE_LIMIT => end,
        _ => return Err(IpcError::InvalidRange),
    };

    let mut denied = false;
    for page in req.first_page..end {
        match mapper.rights_of(sender, page) {
            None => return Err(IpcError::InvalidRange),
            Some(held) if !held.contains(req.rights) => denied = true,
            Some(_) => {}
        }
    }
    if denied {
        return Err(IpcError::PermissionDenied);
    }

    Ok(Grant {
        first_page: req.first_page,
        page_count: req.page_count,
        rights: req.rights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::PageRightsTable;
    use synapse_abi::{Operation, ThreadId, Timeout};

    fn req(first_page: u32, page_count: u32, rights: Rights) -> GrantRequest {
        GrantRequest { first_page, page_count, rights }
    }

    fn sender_with(rights: Rights) -> PageRightsTable {
        let mut table = PageRightsTable::new();
        table.map_range(0, 5, 2, rights).expect("map");
        table
    }

    #[test]
    fn narrowing_is_allowed() {
        let table = sender_with(Rights::READ_WRITE);
        let grant = validate(&table, 0, req(5, 2, Rights::READABLE)).expect("grant");
        assert_eq!((grant.first_page(), grant.page_count(), grant.rights()), (5, 2, Rights::READABLE));
    }

    #[test]
    fn inflation_is_denied() {
        let table = sender_with(Rights::READABLE);
        assert_eq!(validate(&table, 0, req(5, 2, Rights::WRITABLE)), Err(IpcError::PermissionDenied));
    }

    #[test]
    fn one_weak_page_denies_the_range() {
        let mut table = sender_with(Rights::READ_WRITE);
        table.set_rights(0, 6, Rights::READABLE);
        assert_eq!(validate(&table, 0, req(5, 2, Rights::READ_WRITE)), Err(IpcError::PermissionDenied));
    }

    #[test]
    fn empty_and_unmapped_ranges_are_invalid() {
        let table = sender_with(Rights::READ_WRITE);
        assert_eq!(validate(&table, 0, req(5, 0, Rights::READABLE)), Err(IpcError::InvalidRange));
        assert_eq!(validate(&table, 0, req(5, 3, Rights::READABLE)), Err(IpcError::InvalidRange));
        assert_eq!(validate(&table, 0, req(u32::MAX, 2, Rights::READABLE)), Err(IpcError::InvalidRange));
        assert_eq!(validate(&table, 1, req(5, 1, Rights::READABLE)), Err(IpcError::InvalidRange));
    }

    #[test]
    fn range_error_beats_rights_error() {
        let table = sender_with(Rights::READABLE);
        assert_eq!(validate(&table, 0, req(5, 3, Rights::WRITABLE)), Err(IpcError::InvalidRange));
    }

    #[test]
    fn empty_rights_request_is_trivially_held() {
        let table = sender_with(Rights::READABLE);
        assert!(validate(&table, 0, req(5, 1, Rights::empty())).is_ok());
    }

    #[test]
    fn install_maps_and_reports_map_error() {
        let mut table = sender_with(Rights::READ_WRITE);
        let grant = validate(&table, 0, req(5, 2, Rights::READABLE)).expect("grant");
        grant.install(&mut table, 1).expect("install");
        assert_eq!(table.rights_of(1, 5), Some(Rights::READABLE));
        assert_eq!(table.rights_of(1, 6), Some(Rights::READABLE));
        // second install overlaps
        assert_eq!(grant.install(&mut table, 1), Err(IpcError::MapError));
    }

    #[test]
    fn request_is_read_from_mapping_messages_only() {
        let to = ThreadId::from_raw(0x0100);
        let plain = Message::new(to, Operation::Send, Timeout::Infinite, (5, 2));
        assert_eq!(GrantRequest::from_message(&plain), None);
        let msg = Message::grant(to, Operation::SendAndWait, Timeout::Infinite, 5, 2, Rights::READABLE);
        assert_eq!(GrantRequest::from_message(&msg), Some(req(5, 2, Rights::READABLE)));
    }
}
