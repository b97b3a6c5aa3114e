// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page access rights carried in the low flag bits of a mapping request.

use bitflags::bitflags;

bitflags! {
    /// Access rights a task holds over a page, or requests in a grant.
    ///
    /// Bit 0 is readable, so a bare `1` in the user-flag field means
    /// read-only. Bit 3 belongs to the caller and is never a right.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Rights: u32 {
        /// Page may be read.
        const READABLE = 1 << 0;
        /// Page may be written.
        const WRITABLE = 1 << 1;
        /// Page may be executed.
        const EXECUTABLE = 1 << 2;
    }
}

impl Rights {
    /// Read and write, the usual rights of a data page.
    pub const READ_WRITE: Self = Self::READABLE.union(Self::WRITABLE);

    /// Extracts rights from the 4-bit user-flag field, dropping the user bit.
    #[inline]
    pub const fn from_user_flags(bits: u8) -> Self {
        Self::from_bits_truncate(bits as u32)
    }

    /// Returns the rights as user-flag bits.
    #[inline]
    pub const fn to_user_flags(self) -> u8 {
        self.bits() as u8
    }
}
