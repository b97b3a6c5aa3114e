// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! IPC error taxonomy and the reply a blocked caller receives.

use core::fmt;

use crate::envelope::{Envelope, Flags};
use crate::thread::ThreadId;

/// Errors reported to IPC callers. Every variant is recoverable.
///
/// The discriminant is the code carried in `payload0` of an error reply.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpcError {
    /// Target thread does not exist (or exited while the call was pending).
    NoSuchThread = 1,
    /// Operation code outside 0..=3, or an operation the target cannot serve.
    InvalidOperation = 2,
    /// Deadline passed before a partner was ready.
    TimedOut = 3,
    /// Grant requests rights the sender does not hold.
    PermissionDenied = 4,
    /// Grant range is empty or crosses an unmapped page.
    InvalidRange = 5,
    /// Memory mapper failed to install the grant.
    MapError = 6,
}

impl IpcError {
    /// Wire code of the error.
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for IpcError {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, u32> {
        match code {
            1 => Ok(Self::NoSuchThread),
            2 => Ok(Self::InvalidOperation),
            3 => Ok(Self::TimedOut),
            4 => Ok(Self::PermissionDenied),
            5 => Ok(Self::InvalidRange),
            6 => Ok(Self::MapError),
            other => Err(other),
        }
    }
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome handed back to a caller when its call completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Failure, if any. `None` means success.
    pub error: Option<IpcError>,
    /// Reply payload. For errors `payload.0` is the error code.
    pub payload: (u32, u32),
}

impl Reply {
    /// Successful reply carrying `payload`.
    pub const fn ok(payload: (u32, u32)) -> Self {
        Self { error: None, payload }
    }

    /// Failed reply; the code is mirrored into `payload.0`.
    pub const fn err(error: IpcError) -> Self {
        Self {
            error: Some(error),
            payload: (error.code(), 0),
        }
    }

    /// `true` when no error is present.
    #[inline]
    pub const fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Encodes the reply as seen by the caller; `from` is the replying thread.
    pub const fn to_envelope(&self, from: ThreadId) -> Envelope {
        let flags = Flags::compose(0, false, self.error.is_some(), 0);
        Envelope::new(from.as_raw(), flags.as_raw(), self.payload.0, self.payload.1)
    }

    /// Decodes a reply envelope.
    ///
    /// Error codes this revision does not know are reported as
    /// [`IpcError::InvalidOperation`].
    pub fn from_envelope(env: Envelope) -> Self {
        if env.flags().carries_error() {
            let error = IpcError::try_from(env.payload0).unwrap_or(IpcError::InvalidOperation);
            Self {
                error: Some(error),
                payload: (env.payload0, env.payload1),
            }
        } else {
            Self::ok((env.payload0, env.payload1))
        }
    }

    /// Converts into a `Result` over the payload.
    pub fn into_result(self) -> Result<(u32, u32), IpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.payload),
        }
    }
}
