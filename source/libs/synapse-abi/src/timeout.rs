// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Call timeouts and their out-of-band register encoding.
//!
//! The timeout never travels in the flags word. The trap stub passes it in a
//! separate register: `0` is [`Timeout::Immediate`], `u32::MAX` is
//! [`Timeout::Infinite`], anything else is a duration in milliseconds.

use core::time::Duration;

/// Raw register value for [`Timeout::Immediate`].
pub const RAW_IMMEDIATE: u32 = 0;
/// Raw register value for [`Timeout::Infinite`].
pub const RAW_INFINITE: u32 = u32::MAX;

/// How long a call may wait for its rendezvous partner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// Fail at once unless a partner is already waiting.
    Immediate,
    /// Block until matched.
    Infinite,
    /// Block for at most this long. Always positive.
    After(Duration),
}

impl Timeout {
    /// Builds a bounded timeout, mapping a zero duration to [`Timeout::Immediate`].
    pub const fn after(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Immediate
        } else {
            Self::After(duration)
        }
    }

    /// Encodes the timeout for the trap register.
    ///
    /// Durations are rounded up to whole milliseconds and saturate just below
    /// the infinite marker.
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Immediate => RAW_IMMEDIATE,
            Self::Infinite => RAW_INFINITE,
            Self::After(d) => {
                let nanos = d.as_nanos();
                let ms = nanos.div_ceil(1_000_000);
                let ms = u32::try_from(ms).unwrap_or(RAW_INFINITE - 1);
                ms.clamp(1, RAW_INFINITE - 1)
            }
        }
    }

    /// Decodes the trap register value.
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            RAW_IMMEDIATE => Self::Immediate,
            RAW_INFINITE => Self::Infinite,
            ms => Self::After(Duration::from_millis(ms as u64)),
        }
    }

    /// Deadline in nanoseconds relative to `now`, or `None` when unbounded.
    ///
    /// `Immediate` yields `Some(now)`: it is already due.
    pub fn deadline_from(self, now: u64) -> Option<u64> {
        match self {
            Self::Immediate => Some(now),
            Self::Infinite => None,
            Self::After(d) => {
                let span = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
                Some(now.saturating_add(span))
            }
        }
    }
}
