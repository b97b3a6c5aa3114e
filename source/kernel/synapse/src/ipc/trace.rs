// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Low-noise, bounded IPC trace ring for bring-up triage
//! OWNERS: @kernel-ipc-team
//! STATUS: Experimental (debug feature only)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 1 unit test (feature `ipc_trace_ring`)
//!
//! Records a fixed number of rendezvous events in memory and emits nothing
//! until [`dump`] is called. Without the `ipc_trace_ring` feature every entry
//! point compiles to nothing.

use synapse_abi::{IpcError, ThreadId};

/// Kind of traced event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    /// Message handed to a receiver.
    Deliver = 1,
    /// Caller parked or blocked in the queue.
    Enqueue = 2,
    /// Reply handed back to a blocked caller.
    Reply = 3,
    /// Pending call expired.
    Expire = 4,
    /// Mapping grant installed or refused.
    Grant = 5,
    /// Thread retired while others referenced it.
    Retire = 6,
}

/// One trace record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct TraceEvent {
    /// Monotonic sequence number (wraps).
    pub seq: u32,
    /// Event kind.
    pub kind: Kind,
    /// 0 = ok, otherwise the IpcError code.
    pub status: u8,
    /// Thread that caused the event.
    pub actor: u32,
    /// Other side of the rendezvous, 0 if none.
    pub peer: u32,
}

#[cfg_attr(not(feature = "ipc_trace_ring"), allow(dead_code))]
const RING_SIZE: usize = 256;

#[cfg(feature = "ipc_trace_ring")]
mod ring {
    use super::{TraceEvent, RING_SIZE};
    use spin::Mutex;

    pub(super) struct Ring {
        pub(super) next_seq: u32,
        pub(super) events: [Option<TraceEvent>; RING_SIZE],
    }

    pub(super) static RING: Mutex<Ring> = Mutex::new(Ring { next_seq: 0, events: [None; RING_SIZE] });
}

/// Records an event.
#[inline]
pub fn record(kind: Kind, actor: ThreadId, peer: Option<ThreadId>, status: Result<(), IpcError>) {
    #[cfg(feature = "ipc_trace_ring")]
    {
        let mut ring = ring::RING.lock();
        let seq = ring.next_seq;
        ring.next_seq = seq.wrapping_add(1);
        let status = match status {
            Ok(()) => 0,
            Err(err) => err.code() as u8,
        };
        ring.events[seq as usize % RING_SIZE] = Some(TraceEvent {
            seq,
            kind,
            status,
            actor: actor.as_raw(),
            peer: peer.map_or(0, ThreadId::as_raw),
        });
    }
    #[cfg(not(feature = "ipc_trace_ring"))]
    let _ = (kind, actor, peer, status);
}

/// Copies the most recent events, oldest first, into `out`; returns how many.
pub fn snapshot(out: &mut [TraceEvent]) -> usize {
    #[cfg(feature = "ipc_trace_ring")]
    {
        let ring = ring::RING.lock();
        let total = (ring.next_seq as usize).min(RING_SIZE);
        let take = total.min(out.len());
        let start = ring.next_seq as usize - take;
        let mut written = 0;
        for seq in start..ring.next_seq as usize {
            if let Some(ev) = ring.events[seq % RING_SIZE] {
                out[written] = ev;
                written += 1;
            }
        }
        written
    }
    #[cfg(not(feature = "ipc_trace_ring"))]
    {
        let _ = out;
        0
    }
}

/// Logs the last `count` events.
pub fn dump(count: usize) {
    let mut buf = [TraceEvent { seq: 0, kind: Kind::Deliver, status: 0, actor: 0, peer: 0 }; 32];
    let n = snapshot(&mut buf[..count.min(32)]);
    for ev in &buf[..n] {
        crate::log_info!(
            target: "ipc::trace",
            "#{} {:?} actor={} peer={} status={}",
            ev.seq,
            ev.kind,
            ThreadId::from_raw(ev.actor),
            ThreadId::from_raw(ev.peer),
            ev.status
        );
    }
}
