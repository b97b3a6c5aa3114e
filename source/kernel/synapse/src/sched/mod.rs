// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Scheduler collaborator interface and the round-robin dispatcher behind it
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Scheduler (suspend/resume/current_thread/arm_timeout/cancel_timeout/retire),
//!             RoundRobin (admit/schedule_next/switch_to/armed/next_wakeup), EnqueueOutcome
//! DEPENDS_ON: synapse_abi::ThreadId
//! INVARIANTS: A thread is either ready, running, or suspended; bounded ready queue with
//!             deterministic reject on saturation; single-CPU only (!Send, !Sync)

extern crate alloc;

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use core::marker::PhantomData;

use synapse_abi::ThreadId;

/// Monotonic time in nanoseconds.
pub type Instant = u64;

/// What the IPC core needs from the dispatcher.
pub trait Scheduler {
    /// Removes `thread` from the ready set.
    fn suspend(&mut self, thread: ThreadId);
    /// Makes `thread` runnable again.
    fn resume(&mut self, thread: ThreadId);
    /// Thread whose kernel entry is being served.
    fn current_thread(&self) -> ThreadId;
    /// Requests a deadline notification for `thread`.
    fn arm_timeout(&mut self, thread: ThreadId, deadline: Instant);
    /// Drops any deadline armed for `thread`.
    fn cancel_timeout(&mut self, thread: ThreadId);
    /// Forgets an exited thread entirely.
    fn retire(&mut self, thread: ThreadId);
}

const READY_QUEUE_CAPACITY: usize = 256;

/// Why a thread could not be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueRejectReason {
    QueueFull { capacity: usize },
}

#[must_use = "enqueue outcomes must be handled"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Rejected(EnqueueRejectReason),
}

/// Cooperative round-robin dispatcher.
///
/// The IPC core only ever sees it through [`Scheduler`]. `suspend` takes a
/// thread off the ready queue; the running thread keeps its CPU until the
/// trap exit path calls [`RoundRobin::schedule_next`].
pub struct RoundRobin {
    ready: VecDeque<ThreadId>,
    suspended: BTreeSet<ThreadId>,
    current: Option<ThreadId>,
    timeouts: BTreeMap<ThreadId, Instant>,
    // Single-CPU contract: the dispatcher must not cross thread boundaries.
    _not_send_sync: PhantomData<*mut ()>,
}
static_assertions::assert_not_impl_any!(RoundRobin: Send, Sync);

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobin {
    /// Creates an idle dispatcher.
    pub fn new() -> Self {
        Self {
            ready: VecDeque::with_capacity(READY_QUEUE_CAPACITY),
            suspended: BTreeSet::new(),
            current: None,
            timeouts: BTreeMap::new(),
            _not_send_sync: PhantomData,
        }
    }

    /// Appends a new thread to the ready queue.
    pub fn admit(&mut self, thread: ThreadId) -> EnqueueOutcome {
        if self.ready.len() >= READY_QUEUE_CAPACITY {
            return EnqueueOutcome::Rejected(EnqueueRejectReason::QueueFull { capacity: READY_QUEUE_CAPACITY });
        }
        if !self.ready.contains(&thread) && self.current != Some(thread) {
            self.ready.push_back(thread);
        }
        EnqueueOutcome::Enqueued
    }

    /// Rotates the running thread to the back (unless suspended) and picks the next one.
    pub fn schedule_next(&mut self) -> Option<ThreadId> {
        if let Some(prev) = self.current.take() {
            if !self.suspended.contains(&prev) {
                self.ready.push_back(prev);
            }
        }
        self.current = self.ready.pop_front();
        self.current
    }

    /// Makes `thread` current without rotating, as the trap path does when it
    /// returns into a specific thread.
    pub fn switch_to(&mut self, thread: ThreadId) {
        if let Some(prev) = self.current.replace(thread) {
            if prev != thread && !self.suspended.contains(&prev) && !self.ready.contains(&prev) {
                self.ready.push_back(prev);
            }
        }
        self.ready.retain(|t| *t != thread);
    }

    /// `true` while `thread` is suspended.
    pub fn is_suspended(&self, thread: ThreadId) -> bool {
        self.suspended.contains(&thread)
    }

    /// `true` while `thread` waits on the ready queue.
    pub fn is_ready(&self, thread: ThreadId) -> bool {
        self.ready.contains(&thread)
    }

    /// Deadline armed for `thread`, if any.
    pub fn armed(&self, thread: ThreadId) -> Option<Instant> {
        self.timeouts.get(&thread).copied()
    }

    /// Earliest armed deadline; what the PIT one-shot should be programmed to.
    pub fn next_wakeup(&self) -> Option<Instant> {
        self.timeouts.values().copied().min()
    }
}

impl Scheduler for RoundRobin {
    fn suspend(&mut self, thread: ThreadId) {
        self.ready.retain(|t| *t != thread);
        self.suspended.insert(thread);
    }

    fn resume(&mut self, thread: ThreadId) {
        if self.suspended.remove(&thread) && self.current != Some(thread) {
            self.ready.push_back(thread);
        }
    }

    fn current_thread(&self) -> ThreadId {
        self.current.unwrap_or(ThreadId::KERNEL)
    }

    fn arm_timeout(&mut self, thread: ThreadId, deadline: Instant) {
        self.timeouts.insert(thread, deadline);
    }

    fn cancel_timeout(&mut self, thread: ThreadId) {
        self.timeouts.remove(&thread);
    }

    fn retire(&mut self, thread: ThreadId) {
        self.ready.retain(|t| *t != thread);
        self.suspended.remove(&thread);
        self.timeouts.remove(&thread);
        if self.current == Some(thread) {
            self.current = None;
        }
    }
}
