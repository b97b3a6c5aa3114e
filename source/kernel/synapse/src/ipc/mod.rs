// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Rendezvous engine matching senders and receivers
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: Engine (register_thread/retire_thread/enter/submit/handle_event/expire_due/
//!             take_completion/check_consistency), IpcEnv, PendingCall, CallState, CallOutcome, Event
//! DEPENDS_ON: ipc::grant, ipc::trace, mm::MemoryMapper, sched::Scheduler
//! INVARIANTS: At most one PendingCall per thread; FIFO among senders to one receiver;
//!             no Waiting call outlives its deadline past an engine entry;
//!             a parked Send is dropped only when its sender claims the slot again;
//!             ReplyAndRecv runs both halves in one entry; single mutator (!Send, !Sync)
//!
//! The engine owns an arena of thread records keyed by [`ThreadId`]. Each record
//! holds the thread's pending call (if any), the caller it owes a reply to (if
//! any), and the result registers of its last completed call until the trap
//! exit path collects them.

extern crate alloc;

pub mod grant;
pub mod trace;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::marker::PhantomData;

use synapse_abi::{Envelope, IpcError, Message, Operation, Reply, ThreadId, Timeout};

use crate::config::EngineConfig;
use crate::mm::MemoryMapper;
use crate::sched::{Instant, Scheduler};

pub use grant::{Grant, GrantRequest};
use trace::Kind;

/// Lifecycle of a pending call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Queued, no partner yet.
    Waiting,
    /// `SendAndWait` delivered; the caller waits for the reply.
    Matched,
    /// Deadline passed; the record is being torn down.
    TimedOut,
}

/// Kernel-internal record of a call that could not complete synchronously.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingCall {
    /// Thread that made the call.
    pub caller: ThreadId,
    /// The call itself.
    pub message: Message,
    /// Absolute expiry, `None` for infinite waits and matched calls.
    pub deadline: Option<Instant>,
    /// Current state.
    pub state: CallState,
    seq: u64,
}

impl PendingCall {
    /// Enqueue order; lower is older.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    fn waits_for_sender(&self) -> bool {
        self.state == CallState::Waiting
            && matches!(self.message.operation, Operation::Recv | Operation::ReplyAndRecv)
    }

    fn sends_to(&self, receiver: ThreadId) -> bool {
        self.state == CallState::Waiting && self.message.operation.is_send() && self.message.receiver == receiver
    }

    fn is_parked_send(&self) -> bool {
        self.state == CallState::Waiting && self.message.operation == Operation::Send
    }

    fn is_due(&self, now: Instant) -> bool {
        self.state == CallState::Waiting && self.deadline.map_or(false, |d| d <= now)
    }
}

/// Result of one engine entry for the calling thread.
#[must_use = "a blocked caller must not be returned to user mode"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call finished; these are the caller's return registers.
    Complete(Envelope),
    /// The caller is suspended; its result is collected with [`Engine::take_completion`].
    Blocked,
}

/// Asynchronous input to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// The timer saw `thread`'s deadline pass.
    DeadlineExpired(ThreadId),
}

/// Thread registration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The kernel endpoint address cannot name a thread.
    Reserved,
    /// A live thread already has this address.
    Exists,
    /// The arena is at capacity.
    Full,
}

/// Broken engine invariant. Any of these is a kernel bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyError {
    /// A record holds a call made by a different thread.
    OrphanedCall { slot: ThreadId, caller: ThreadId },
    /// A queued send targets a thread with no record.
    DanglingTarget { caller: ThreadId, target: ThreadId },
    /// A matched caller is not its receiver's reply target.
    UnpairedMatch { caller: ThreadId, receiver: ThreadId },
    /// A reply target is not waiting for that replier.
    StaleReplyTarget { replier: ThreadId, caller: ThreadId },
    /// A timed-out call was left in the arena.
    LingeringTimeout { thread: ThreadId },
    /// A waiting call is past its deadline.
    ExpiredEntry { thread: ThreadId },
    /// A thread has both a pending call and an uncollected result.
    CompletionWhilePending { thread: ThreadId },
}

/// Collaborators and clock for one engine entry.
pub struct IpcEnv<'a> {
    /// Page rights lookup and mapping installation.
    pub mapper: &'a mut dyn MemoryMapper,
    /// Ready-set and timeout bookkeeping.
    pub scheduler: &'a mut dyn Scheduler,
    /// Current time.
    pub now: Instant,
}

#[derive(Debug, Default)]
struct ThreadRecord {
    pending: Option<PendingCall>,
    reply_to: Option<ThreadId>,
    completion: Option<Envelope>,
}

/// The rendezvous state machine.
pub struct Engine {
    threads: BTreeMap<ThreadId, ThreadRecord>,
    next_seq: u64,
    config: EngineConfig,
    // Single-mutator contract: one kernel entry at a time on one CPU.
    _single_mutator: PhantomData<*mut ()>,
}
static_assertions::assert_not_impl_any!(Engine: Send, Sync);

fn status_ok() -> Envelope {
    Reply::ok((0, 0)).to_envelope(ThreadId::KERNEL)
}

fn status_err(err: IpcError) -> Envelope {
    Reply::err(err).to_envelope(ThreadId::KERNEL)
}

impl Engine {
    /// Creates an empty engine.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            threads: BTreeMap::new(),
            next_seq: 0,
            config,
            _single_mutator: PhantomData,
        }
    }

    /// Adds a live thread to the arena.
    pub fn register_thread(&mut self, thread: ThreadId) -> Result<(), RegistryError> {
        if thread.is_kernel() {
            return Err(RegistryError::Reserved);
        }
        if self.threads.contains_key(&thread) {
            return Err(RegistryError::Exists);
        }
        if self.threads.len() >= self.config.thread_capacity {
            return Err(RegistryError::Full);
        }
        self.threads.insert(thread, ThreadRecord::default());
        crate::log_debug!(target: "ipc", "thread {} registered", thread);
        Ok(())
    }

    /// Removes a thread. Its own pending call is dropped, and every caller
    /// blocked on it fails with `NoSuchThread`. Returns `false` if unknown.
    pub fn retire_thread(&mut self, env: &mut IpcEnv<'_>, thread: ThreadId) -> bool {
        if self.threads.remove(&thread).is_none() {
            return false;
        }
        env.scheduler.cancel_timeout(thread);

        let affected: Vec<ThreadId> = self
            .threads
            .iter()
            .filter(|(_, rec)| {
                rec.pending
                    .as_ref()
                    .map_or(false, |c| c.message.operation.is_send() && c.message.receiver == thread)
            })
            .map(|(&tid, _)| tid)
            .collect();
        for caller in affected {
            let Some(call) = self.take_pending(caller) else { continue };
            env.scheduler.cancel_timeout(caller);
            if call.message.operation == Operation::SendAndWait {
                self.complete(env, caller, status_err(IpcError::NoSuchThread));
            }
        }
        for rec in self.threads.values_mut() {
            if rec.reply_to == Some(thread) {
                rec.reply_to = None;
            }
        }

        trace::record(Kind::Retire, thread, None, Ok(()));
        crate::log_debug!(target: "ipc", "thread {} retired", thread);
        true
    }

    /// `true` if `thread` is registered.
    pub fn contains(&self, thread: ThreadId) -> bool {
        self.threads.contains_key(&thread)
    }

    /// Number of live threads.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Pending call of `thread`, if any.
    pub fn pending(&self, thread: ThreadId) -> Option<&PendingCall> {
        self.threads.get(&thread).and_then(|rec| rec.pending.as_ref())
    }

    /// Number of pending calls across all threads.
    pub fn pending_count(&self) -> usize {
        self.threads.values().filter(|rec| rec.pending.is_some()).count()
    }

    /// Caller that `thread` owes a reply to.
    pub fn reply_target(&self, thread: ThreadId) -> Option<ThreadId> {
        self.threads.get(&thread).and_then(|rec| rec.reply_to)
    }

    /// Collects the result registers of a resumed thread.
    pub fn take_completion(&mut self, thread: ThreadId) -> Option<Envelope> {
        self.threads.get_mut(&thread).and_then(|rec| rec.completion.take())
    }

    /// Earliest deadline of any waiting call.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.threads
            .values()
            .filter_map(|rec| rec.pending.as_ref())
            .filter(|c| c.state == CallState::Waiting)
            .filter_map(|c| c.deadline)
            .min()
    }

    /// Executes one IPC operation on behalf of `caller`.
    ///
    /// Errors are the caller's own failure; the syscall layer turns them into
    /// an error reply.
    pub fn submit(&mut self, env: &mut IpcEnv<'_>, caller: ThreadId, msg: Message) -> Result<CallOutcome, IpcError> {
        self.enter(env, caller)?;
        match msg.operation {
            Operation::Send | Operation::SendAndWait => self.send(env, caller, msg),
            Operation::Recv => self.recv(env, caller, msg),
            Operation::ReplyAndRecv => {
                self.reply(env, caller, msg.payload);
                self.recv(env, caller, msg)
            }
        }
    }

    /// Opens a kernel entry for `caller`: sweeps due deadlines and drops the
    /// caller's stale result. A send the caller left parked stays queued.
    ///
    /// [`Engine::submit`] calls this itself; kernel services that bypass the
    /// rendezvous call it directly.
    pub fn enter(&mut self, env: &mut IpcEnv<'_>, caller: ThreadId) -> Result<(), IpcError> {
        self.expire_due(env);

        let record = self.threads.get_mut(&caller).ok_or(IpcError::NoSuchThread)?;
        if record.completion.take().is_some() {
            crate::log_warn!(target: "ipc", "{} re-entered without collecting its last result", caller);
        }
        if let Some(call) = &record.pending {
            // Only a parked Send can belong to a running thread.
            let parked_send = call.is_parked_send();
            if !parked_send {
                crate::log_error!(target: "ipc", "{} entered the kernel while {:?}", caller, call);
            }
            debug_assert!(parked_send, "blocked thread {caller:?} entered the kernel");
        }
        Ok(())
    }

    /// Processes an asynchronous event through the same path as the sweep.
    pub fn handle_event(&mut self, env: &mut IpcEnv<'_>, event: Event) {
        match event {
            Event::DeadlineExpired(thread) => {
                self.time_out(env, thread);
            }
        }
    }

    /// Expires every waiting call whose deadline is at or before `env.now`.
    /// Returns how many expired.
    pub fn expire_due(&mut self, env: &mut IpcEnv<'_>) -> usize {
        let mut due: Vec<(Instant, u64, ThreadId)> = self
            .threads
            .iter()
            .filter_map(|(&tid, rec)| rec.pending.as_ref().map(|c| (tid, c)))
            .filter(|(_, c)| c.is_due(env.now))
            .map(|(tid, c)| (c.deadline.unwrap_or(0), c.seq, tid))
            .collect();
        due.sort_unstable();
        let count = due.len();
        for (_, _, thread) in due {
            self.handle_event(env, Event::DeadlineExpired(thread));
        }
        count
    }

    /// Verifies the arena invariants at time `now`.
    pub fn check_consistency(&self, now: Instant) -> Result<(), ConsistencyError> {
        for (&tid, rec) in &self.threads {
            if let Some(call) = &rec.pending {
                if call.caller != tid {
                    return Err(ConsistencyError::OrphanedCall { slot: tid, caller: call.caller });
                }
                if call.state == CallState::TimedOut {
                    return Err(ConsistencyError::LingeringTimeout { thread: tid });
                }
                if call.is_due(now) {
                    return Err(ConsistencyError::ExpiredEntry { thread: tid });
                }
                if rec.completion.is_some() {
                    return Err(ConsistencyError::CompletionWhilePending { thread: tid });
                }
                let target = call.message.receiver;
                if call.message.operation.is_send() && !self.threads.contains_key(&target) {
                    return Err(ConsistencyError::DanglingTarget { caller: tid, target });
                }
                if call.state == CallState::Matched && self.reply_target(target) != Some(tid) {
                    return Err(ConsistencyError::UnpairedMatch { caller: tid, receiver: target });
                }
            }
            if let Some(caller) = rec.reply_to {
                let waiting = self
                    .pending(caller)
                    .map_or(false, |c| c.state == CallState::Matched && c.message.receiver == tid);
                if !waiting {
                    return Err(ConsistencyError::StaleReplyTarget { replier: tid, caller });
                }
            }
        }
        Ok(())
    }

    fn send(&mut self, env: &mut IpcEnv<'_>, caller: ThreadId, msg: Message) -> Result<CallOutcome, IpcError> {
        let target = msg.receiver;
        let receiver_waiting = match self.threads.get(&target) {
            None => return Err(IpcError::NoSuchThread),
            Some(rec) => rec.pending.as_ref().map_or(false, PendingCall::waits_for_sender),
        };

        if receiver_waiting {
            self.take_pending(target);
            env.scheduler.cancel_timeout(target);
            let (delivered, granted) = Self::deliver(env, caller, &msg, target);
            self.complete(env, target, delivered);
            crate::log_trace!(target: "ipc", "{} -> {} delivered", caller, target);
            if msg.operation == Operation::Send {
                return Ok(CallOutcome::Complete(status_ok()));
            }
            return Ok(match granted {
                Ok(()) => {
                    self.await_reply(env, caller, msg, target);
                    CallOutcome::Blocked
                }
                Err(err) => CallOutcome::Complete(status_err(err)),
            });
        }

        if msg.timeout == Timeout::Immediate {
            return match msg.operation {
                Operation::Send => {
                    crate::log_trace!(target: "ipc", "{} -> {} not receiving, send dropped", caller, target);
                    Ok(CallOutcome::Complete(status_ok()))
                }
                _ => Err(IpcError::TimedOut),
            };
        }

        let deadline = msg.timeout.deadline_from(env.now);
        self.enqueue(env, caller, msg, deadline);
        if msg.operation == Operation::Send {
            return Ok(CallOutcome::Complete(status_ok()));
        }
        env.scheduler.suspend(caller);
        crate::log_debug!(target: "ipc", "{} blocked sending to {}", caller, target);
        Ok(CallOutcome::Blocked)
    }

    fn recv(&mut self, env: &mut IpcEnv<'_>, receiver: ThreadId, msg: Message) -> Result<CallOutcome, IpcError> {
        if let Some(sender) = self.earliest_sender(receiver) {
            let Some(call) = self.take_pending(sender) else {
                return Err(IpcError::NoSuchThread);
            };
            env.scheduler.cancel_timeout(sender);
            let (delivered, granted) = Self::deliver(env, sender, &call.message, receiver);
            if call.message.operation == Operation::SendAndWait {
                match granted {
                    Ok(()) => {
                        if let Some(rec) = self.threads.get_mut(&sender) {
                            rec.pending = Some(PendingCall {
                                state: CallState::Matched,
                                deadline: None,
                                ..call
                            });
                        }
                        self.set_reply_target(env, receiver, sender);
                    }
                    Err(err) => self.complete(env, sender, status_err(err)),
                }
            }
            crate::log_trace!(target: "ipc", "{} <- {} delivered", receiver, sender);
            return Ok(CallOutcome::Complete(delivered));
        }

        if msg.timeout == Timeout::Immediate {
            return Err(IpcError::TimedOut);
        }
        let deadline = msg.timeout.deadline_from(env.now);
        self.enqueue(env, receiver, msg, deadline);
        env.scheduler.suspend(receiver);
        crate::log_debug!(target: "ipc", "{} blocked receiving", receiver);
        Ok(CallOutcome::Blocked)
    }

    fn reply(&mut self, env: &mut IpcEnv<'_>, replier: ThreadId, payload: (u32, u32)) {
        let Some(caller) = self.threads.get_mut(&replier).and_then(|rec| rec.reply_to.take()) else {
            crate::log_trace!(target: "ipc", "{} has no caller to answer", replier);
            return;
        };
        let awaiting = self
            .pending(caller)
            .map_or(false, |c| c.state == CallState::Matched && c.message.receiver == replier);
        if !awaiting {
            crate::log_error!(target: "ipc", "reply target {} of {} is not awaiting a reply", caller, replier);
            debug_assert!(awaiting, "stale reply target");
            return;
        }
        self.take_pending(caller);
        trace::record(Kind::Reply, replier, Some(caller), Ok(()));
        self.complete(env, caller, Reply::ok(payload).to_envelope(replier));
    }

    // Validates and installs an attached grant, then builds what the receiver sees.
    fn deliver(
        env: &mut IpcEnv<'_>,
        sender: ThreadId,
        msg: &Message,
        receiver: ThreadId,
    ) -> (Envelope, Result<(), IpcError>) {
        let mut flags = msg.flags();
        let mut payload = msg.payload;
        let mut granted = Ok(());
        if let Some(req) = GrantRequest::from_message(msg) {
            granted = grant::validate(&*env.mapper, sender.task(), req)
                .and_then(|grant| grant.install(&mut *env.mapper, receiver.task()));
            trace::record(Kind::Grant, sender, Some(receiver), granted);
            if let Err(err) = granted {
                crate::log_debug!(target: "ipc::grant", "{} -> {} refused: {}", sender, receiver, err);
                flags = flags.with_error();
                payload = (err.code(), 0);
            }
        }
        trace::record(Kind::Deliver, sender, Some(receiver), Ok(()));
        (Envelope::new(sender.as_raw(), flags.as_raw(), payload.0, payload.1), granted)
    }

    fn await_reply(&mut self, env: &mut IpcEnv<'_>, caller: ThreadId, msg: Message, receiver: ThreadId) {
        self.supersede_parked(env, caller);
        let seq = self.bump_seq();
        if let Some(rec) = self.threads.get_mut(&caller) {
            rec.pending = Some(PendingCall {
                caller,
                message: msg,
                deadline: None,
                state: CallState::Matched,
                seq,
            });
        }
        env.scheduler.suspend(caller);
        self.set_reply_target(env, receiver, caller);
    }

    fn set_reply_target(&mut self, env: &mut IpcEnv<'_>, receiver: ThreadId, caller: ThreadId) {
        let previous = self.threads.get_mut(&receiver).and_then(|rec| rec.reply_to.replace(caller));
        let Some(orphan) = previous else { return };
        if orphan == caller {
            return;
        }
        crate::log_warn!(target: "ipc", "{} took a new call before answering {}", receiver, orphan);
        let matched = self
            .pending(orphan)
            .map_or(false, |c| c.state == CallState::Matched && c.message.receiver == receiver);
        if matched {
            self.take_pending(orphan);
            self.complete(env, orphan, status_err(IpcError::NoSuchThread));
        }
    }

    fn enqueue(&mut self, env: &mut IpcEnv<'_>, caller: ThreadId, msg: Message, deadline: Option<Instant>) {
        self.supersede_parked(env, caller);
        let seq = self.bump_seq();
        if let Some(rec) = self.threads.get_mut(&caller) {
            rec.pending = Some(PendingCall {
                caller,
                message: msg,
                deadline,
                state: CallState::Waiting,
                seq,
            });
        }
        if let Some(deadline) = deadline {
            env.scheduler.arm_timeout(caller, deadline);
        }
        let peer = msg.operation.is_send().then_some(msg.receiver);
        trace::record(Kind::Enqueue, caller, peer, Ok(()));
    }

    // The caller needs its one pending slot; an undelivered send parked there gives way.
    fn supersede_parked(&mut self, env: &mut IpcEnv<'_>, caller: ThreadId) {
        let Some(rec) = self.threads.get_mut(&caller) else { return };
        if !rec.pending.as_ref().map_or(false, PendingCall::is_parked_send) {
            return;
        }
        let Some(stale) = rec.pending.take() else { return };
        env.scheduler.cancel_timeout(caller);
        trace::record(Kind::Expire, caller, Some(stale.message.receiver), Ok(()));
        crate::log_debug!(target: "ipc", "{} superseded its undelivered send to {}", caller, stale.message.receiver);
    }

    fn time_out(&mut self, env: &mut IpcEnv<'_>, thread: ThreadId) -> bool {
        let Some(rec) = self.threads.get_mut(&thread) else { return false };
        if !rec.pending.as_ref().map_or(false, |c| c.is_due(env.now)) {
            return false;
        }
        let Some(mut call) = rec.pending.take() else { return false };
        call.state = CallState::TimedOut;
        env.scheduler.cancel_timeout(thread);
        let peer = call.message.operation.is_send().then_some(call.message.receiver);
        trace::record(Kind::Expire, thread, peer, Err(IpcError::TimedOut));
        crate::log_debug!(target: "ipc", "expired {:?}", call);
        if call.message.operation != Operation::Send {
            self.complete(env, thread, status_err(IpcError::TimedOut));
        }
        true
    }

    fn complete(&mut self, env: &mut IpcEnv<'_>, thread: ThreadId, result: Envelope) {
        if let Some(rec) = self.threads.get_mut(&thread) {
            rec.completion = Some(result);
        }
        env.scheduler.resume(thread);
    }

    fn earliest_sender(&self, receiver: ThreadId) -> Option<ThreadId> {
        self.threads
            .values()
            .filter_map(|rec| rec.pending.as_ref())
            .filter(|c| c.sends_to(receiver))
            .min_by_key(|c| c.seq)
            .map(|c| c.caller)
    }

    fn take_pending(&mut self, thread: ThreadId) -> Option<PendingCall> {
        self.threads.get_mut(&thread).and_then(|rec| rec.pending.take())
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests_prop;
