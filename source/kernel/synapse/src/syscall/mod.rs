// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: IPC trap dispatcher and error handling
//! OWNERS: @kernel-team
//! PUBLIC API: Args, Error, SysResult, TrapFrame, TrapExit, ServiceTable, ServiceHandler, dispatch()
//! DEPENDS_ON: ipc::Engine, syscall::api
//! INVARIANTS: One trap vector (0x30); decode/check/execute discipline; every
//!             failure the caller sees is an error reply, never a silent drop

pub mod api;

use core::fmt;

use synapse_abi::{Envelope, IpcError, Reply, ThreadId};

use crate::ipc::CallOutcome;

/// Number of kernel service codes the table can hold.
const MAX_SERVICE: usize = 8;

/// Result type used by the trap handlers.
pub type SysResult<T> = Result<T, Error>;

/// Register indices inside [`Args`].
pub const REG_RECEIVER: usize = 0;
/// `ebx`
pub const REG_FLAGS: usize = 1;
/// `ecx`
pub const REG_PAYLOAD0: usize = 2;
/// `edx`
pub const REG_PAYLOAD1: usize = 3;
/// `edi`
pub const REG_TIMEOUT: usize = 4;

/// Trap arguments as saved by the vector 0x30 entry stub: eax, ebx, ecx, edx, edi.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Args {
    regs: [usize; 5],
}

impl Args {
    /// Creates a new argument pack from the provided registers.
    pub const fn new(regs: [usize; 5]) -> Self {
        Self { regs }
    }

    /// Packs an envelope and raw timeout the way the trap stub loads registers.
    pub const fn from_words(words: [u32; 4], timeout: u32) -> Self {
        Self::new([
            words[0] as usize,
            words[1] as usize,
            words[2] as usize,
            words[3] as usize,
            timeout as usize,
        ])
    }

    /// Returns the raw register at `index`.
    pub fn get(&self, index: usize) -> usize {
        self.regs[index]
    }
}

/// Error returned by the dispatcher and handler stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The call failed; reported to the caller as an error reply.
    Ipc(IpcError),
    /// Current thread terminated and must not resume.
    ThreadExit,
}

impl From<IpcError> for Error {
    fn from(value: IpcError) -> Self {
        Self::Ipc(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Registers written back to the caller on trap exit (eax, ebx, ecx, edx).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TrapFrame {
    /// Words in register order.
    pub regs: [u32; 4],
}

impl From<Envelope> for TrapFrame {
    fn from(env: Envelope) -> Self {
        Self { regs: env.to_words() }
    }
}

impl TrapFrame {
    /// The frame as an envelope.
    pub const fn envelope(&self) -> Envelope {
        Envelope::from_words(self.regs)
    }
}

/// What the trap exit path does with the caller.
#[must_use = "trap exits decide whether the caller resumes"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapExit {
    /// Return to the caller with these registers.
    Return(TrapFrame),
    /// The caller is suspended; pick another thread.
    Blocked,
    /// The caller is gone.
    Exited,
}

/// Type alias for a kernel service handler.
pub type ServiceHandler = fn(&mut api::Context<'_>, &api::IpcArgsTyped) -> SysResult<Envelope>;

/// Kernel services addressed through [`ThreadId::KERNEL`], indexed by `payload0`.
pub struct ServiceTable {
    handlers: [Option<ServiceHandler>; MAX_SERVICE],
}

impl Default for ServiceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        const NONE: Option<ServiceHandler> = None;
        Self { handlers: [NONE; MAX_SERVICE] }
    }

    /// Registers a handler.
    pub fn register(&mut self, code: u32, handler: ServiceHandler) {
        if let Some(slot) = self.handlers.get_mut(code as usize) {
            *slot = Some(handler);
        }
    }

    /// Runs the handler selected by the message's service code.
    pub fn dispatch(&self, ctx: &mut api::Context<'_>, args: &api::IpcArgsTyped) -> SysResult<Envelope> {
        self.handlers
            .get(args.message.payload.0 as usize)
            .and_then(|entry| *entry)
            .ok_or(Error::Ipc(IpcError::InvalidOperation))
            .and_then(|handler| handler(ctx, args))
    }
}

/// Runs one IPC trap for `ctx.caller` and decides how the trap returns.
pub fn dispatch(table: &ServiceTable, ctx: &mut api::Context<'_>, args: &Args) -> TrapExit {
    match api::sys_ipc(table, ctx, args) {
        Ok(CallOutcome::Complete(env)) => TrapExit::Return(env.into()),
        Ok(CallOutcome::Blocked) => TrapExit::Blocked,
        Err(Error::ThreadExit) => TrapExit::Exited,
        Err(Error::Ipc(err)) => {
            crate::log_debug!(target: "sys", "{} ipc failed: {}", ctx.caller, err);
            TrapExit::Return(Reply::err(err).to_envelope(ThreadId::KERNEL).into())
        }
    }
}
