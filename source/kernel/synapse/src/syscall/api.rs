// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: IPC trap handler and the kernel service endpoint
//! OWNERS: @kernel-team
//! PUBLIC API: install_services(table), Context, IpcArgsTyped, sys_ipc()
//! DEPENDS_ON: ipc::Engine, mm::MemoryMapper, sched::Scheduler, hal::Console
//! INVARIANTS: Decode→Check→Execute; messages to ThreadId::KERNEL never reach the
//!             rendezvous queue; a service call is still a full kernel entry

use synapse_abi::{service, Envelope, IpcError, Message, Reply, ThreadId, Timeout};

use super::{Args, Error, ServiceTable, SysResult, REG_FLAGS, REG_PAYLOAD0, REG_PAYLOAD1, REG_RECEIVER, REG_TIMEOUT};
use crate::hal::Console;
use crate::ipc::{CallOutcome, Engine, IpcEnv};
use crate::mm::MemoryMapper;
use crate::sched::{Instant, Scheduler};

// Typed decoder for the Decode→Check→Execute pattern

/// A decoded IPC trap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IpcArgsTyped {
    /// The call as the engine sees it.
    pub message: Message,
}

impl IpcArgsTyped {
    /// Unpacks the trap registers. Operation codes 4..=15 are `InvalidOperation`.
    #[inline]
    pub fn decode(args: &Args) -> Result<Self, Error> {
        let env = Envelope::new(
            args.get(REG_RECEIVER) as u32,
            args.get(REG_FLAGS) as u32,
            args.get(REG_PAYLOAD0) as u32,
            args.get(REG_PAYLOAD1) as u32,
        );
        let timeout = Timeout::from_raw(args.get(REG_TIMEOUT) as u32);
        Ok(Self { message: Message::from_envelope(env, timeout)? })
    }

    /// Rejects requests the kernel endpoint cannot serve.
    #[inline]
    pub fn check(&self) -> Result<(), Error> {
        if self.serves_kernel() && self.message.is_mapping_request {
            return Err(IpcError::InvalidOperation.into());
        }
        Ok(())
    }

    /// `true` when the call is a service request rather than a rendezvous.
    pub fn serves_kernel(&self) -> bool {
        self.message.operation.is_send() && self.message.receiver.is_kernel()
    }
}

/// Kernel state a trap executes against.
pub struct Context<'a> {
    pub engine: &'a mut Engine,
    pub mapper: &'a mut dyn MemoryMapper,
    pub scheduler: &'a mut dyn Scheduler,
    pub console: &'a mut dyn Console,
    pub now: Instant,
    /// Thread whose trap is being served.
    pub caller: ThreadId,
}

impl<'a> Context<'a> {
    /// Creates a context for `caller`'s trap.
    pub fn new(
        engine: &'a mut Engine,
        mapper: &'a mut dyn MemoryMapper,
        scheduler: &'a mut dyn Scheduler,
        console: &'a mut dyn Console,
        now: Instant,
        caller: ThreadId,
    ) -> Self {
        Self { engine, mapper, scheduler, console, now, caller }
    }

    fn split(&mut self) -> (&mut Engine, IpcEnv<'_>) {
        (
            &mut *self.engine,
            IpcEnv { mapper: &mut *self.mapper, scheduler: &mut *self.scheduler, now: self.now },
        )
    }
}

/// Installs the kernel services into `table`.
pub fn install_services(table: &mut ServiceTable) {
    table.register(service::CONSOLE_WRITE, sys_console_write);
    table.register(service::EXIT_THREAD, sys_exit_thread);
}

/// Decodes, checks and executes one IPC trap.
pub fn sys_ipc(table: &ServiceTable, ctx: &mut Context<'_>, args: &Args) -> SysResult<CallOutcome> {
    let typed = IpcArgsTyped::decode(args)?;
    typed.check()?;
    let caller = ctx.caller;

    if typed.serves_kernel() {
        {
            let (engine, mut env) = ctx.split();
            engine.enter(&mut env, caller)?;
        }
        return table.dispatch(ctx, &typed).map(CallOutcome::Complete);
    }

    let (engine, mut env) = ctx.split();
    Ok(engine.submit(&mut env, caller, typed.message)?)
}

fn sys_console_write(ctx: &mut Context<'_>, typed: &IpcArgsTyped) -> SysResult<Envelope> {
    let count = usize::from(typed.message.user_flags & 0x3) + 1;
    let bytes = typed.message.payload.1.to_le_bytes();
    for &byte in &bytes[..count] {
        ctx.console.write_byte(byte);
    }
    Ok(Reply::ok((count as u32, 0)).to_envelope(ThreadId::KERNEL))
}

fn sys_exit_thread(ctx: &mut Context<'_>, _typed: &IpcArgsTyped) -> SysResult<Envelope> {
    let caller = ctx.caller;
    let (engine, mut env) = ctx.split();
    engine.retire_thread(&mut env, caller);
    ctx.scheduler.retire(caller);
    crate::log_info!(target: "sys", "thread {} exited", caller);
    Err(Error::ThreadExit)
}
