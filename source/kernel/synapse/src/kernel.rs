// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Aggregated kernel state and its trap/timer entry points
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel (new/spawn_thread/trap/trap_from/timer_interrupt/take_completion/audit)
//! DEPENDS_ON: ipc::Engine, syscall::{dispatch, ServiceTable}, hal::{Timer, Console},
//!             mm::MemoryMapper, sched::Scheduler
//! INVARIANTS: Every entry reads the clock once; the timer wake-up always tracks the
//!             earliest waiting deadline after an entry returns

use synapse_abi::ThreadId;

use crate::config::EngineConfig;
use crate::hal::{Console, Timer};
use crate::ipc::{trace, ConsistencyError, Engine, IpcEnv, RegistryError};
use crate::mm::MemoryMapper;
use crate::sched::Scheduler;
use crate::syscall::{self, api, Args, ServiceTable, TrapExit, TrapFrame};

/// Timer value meaning "no wake-up programmed".
const NO_WAKEUP: u64 = u64::MAX;

/// Kernel state: the rendezvous engine plus its collaborators.
pub struct Kernel<M, S, T, C> {
    engine: Engine,
    mapper: M,
    scheduler: S,
    timer: T,
    console: C,
    services: ServiceTable,
}

impl<M, S, T, C> Kernel<M, S, T, C>
where
    M: MemoryMapper,
    S: Scheduler,
    T: Timer,
    C: Console,
{
    /// Assembles the kernel and installs the kernel services.
    pub fn new(config: EngineConfig, mapper: M, scheduler: S, timer: T, console: C) -> Self {
        let mut services = ServiceTable::new();
        api::install_services(&mut services);
        crate::log_info!(target: "boot", "synapse: {} thread slots", config.thread_capacity);
        Self { engine: Engine::new(config), mapper, scheduler, timer, console, services }
    }

    /// Makes `thread` addressable. Admitting it to the ready queue is the
    /// dispatcher's business.
    pub fn spawn_thread(&mut self, thread: ThreadId) -> Result<(), RegistryError> {
        self.engine.register_thread(thread).map_err(|err| {
            crate::log_warn!(target: "boot", "spawn {} rejected: {:?}", thread, err);
            err
        })
    }

    /// Vector 0x30 handler for the scheduler's current thread.
    pub fn trap(&mut self, args: &Args) -> TrapExit {
        let caller = self.scheduler.current_thread();
        self.trap_from(caller, args)
    }

    /// Vector 0x30 handler for an explicit caller.
    pub fn trap_from(&mut self, caller: ThreadId, args: &Args) -> TrapExit {
        let now = self.timer.now();
        let mut ctx = api::Context::new(
            &mut self.engine,
            &mut self.mapper,
            &mut self.scheduler,
            &mut self.console,
            now,
            caller,
        );
        let exit = syscall::dispatch(&self.services, &mut ctx, args);
        self.program_wakeup();
        exit
    }

    /// Timer interrupt: expires due calls. Returns how many expired.
    pub fn timer_interrupt(&mut self) -> usize {
        let mut env = IpcEnv { mapper: &mut self.mapper, scheduler: &mut self.scheduler, now: self.timer.now() };
        let expired = self.engine.expire_due(&mut env);
        if expired > 0 {
            crate::log_debug!(target: "timer", "{} call(s) expired", expired);
        }
        self.program_wakeup();
        expired
    }

    /// Result registers for a thread the scheduler resumed.
    pub fn take_completion(&mut self, thread: ThreadId) -> Option<TrapFrame> {
        self.engine.take_completion(thread).map(TrapFrame::from)
    }

    /// Checks the engine invariants; on failure logs the breach and the recent trace.
    pub fn audit(&self) -> Result<(), ConsistencyError> {
        self.engine.check_consistency(self.timer.now()).map_err(|err| {
            crate::log_error!(target: "ipc", "invariant broken: {:?}", err);
            trace::dump(16);
            err
        })
    }

    /// The rendezvous engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The memory mapper.
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Mutable access to the memory mapper (loader and bootstrap path).
    pub fn mapper_mut(&mut self) -> &mut M {
        &mut self.mapper
    }

    /// The dispatcher.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Mutable access to the dispatcher.
    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// The clock.
    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// The console sink.
    pub fn console(&self) -> &C {
        &self.console
    }

    fn program_wakeup(&self) {
        self.timer.set_wakeup(self.engine.next_deadline().unwrap_or(NO_WAKEUP));
    }
}
