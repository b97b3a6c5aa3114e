// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User-mode syscall trap stub and typed IPC wrappers
//! OWNERS: @runtime
//! PUBLIC API: Trap, syscall(), syscall0(), send/call/recv/reply_recv/grant/console_write/exit_thread
//! DEPENDS_ON: envelope, reply, timeout; x86 `int 0x30` (OS only)
//! INVARIANTS: Stub performs no validation; register order eax=receiver, ebx=flags,
//!             ecx=payload0, edx=payload1, edi=timeout both ways (edi in only)

use crate::envelope::{Envelope, Flags, Message, Operation};
use crate::reply::{IpcError, Reply};
use crate::rights::Rights;
use crate::service;
use crate::thread::ThreadId;
use crate::timeout::Timeout;

/// Software trap vector used for IPC.
pub const TRAP_VECTOR: u8 = 0x30;

/// Entry into the kernel.
///
/// On bare-metal x86 this is [`SoftwareInterrupt`]. Host builds plug their own
/// implementation (tests route it straight into a kernel instance).
pub trait Trap {
    /// Executes the trap with `[receiver, flags, payload0, payload1]` and the raw
    /// timeout, returning the reply words in the same order.
    fn trap(&mut self, words: [u32; 4], timeout: u32) -> [u32; 4];
}

/// `int 0x30` trap for the bare-metal x86 target.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftwareInterrupt;

#[cfg(all(target_arch = "x86", target_os = "none"))]
impl Trap for SoftwareInterrupt {
    #[inline(always)]
    fn trap(&mut self, words: [u32; 4], timeout: u32) -> [u32; 4] {
        let [mut receiver, mut fl, mut p0, mut p1] = words;
        // SAFETY: the kernel's vector 0x30 handler preserves every register other
        // than eax/ebx/ecx/edx. ebx is reserved by LLVM, so it is swapped through
        // a scratch register around the trap.
        unsafe {
            core::arch::asm!(
                "xchg {fl}, ebx",
                "int 0x30",
                "xchg {fl}, ebx",
                fl = inout(reg) fl,
                inout("eax") receiver,
                inout("ecx") p0,
                inout("edx") p1,
                in("edi") timeout,
            );
        }
        [receiver, fl, p0, p1]
    }
}

/// Full form: marshals the envelope, traps, and returns the reply envelope.
pub fn syscall<T: Trap + ?Sized>(trap: &mut T, env: Envelope, timeout: Timeout) -> Envelope {
    Envelope::from_words(trap.trap(env.to_words(), timeout.to_raw()))
}

/// Reduced form: `0` on success, otherwise the error code from `payload0`.
pub fn syscall0<T: Trap + ?Sized>(trap: &mut T, env: Envelope, timeout: Timeout) -> u32 {
    collapse(syscall(trap, env, timeout))
}

/// Collapses a reply envelope to the reduced-form status word.
#[inline]
pub const fn collapse(reply: Envelope) -> u32 {
    if reply.flags().carries_error() {
        reply.payload0
    } else {
        0
    }
}

/// A message handed to a receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Received {
    /// Thread that sent the message.
    pub sender: ThreadId,
    /// Sender's flags word, with the error bit set if its grant failed.
    pub flags: Flags,
    /// Sender's payload.
    pub payload: (u32, u32),
}

impl Received {
    /// `true` when the sender is blocked waiting for a reply.
    pub const fn expects_reply(&self) -> bool {
        self.flags.op_code() == Operation::SendAndWait.code()
    }

    /// Why an attached grant was refused, if it was.
    pub fn grant_error(&self) -> Option<IpcError> {
        if self.flags.is_mapping_request() && self.flags.carries_error() {
            IpcError::try_from(self.payload.0).ok()
        } else {
            None
        }
    }
}

// Failures of the caller's own call come back from the kernel endpoint; a
// delivered message always names its (non-kernel) sender.
fn received(env: Envelope) -> Result<Received, IpcError> {
    if env.receiver_id().is_kernel() {
        Reply::from_envelope(env).into_result()?;
        return Err(IpcError::InvalidOperation);
    }
    Ok(Received {
        sender: env.receiver_id(),
        flags: env.flags(),
        payload: (env.payload0, env.payload1),
    })
}

/// Fire-and-forget send.
pub fn send<T: Trap + ?Sized>(trap: &mut T, to: ThreadId, payload: (u32, u32)) -> Result<(), IpcError> {
    let msg = Message::new(to, Operation::Send, Timeout::Infinite, payload);
    Reply::from_envelope(syscall(trap, msg.to_envelope(), msg.timeout)).into_result().map(|_| ())
}

/// RPC call: sends and blocks for the reply.
pub fn call<T: Trap + ?Sized>(
    trap: &mut T,
    to: ThreadId,
    payload: (u32, u32),
    timeout: Timeout,
) -> Result<(u32, u32), IpcError> {
    let msg = Message::new(to, Operation::SendAndWait, timeout, payload);
    Reply::from_envelope(syscall(trap, msg.to_envelope(), timeout)).into_result()
}

/// RPC call carrying a grant of `count` pages from `first_page` with `rights`.
pub fn grant<T: Trap + ?Sized>(
    trap: &mut T,
    to: ThreadId,
    first_page: u32,
    count: u32,
    rights: Rights,
    timeout: Timeout,
) -> Result<(u32, u32), IpcError> {
    let msg = Message::grant(to, Operation::SendAndWait, timeout, first_page, count, rights);
    Reply::from_envelope(syscall(trap, msg.to_envelope(), timeout)).into_result()
}

/// Waits for any sender.
pub fn recv<T: Trap + ?Sized>(trap: &mut T, timeout: Timeout) -> Result<Received, IpcError> {
    let msg = Message::new(ThreadId::KERNEL, Operation::Recv, timeout, (0, 0));
    received(syscall(trap, msg.to_envelope(), timeout))
}

/// Replies to the last caller and waits for the next one.
pub fn reply_recv<T: Trap + ?Sized>(
    trap: &mut T,
    reply: (u32, u32),
    timeout: Timeout,
) -> Result<Received, IpcError> {
    let msg = Message::new(ThreadId::KERNEL, Operation::ReplyAndRecv, timeout, reply);
    received(syscall(trap, msg.to_envelope(), timeout))
}

/// Writes bytes to the kernel console, four per trap.
pub fn console_write<T: Trap + ?Sized>(trap: &mut T, bytes: &[u8]) -> Result<(), IpcError> {
    for chunk in bytes.chunks(4) {
        let mut word = [0_u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        let mut msg = Message::new(
            ThreadId::KERNEL,
            Operation::SendAndWait,
            Timeout::Infinite,
            (service::CONSOLE_WRITE, u32::from_le_bytes(word)),
        );
        msg.user_flags = (chunk.len() - 1) as u8;
        let status = syscall0(trap, msg.to_envelope(), msg.timeout);
        if status != 0 {
            return Err(IpcError::try_from(status).unwrap_or(IpcError::InvalidOperation));
        }
    }
    Ok(())
}

/// Terminates the calling thread. Returns only if the kernel refused.
pub fn exit_thread<T: Trap + ?Sized>(trap: &mut T) -> u32 {
    let msg = Message::new(ThreadId::KERNEL, Operation::Send, Timeout::Infinite, (service::EXIT_THREAD, 0));
    syscall0(trap, msg.to_envelope(), msg.timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records the registers it was entered with and answers with a canned reply.
    struct Canned {
        seen: Vec<([u32; 4], u32)>,
        reply: [u32; 4],
    }

    impl Trap for Canned {
        fn trap(&mut self, words: [u32; 4], timeout: u32) -> [u32; 4] {
            self.seen.push((words, timeout));
            self.reply
        }
    }

    fn canned(reply: Envelope) -> Canned {
        Canned { seen: Vec::new(), reply: reply.to_words() }
    }

    #[test]
    fn full_form_passes_registers_through() {
        let mut trap = canned(Envelope::new(9, 8, 7, 6));
        let out = syscall(&mut trap, Envelope::new(1, 2, 3, 4), Timeout::Immediate);
        assert_eq!(out, Envelope::new(9, 8, 7, 6));
        assert_eq!(trap.seen, vec![([1, 2, 3, 4], 0)]);
    }

    #[test]
    fn reduced_form_returns_error_code_or_zero() {
        let mut failing = canned(Reply::err(IpcError::PermissionDenied).to_envelope(ThreadId::KERNEL));
        assert_eq!(syscall0(&mut failing, Envelope::default(), Timeout::Infinite), 4);

        // payload0 is only an error code when the flag is set
        let mut ok = canned(Envelope::new(0, 0, 4, 0));
        assert_eq!(syscall0(&mut ok, Envelope::default(), Timeout::Infinite), 0);
    }

    #[test]
    fn recv_separates_delivery_from_failure() {
        let mut timed_out = canned(Reply::err(IpcError::TimedOut).to_envelope(ThreadId::KERNEL));
        assert_eq!(recv(&mut timed_out, Timeout::Immediate), Err(IpcError::TimedOut));

        let delivered = Envelope::new(0x0101, Flags::compose(1, true, true, 1).as_raw(), 4, 0);
        let mut trap = canned(delivered);
        let got = recv(&mut trap, Timeout::Infinite).unwrap();
        assert_eq!(got.sender, ThreadId::new(1, 1));
        assert!(got.expects_reply());
        assert_eq!(got.grant_error(), Some(IpcError::PermissionDenied));
    }

    #[test]
    fn console_write_packs_four_bytes_per_trap() {
        let mut trap = canned(Envelope::default());
        console_write(&mut trap, b"hello").unwrap();
        assert_eq!(trap.seen.len(), 2);
        let (first, _) = trap.seen[0];
        assert_eq!(first[2], service::CONSOLE_WRITE);
        assert_eq!(first[3], u32::from_le_bytes(*b"hell"));
        assert_eq!(Flags::from_raw(first[1]).user(), 3);
        let (second, _) = trap.seen[1];
        assert_eq!(second[3], u32::from(b'o'));
        assert_eq!(Flags::from_raw(second[1]).user(), 0);
    }

    #[test]
    fn grant_sets_mapping_bit_and_rights() {
        let mut trap = canned(Envelope::default());
        grant(&mut trap, ThreadId::from_raw(0x0100), 5, 2, Rights::READABLE, Timeout::Infinite).unwrap();
        let (words, timeout) = trap.seen[0];
        assert_eq!(words, [0x0100, 0x1002_0001, 5, 2]);
        assert_eq!(timeout, u32::MAX);
    }
}
