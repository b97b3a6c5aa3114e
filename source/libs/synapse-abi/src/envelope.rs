// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Four-word IPC wire message and its flags word
//! OWNERS: @runtime
//! PUBLIC API: Operation, Flags, Envelope, Message, flags::*
//! DEPENDS_ON: thread::ThreadId, rights::Rights, timeout::Timeout
//! INVARIANTS: Envelope is 16 bytes LE; envelope decoding is total; opcode
//!             validation happens in Message::from_envelope, never in the codec
//!
//! Flags word layout:
//!
//! ```text
//!  31    28 27          18  17   16  15         4  3     0
//! +--------+--------------+----+----+------------+-------+
//! | opcode |   reserved   | MAP| ERR|  reserved  | user  |
//! +--------+--------------+----+----+------------+-------+
//! ```
//!
//! Reserved bits are zero on send and ignored on receive.

use crate::reply::IpcError;
use crate::rights::Rights;
use crate::thread::ThreadId;
use crate::timeout::Timeout;

/// Bit positions and masks of the flags word.
pub mod flags {
    /// Shift of the 4-bit operation code.
    pub const OP_SHIFT: u32 = 28;
    /// Mask of the operation code after shifting.
    pub const OP_MASK: u32 = 0xF;
    /// Message carries a memory-grant request.
    pub const MAP_REQUEST: u32 = 1 << 17;
    /// Reply carries an error code in `payload0`.
    pub const ERROR: u32 = 1 << 16;
    /// Caller-defined bits (requested rights for a grant).
    pub const USER_MASK: u32 = 0xF;
    /// Every bit with a defined meaning.
    pub const DEFINED: u32 = (OP_MASK << OP_SHIFT) | MAP_REQUEST | ERROR | USER_MASK;
}

/// The four IPC operations.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Fire-and-forget delivery; never blocks.
    Send = 0,
    /// Deliver and block until the receiver replies.
    SendAndWait = 1,
    /// Block until any sender targets the caller.
    Recv = 2,
    /// Reply to the previous caller and receive the next one in one entry.
    ReplyAndRecv = 3,
}

impl Operation {
    /// Wire code of the operation.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Returns `true` for operations that deliver a message to another thread.
    #[inline]
    pub const fn is_send(self) -> bool {
        matches!(self, Self::Send | Self::SendAndWait)
    }
}

impl TryFrom<u8> for Operation {
    type Error = IpcError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Send),
            1 => Ok(Self::SendAndWait),
            2 => Ok(Self::Recv),
            3 => Ok(Self::ReplyAndRecv),
            _ => Err(IpcError::InvalidOperation),
        }
    }
}

/// Typed view of the flags word.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Flags(u32);

impl Flags {
    /// Wraps a raw flags word as received; reserved bits are kept but ignored.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw flags word.
    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Builds a flags word from its fields. Reserved bits come out zero.
    pub const fn compose(op_code: u8, map_request: bool, error: bool, user: u8) -> Self {
        let mut raw = ((op_code as u32) & flags::OP_MASK) << flags::OP_SHIFT;
        if map_request {
            raw |= flags::MAP_REQUEST;
        }
        if error {
            raw |= flags::ERROR;
        }
        raw |= (user as u32) & flags::USER_MASK;
        Self(raw)
    }

    /// Raw 4-bit operation code, valid or not.
    #[inline]
    pub const fn op_code(self) -> u8 {
        ((self.0 >> flags::OP_SHIFT) & flags::OP_MASK) as u8
    }

    /// Mapping-request bit.
    #[inline]
    pub const fn is_mapping_request(self) -> bool {
        self.0 & flags::MAP_REQUEST != 0
    }

    /// Reply-carries-error bit.
    #[inline]
    pub const fn carries_error(self) -> bool {
        self.0 & flags::ERROR != 0
    }

    /// Caller-defined 4-bit field.
    #[inline]
    pub const fn user(self) -> u8 {
        (self.0 & flags::USER_MASK) as u8
    }

    /// Same word with the error bit set.
    #[inline]
    pub const fn with_error(self) -> Self {
        Self(self.0 | flags::ERROR)
    }

    /// Same word with only the defined bits kept.
    #[inline]
    pub const fn canonical(self) -> Self {
        Self(self.0 & flags::DEFINED)
    }
}

/// The four-word wire message.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Packed receiver address (sender address on delivery).
    pub receiver: u32,
    /// Flags word.
    pub flags: u32,
    /// First payload word.
    pub payload0: u32,
    /// Second payload word.
    pub payload1: u32,
}

impl Envelope {
    /// Creates an envelope from its four words.
    pub const fn new(receiver: u32, flags: u32, payload0: u32, payload1: u32) -> Self {
        Self { receiver, flags, payload0, payload1 }
    }

    /// Builds an envelope from register order `[receiver, flags, p0, p1]`.
    pub const fn from_words(words: [u32; 4]) -> Self {
        Self::new(words[0], words[1], words[2], words[3])
    }

    /// Returns the words in register order.
    pub const fn to_words(self) -> [u32; 4] {
        [self.receiver, self.flags, self.payload0, self.payload1]
    }

    /// Receiver field as a thread address.
    #[inline]
    pub const fn receiver_id(&self) -> ThreadId {
        ThreadId::from_raw(self.receiver)
    }

    /// Typed flags view.
    #[inline]
    pub const fn flags(&self) -> Flags {
        Flags::from_raw(self.flags)
    }

    /// Serialises the envelope to its little-endian wire bytes.
    pub fn to_le_bytes(&self) -> [u8; 16] {
        let mut buf = [0_u8; 16];
        buf[0..4].copy_from_slice(&self.receiver.to_le_bytes());
        buf[4..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload0.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload1.to_le_bytes());
        buf
    }

    /// Deserialises little-endian wire bytes.
    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        let receiver = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let flags = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let payload0 = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let payload1 = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        Self { receiver, flags, payload0, payload1 }
    }
}

/// A validated IPC request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message {
    /// Target thread (ignored by `Recv`; the kernel's reply record wins for `ReplyAndRecv`).
    pub receiver: ThreadId,
    /// Requested operation.
    pub operation: Operation,
    /// Wait bound, conveyed out-of-band.
    pub timeout: Timeout,
    /// Payload is `(first_page, page_count)` and `user_flags` are requested rights.
    pub is_mapping_request: bool,
    /// Caller-defined 4-bit field.
    pub user_flags: u8,
    /// Opaque payload words.
    pub payload: (u32, u32),
}

impl Message {
    /// Creates a plain (non-mapping) message.
    pub const fn new(receiver: ThreadId, operation: Operation, timeout: Timeout, payload: (u32, u32)) -> Self {
        Self {
            receiver,
            operation,
            timeout,
            is_mapping_request: false,
            user_flags: 0,
            payload,
        }
    }

    /// Creates a memory-grant request over `count` pages starting at `first_page`.
    pub const fn grant(
        receiver: ThreadId,
        operation: Operation,
        timeout: Timeout,
        first_page: u32,
        count: u32,
        rights: Rights,
    ) -> Self {
        Self {
            receiver,
            operation,
            timeout,
            is_mapping_request: true,
            user_flags: rights.to_user_flags(),
            payload: (first_page, count),
        }
    }

    /// Rights requested by a mapping message.
    #[inline]
    pub const fn requested_rights(&self) -> Rights {
        Rights::from_user_flags(self.user_flags)
    }

    /// Flags word for this message.
    pub const fn flags(&self) -> Flags {
        Flags::compose(self.operation.code(), self.is_mapping_request, false, self.user_flags)
    }

    /// Encodes the message into the wire envelope. The timeout is not part of it.
    pub const fn to_envelope(&self) -> Envelope {
        Envelope::new(self.receiver.as_raw(), self.flags().as_raw(), self.payload.0, self.payload.1)
    }

    /// Validates an envelope received at the trap boundary.
    ///
    /// Fails only on an unknown operation code; every other field decodes as-is.
    pub fn from_envelope(env: Envelope, timeout: Timeout) -> Result<Self, IpcError> {
        let flags = env.flags();
        let operation = Operation::try_from(flags.op_code())?;
        Ok(Self {
            receiver: env.receiver_id(),
            operation,
            timeout,
            is_mapping_request: flags.is_mapping_request(),
            user_flags: flags.user(),
            payload: (env.payload0, env.payload1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOLDEN: &[u8; 16] = include_bytes!("../tests/vectors/envelope_v1.bin");

    fn golden_envelope() -> Envelope {
        let msg = Message::grant(
            ThreadId::from_raw(0x0100),
            Operation::SendAndWait,
            Timeout::Infinite,
            5,
            2,
            Rights::READABLE,
        );
        msg.to_envelope()
    }

    #[test]
    fn golden_vector_layout() {
        let env = golden_envelope();
        assert_eq!(env.flags, 0x1002_0001);
        assert_eq!(&env.to_le_bytes(), GOLDEN);
        assert_eq!(Envelope::from_le_bytes(*GOLDEN), env);
    }

    #[test]
    fn field_positions() {
        let f = Flags::compose(3, true, true, 0xF);
        assert_eq!(f.as_raw(), 0x3003_000F);
        assert_eq!(f.op_code(), 3);
        assert!(f.is_mapping_request());
        assert!(f.carries_error());
        assert_eq!(f.user(), 0xF);
    }

    #[test]
    fn reserved_bits_are_ignored_on_receive() {
        let env = Envelope::new(0x0100, 0x0FFC_FFF0 | (1 << flags::OP_SHIFT), 7, 8);
        let msg = Message::from_envelope(env, Timeout::Immediate).unwrap();
        assert_eq!(msg.operation, Operation::SendAndWait);
        assert!(!msg.is_mapping_request);
        assert_eq!(msg.user_flags, 0);
        assert_eq!(env.flags().canonical().as_raw(), 1 << flags::OP_SHIFT);
    }

    #[test]
    fn unknown_opcodes_decode_but_do_not_validate() {
        for code in 4u32..=15 {
            let env = Envelope::new(1, code << flags::OP_SHIFT, 0, 0);
            assert_eq!(env.flags().op_code() as u32, code);
            assert_eq!(Message::from_envelope(env, Timeout::Infinite), Err(IpcError::InvalidOperation));
        }
    }

    #[test]
    fn words_are_register_order() {
        let env = Envelope::new(1, 2, 3, 4);
        assert_eq!(env.to_words(), [1, 2, 3, 4]);
        assert_eq!(Envelope::from_words([1, 2, 3, 4]), env);
    }
}
