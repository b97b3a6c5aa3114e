// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;

use proptest::prelude::*;

use crate::envelope::{Envelope, Message, Operation};
use crate::thread::{decode, encode, ThreadId, TASK_MASK};
use crate::timeout::Timeout;

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Send),
        Just(Operation::SendAndWait),
        Just(Operation::Recv),
        Just(Operation::ReplyAndRecv),
    ]
}

fn arb_timeout() -> impl Strategy<Value = Timeout> {
    prop_oneof![
        Just(Timeout::Immediate),
        Just(Timeout::Infinite),
        (1u64..1_000_000).prop_map(|ms| Timeout::After(Duration::from_millis(ms))),
    ]
}

prop_compose! {
    fn arb_message()(
        receiver in any::<u32>(),
        operation in arb_operation(),
        timeout in arb_timeout(),
        is_mapping_request in any::<bool>(),
        user_flags in 0u8..16,
        payload in any::<(u32, u32)>(),
    ) -> Message {
        Message {
            receiver: ThreadId::from_raw(receiver),
            operation,
            timeout,
            is_mapping_request,
            user_flags,
            payload,
        }
    }
}

proptest! {
    #[test]
    fn thread_address_roundtrip(task in 0u32..=TASK_MASK, local in any::<u8>()) {
        prop_assert_eq!(decode(encode(task, local)), (task, local));
    }

    #[test]
    fn message_roundtrip(msg in arb_message()) {
        let env = msg.to_envelope();
        prop_assert_eq!(Message::from_envelope(env, msg.timeout), Ok(msg));
        prop_assert_eq!(Envelope::from_le_bytes(env.to_le_bytes()), env);
    }

    #[test]
    fn timeout_register_roundtrip(t in arb_timeout()) {
        prop_assert_eq!(Timeout::from_raw(t.to_raw()), t);
    }

    #[test]
    fn envelope_decoding_is_total(words in any::<[u32; 4]>()) {
        let env = Envelope::from_words(words);
        prop_assert_eq!(env.to_words(), words);
        let ok = env.flags().op_code() <= 3;
        prop_assert_eq!(Message::from_envelope(env, Timeout::Immediate).is_ok(), ok);
    }
}
