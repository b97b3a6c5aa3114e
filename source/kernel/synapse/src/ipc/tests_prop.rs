// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Property tests for rendezvous ordering and grant rights
//! OWNERS: @kernel-ipc-team
//! NOTE: Tests only; no kernel logic
//!
//! TEST_SCOPE:
//!   - Delivery order equals enqueue order for any set of senders
//!   - A grant never reaches the receiver with rights the sender lacks
//!   - Arena stays consistent after every step

use proptest::prelude::*;
use synapse_abi::{IpcError, Message, Operation, Rights, ThreadId, Timeout};

use super::tests::{call, recv, reply_recv, send, Harness};
use super::CallOutcome;
use crate::mm::MemoryMapper;

const RECEIVER: ThreadId = ThreadId::new(1, 0);

fn rights() -> impl Strategy<Value = Rights> {
    (1u32..8).prop_map(Rights::from_bits_truncate)
}

proptest! {
    #[test]
    fn delivery_follows_enqueue_order(order in Just((1u32..=12).collect::<Vec<_>>()).prop_shuffle(),
                                      blocking in proptest::collection::vec(any::<bool>(), 12)) {
        let senders: Vec<ThreadId> = order.iter().map(|&t| ThreadId::new(t + 1, 0)).collect();
        let mut all = senders.clone();
        all.push(RECEIVER);
        let mut h = Harness::new(&all);

        for (i, &s) in senders.iter().enumerate() {
            let msg = if blocking[i] { call(RECEIVER, (i as u32, 0)) } else { send(RECEIVER, (i as u32, 0)) };
            let _ = h.call(s, msg).expect("enqueue");
            h.consistent();
        }

        let mut seen = Vec::new();
        for step in 0..senders.len() {
            let msg = if step == 0 { recv() } else { reply_recv((0, 0)) };
            match h.call(RECEIVER, msg) {
                Ok(CallOutcome::Complete(env)) => seen.push(env.receiver_id()),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
            h.consistent();
        }
        prop_assert_eq!(seen, senders);
        prop_assert!(h.engine.pending_count() <= 1);
    }

    #[test]
    fn grants_never_inflate_rights(held in rights(), asked in rights(), pages in 1u32..4) {
        let sender = ThreadId::new(0, 1);
        let mut h = Harness::new(&[sender, RECEIVER]);
        h.mapper.map_range(sender.task(), 10, pages, held).expect("sender pages");
        let _ = h.call(RECEIVER, recv()).expect("recv");

        let msg = Message::grant(RECEIVER, Operation::Send, Timeout::Infinite, 10, pages, asked);
        let _ = h.call(sender, msg).expect("send");
        let delivered = h.completion(RECEIVER).expect("delivered");

        let allowed = held.contains(asked);
        prop_assert_eq!(delivered.flags().carries_error(), !allowed);
        for page in 10..10 + pages {
            let got = h.mapper.rights_of(RECEIVER.task(), page);
            if allowed {
                prop_assert_eq!(got, Some(asked));
            } else {
                prop_assert_eq!(got, None);
            }
            if let Some(got) = got {
                prop_assert!(held.contains(got));
            }
        }
        if !allowed {
            prop_assert_eq!(delivered.payload0, IpcError::PermissionDenied.code());
        }
        h.consistent();
    }
}
