//! Property-based tests for the timeline merge.
//!
//! Uses proptest to verify, for arbitrary batches over a small id space
//! (so collisions are common):
//! 1. Merging the same batch twice changes nothing.
//! 2. The result is sorted by timestamp.
//! 3. Every id from either input survives, exactly once.
//! 4. The surviving copy of an id is the last incoming one.
//! 5. Messages with equal timestamps keep their first-seen order.

use std::collections::{HashMap, HashSet};

use chatsync::merge::merge;
use chatsync::message::{Message, MessageId, MessageType, Role, Timestamp};
use proptest::prelude::*;

/// Strategy for a message with an id drawn from `0..12` and a coarse
/// timestamp so ties occur.
fn arb_message() -> impl Strategy<Value = Message> {
    (0u8..12, 0u64..6, any::<bool>(), "[a-z]{0,8}").prop_map(|(id, ts, read, content)| Message {
        id: MessageId::new(format!("m{id}")),
        role: if id % 2 == 0 { Role::Local } else { Role::Remote },
        content,
        message_type: MessageType::Text,
        media: Vec::new(),
        timestamp: Timestamp::from_millis(ts * 1000),
        read,
    })
}

/// Strategy for a canonical timeline: unique ids, sorted by timestamp.
fn arb_timeline() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(arb_message(), 0..16).prop_map(|batch| merge(&[], &batch))
}

fn arb_batch() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(arb_message(), 0..16)
}

proptest! {
    #[test]
    fn merge_is_idempotent(existing in arb_timeline(), incoming in arb_batch()) {
        let once = merge(&existing, &incoming);
        let twice = merge(&once, &incoming);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn result_is_sorted(existing in arb_timeline(), incoming in arb_batch()) {
        let merged = merge(&existing, &incoming);
        prop_assert!(merged.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn ids_are_unique_and_none_are_dropped(existing in arb_timeline(), incoming in arb_batch()) {
        let merged = merge(&existing, &incoming);
        let merged_ids: Vec<&MessageId> = merged.iter().map(|m| &m.id).collect();
        let unique: HashSet<&MessageId> = merged_ids.iter().copied().collect();
        prop_assert_eq!(unique.len(), merged_ids.len());

        let expected: HashSet<&MessageId> =
            existing.iter().chain(incoming.iter()).map(|m| &m.id).collect();
        prop_assert_eq!(unique, expected);
    }

    #[test]
    fn last_incoming_copy_wins(existing in arb_timeline(), incoming in arb_batch()) {
        let merged = merge(&existing, &incoming);
        let last: HashMap<&MessageId, &Message> =
            incoming.iter().map(|m| (&m.id, m)).collect();
        for msg in &merged {
            if let Some(winner) = last.get(&msg.id) {
                prop_assert_eq!(msg, *winner);
            }
        }
    }

    #[test]
    fn ties_keep_first_seen_order(incoming in arb_batch()) {
        let merged = merge(&[], &incoming);
        let mut first_seen: HashMap<&MessageId, usize> = HashMap::new();
        for (pos, msg) in incoming.iter().enumerate() {
            first_seen.entry(&msg.id).or_insert(pos);
        }
        for pair in merged.windows(2) {
            if pair[0].timestamp == pair[1].timestamp {
                prop_assert!(first_seen[&pair[0].id] < first_seen[&pair[1].id]);
            }
        }
    }
}
