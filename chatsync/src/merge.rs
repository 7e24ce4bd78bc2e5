//! Timeline merge: the single place where dedup and ordering are enforced.
//!
//! Incoming messages replace existing ones with the same id (last write
//! wins), new ids are appended, and the result is stable-sorted by
//! timestamp. The functions here are pure: no transport, no clock.
//!
//! Guarantees:
//! - idempotent: `merge(&merge(x, y), y) == merge(x, y)`
//! - lossless: every id from either input is present exactly once
//! - stable: equal timestamps keep their relative insertion order
//!
//! Because content is decided by the last occurrence processed, callers
//! feed batches in the order their operations completed.

use std::collections::HashMap;

use chatsync_proto::message::{Message, MessageId};

/// Merges `incoming` into a copy of `existing` and returns the canonical
/// timeline.
#[must_use]
pub fn merge(existing: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut timeline = existing.to_vec();
    merge_into(&mut timeline, incoming.iter().cloned());
    timeline
}

/// In-place variant of [`merge`].
///
/// Returns the number of messages that were new to the timeline.
pub fn merge_into(timeline: &mut Vec<Message>, incoming: impl IntoIterator<Item = Message>) -> usize {
    let mut positions: HashMap<MessageId, usize> = timeline
        .iter()
        .enumerate()
        .map(|(pos, msg)| (msg.id.clone(), pos))
        .collect();

    let mut added = 0;
    for msg in incoming {
        if let Some(&pos) = positions.get(&msg.id) {
            timeline[pos] = msg;
        } else {
            positions.insert(msg.id.clone(), timeline.len());
            timeline.push(msg);
            added += 1;
        }
    }

    // `sort_by_key` is stable.
    timeline.sort_by_key(|msg| msg.timestamp);
    added
}
