//! Content filtering applied to every batch before it reaches a timeline.
//!
//! The engine treats moderation as a black box: any [`ContentFilter`] may
//! drop or rewrite messages, and it sees retrieval pages, realtime batches
//! and send responses alike.

use chatsync_proto::message::Message;

/// Pure transform over a batch of messages.
pub trait ContentFilter: Send + Sync {
    /// Returns the batch with disallowed messages removed or rewritten.
    fn filter(&self, messages: Vec<Message>) -> Vec<Message>;
}

/// Filter that lets everything through.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl ContentFilter for PassThrough {
    fn filter(&self, messages: Vec<Message>) -> Vec<Message> {
        messages
    }
}

impl<F> ContentFilter for F
where
    F: Fn(Vec<Message>) -> Vec<Message> + Send + Sync,
{
    fn filter(&self, messages: Vec<Message>) -> Vec<Message> {
        self(messages)
    }
}
