//! The single ingestion path shared by retrieval pages, realtime batches
//! and send responses.

use std::fmt;

use chatsync_proto::message::{Message, ParticipantId, Timestamp};
use chatsync_proto::wire::RawMessage;

/// Where a batch of raw records came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A `fetch_recent` page.
    Retrieval,
    /// A realtime push.
    Realtime,
    /// The authoritative record returned by `send`.
    SendResponse,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Retrieval => "retrieval",
            Self::Realtime => "realtime",
            Self::SendResponse => "send-response",
        })
    }
}

/// Converts raw records into canonical messages.
///
/// Records that fail validation are dropped with a warning; the rest of
/// the batch survives. Records without a creation instant are stamped
/// with the time of receipt.
pub fn validate_batch(records: Vec<RawMessage>, local: &ParticipantId, source: Source) -> Vec<Message> {
    let received_at = Timestamp::now();
    let total = records.len();
    let messages: Vec<Message> = records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.clone();
            record
                .into_message(local, received_at)
                .map_err(|e| {
                    tracing::warn!(
                        %source,
                        id = id.as_deref().unwrap_or("<none>"),
                        error = %e,
                        "dropping invalid record"
                    );
                })
                .ok()
        })
        .collect();

    if messages.len() < total {
        tracing::debug!(%source, total, kept = messages.len(), "batch partially rejected");
    }
    messages
}
