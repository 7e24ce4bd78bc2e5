//! `ChatSync`: client-side conversation sync engine.
//!
//! Reconciles messages from a paginated retrieval API and a realtime push
//! channel into one ordered, deduplicated timeline per conversation.

pub mod chat;
pub mod config;
pub mod driver;
pub mod filter;
pub mod merge;
pub mod transport;

pub use chatsync_proto::{codec, media, message, wire};
