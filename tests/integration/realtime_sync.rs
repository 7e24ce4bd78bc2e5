//! Integration tests for realtime delivery reconciling with retrieval.
//!
//! Verifies:
//! 1. Redelivery of a loaded id updates in place (read flip, same length).
//! 2. Out-of-order pushes end up sorted by timestamp.
//! 3. Records without ids dedupe across sources via the fallback id.
//! 4. Distinct id-less messages sharing an instant are all kept.
//! 5. The content filter applies to realtime batches too.

use chatsync::chat::{ChatSession, ConversationMode, SessionConfig, SessionEvent};
use chatsync::filter::{ContentFilter, PassThrough};
use chatsync::message::{Message, ParticipantId, Role};
use chatsync::transport::AuthContext;
use chatsync::transport::memory::InMemoryBackend;
use chatsync::wire::{RawMessage, RawRealtimeMessage, RawTimestamp, SenderType};

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn cust() -> ParticipantId {
    ParticipantId::new("cust-1")
}

fn store() -> ParticipantId {
    ParticipantId::new("store-1")
}

fn auth() -> AuthContext {
    AuthContext::bearer("tok")
}

fn backend() -> InMemoryBackend {
    InMemoryBackend::new().with_identity("tok", cust())
}

fn store_record(id: Option<&str>, secs: f64, read: bool) -> RawMessage {
    RawMessage {
        id: id.map(str::to_string),
        sender_id: "store-1".to_string(),
        sender_type: SenderType::Store,
        content: Some("hello".to_string()),
        message_type: Some("text".to_string()),
        media_url: None,
        created_at: Some(RawTimestamp::Number(secs)),
        is_read: Some(read),
    }
}

fn push(id: &str, secs: f64) -> RawRealtimeMessage {
    RawRealtimeMessage {
        id: Some(id.to_string()),
        sender_id: "store-1".to_string(),
        sender_type: SenderType::Store,
        content: Some(format!("pushed {id}")),
        message_type: None,
        media_url: None,
        created_at: None,
        timestamp: Some(RawTimestamp::Number(secs)),
        is_read: None,
    }
}

async fn open<F: ContentFilter>(
    backend: &InMemoryBackend,
    filter: F,
) -> (
    ChatSession<InMemoryBackend, InMemoryBackend, InMemoryBackend, F>,
    mpsc::Receiver<SessionEvent>,
) {
    let (mut session, events) = ChatSession::new(
        backend.clone(),
        backend.clone(),
        backend.clone(),
        filter,
        SessionConfig::default(),
    );
    assert!(
        session
            .open(&auth(), ConversationMode::StoreConversation, store(), "Shop")
            .await
    );
    (session, events)
}

fn ids(timeline: &[Message]) -> Vec<&str> {
    timeline.iter().map(|m| m.id.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn redelivery_flips_read_in_place() {
    let backend = backend();
    backend.seed(
        &cust(),
        &store(),
        vec![store_record(Some("1"), 10.0, true), store_record(Some("2"), 20.0, true)],
    );
    let (mut session, mut events) = open(&backend, PassThrough).await;
    while events.try_recv().is_ok() {}

    // Our own message, then the store reads it.
    let sent = session.send_message(&auth(), "hi", vec![]).await.unwrap();
    session.drain_realtime();
    assert!(!session.timeline()[2].read);

    backend.read_by(&cust(), &store(), &store());
    assert_eq!(session.drain_realtime(), 1);

    assert_eq!(session.timeline().len(), 3);
    assert_eq!(session.timeline()[2].id, sent.id);
    assert!(session.timeline()[2].read);
    assert!(events.try_recv().is_ok());
}

#[tokio::test]
async fn realtime_copy_of_loaded_message_replaces_it() {
    let backend = backend();
    backend.seed(&cust(), &store(), vec![store_record(Some("1"), 10.0, true)]);
    let (mut session, _events) = open(&backend, PassThrough).await;

    let mut copy = push("1", 10.0);
    copy.is_read = Some(false);
    copy.content = Some("edited".to_string());
    assert_eq!(session.apply_realtime_batch(vec![copy]), 1);

    assert_eq!(session.timeline().len(), 1);
    assert_eq!(session.timeline()[0].content, "edited");
    assert!(!session.timeline()[0].read);
}

#[tokio::test]
async fn out_of_order_pushes_are_sorted() {
    let backend = backend();
    let (mut session, _events) = open(&backend, PassThrough).await;

    backend.push_realtime(&store(), &cust(), vec![push("c", 30.0), push("a", 10.0)]);
    backend.push_realtime(&store(), &cust(), vec![push("b", 20.0)]);
    assert_eq!(session.drain_realtime(), 2);

    assert_eq!(ids(session.timeline()), vec!["a", "b", "c"]);
    assert!(session.timeline().iter().all(|m| m.role == Role::Remote));
}

#[tokio::test]
async fn next_realtime_batch_delivers_injected_message() {
    let backend = backend();
    let (mut session, _events) = open(&backend, PassThrough).await;

    let stored = backend.inject(&store(), &cust(), store_record(None, 10.0, false));
    let batch = session.next_realtime_batch().await.unwrap();
    session.apply_realtime_batch(batch);

    assert_eq!(session.timeline().len(), 1);
    assert_eq!(
        Some(session.timeline()[0].id.as_str()),
        stored.id.as_deref()
    );
}

#[tokio::test]
async fn missing_ids_agree_across_sources() {
    let backend = backend();
    backend.seed(&cust(), &store(), vec![store_record(None, 10.0, false)]);
    let (mut session, _events) = open(&backend, PassThrough).await;
    assert_eq!(session.timeline().len(), 1);
    assert!(session.timeline()[0].id.as_str().starts_with("store-1:10000:"));

    let mut echo = RawRealtimeMessage::from(store_record(None, 10.0, true));
    echo.created_at = None;
    echo.timestamp = Some(RawTimestamp::Text("1970-01-01T00:00:10Z".to_string()));
    session.apply_realtime_batch(vec![echo]);

    assert_eq!(session.timeline().len(), 1);
    assert!(session.timeline()[0].read);
}

#[tokio::test]
async fn same_instant_messages_without_ids_all_survive() {
    let backend = backend();
    let at = || Some(RawTimestamp::Text("2024-03-01T10:00:00Z".to_string()));
    let mut hello = store_record(None, 0.0, false);
    hello.created_at = at();
    let mut nudge = hello.clone();
    nudge.content = Some("are you there?".to_string());
    backend.seed(&cust(), &store(), vec![hello.clone(), nudge]);

    let (mut session, _events) = open(&backend, PassThrough).await;
    assert_eq!(session.timeline().len(), 2);
    let contents: Vec<&str> = session.timeline().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["hello", "are you there?"]);

    // The store's read flip redelivers the first one: it must replace, not add.
    let mut echo = RawRealtimeMessage::from(hello);
    echo.is_read = Some(true);
    assert_eq!(session.apply_realtime_batch(vec![echo]), 1);

    assert_eq!(session.timeline().len(), 2);
    assert!(session.timeline()[0].read);
    assert!(!session.timeline()[1].read);
}

#[tokio::test]
async fn untimed_messages_without_ids_in_one_batch_all_survive() {
    let backend = backend();
    let (mut session, _events) = open(&backend, PassThrough).await;

    let batch: Vec<RawRealtimeMessage> = ["one", "two", "three"]
        .into_iter()
        .map(|text| {
            let mut record = RawRealtimeMessage::from(store_record(None, 0.0, false));
            record.created_at = None;
            record.timestamp = None;
            record.content = Some(text.to_string());
            record
        })
        .collect();
    assert_eq!(session.apply_realtime_batch(batch), 3);
    assert_eq!(session.timeline().len(), 3);
}

#[tokio::test]
async fn invalid_realtime_records_are_dropped() {
    let backend = backend();
    let (mut session, _events) = open(&backend, PassThrough).await;

    let mut bad = push("bad", 15.0);
    bad.sender_id = " ".to_string();
    let applied = session.apply_realtime_batch(vec![push("a", 10.0), bad, push("b", 20.0)]);

    assert_eq!(applied, 2);
    assert_eq!(ids(session.timeline()), vec!["a", "b"]);
}

#[tokio::test]
async fn filter_applies_to_realtime_batches() {
    let backend = backend();
    let redact = |batch: Vec<Message>| -> Vec<Message> {
        batch
            .into_iter()
            .filter(|m| !m.content.contains("spam"))
            .map(|mut m| {
                m.content = m.content.replace("darn", "****");
                m
            })
            .collect()
    };
    let (mut session, _events) = open(&backend, redact).await;

    let mut spam = push("s", 10.0);
    spam.content = Some("buy spam now".to_string());
    let mut rude = push("r", 20.0);
    rude.content = Some("darn it".to_string());
    session.apply_realtime_batch(vec![spam, rude]);

    assert_eq!(ids(session.timeline()), vec!["r"]);
    assert_eq!(session.timeline()[0].content, "**** it");
}
