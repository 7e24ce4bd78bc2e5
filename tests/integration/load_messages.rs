//! Integration tests for timeline loading.
//!
//! Verifies:
//! 1. A retrieval page is ordered by timestamp regardless of page order.
//! 2. Repeated loads are idempotent.
//! 3. Fetch failures leave the timeline intact.
//! 4. Invalid records are dropped without losing the rest of the page.
//! 5. Unread counterpart messages trigger a best-effort `mark_read`.

use std::time::Duration;

use chatsync::chat::{
    ChatSession, ConversationMode, LoadOutcome, SessionConfig, SessionError, SessionEvent,
};
use chatsync::filter::PassThrough;
use chatsync::message::{MediaKind, MediaRef, MessageType, ParticipantId, Role, Timestamp};
use chatsync::transport::memory::{InMemoryBackend, Operation};
use chatsync::transport::{AuthContext, TransportError};
use chatsync::wire::{RawMessage, RawTimestamp, SenderType};

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Session = ChatSession<InMemoryBackend, InMemoryBackend, InMemoryBackend, PassThrough>;

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

fn store_record(id: &str, secs: f64, read: bool) -> RawMessage {
    RawMessage {
        id: Some(id.to_string()),
        sender_id: "store-1".to_string(),
        sender_type: SenderType::Store,
        content: Some(format!("message {id}")),
        message_type: Some("text".to_string()),
        media_url: None,
        created_at: Some(RawTimestamp::Number(secs)),
        is_read: Some(read),
    }
}

async fn open(backend: &InMemoryBackend) -> (Session, mpsc::Receiver<SessionEvent>) {
    let (mut session, events) = ChatSession::new(
        backend.clone(),
        backend.clone(),
        backend.clone(),
        PassThrough,
        SessionConfig::default(),
    );
    assert!(
        session
            .open(&auth(), ConversationMode::StoreConversation, store(), "Shop")
            .await
    );
    (session, events)
}

fn ids(session: &Session) -> Vec<String> {
    session
        .timeline()
        .iter()
        .map(|m| m.id.as_str().to_string())
        .collect()
}

async fn wait_for_mark_read(backend: &InMemoryBackend, expected: usize) {
    for _ in 0..100 {
        if backend.mark_read_calls() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("mark_read was not called {expected} time(s)");
}

// ---------------------------------------------------------------------------
// Ordering and idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn page_is_sorted_by_timestamp() {
    let backend = backend();
    // Stored out of order; retrieval also returns newest-first.
    backend.seed(
        &cust(),
        &store(),
        vec![
            store_record("2", 20.0, true),
            store_record("3", 30.0, true),
            store_record("1", 10.0, true),
        ],
    );

    let (session, _events) = open(&backend).await;

    assert_eq!(ids(&session), vec!["1", "2", "3"]);
    assert_eq!(session.timeline()[0].timestamp, Timestamp::from_millis(10_000));
    assert!(session.timeline().iter().all(|m| m.role == Role::Remote));
}

#[tokio::test]
async fn repeated_loads_do_not_duplicate() {
    let backend = backend();
    backend.seed(
        &cust(),
        &store(),
        vec![store_record("1", 10.0, true), store_record("2", 20.0, true)],
    );
    let (mut session, _events) = open(&backend).await;

    let outcome = session.load_messages(&auth()).await;
    assert_eq!(
        outcome,
        LoadOutcome::Loaded {
            fetched: 2,
            accepted: 2
        }
    );
    session.load_messages(&auth()).await;
    assert_eq!(ids(&session), vec!["1", "2"]);
}

#[tokio::test]
async fn load_picks_up_new_messages() {
    let backend = backend();
    backend.seed(&cust(), &store(), vec![store_record("1", 10.0, true)]);
    let (mut session, _events) = open(&backend).await;

    backend.seed(&cust(), &store(), vec![store_record("0", 5.0, true)]);
    session.load_messages(&auth()).await;

    assert_eq!(ids(&session), vec!["0", "1"]);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_failure_leaves_timeline_intact() {
    let backend = backend();
    backend.seed(&cust(), &store(), vec![store_record("1", 10.0, true)]);
    let (mut session, _events) = open(&backend).await;

    backend.fail(Operation::Fetch, true);
    let outcome = session.load_messages(&auth()).await;

    assert!(matches!(
        outcome,
        LoadOutcome::Failed(SessionError::Transport(TransportError::Status {
            status: 503,
            ..
        }))
    ));
    assert_eq!(ids(&session), vec!["1"]);
    assert!(!session.is_loading());
}

#[tokio::test]
async fn unauthenticated_load_is_aborted() {
    let backend = backend();
    let (mut session, _events) = open(&backend).await;
    assert_eq!(
        session.load_messages(&AuthContext::anonymous()).await,
        LoadOutcome::Aborted(SessionError::Unauthenticated)
    );
}

#[tokio::test]
async fn identity_failure_aborts_load() {
    let backend = backend();
    let (mut session, _events) = open(&backend).await;
    backend.fail(Operation::Identity, true);
    assert!(matches!(
        session.load_messages(&auth()).await,
        LoadOutcome::Aborted(SessionError::IdentityResolutionFailed(_))
    ));
}

#[tokio::test]
async fn invalid_records_are_dropped_rest_applied() {
    let backend = backend();
    let mut no_sender = store_record("bad-1", 15.0, true);
    no_sender.sender_id = String::new();
    let mut bad_time = store_record("bad-2", 16.0, true);
    bad_time.created_at = Some(RawTimestamp::Text("not a time".to_string()));
    backend.seed(
        &cust(),
        &store(),
        vec![store_record("1", 10.0, true), no_sender, bad_time, store_record("2", 20.0, true)],
    );

    let (mut session, _events) = open(&backend).await;

    assert_eq!(ids(&session), vec!["1", "2"]);
    assert_eq!(
        session.load_messages(&auth()).await,
        LoadOutcome::Loaded {
            fetched: 4,
            accepted: 2
        }
    );
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn json_page_with_mixed_shapes_is_normalised() {
    let backend = backend();
    let page = serde_json::json!({
        "messages": [
            {
                "id": "img",
                "senderId": "store-1",
                "senderType": "STORE",
                "content": "look",
                "messageType": "IMAGE",
                "mediaUrl": "https://cdn.example/a.jpg",
                "createdAt": "2024-03-01T10:00:00Z",
                "isRead": true
            },
            {
                "id": "clip",
                "senderId": "cust-1",
                "senderType": "CUSTOMER",
                "content": "",
                "mediaUrl": "[{\"url\":\"https://cdn.example/b.webm\"}]",
                "createdAt": 1709287260
            },
            {
                "senderId": "store-1",
                "senderType": "STORE",
                "content": "no id",
                "createdAt": "2024-03-01 10:02:00",
                "read": true
            }
        ]
    });
    let bytes = serde_json::to_vec(&page).unwrap();
    assert_eq!(backend.seed_json(&cust(), &store(), &bytes).unwrap(), 3);

    let (session, _events) = open(&backend).await;
    let timeline = session.timeline();

    assert_eq!(timeline.len(), 3);
    assert_eq!(timeline[0].id.as_str(), "img");
    assert_eq!(timeline[0].message_type, MessageType::Image);
    assert_eq!(timeline[0].media, vec![MediaRef::new("https://cdn.example/a.jpg")]);

    assert_eq!(timeline[1].id.as_str(), "clip");
    assert_eq!(timeline[1].role, Role::Local);
    assert_eq!(timeline[1].message_type, MessageType::Video);
    assert_eq!(timeline[1].timestamp, Timestamp::from_millis(1_709_287_260_000));

    assert!(timeline[2].id.as_str().starts_with("store-1:1709287320000:"));
    assert!(timeline[2].read);
}

#[tokio::test]
async fn persisted_type_is_kept_over_media() {
    let backend = backend();
    let mut record = store_record("1", 10.0, true);
    record.message_type = Some("mixed".to_string());
    record.media_url = Some(chatsync::wire::RawMedia::List(vec![
        chatsync::wire::RawMediaItem {
            url: "https://cdn.example/v.mp4".to_string(),
            kind: Some("video".to_string()),
        },
    ]));
    backend.seed(&cust(), &store(), vec![record]);

    let (session, _events) = open(&backend).await;
    let msg = &session.timeline()[0];
    assert_eq!(msg.message_type, MessageType::Mixed);
    assert_eq!(
        msg.media,
        vec![MediaRef::with_kind("https://cdn.example/v.mp4", MediaKind::Video)]
    );
}

// ---------------------------------------------------------------------------
// Read receipts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unread_counterpart_messages_are_marked_read() {
    let backend = backend();
    backend.seed(
        &cust(),
        &store(),
        vec![store_record("1", 10.0, false), store_record("2", 20.0, false)],
    );
    let (mut session, _events) = open(&backend).await;
    assert!(session.timeline().iter().all(|m| !m.read));

    wait_for_mark_read(&backend, 1).await;
    assert!(
        backend
            .messages(&cust(), &store())
            .iter()
            .all(|r| r.is_read == Some(true))
    );

    // The read flips come back through the realtime channel.
    session.drain_realtime();
    assert!(session.timeline().iter().all(|m| m.read));
    assert_eq!(session.timeline().len(), 2);
}

#[tokio::test]
async fn own_unread_messages_do_not_trigger_mark_read() {
    let backend = backend();
    let mut own = store_record("1", 10.0, false);
    own.sender_id = "cust-1".to_string();
    own.sender_type = SenderType::Customer;
    backend.seed(&cust(), &store(), vec![own]);

    let (_session, _events) = open(&backend).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(backend.mark_read_calls(), 0);
}

#[tokio::test]
async fn mark_read_failure_is_swallowed() {
    let backend = backend();
    backend.seed(&cust(), &store(), vec![store_record("1", 10.0, false)]);
    backend.fail(Operation::MarkRead, true);

    let (mut session, _events) = open(&backend).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(backend.mark_read_calls(), 0);
    assert_eq!(ids(&session), vec!["1"]);
    assert!(matches!(
        session.load_messages(&auth()).await,
        LoadOutcome::Loaded { .. }
    ));
}
