/// Synchronizer integration tests
/// Drive the real gateway and synchronizer against an in-process mock
/// chat backend on an ephemeral port.
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use supportlink_core::config::Config;
use supportlink_core::session::{MemoryStore, Session};
use supportlink_core::sync::Synchronizer;
use supportlink_core::types::{ChatEvent, Delivery, Role, SyncState};
use tokio::net::TcpListener;

// ─── Mock backend ────────────────────────────────────────────────────────────

struct MockBackend {
    messages: Mutex<Vec<serde_json::Value>>,
    next_id: AtomicUsize,
    read_hits: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    last_send_payload: Mutex<Option<serde_json::Value>>,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            read_hits: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            last_send_payload: Mutex::new(None),
        }
    }

    /// Simulate the counterpart answering out of band.
    fn push_agent_message(&self, conversation_id: &str, text: &str) {
        let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.messages.lock().unwrap().push(serde_json::json!({
            "id": id,
            "text": text,
            "role": "Admin",
            "createdAt": chrono::Utc::now().to_rfc3339(),
            "conversationId": conversation_id,
        }));
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn query_param(query: &str, key: &str) -> Option<String> {
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == key {
                return Some(v.to_string());
            }
        }
    }
    None
}

async fn handle(req: Request<Incoming>, backend: Arc<MockBackend>) -> Response<Full<Bytes>> {
    match (req.method().clone(), req.uri().path()) {
        (Method::GET, "/api/v1/chat-history") => {
            backend.read_hits.fetch_add(1, Ordering::SeqCst);
            if backend.fail_reads.load(Ordering::SeqCst) {
                return json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "success": false, "data": [] }),
                );
            }
            let query = req.uri().query().unwrap_or("").to_string();
            let wanted = query_param(&query, "conversationId").unwrap_or_default();
            let messages = backend.messages.lock().unwrap();
            let data: Vec<_> = messages
                .iter()
                .filter(|m| m["conversationId"] == wanted.as_str())
                .cloned()
                .collect();
            json_response(
                StatusCode::OK,
                serde_json::json!({ "success": true, "data": data }),
            )
        }
        (Method::POST, "/api/v1/send-message") => {
            if backend.fail_writes.load(Ordering::SeqCst) {
                return json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "success": false, "data": null }),
                );
            }
            let body = req.collect().await.unwrap().to_bytes();
            let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
            *backend.last_send_payload.lock().unwrap() = Some(payload.clone());

            // The server issues a conversation id on a first send.
            let conversation_id = payload["conversationId"]
                .as_str()
                .unwrap_or("c1")
                .to_string();
            let id = format!("m{}", backend.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            let message = serde_json::json!({
                "id": id,
                "text": payload["text"],
                "role": payload["role"],
                "createdAt": chrono::Utc::now().to_rfc3339(),
                "conversationId": conversation_id,
            });
            backend.messages.lock().unwrap().push(message.clone());
            json_response(
                StatusCode::OK,
                serde_json::json!({ "success": true, "data": { "result": message } }),
            )
        }
        _ => json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "success": false, "message": "not found" }),
        ),
    }
}

async fn spawn_backend() -> (Arc<MockBackend>, String) {
    let backend = Arc::new(MockBackend::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept_backend = backend.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let io = TokioIo::new(stream);
            let backend = accept_backend.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req| {
                    let backend = backend.clone();
                    async move { Ok::<_, Infallible>(handle(req, backend).await) }
                });
                let _ = http1::Builder::new().serve_connection(io, svc).await;
            });
        }
    });

    (backend, format!("http://{}", addr))
}

fn test_config(backend_url: &str) -> Config {
    Config {
        backend_url: backend_url.to_string(),
        counterpart_id: "a1".to_string(),
        poll_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn test_session() -> Session {
    let session = Session::new(Arc::new(MemoryStore::new()));
    session.set_user_id("u1").unwrap();
    session
}

async fn wait_for_event<F>(
    events: &mut tokio::sync::broadcast::Receiver<ChatEvent>,
    mut matches: F,
) -> ChatEvent
where
    F: FnMut(&ChatEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.unwrap();
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_send_establishes_conversation() {
    let (backend, url) = spawn_backend().await;
    let session = test_session();
    let sync = Synchronizer::new(test_config(&url), session.clone()).unwrap();
    let mut events = sync.subscribe();

    sync.send("Hello").await.unwrap();

    // The first payload must omit conversationId entirely.
    let payload = backend.last_send_payload.lock().unwrap().clone().unwrap();
    assert!(payload.get("conversationId").is_none());
    assert_eq!(payload["userId"], "u1");
    assert_eq!(payload["adminId"], "a1");
    assert_eq!(payload["role"], "User");

    // The issued id is persisted before any later poll can fire.
    assert_eq!(session.conversation_id().as_deref(), Some("c1"));
    wait_for_event(&mut events, |e| {
        matches!(e, ChatEvent::ConversationEstablished { conversation_id } if conversation_id == "c1")
    })
    .await;

    // Round-trip: the next poll returns the confirmed message exactly
    // once, with its server-assigned id.
    sync.poll_once().await.unwrap();
    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id.as_deref(), Some("m1"));
    assert_eq!(snapshot[0].text, "Hello");
    assert_eq!(snapshot[0].delivery, Delivery::Confirmed);
}

#[tokio::test]
async fn test_second_send_carries_conversation_id() {
    let (backend, url) = spawn_backend().await;
    let sync = Synchronizer::new(test_config(&url), test_session()).unwrap();

    sync.send("first").await.unwrap();
    sync.send("second").await.unwrap();

    let payload = backend.last_send_payload.lock().unwrap().clone().unwrap();
    assert_eq!(payload["conversationId"], "c1");
}

#[tokio::test]
async fn test_poll_skipped_without_conversation() {
    let (backend, url) = spawn_backend().await;
    let sync = Synchronizer::new(test_config(&url), test_session()).unwrap();

    sync.poll_once().await.unwrap();

    assert_eq!(backend.read_hits.load(Ordering::SeqCst), 0);
    assert_eq!(sync.state().await, SyncState::Uninitialized);
    assert!(sync.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_empty_conversation_syncs_empty() {
    let (_backend, url) = spawn_backend().await;
    let session = test_session();
    session.set_conversation_id("c9").unwrap();
    let sync = Synchronizer::new(test_config(&url), session).unwrap();

    sync.poll_once().await.unwrap();

    assert!(sync.snapshot().await.is_empty());
    assert_eq!(sync.state().await, SyncState::Synced);
}

#[tokio::test]
async fn test_polling_twice_is_idempotent() {
    let (_backend, url) = spawn_backend().await;
    let sync = Synchronizer::new(test_config(&url), test_session()).unwrap();

    sync.send("one").await.unwrap();
    sync.send("two").await.unwrap();

    sync.poll_once().await.unwrap();
    let first = sync.snapshot().await;
    sync.poll_once().await.unwrap();
    let second = sync.snapshot().await;

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[tokio::test]
async fn test_failed_read_keeps_timeline() {
    let (backend, url) = spawn_backend().await;
    let sync = Synchronizer::new(test_config(&url), test_session()).unwrap();

    sync.send("Hello").await.unwrap();
    sync.poll_once().await.unwrap();
    let before = sync.snapshot().await;

    backend.fail_reads.store(true, Ordering::SeqCst);
    assert!(sync.poll_once().await.is_err());

    assert_eq!(sync.snapshot().await, before);
    assert_eq!(sync.state().await, SyncState::Synced);
}

#[tokio::test]
async fn test_failed_send_marks_failed_and_resend_confirms() {
    let (backend, url) = spawn_backend().await;
    let sync = Synchronizer::new(test_config(&url), test_session()).unwrap();
    let mut events = sync.subscribe();

    backend.fail_writes.store(true, Ordering::SeqCst);
    let key = sync.send("Hello").await.unwrap();

    // Optimistic append happened despite the failure.
    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].delivery, Delivery::Failed);
    assert_eq!(snapshot[0].id, None);
    wait_for_event(&mut events, |e| matches!(e, ChatEvent::MessageFailed { .. })).await;

    backend.fail_writes.store(false, Ordering::SeqCst);
    sync.resend(&key).await.unwrap();

    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].client_key, key);
    assert_eq!(snapshot[0].delivery, Delivery::Confirmed);
    assert_eq!(snapshot[0].id.as_deref(), Some("m1"));
}

#[tokio::test]
async fn test_rapid_sends_are_independent_entries() {
    let (_backend, url) = spawn_backend().await;
    let sync = Synchronizer::new(test_config(&url), test_session()).unwrap();

    let (a, b, c) = tokio::join!(sync.send("one"), sync.send("two"), sync.send("three"));
    let keys = [a.unwrap(), b.unwrap(), c.unwrap()];
    assert_ne!(keys[0], keys[1]);
    assert_ne!(keys[1], keys[2]);

    sync.poll_once().await.unwrap();
    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.len(), 3);
    let mut ids: Vec<_> = snapshot.iter().filter_map(|m| m.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_empty_text_is_rejected_without_append() {
    let (_backend, url) = spawn_backend().await;
    let sync = Synchronizer::new(test_config(&url), test_session()).unwrap();

    assert!(sync.send("   ").await.is_err());
    assert!(sync.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_logout_clears_session_and_timeline() {
    let (backend, url) = spawn_backend().await;
    let session = test_session();
    let sync = Synchronizer::new(test_config(&url), session.clone()).unwrap();

    sync.send("Hello").await.unwrap();
    sync.poll_once().await.unwrap();
    assert!(!sync.snapshot().await.is_empty());

    sync.logout().await;

    assert_eq!(session.conversation_id(), None);
    assert_eq!(session.user_id(), None);
    assert!(sync.snapshot().await.is_empty());
    assert_eq!(sync.state().await, SyncState::Uninitialized);

    // Without a conversation id the next pass goes nowhere near the
    // network.
    let hits_before = backend.read_hits.load(Ordering::SeqCst);
    sync.poll_once().await.unwrap();
    assert_eq!(backend.read_hits.load(Ordering::SeqCst), hits_before);
}

#[tokio::test]
async fn test_poll_loop_picks_up_agent_reply() {
    let (backend, url) = spawn_backend().await;
    let sync = Synchronizer::new(test_config(&url), test_session()).unwrap();
    let mut events = sync.subscribe();

    let poller = sync.start();

    sync.send("Hello").await.unwrap();
    backend.push_agent_message("c1", "Hi, how can I help?");

    wait_for_event(&mut events, |e| {
        matches!(e, ChatEvent::Synced { message_count } if *message_count == 2)
    })
    .await;

    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[1].role, Role::Admin);
    assert_eq!(snapshot[1].text, "Hi, how can I help?");

    sync.stop().await;
    let _ = tokio::time::timeout(Duration::from_secs(1), poller).await;
}
