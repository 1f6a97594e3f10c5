//! End-to-end: HTTP transport and retry loop against the axum receiver

use std::{sync::Arc, time::Duration};

use timeout_capture::{
    create_router,
    services::{BackupStore, HttpTransport, MemoryStorage, RetryPolicy, Submitter},
    state::{FeedbackPayload, ImageAttachment, ReceiverState, MANUAL_SOURCE, TIMEOUT_SOURCE},
    ui::{Document, ElementKey, Renderer},
};
use tokio::net::TcpListener;

async fn start_receiver(state: Arc<ReceiverState>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        request_timeout: Duration::from_secs(5),
        delays: vec![Duration::from_millis(20), Duration::from_millis(40)],
    }
}

fn payload(source: &str) -> FeedbackPayload {
    FeedbackPayload {
        text: "the chart legend overlaps".to_string(),
        images: vec![ImageAttachment {
            name: None,
            data: "data:image/png;base64,iVBORw0KGgo=".to_string(),
        }],
        timestamp: "2024-03-01T10:00:00.000Z".to_string(),
        source: source.to_string(),
    }
}

fn submitter(base_url: &str) -> (Submitter, Arc<BackupStore>, Arc<Renderer>) {
    let renderer = Arc::new(Renderer::new(Arc::new(Document::with_standard_layout())));
    renderer.set_value(ElementKey::CsrfToken, "csrf-123");
    let backups = Arc::new(BackupStore::new(Arc::new(MemoryStorage::new())));
    let transport = Arc::new(HttpTransport::new(base_url).unwrap());
    let submitter = Submitter::with_policy(
        transport,
        Arc::clone(&backups),
        Arc::clone(&renderer),
        quick_policy(),
    );
    (submitter, backups, renderer)
}

#[tokio::test]
async fn timeout_capture_reaches_receiver() {
    let state = Arc::new(ReceiverState::new("127.0.0.1".into(), 0));
    let base_url = start_receiver(Arc::clone(&state)).await;
    let (submitter, _, _) = submitter(&base_url);

    assert!(submitter.send_with_retries(&payload(TIMEOUT_SOURCE)).await);

    let received = state.submissions().unwrap();
    assert_eq!(received.len(), 1);
    let feedback = &received[0];
    assert!(feedback.is_timeout_capture);
    assert_eq!(feedback.source_event.as_deref(), Some("frontend_timeout"));
    assert_eq!(feedback.csrf_token.as_deref(), Some("csrf-123"));
    assert_eq!(feedback.text.as_deref(), Some("the chart legend overlaps"));
    assert_eq!(feedback.images.len(), 1);
    assert_eq!(
        feedback.images[0].file_name.as_deref(),
        Some("timeout_capture_0.png")
    );
    assert_eq!(feedback.images[0].content_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let state = Arc::new(ReceiverState::new("127.0.0.1".into(), 0).with_failures(2));
    let base_url = start_receiver(Arc::clone(&state)).await;
    let (submitter, _, renderer) = submitter(&base_url);

    assert!(submitter.send_with_retries(&payload(MANUAL_SOURCE)).await);

    let received = state.submissions().unwrap();
    assert_eq!(received.len(), 1);
    assert!(!received[0].is_timeout_capture);

    let messages: Vec<String> = renderer
        .document()
        .notifications()
        .into_iter()
        .map(|n| n.message)
        .collect();
    assert!(messages.iter().any(|m| m.contains("HTTP error: 503") && m.ends_with("(attempt 1)")));
    assert!(messages.iter().any(|m| m == "Your data was saved successfully"));
}

#[tokio::test]
async fn exhausted_retries_report_failure() {
    let state = Arc::new(ReceiverState::new("127.0.0.1".into(), 0).with_failures(5));
    let base_url = start_receiver(Arc::clone(&state)).await;
    let (submitter, backups, _) = submitter(&base_url);

    assert!(!submitter.send_with_retries(&payload(TIMEOUT_SOURCE)).await);
    assert!(state.submissions().unwrap().is_empty());
    // Two scheduled failures remain after three attempts
    assert!(state.take_failure());
    assert!(state.take_failure());
    assert!(!state.take_failure());
    assert!(!backups.has_backups());
}

#[tokio::test]
async fn unreachable_receiver_is_a_network_failure() {
    // Bind and drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (submitter, _, renderer) = submitter(&format!("http://{}", addr));
    assert!(!submitter.send_with_retries(&payload(TIMEOUT_SOURCE)).await);

    let messages: Vec<String> = renderer
        .document()
        .notifications()
        .into_iter()
        .map(|n| n.message)
        .collect();
    assert!(messages.contains(&"Network connection failed (attempt 3)".to_string()));
}

#[tokio::test]
async fn session_close_notice_is_delivered() {
    let state = Arc::new(ReceiverState::new("127.0.0.1".into(), 0));
    let base_url = start_receiver(Arc::clone(&state)).await;
    let (submitter, _, _) = submitter(&base_url);

    submitter.notify_session_closed().await;
    assert_eq!(state.sessions_closed(), 1);
    assert!(state.submissions().unwrap().is_empty());
}
