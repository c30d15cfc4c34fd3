use std::{sync::atomic::Ordering, time::Duration};

use chrono::Utc;
use tokio::sync::Notify;

use super::*;
use crate::mock_gateway::MockGateway;

fn registry(
    gateway: Arc<MockGateway>,
) -> (DocumentRegistry, broadcast::Receiver<SessionEvent>) {
    let (events, rx) = broadcast::channel(64);
    (
        DocumentRegistry::new(gateway, UserId::new("student-1"), events),
        rx,
    )
}

fn docs(names: &[&str]) -> Vec<DocumentSummary> {
    names
        .iter()
        .map(|name| DocumentSummary {
            filename: name.to_string(),
        })
        .collect()
}

fn token(filename: &str, sequence: u64) -> InvalidationToken {
    InvalidationToken {
        filename: filename.into(),
        sequence,
        issued_at: Utc::now(),
    }
}

#[tokio::test]
async fn refresh_replaces_the_displayed_set_wholesale() {
    let gateway = MockGateway::new();
    gateway.script_list(Ok(docs(&["a.pdf", "b.pdf"]))).await;
    gateway.script_list(Ok(docs(&["b.pdf"]))).await;
    let (registry, _rx) = registry(gateway);

    registry.refresh().await.expect("first refresh");
    assert_eq!(registry.documents().await, docs(&["a.pdf", "b.pdf"]));

    registry.refresh().await.expect("second refresh");
    assert_eq!(registry.documents().await, docs(&["b.pdf"]));
}

#[tokio::test]
async fn refresh_failure_is_recorded_in_state() {
    let gateway = MockGateway::new();
    gateway
        .script_list(Err(SessionError::Transport("connection refused".into())))
        .await;
    let (registry, _rx) = registry(gateway);

    registry.refresh().await.expect_err("transport");
    match registry.state().await {
        RegistryState::Error(reason) => assert!(reason.contains("connection refused")),
        other => panic!("unexpected state: {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_tokens_trigger_exactly_one_refresh() {
    let gateway = MockGateway::new();
    let (registry, _rx) = registry(Arc::clone(&gateway));

    let first = token("notes.pdf", 0);
    registry.on_invalidated(first.clone()).await.expect("first");
    registry.on_invalidated(first).await.expect("repeat");
    assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 1);

    registry
        .on_invalidated(token("notes.pdf", 1))
        .await
        .expect("new token");
    assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reupload_of_one_filename_still_lists_it_exactly_once() {
    let gateway = MockGateway::new();
    gateway.script_list(Ok(docs(&["notes.pdf"]))).await;
    gateway.script_list(Ok(docs(&["notes.pdf"]))).await;
    let (registry, _rx) = registry(Arc::clone(&gateway));

    registry
        .on_invalidated(token("notes.pdf", 0))
        .await
        .expect("first");
    registry
        .on_invalidated(token("notes.pdf", 1))
        .await
        .expect("second");

    // Remote truth, not a local append: the set has one entry.
    assert_eq!(registry.documents().await, docs(&["notes.pdf"]));
    assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn deleting_an_unknown_document_leaves_the_set_unchanged() {
    let gateway = MockGateway::new();
    gateway.script_list(Ok(docs(&["a.pdf"]))).await;
    gateway
        .script_delete(Err(SessionError::NotFound("ghost.pdf".into())))
        .await;
    let (registry, _rx) = registry(Arc::clone(&gateway));
    registry.refresh().await.expect("load");

    let err = registry.delete("ghost.pdf").await.expect_err("not found");
    assert!(matches!(err, SessionError::NotFound(_)));
    assert_eq!(registry.documents().await, docs(&["a.pdf"]));
    assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn successful_delete_reconciles_against_the_remote_listing() {
    let gateway = MockGateway::new();
    gateway.script_list(Ok(docs(&["a.pdf", "b.pdf"]))).await;
    gateway.script_delete(Ok(())).await;
    gateway.script_list(Ok(docs(&["b.pdf"]))).await;
    let (registry, _rx) = registry(Arc::clone(&gateway));
    registry.refresh().await.expect("load");

    registry.delete("a.pdf").await.expect("delete");

    assert_eq!(registry.documents().await, docs(&["b.pdf"]));
    assert_eq!(gateway.deletes_seen.lock().await.clone(), vec!["a.pdf"]);
    assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transport_failure_during_delete_keeps_the_display() {
    let gateway = MockGateway::new();
    gateway.script_list(Ok(docs(&["a.pdf"]))).await;
    gateway
        .script_delete(Err(SessionError::Transport("connection refused".into())))
        .await;
    let (registry, _rx) = registry(Arc::clone(&gateway));
    registry.refresh().await.expect("load");

    registry.delete("a.pdf").await.expect_err("transport");
    assert_eq!(registry.documents().await, docs(&["a.pdf"]));
    assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_deletes_of_one_filename_are_single_flight() {
    let gateway = MockGateway::new();
    gateway.script_list(Ok(docs(&["a.pdf"]))).await;
    let gate = Arc::new(Notify::new());
    *gateway.delete_gate.lock().await = Some(Arc::clone(&gate));
    let (registry, _rx) = registry(Arc::clone(&gateway));
    registry.refresh().await.expect("load");
    let registry = Arc::new(registry);

    let first = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.delete("a.pdf").await }
    });

    tokio::time::timeout(Duration::from_secs(1), async {
        while gateway.deletes_seen.lock().await.is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("first delete reaches the gateway");

    let err = registry.delete("a.pdf").await.expect_err("busy");
    assert!(err.is_busy());

    gate.notify_one();
    first.await.expect("join").expect("first delete");
    assert_eq!(gateway.deletes_seen.lock().await.len(), 1);
}
