use std::time::Duration;

use tokio::sync::Notify;

use super::*;
use crate::mock_gateway::MockGateway;
use shared::protocol::UploadResponse;

fn coordinator(
    gateway: Arc<MockGateway>,
) -> (UploadCoordinator, broadcast::Receiver<SessionEvent>) {
    let (events, rx) = broadcast::channel(64);
    (
        UploadCoordinator::new(gateway, UserId::new("student-1"), events),
        rx,
    )
}

fn pdf(filename: &str) -> UploadRequest {
    UploadRequest {
        filename: filename.into(),
        bytes: b"%PDF-1.4 stub".to_vec(),
    }
}

async fn next_invalidation(rx: &mut broadcast::Receiver<SessionEvent>) -> InvalidationToken {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match rx.recv().await {
                Ok(SessionEvent::DocumentsInvalidated(token)) => break token,
                Ok(_) => {}
                Err(err) => panic!("event channel closed: {err}"),
            }
        }
    })
    .await
    .expect("invalidation timeout")
}

#[tokio::test]
async fn rejects_invalid_submissions_before_the_wire() {
    let gateway = MockGateway::new();
    let (uploads, _rx) = coordinator(Arc::clone(&gateway));

    let cases = [
        UploadRequest {
            filename: "".into(),
            bytes: b"x".to_vec(),
        },
        UploadRequest {
            filename: "notes.pdf".into(),
            bytes: Vec::new(),
        },
        UploadRequest {
            filename: "notes.docx".into(),
            bytes: b"x".to_vec(),
        },
        UploadRequest {
            filename: "pdf".into(),
            bytes: b"x".to_vec(),
        },
    ];
    for request in cases {
        let err = uploads.submit(request).await.expect_err("validation");
        assert!(matches!(err, SessionError::Validation(_)));
    }
    assert_eq!(uploads.state().await, UploadState::Idle);
    assert!(gateway.uploads_seen.lock().await.is_empty());
}

#[tokio::test]
async fn accepts_uppercase_pdf_extensions() {
    let gateway = MockGateway::new();
    let (uploads, _rx) = coordinator(gateway);
    uploads.submit(pdf("NOTES.PDF")).await.expect("upload");
    assert!(matches!(
        uploads.state().await,
        UploadState::Succeeded { .. }
    ));
}

#[tokio::test]
async fn second_submission_while_uploading_is_rejected() {
    let gateway = MockGateway::new();
    let gate = Arc::new(Notify::new());
    *gateway.upload_gate.lock().await = Some(Arc::clone(&gate));
    let (uploads, _rx) = coordinator(Arc::clone(&gateway));
    let uploads = Arc::new(uploads);

    let first = tokio::spawn({
        let uploads = Arc::clone(&uploads);
        async move { uploads.submit(pdf("a.pdf")).await }
    });

    tokio::time::timeout(Duration::from_secs(1), async {
        while gateway.uploads_seen.lock().await.is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("first submission reaches the gateway");

    let err = uploads.submit(pdf("b.pdf")).await.expect_err("busy");
    assert!(err.is_busy());
    assert_eq!(uploads.state().await, UploadState::Uploading);

    gate.notify_one();
    first.await.expect("join").expect("first upload");
    assert_eq!(gateway.uploads_seen.lock().await.len(), 1);
}

#[tokio::test]
async fn repeated_uploads_of_one_filename_emit_distinct_tokens() {
    let gateway = MockGateway::new();
    let (uploads, mut rx) = coordinator(gateway);

    uploads.submit(pdf("notes.pdf")).await.expect("first");
    uploads.submit(pdf("notes.pdf")).await.expect("second");

    let first = next_invalidation(&mut rx).await;
    let second = next_invalidation(&mut rx).await;
    assert_eq!(first.filename, "notes.pdf");
    assert_eq!(second.filename, "notes.pdf");
    assert_ne!(first, second);
}

#[tokio::test]
async fn success_reports_the_service_message() {
    let gateway = MockGateway::new();
    gateway
        .script_upload(Ok(UploadResponse {
            message: "Document 'notes.pdf' uploaded and processed successfully.".into(),
            doc_id: None,
        }))
        .await;
    let (uploads, _rx) = coordinator(gateway);

    uploads.submit(pdf("notes.pdf")).await.expect("upload");
    match uploads.state().await {
        UploadState::Succeeded { message } => {
            assert!(message.contains("uploaded and processed"))
        }
        other => panic!("unexpected state: {other:?}"),
    }
}

#[tokio::test]
async fn failed_upload_surfaces_reason_and_emits_no_invalidation() {
    let gateway = MockGateway::new();
    gateway
        .script_upload(Err(SessionError::UploadRejected(
            "Could not extract text from the document.".into(),
        )))
        .await;
    let (uploads, mut rx) = coordinator(gateway);

    let err = uploads.submit(pdf("scan.pdf")).await.expect_err("rejected");
    assert!(matches!(err, SessionError::UploadRejected(_)));
    match uploads.state().await {
        UploadState::Failed { reason } => {
            assert!(reason.contains("Could not extract text"))
        }
        other => panic!("unexpected state: {other:?}"),
    }

    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, SessionEvent::DocumentsInvalidated(_)));
    }
}
