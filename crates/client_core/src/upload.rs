//! Drives a single file submission and tells the document registry, via an
//! invalidation signal, that the remote set changed.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use shared::domain::UserId;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{
    error::SessionError,
    transport::{StudyGateway, UploadRequest},
    SessionEvent,
};

/// Signal that the remote document set may have changed. Compared by value:
/// `sequence` increments per successful upload, so re-uploading the same
/// filename still produces a token that compares unequal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationToken {
    pub filename: String,
    pub sequence: u64,
    pub issued_at: DateTime<Utc>,
}

/// Where the current submission stands. `Succeeded`/`Failed` are terminal
/// for one submission; the next `submit` starts over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Uploading,
    Succeeded { message: String },
    Failed { reason: String },
}

pub struct UploadCoordinator {
    gateway: Arc<dyn StudyGateway>,
    user: UserId,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<UploadState>,
    sequence: AtomicU64,
}

impl UploadCoordinator {
    pub fn new(
        gateway: Arc<dyn StudyGateway>,
        user: UserId,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            gateway,
            user,
            events,
            state: Mutex::new(UploadState::Idle),
            sequence: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> UploadState {
        self.state.lock().await.clone()
    }

    /// Submit one file. Local validation failures never reach the wire;
    /// a submission while another is `Uploading` is rejected with `Busy`
    /// and changes nothing.
    pub async fn submit(&self, request: UploadRequest) -> Result<(), SessionError> {
        validate(&request)?;
        {
            // Single-flight: the flag flips in the same lock hold that
            // observes it, with no await in between.
            let mut state = self.state.lock().await;
            if matches!(*state, UploadState::Uploading) {
                return Err(SessionError::busy("upload"));
            }
            *state = UploadState::Uploading;
        }
        let _ = self.events.send(SessionEvent::UploadStateChanged);
        info!(filename = %request.filename, "upload: submitting");

        match self.gateway.upload(&self.user, &request).await {
            Ok(ack) => {
                *self.state.lock().await = UploadState::Succeeded {
                    message: ack.message,
                };
                let token = InvalidationToken {
                    filename: request.filename.clone(),
                    sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                    issued_at: Utc::now(),
                };
                info!(filename = %request.filename, sequence = token.sequence, "upload: stored remotely");
                let _ = self.events.send(SessionEvent::UploadStateChanged);
                let _ = self.events.send(SessionEvent::DocumentsInvalidated(token));
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                *self.state.lock().await = UploadState::Failed {
                    reason: reason.clone(),
                };
                warn!(filename = %request.filename, error = %reason, "upload: failed");
                let _ = self.events.send(SessionEvent::UploadStateChanged);
                let _ = self.events.send(SessionEvent::Error(reason));
                Err(err)
            }
        }
    }
}

fn validate(request: &UploadRequest) -> Result<(), SessionError> {
    if request.filename.trim().is_empty() {
        return Err(SessionError::validation("no file selected"));
    }
    if request.bytes.is_empty() {
        return Err(SessionError::validation("selected file is empty"));
    }
    let extension = std::path::Path::new(&request.filename)
        .extension()
        .and_then(|ext| ext.to_str());
    if !extension.is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")) {
        return Err(SessionError::validation(
            "only a single PDF document is accepted",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/upload_tests.rs"]
mod tests;
