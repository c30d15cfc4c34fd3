//! Client session core for the SmartStudy document-question-answering
//! service: a transport gateway plus four controllers (upload, document
//! registry, chat, quiz) that keep a consistent, observable session state
//! across overlapping asynchronous operations.

use std::sync::Arc;

use shared::domain::UserId;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::debug;

pub mod chat;
pub mod config;
pub mod documents;
pub mod error;
pub mod quiz;
pub mod transport;
pub mod upload;

pub use chat::{ChatController, Role, Turn, TurnBody, FAILED_ANSWER_MESSAGE};
pub use config::{load_settings, Settings};
pub use documents::{DocumentRegistry, RegistryState};
pub use error::SessionError;
pub use quiz::{QuizController, QuizState, QUIZ_FALLBACK_MESSAGE};
pub use transport::{AnswerStream, HttpGateway, StudyGateway, UploadRequest};
pub use upload::{InvalidationToken, UploadCoordinator, UploadState};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Notifications for the view layer. Fan-out is lossy for lagging
/// receivers; the controllers' state accessors are always authoritative.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TranscriptUpdated,
    DocumentsInvalidated(InvalidationToken),
    DocumentsChanged,
    UploadStateChanged,
    QuizStateChanged,
    Error(String),
}

/// Composition root: the four controllers over one gateway and one
/// externally supplied user identity, plus the upload → registry
/// invalidation bridge. The controllers never reference each other.
pub struct StudySession {
    pub uploads: Arc<UploadCoordinator>,
    pub documents: Arc<DocumentRegistry>,
    pub chat: Arc<ChatController>,
    pub quiz: Arc<QuizController>,
    events: broadcast::Sender<SessionEvent>,
    bridge: JoinHandle<()>,
}

impl StudySession {
    pub fn new(gateway: Arc<dyn StudyGateway>, user: UserId) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let documents = Arc::new(DocumentRegistry::new(
            Arc::clone(&gateway),
            user.clone(),
            events.clone(),
        ));
        let bridge = spawn_invalidation_bridge(Arc::clone(&documents), events.subscribe());
        Arc::new(Self {
            uploads: Arc::new(UploadCoordinator::new(
                Arc::clone(&gateway),
                user.clone(),
                events.clone(),
            )),
            documents,
            chat: Arc::new(ChatController::new(
                Arc::clone(&gateway),
                user.clone(),
                events.clone(),
            )),
            quiz: Arc::new(QuizController::new(gateway, user, events.clone())),
            events,
            bridge,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

impl Drop for StudySession {
    fn drop(&mut self) {
        self.bridge.abort();
    }
}

/// Upload success signals ride the event channel; this task turns each
/// token into a registry refresh so the coordinator and the registry never
/// reference each other.
fn spawn_invalidation_bridge(
    documents: Arc<DocumentRegistry>,
    mut rx: broadcast::Receiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(SessionEvent::DocumentsInvalidated(token)) => {
                    if let Err(err) = documents.on_invalidated(token).await {
                        debug!(error = %err, "invalidation refresh failed");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // A token may be among the dropped events; refresh
                    // unconditionally to stay authoritative.
                    debug!(skipped, "invalidation bridge lagged");
                    let _ = documents.refresh().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/mock_gateway.rs"]
pub(crate) mod mock_gateway;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
