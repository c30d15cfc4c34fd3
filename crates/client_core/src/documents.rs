//! The list of documents currently known for the user. Derived state: it
//! only changes by refetching from the service, never by optimistic
//! appends.

use std::{collections::HashSet, sync::Arc};

use shared::{domain::UserId, protocol::DocumentSummary};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{
    error::SessionError, transport::StudyGateway, upload::InvalidationToken, SessionEvent,
};

/// What the view renders. `Loaded` is authoritative as of the last refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryState {
    Empty,
    Loading,
    Loaded(Vec<DocumentSummary>),
    Error(String),
}

pub struct DocumentRegistry {
    gateway: Arc<dyn StudyGateway>,
    user: UserId,
    events: broadcast::Sender<SessionEvent>,
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    state: RegistryState,
    last_token: Option<InvalidationToken>,
    refreshing: bool,
    inflight_deletes: HashSet<String>,
}

impl DocumentRegistry {
    pub fn new(
        gateway: Arc<dyn StudyGateway>,
        user: UserId,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            gateway,
            user,
            events,
            inner: Mutex::new(RegistryInner {
                state: RegistryState::Empty,
                last_token: None,
                refreshing: false,
                inflight_deletes: HashSet::new(),
            }),
        }
    }

    pub async fn state(&self) -> RegistryState {
        self.inner.lock().await.state.clone()
    }

    /// Currently displayed documents; empty unless `Loaded`.
    pub async fn documents(&self) -> Vec<DocumentSummary> {
        match &self.inner.lock().await.state {
            RegistryState::Loaded(documents) => documents.clone(),
            _ => Vec::new(),
        }
    }

    /// Refetch the authoritative set. A refresh while one is already in
    /// flight coalesces into it.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.refreshing {
                return Ok(());
            }
            inner.refreshing = true;
            inner.state = RegistryState::Loading;
        }
        let _ = self.events.send(SessionEvent::DocumentsChanged);

        let result = self.gateway.list_documents(&self.user).await;
        let mut inner = self.inner.lock().await;
        inner.refreshing = false;
        match result {
            Ok(documents) => {
                info!(count = documents.len(), "documents: refreshed");
                inner.state = RegistryState::Loaded(documents);
                drop(inner);
                let _ = self.events.send(SessionEvent::DocumentsChanged);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "documents: refresh failed");
                inner.state = RegistryState::Error(err.to_string());
                drop(inner);
                let _ = self.events.send(SessionEvent::DocumentsChanged);
                Err(err)
            }
        }
    }

    /// React to an upload invalidation. Tokens compare by value, not by
    /// filename, so re-uploading the same file still triggers a refresh;
    /// observing the token already handled is a no-op.
    pub async fn on_invalidated(&self, token: InvalidationToken) -> Result<(), SessionError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.last_token.as_ref() == Some(&token) {
                return Ok(());
            }
            inner.last_token = Some(token);
        }
        self.refresh().await
    }

    /// Delete one document, single-flight per filename. The displayed set
    /// only shrinks once the service acknowledges, and is then reconciled
    /// against a fresh listing; local removal alone is not trusted.
    pub async fn delete(&self, filename: &str) -> Result<(), SessionError> {
        {
            let mut inner = self.inner.lock().await;
            if !inner.inflight_deletes.insert(filename.to_string()) {
                return Err(SessionError::busy("delete"));
            }
        }
        let result = self.delete_and_reconcile(filename).await;
        self.inner.lock().await.inflight_deletes.remove(filename);
        result
    }

    async fn delete_and_reconcile(&self, filename: &str) -> Result<(), SessionError> {
        match self.gateway.delete_document(&self.user, filename).await {
            Ok(()) => {
                {
                    let mut inner = self.inner.lock().await;
                    if let RegistryState::Loaded(documents) = &mut inner.state {
                        documents.retain(|doc| doc.filename != filename);
                    }
                }
                let _ = self.events.send(SessionEvent::DocumentsChanged);
                info!(filename, "documents: deleted; reconciling with remote");
                self.refresh().await
            }
            Err(err) => {
                warn!(filename, error = %err, "documents: delete failed");
                let _ = self.events.send(SessionEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/documents_tests.rs"]
mod tests;
