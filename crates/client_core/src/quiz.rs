//! Quiz generation workflow: a single-flight request whose result is held
//! wholesale and replaced, never merged, on retake.

use std::sync::Arc;

use shared::{domain::UserId, protocol::Quiz};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{error::SessionError, transport::StudyGateway, SessionEvent};

/// Used when the service supplies no human-readable reason.
pub const QUIZ_FALLBACK_MESSAGE: &str = "Failed to generate quiz.";

/// `Generating` doubles as the loading indicator for dependent views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizState {
    Idle,
    Generating,
    Ready(Arc<Quiz>),
    Failed(String),
}

pub struct QuizController {
    gateway: Arc<dyn StudyGateway>,
    user: UserId,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<QuizState>,
}

impl QuizController {
    pub fn new(
        gateway: Arc<dyn StudyGateway>,
        user: UserId,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            gateway,
            user,
            events,
            state: Mutex::new(QuizState::Idle),
        }
    }

    pub async fn state(&self) -> QuizState {
        self.state.lock().await.clone()
    }

    /// The quiz currently held, if any. Never a stale object: retake and
    /// failure both clear it.
    pub async fn current(&self) -> Option<Arc<Quiz>> {
        match &*self.state.lock().await {
            QuizState::Ready(quiz) => Some(Arc::clone(quiz)),
            _ => None,
        }
    }

    pub async fn generate(&self) -> Result<Arc<Quiz>, SessionError> {
        {
            let mut state = self.state.lock().await;
            if matches!(*state, QuizState::Generating) {
                return Err(SessionError::busy("quiz generation"));
            }
            *state = QuizState::Generating;
        }
        let _ = self.events.send(SessionEvent::QuizStateChanged);
        info!("quiz: generation started");

        match self.gateway.generate_quiz(&self.user).await {
            Ok(quiz) => {
                let quiz = Arc::new(quiz);
                *self.state.lock().await = QuizState::Ready(Arc::clone(&quiz));
                info!(questions = quiz.items.len(), "quiz: ready");
                let _ = self.events.send(SessionEvent::QuizStateChanged);
                Ok(quiz)
            }
            Err(err) => {
                let reason = match &err {
                    SessionError::QuizGeneration(detail) if !detail.trim().is_empty() => {
                        detail.clone()
                    }
                    _ => QUIZ_FALLBACK_MESSAGE.to_string(),
                };
                warn!(error = %err, "quiz: generation failed");
                *self.state.lock().await = QuizState::Failed(reason.clone());
                let _ = self.events.send(SessionEvent::QuizStateChanged);
                let _ = self.events.send(SessionEvent::Error(reason));
                Err(err)
            }
        }
    }

    /// Discard-and-regenerate. The intermediate `Idle` is published before
    /// the new request starts so per-quiz view state unmounts first; the
    /// replacement quiz is always a distinct allocation.
    pub async fn retake(&self) -> Result<Arc<Quiz>, SessionError> {
        {
            let mut state = self.state.lock().await;
            if matches!(*state, QuizState::Generating) {
                return Err(SessionError::busy("quiz generation"));
            }
            *state = QuizState::Idle;
        }
        let _ = self.events.send(SessionEvent::QuizStateChanged);
        self.generate().await
    }
}

#[cfg(test)]
#[path = "tests/quiz_tests.rs"]
mod tests;
