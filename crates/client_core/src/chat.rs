//! The chat session: an ordered transcript of turns, fed either by an
//! incremental answer stream or by a single round trip. One exchange may
//! be open at a time per controller, so turn order always matches call
//! order.

use std::sync::Arc;

use futures::StreamExt;
use shared::domain::{TurnId, UserId};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{error::SessionError, transport::StudyGateway, SessionEvent};

/// Shown in place of an answer when the stream fails to open or dies
/// mid-answer. Partial text is discarded, not shown as a truncated
/// success.
pub const FAILED_ANSWER_MESSAGE: &str = "Sorry, I couldn't get a response. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle of a turn's content. A streamed assistant turn is born
/// `Streaming` and transitions exactly once, to `Settled` or `Failed`;
/// user turns and single-round-trip answers are born terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnBody {
    Streaming { partial: String },
    Settled { text: String, sources: Vec<String> },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub body: TurnBody,
}

impl Turn {
    pub fn text(&self) -> &str {
        match &self.body {
            TurnBody::Streaming { partial } => partial,
            TurnBody::Settled { text, .. } => text,
            TurnBody::Failed { message } => message,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, TurnBody::Streaming { .. })
    }

    pub fn sources(&self) -> &[String] {
        match &self.body {
            TurnBody::Settled { sources, .. } => sources,
            _ => &[],
        }
    }
}

/// Incremental UTF-8 decoder. Chunk boundaries carry no meaning and may
/// split a multi-byte scalar; the incomplete tail is carried into the next
/// chunk instead of being replaced.
#[derive(Default)]
struct ChunkDecoder {
    carry: Vec<u8>,
}

impl ChunkDecoder {
    fn push(&mut self, chunk: &[u8]) -> String {
        self.carry.extend_from_slice(chunk);
        let decodable = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            // Incomplete trailing scalar: hold it back for the next chunk.
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            // Invalid bytes mid-stream: replace rather than stall.
            Err(_) => self.carry.len(),
        };
        let text = String::from_utf8_lossy(&self.carry[..decodable]).into_owned();
        self.carry.drain(..decodable);
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        text
    }
}

pub struct ChatController {
    gateway: Arc<dyn StudyGateway>,
    user: UserId,
    events: broadcast::Sender<SessionEvent>,
    inner: Mutex<ChatInner>,
}

struct ChatInner {
    transcript: Vec<Turn>,
    next_turn_id: u64,
    exchange_open: bool,
}

impl ChatInner {
    fn allocate_turn_id(&mut self) -> TurnId {
        let id = TurnId(self.next_turn_id);
        self.next_turn_id += 1;
        id
    }

    fn turn_mut(&mut self, id: TurnId) -> Option<&mut Turn> {
        self.transcript.iter_mut().rev().find(|turn| turn.id == id)
    }
}

impl ChatController {
    pub fn new(
        gateway: Arc<dyn StudyGateway>,
        user: UserId,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            gateway,
            user,
            events,
            inner: Mutex::new(ChatInner {
                transcript: Vec::new(),
                next_turn_id: 0,
                exchange_open: false,
            }),
        }
    }

    /// Snapshot of the transcript in order. Observers re-read this after
    /// every `TranscriptUpdated` notification.
    pub async fn transcript(&self) -> Vec<Turn> {
        self.inner.lock().await.transcript.clone()
    }

    /// Streamed exchange: appends the user turn plus an empty streaming
    /// placeholder, then grows the placeholder chunk by chunk in arrival
    /// order until the service closes the stream. Returns the placeholder
    /// turn id.
    pub async fn ask_streaming(&self, query: &str) -> Result<TurnId, SessionError> {
        let placeholder = self.open_streaming_exchange(query).await?;
        let _ = self.events.send(SessionEvent::TranscriptUpdated);

        let mut stream = match self.gateway.ask_streaming(&self.user, query).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "chat: answer stream failed to open");
                self.fail_exchange(placeholder).await;
                return Err(err);
            }
        };

        let mut decoder = ChunkDecoder::default();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    let text = decoder.push(&chunk);
                    self.append_to_placeholder(placeholder, &text).await;
                }
                Err(err) => {
                    warn!(error = %err, "chat: stream interrupted; discarding partial answer");
                    self.fail_exchange(placeholder).await;
                    return Err(err);
                }
            }
        }
        self.settle_exchange(placeholder, decoder.finish()).await;
        Ok(placeholder)
    }

    /// Single-round-trip exchange. The assistant turn is appended already
    /// complete, with `sources` populated; it shares the streamed mode's
    /// single-flight discipline.
    pub async fn ask(&self, query: &str) -> Result<TurnId, SessionError> {
        self.open_sync_exchange(query).await?;
        let _ = self.events.send(SessionEvent::TranscriptUpdated);

        let result = self.gateway.ask(&self.user, query).await;
        let mut inner = self.inner.lock().await;
        inner.exchange_open = false;
        let id = inner.allocate_turn_id();
        match result {
            Ok(answer) => {
                inner.transcript.push(Turn {
                    id,
                    role: Role::Assistant,
                    body: TurnBody::Settled {
                        text: answer.answer,
                        sources: answer.sources,
                    },
                });
                drop(inner);
                let _ = self.events.send(SessionEvent::TranscriptUpdated);
                Ok(id)
            }
            Err(err) => {
                warn!(error = %err, "chat: ask failed");
                inner.transcript.push(Turn {
                    id,
                    role: Role::Assistant,
                    body: TurnBody::Failed {
                        message: FAILED_ANSWER_MESSAGE.to_string(),
                    },
                });
                drop(inner);
                let _ = self.events.send(SessionEvent::TranscriptUpdated);
                let _ = self.events.send(SessionEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    async fn open_streaming_exchange(&self, query: &str) -> Result<TurnId, SessionError> {
        let mut inner = self.accept_query(query).await?;
        let user_turn = inner.allocate_turn_id();
        inner.transcript.push(Turn {
            id: user_turn,
            role: Role::User,
            body: TurnBody::Settled {
                text: query.to_string(),
                sources: Vec::new(),
            },
        });
        let placeholder = inner.allocate_turn_id();
        inner.transcript.push(Turn {
            id: placeholder,
            role: Role::Assistant,
            body: TurnBody::Streaming {
                partial: String::new(),
            },
        });
        Ok(placeholder)
    }

    async fn open_sync_exchange(&self, query: &str) -> Result<(), SessionError> {
        let mut inner = self.accept_query(query).await?;
        let user_turn = inner.allocate_turn_id();
        inner.transcript.push(Turn {
            id: user_turn,
            role: Role::User,
            body: TurnBody::Settled {
                text: query.to_string(),
                sources: Vec::new(),
            },
        });
        Ok(())
    }

    /// Validation plus the single-flight gate. The busy flag flips in the
    /// same lock hold that observes it, with no await in between, so two
    /// callers can never both see an idle controller.
    async fn accept_query(
        &self,
        query: &str,
    ) -> Result<tokio::sync::MutexGuard<'_, ChatInner>, SessionError> {
        if query.trim().is_empty() {
            return Err(SessionError::validation("question must not be empty"));
        }
        let mut inner = self.inner.lock().await;
        if inner.exchange_open {
            return Err(SessionError::busy("chat"));
        }
        inner.exchange_open = true;
        Ok(inner)
    }

    async fn append_to_placeholder(&self, id: TurnId, text: &str) {
        {
            let mut inner = self.inner.lock().await;
            if let Some(turn) = inner.turn_mut(id) {
                if let TurnBody::Streaming { partial } = &mut turn.body {
                    partial.push_str(text);
                }
            }
        }
        let _ = self.events.send(SessionEvent::TranscriptUpdated);
    }

    async fn settle_exchange(&self, id: TurnId, tail: String) {
        {
            let mut inner = self.inner.lock().await;
            inner.exchange_open = false;
            if let Some(turn) = inner.turn_mut(id) {
                if let TurnBody::Streaming { partial } = &mut turn.body {
                    partial.push_str(&tail);
                    let text = std::mem::take(partial);
                    info!(turn = id.0, chars = text.chars().count(), "chat: answer settled");
                    turn.body = TurnBody::Settled {
                        text,
                        sources: Vec::new(),
                    };
                }
            }
        }
        let _ = self.events.send(SessionEvent::TranscriptUpdated);
    }

    /// Terminal failure of the current exchange. The placeholder keeps its
    /// identity but its content is replaced wholesale by the fixed failure
    /// message; previously settled turns are untouched.
    async fn fail_exchange(&self, id: TurnId) {
        {
            let mut inner = self.inner.lock().await;
            inner.exchange_open = false;
            if let Some(turn) = inner.turn_mut(id) {
                turn.body = TurnBody::Failed {
                    message: FAILED_ANSWER_MESSAGE.to_string(),
                };
            }
        }
        let _ = self.events.send(SessionEvent::TranscriptUpdated);
        let _ = self
            .events
            .send(SessionEvent::Error(FAILED_ANSWER_MESSAGE.to_string()));
    }
}

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod tests;
