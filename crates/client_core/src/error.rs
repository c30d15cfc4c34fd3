use thiserror::Error;

/// Client-side failure taxonomy. Controllers fold these into their own
/// state for the view layer; raw transport bodies only pass through when
/// the service already phrased them for humans (its `detail` field).
#[derive(Debug, Error)]
pub enum SessionError {
    /// Rejected locally; the remote operation was never issued.
    #[error("{0}")]
    Validation(String),

    /// Another request of the same kind is still in flight. Rejected
    /// synchronously with no state change; callers should treat this as a
    /// disabled affordance, not a hard failure.
    #[error("{operation} is already in progress")]
    Busy { operation: &'static str },

    #[error("document '{0}' was not found")]
    NotFound(String),

    #[error("upload rejected: {0}")]
    UploadRejected(String),

    #[error("quiz generation failed: {0}")]
    QuizGeneration(String),

    /// The answer stream failed to open, or died after partial data.
    #[error("answer stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl SessionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn busy(operation: &'static str) -> Self {
        Self::Busy { operation }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
