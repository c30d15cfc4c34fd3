use serde::{Deserialize, Serialize};

/// Failure body produced by the remote service. Every non-2xx response
/// carries `{"detail": "<human-readable>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
