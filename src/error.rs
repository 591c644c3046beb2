// src/error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("queue store is not configured (set {0})")]
    NotConfigured(&'static str),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("malformed job record {id}: {reason}")]
    Malformed { id: String, reason: String },
    #[error("unknown job type: {0}")]
    UnknownJobType(String),
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;

impl QueueError {
    pub(crate) fn malformed(id: &str, reason: impl Into<String>) -> Self {
        QueueError::Malformed {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
