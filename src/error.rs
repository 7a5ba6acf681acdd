//! Error kinds surfaced by request and notification operations.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// Malformed inbound message; dead-lettered, never requeued.
    #[error("message rejected: {0}")]
    MessageRejected(String),
    /// Another writer modified the request first.
    #[error("conflicting update on data request {0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type RequestResult<T> = std::result::Result<T, RequestError>;

impl RequestError {
    pub fn not_found(what: impl Into<String>) -> Self {
        RequestError::NotFound(what.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        RequestError::InvalidInput(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        RequestError::AccessDenied(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        RequestError::MessageRejected(msg.into())
    }
}
