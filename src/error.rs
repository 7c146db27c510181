use std::time::Duration;
use thiserror::Error;

/// Problems with the stored bearer credential. None of these are
/// retried automatically; the session must re-authenticate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credential is stored")]
    Missing,
    #[error("credential is malformed: {0}")]
    Malformed(&'static str),
    #[error("credential was rejected by the server (status {0})")]
    Unauthorized(u16),
}

/// Transport-level failures on the request/response path. Retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Combined failure mode of a request/response call against the backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Local input rejection. Never leaves the client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message text is empty")]
    EmptyMessage,
}

/// Failures of the live channel itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel is not open. Sends are rejected immediately rather
    /// than queued, so the caller can fall back to the direct path.
    #[error("live channel is not open")]
    Unavailable,
    #[error("live channel send failed: {0}")]
    Transport(String),
}

/// A malformed inbound frame. These are logged and dropped; the live
/// channel stays connected.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no sender")]
    MissingSender,
    #[error("frame has no timestamp")]
    MissingTimestamp,
    #[error("frame text is empty")]
    EmptyText,
    #[error("frame sender {0} is not part of this conversation")]
    ForeignSender(String),
}

/// Errors returned by operations on an active chat session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no message with correlation id {0}")]
    UnknownMessage(String),
    #[error("message {0} was already confirmed")]
    AlreadyConfirmed(String),
    #[error("chat session is closed")]
    Closed,
}
