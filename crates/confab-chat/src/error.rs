//! Error types for the chat session orchestrator.

use confab_core::error::ConfabError;

/// Errors from the chat engine.
///
/// Only `EmptyMessage`, `AuthConfig` and `StreamInProgress` block a send.
/// Fetch, persistence and stream failures are reported and the session
/// carries on with its in-memory state.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("model '{model}' requires an {provider} API key")]
    AuthConfig { model: String, provider: String },
    #[error("failed to load history: {0}")]
    Fetch(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("a response is already streaming")]
    StreamInProgress,
    #[error("voice error: {0}")]
    Voice(String),
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Whether this error stopped a send before anything was appended.
    pub fn blocks_send(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyMessage | ChatError::AuthConfig { .. } | ChatError::StreamInProgress
        )
    }
}

impl From<ConfabError> for ChatError {
    fn from(err: ConfabError) -> Self {
        match err {
            ConfabError::Transcription(msg) => ChatError::Voice(msg),
            ConfabError::Http(msg) => ChatError::Stream(msg),
            other => ChatError::Persistence(other.to_string()),
        }
    }
}
