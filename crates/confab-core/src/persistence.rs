//! The durable-storage interface consumed by the chat orchestrator.
//!
//! Implemented by `confab-storage` (local SQLite) and by the HTTP client in
//! `confab-chat` that talks to a `confab-api` server.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Attachment, NewTurn, SessionId, SessionRecord, StoredTurn};

/// Durable storage for sessions and their turns.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// List all turns of a session, oldest first.
    async fn list_turns(&self, session_id: SessionId) -> Result<Vec<StoredTurn>>;

    /// Create a new session owned by the current identity.
    async fn create_session(&self, title: &str) -> Result<SessionRecord>;

    /// Append one turn to a session and return the stored row.
    async fn append_turn(
        &self,
        session_id: SessionId,
        turn: NewTurn,
        attachments: Vec<Attachment>,
    ) -> Result<StoredTurn>;
}
