//! Local persistence service backed by SQLite.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use confab_core::error::{ConfabError, Result};
use confab_core::persistence::PersistenceService;
use confab_core::types::{Attachment, NewTurn, SessionId, SessionRecord, StoredTurn};

use crate::db::Database;
use crate::repository::{MessageRepository, SessionRepository};

/// [`PersistenceService`] over the local database, scoped to one user.
///
/// Sessions owned by other users are reported as not found.
pub struct SqliteStore {
    sessions: SessionRepository,
    messages: MessageRepository,
    user_id: String,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>, user_id: impl Into<String>) -> Self {
        Self {
            sessions: SessionRepository::new(db.clone()),
            messages: MessageRepository::new(db),
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Sessions of the current user, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.sessions.list_for_user(&self.user_id)
    }

    /// Look up a session and check that the current user owns it.
    pub fn owned_session(&self, session_id: SessionId) -> Result<SessionRecord> {
        match self.sessions.find_by_id(session_id)? {
            Some(record) if record.user_id == self.user_id => Ok(record),
            _ => Err(ConfabError::NotFound(format!("session {}", session_id))),
        }
    }
}

#[async_trait]
impl PersistenceService for SqliteStore {
    async fn list_turns(&self, session_id: SessionId) -> Result<Vec<StoredTurn>> {
        self.owned_session(session_id)?;
        let turns = self.messages.list_for_session(session_id)?;
        debug!(session = %session_id, count = turns.len(), "Loaded turns");
        Ok(turns)
    }

    async fn create_session(&self, title: &str) -> Result<SessionRecord> {
        let record = self.sessions.create(&self.user_id, title)?;
        debug!(session = %record.id, "Created session");
        Ok(record)
    }

    async fn append_turn(
        &self,
        session_id: SessionId,
        turn: NewTurn,
        attachments: Vec<Attachment>,
    ) -> Result<StoredTurn> {
        self.owned_session(session_id)?;
        self.messages.append(session_id, turn, attachments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::types::Role;

    fn make_store(user: &str, db: Arc<Database>) -> SqliteStore {
        SqliteStore::new(db, user)
    }

    #[tokio::test]
    async fn test_create_append_and_list() {
        let store = make_store("alice", Arc::new(Database::in_memory().unwrap()));

        let session = store.create_session("hello").await.unwrap();
        assert_eq!(session.user_id, "alice");

        store
            .append_turn(
                session.id,
                NewTurn {
                    role: Role::User,
                    content: "hello".into(),
                    metadata: None,
                },
                Vec::new(),
            )
            .await
            .unwrap();
        store
            .append_turn(
                session.id,
                NewTurn {
                    role: Role::Assistant,
                    content: "hi there".into(),
                    metadata: None,
                },
                Vec::new(),
            )
            .await
            .unwrap();

        let turns = store.list_turns(session.id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].content, "hi there");
    }

    #[tokio::test]
    async fn test_other_users_session_is_not_found() {
        let db = Arc::new(Database::in_memory().unwrap());
        let alice = make_store("alice", db.clone());
        let bob = make_store("bob", db);

        let session = alice.create_session("private").await.unwrap();

        let result = bob.list_turns(session.id).await;
        assert!(matches!(result, Err(ConfabError::NotFound(_))));

        let result = bob
            .append_turn(
                session.id,
                NewTurn {
                    role: Role::User,
                    content: "intrude".into(),
                    metadata: None,
                },
                Vec::new(),
            )
            .await;
        assert!(matches!(result, Err(ConfabError::NotFound(_))));
        assert!(bob.list_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_turns_unknown_session() {
        let store = make_store("alice", Arc::new(Database::in_memory().unwrap()));
        let result = store.list_turns(SessionId::new()).await;
        assert!(matches!(result, Err(ConfabError::NotFound(_))));
    }
}
