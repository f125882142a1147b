//! Repository implementations for SQLite-backed persistence.
//!
//! `SessionRepository` owns the sessions table, `MessageRepository` the
//! messages table. Both operate on the shared [`Database`] with raw SQL.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use confab_core::error::ConfabError;
use confab_core::types::{Attachment, NewTurn, Role, SessionId, SessionRecord, StoredTurn, TurnId};

use crate::db::Database;

/// Repository for chat sessions.
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session owned by `user_id`.
    pub fn create(&self, user_id: &str, title: &str) -> Result<SessionRecord, ConfabError> {
        let record = SessionRecord {
            id: SessionId::new(),
            title: title.to_string(),
            user_id: user_id.to_string(),
            created_at: now_millis(),
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, title, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    record.id.to_string(),
                    record.title,
                    record.user_id,
                    record.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| ConfabError::Storage(format!("Failed to create session: {}", e)))?;
            Ok(())
        })?;

        Ok(record)
    }

    /// Find a session by ID.
    pub fn find_by_id(&self, id: SessionId) -> Result<Option<SessionRecord>, ConfabError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, title, user_id, created_at FROM sessions WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_session(row)),
                )
                .optional()
                .map_err(|e| ConfabError::Storage(e.to_string()))?;

            result.transpose()
        })
    }

    /// List the sessions of one user, newest first.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<SessionRecord>, ConfabError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, user_id, created_at
                     FROM sessions
                     WHERE user_id = ?1
                     ORDER BY created_at DESC, rowid DESC",
                )
                .map_err(|e| ConfabError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![user_id], |row| Ok(row_to_session(row)))
                .map_err(|e| ConfabError::Storage(e.to_string()))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row.map_err(|e| ConfabError::Storage(e.to_string()))??);
            }
            Ok(sessions)
        })
    }
}

/// Repository for the turns of a session.
pub struct MessageRepository {
    db: Arc<Database>,
}

impl MessageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a turn to a session.
    pub fn append(
        &self,
        session_id: SessionId,
        turn: NewTurn,
        attachments: Vec<Attachment>,
    ) -> Result<StoredTurn, ConfabError> {
        let stored = StoredTurn {
            id: TurnId::new(),
            session_id,
            role: turn.role,
            content: turn.content,
            attachments: Some(attachments),
            metadata: turn.metadata,
            created_at: now_millis(),
        };

        let attachments_json = serde_json::to_string(stored.attachments.as_deref().unwrap_or(&[]))?;
        let metadata_json = stored
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, session_id, role, text, attachments, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    stored.id.to_string(),
                    stored.session_id.to_string(),
                    stored.role.as_str(),
                    stored.content,
                    attachments_json,
                    metadata_json,
                    stored.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| ConfabError::Storage(format!("Failed to append message: {}", e)))?;
            Ok(())
        })?;

        Ok(stored)
    }

    /// List the turns of a session, oldest first.
    pub fn list_for_session(&self, session_id: SessionId) -> Result<Vec<StoredTurn>, ConfabError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, session_id, role, text, attachments, metadata, created_at
                     FROM messages
                     WHERE session_id = ?1
                     ORDER BY created_at ASC, rowid ASC",
                )
                .map_err(|e| ConfabError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![session_id.to_string()], |row| {
                    Ok(row_to_stored_turn(row))
                })
                .map_err(|e| ConfabError::Storage(e.to_string()))?;

            let mut turns = Vec::new();
            for row in rows {
                turns.push(row.map_err(|e| ConfabError::Storage(e.to_string()))??);
            }
            Ok(turns)
        })
    }

    /// Count the turns stored for a session.
    pub fn count_for_session(&self, session_id: SessionId) -> Result<u64, ConfabError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                    rusqlite::params![session_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| ConfabError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

fn parse_uuid(raw: &str) -> Result<Uuid, ConfabError> {
    Uuid::parse_str(raw).map_err(|e| ConfabError::Storage(format!("Invalid UUID: {}", e)))
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRecord, ConfabError> {
    let id: String = row.get(0).map_err(|e| ConfabError::Storage(e.to_string()))?;
    let title: String = row.get(1).map_err(|e| ConfabError::Storage(e.to_string()))?;
    let user_id: String = row.get(2).map_err(|e| ConfabError::Storage(e.to_string()))?;
    let created_at: i64 = row.get(3).map_err(|e| ConfabError::Storage(e.to_string()))?;

    Ok(SessionRecord {
        id: SessionId(parse_uuid(&id)?),
        title,
        user_id,
        created_at: from_millis(created_at),
    })
}

fn row_to_stored_turn(row: &rusqlite::Row<'_>) -> Result<StoredTurn, ConfabError> {
    let id: String = row.get(0).map_err(|e| ConfabError::Storage(e.to_string()))?;
    let session_id: String = row.get(1).map_err(|e| ConfabError::Storage(e.to_string()))?;
    let role: String = row.get(2).map_err(|e| ConfabError::Storage(e.to_string()))?;
    let text: String = row.get(3).map_err(|e| ConfabError::Storage(e.to_string()))?;
    let attachments: String = row.get(4).map_err(|e| ConfabError::Storage(e.to_string()))?;
    let metadata: Option<String> = row.get(5).map_err(|e| ConfabError::Storage(e.to_string()))?;
    let created_at: i64 = row.get(6).map_err(|e| ConfabError::Storage(e.to_string()))?;

    let role: Role = role.parse().map_err(ConfabError::Storage)?;
    let attachments: Vec<Attachment> = serde_json::from_str(&attachments)?;
    let metadata = metadata
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(StoredTurn {
        id: TurnId(parse_uuid(&id)?),
        session_id: SessionId(parse_uuid(&session_id)?),
        role,
        content: text,
        attachments: Some(attachments),
        metadata,
        created_at: from_millis(created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    fn user_turn(content: &str) -> NewTurn {
        NewTurn {
            role: Role::User,
            content: content.to_string(),
            metadata: None,
        }
    }

    // ========================================================================
    // SessionRepository tests
    // ========================================================================

    #[test]
    fn test_session_create_and_find() {
        let repo = SessionRepository::new(make_db());

        let created = repo.create("alice", "What is Rust?").unwrap();
        let found = repo.find_by_id(created.id).unwrap().unwrap();

        assert_eq!(found.id, created.id);
        assert_eq!(found.title, "What is Rust?");
        assert_eq!(found.user_id, "alice");
    }

    #[test]
    fn test_session_find_nonexistent() {
        let repo = SessionRepository::new(make_db());
        assert!(repo.find_by_id(SessionId::new()).unwrap().is_none());
    }

    #[test]
    fn test_sessions_listed_per_user_newest_first() {
        let repo = SessionRepository::new(make_db());

        let first = repo.create("alice", "first").unwrap();
        let second = repo.create("alice", "second").unwrap();
        repo.create("bob", "not mine").unwrap();

        let sessions = repo.list_for_user("alice").unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, second.id);
        assert_eq!(sessions[1].id, first.id);
    }

    // ========================================================================
    // MessageRepository tests
    // ========================================================================

    #[test]
    fn test_messages_returned_in_insertion_order() {
        let db = make_db();
        let sessions = SessionRepository::new(db.clone());
        let messages = MessageRepository::new(db);

        let session = sessions.create("alice", "t").unwrap();
        for i in 0..5 {
            messages
                .append(session.id, user_turn(&format!("msg {}", i)), Vec::new())
                .unwrap();
        }

        let turns = messages.list_for_session(session.id).unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
        assert_eq!(messages.count_for_session(session.id).unwrap(), 5);
    }

    #[test]
    fn test_message_attachments_and_metadata_persist() {
        let db = make_db();
        let sessions = SessionRepository::new(db.clone());
        let messages = MessageRepository::new(db);

        let session = sessions.create("alice", "t").unwrap();
        let turn = NewTurn {
            role: Role::Assistant,
            content: "here".to_string(),
            metadata: Some(serde_json::json!({ "model": "gpt-4o" })),
        };
        let attachment = Attachment::new("data:image/png;base64,AA", "image/png");
        messages.append(session.id, turn, vec![attachment.clone()]).unwrap();

        let turns = messages.list_for_session(session.id).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::Assistant);
        assert_eq!(turns[0].attachments, Some(vec![attachment]));
        assert_eq!(turns[0].metadata.as_ref().unwrap()["model"], "gpt-4o");
    }

    #[test]
    fn test_append_to_unknown_session_fails() {
        let messages = MessageRepository::new(make_db());
        let result = messages.append(SessionId::new(), user_turn("hi"), Vec::new());
        assert!(matches!(result, Err(ConfabError::Storage(_))));
    }

    #[test]
    fn test_list_for_empty_session() {
        let db = make_db();
        let session = SessionRepository::new(db.clone()).create("alice", "t").unwrap();
        let turns = MessageRepository::new(db).list_for_session(session.id).unwrap();
        assert!(turns.is_empty());
    }
}
