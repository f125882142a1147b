//! Database schema migrations.
//!
//! Version 1 creates the sessions and messages tables.

use rusqlite::Connection;
use tracing::info;

use confab_core::error::ConfabError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ConfabError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ConfabError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ConfabError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: chat_schema");
    }

    Ok(())
}

/// Version 1: sessions and messages.
///
/// `created_at` is stored in milliseconds so turns appended within the same
/// second still sort in insertion order; rowid breaks any remaining ties.
fn apply_v1(conn: &Connection) -> Result<(), ConfabError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id              TEXT PRIMARY KEY NOT NULL,
            title           TEXT NOT NULL DEFAULT '',
            user_id         TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions (user_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY NOT NULL,
            session_id      TEXT NOT NULL,
            role            TEXT NOT NULL
                            CHECK (role IN ('user', 'assistant')),
            text            TEXT NOT NULL DEFAULT '',
            attachments     TEXT NOT NULL DEFAULT '[]',
            metadata        TEXT,
            created_at      INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages (session_id, created_at ASC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'chat_schema');
        ",
    )
    .map_err(|e| ConfabError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_message_requires_existing_session() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO messages (id, session_id, role, created_at)
             VALUES ('m-1', 'missing', 'user', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_message_role_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO sessions (id, user_id, created_at) VALUES ('s-1', 'u', 0)",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO messages (id, session_id, role, created_at)
             VALUES ('m-1', 's-1', 'system', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_deleting_session_cascades() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO sessions (id, user_id, created_at) VALUES ('s-1', 'u', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO messages (id, session_id, role, text, created_at)
             VALUES ('m-1', 's-1', 'user', 'hi', 0)",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM sessions WHERE id = 's-1'", []).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
