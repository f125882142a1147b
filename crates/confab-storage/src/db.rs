//! Database connection management.
//!
//! A single rusqlite Connection guarded by a Mutex. Chat traffic is a handful
//! of small writes per turn, so one connection is plenty.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use confab_core::error::ConfabError;

use crate::migrations;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run pending
    /// migrations. Parent directories are created as needed.
    pub fn new(path: &Path) -> Result<Self, ConfabError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ConfabError::Storage(format!("Failed to open database: {}", e)))?;
        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for tests and throwaway sessions).
    pub fn in_memory() -> Result<Self, ConfabError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ConfabError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        let db = Self::init(conn)?;
        debug!("In-memory database opened");
        Ok(db)
    }

    fn init(conn: Connection) -> Result<Self, ConfabError> {
        conn.execute_batch(PRAGMAS)
            .map_err(|e| ConfabError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run a closure against the connection. The mutex is held for the
    /// duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ConfabError>
    where
        F: FnOnce(&Connection) -> Result<T, ConfabError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfabError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
