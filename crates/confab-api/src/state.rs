//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use confab_core::config::ConfabConfig;
use confab_storage::{Database, SqliteStore};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfabConfig>,
    pub database: Arc<Database>,
    /// Bearer token accepted by protected routes.
    pub api_token: String,
    /// Identity the token resolves to.
    pub user_id: String,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ConfabConfig, database: Database, api_token: impl Into<String>) -> Self {
        let user_id = config.api.user_id.clone();
        Self {
            config: Arc::new(config),
            database: Arc::new(database),
            api_token: api_token.into(),
            user_id,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Persistence scoped to one user.
    pub fn store_for(&self, user_id: &str) -> SqliteStore {
        SqliteStore::new(self.database.clone(), user_id)
    }
}
