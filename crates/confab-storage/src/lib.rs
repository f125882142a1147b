//! Confab Storage crate - SQLite persistence for chat sessions and turns.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for
//! sessions and messages, and [`SqliteStore`], the local implementation of
//! the orchestrator's persistence interface.

pub mod db;
pub mod migrations;
pub mod repository;
pub mod store;

pub use db::Database;
pub use repository::{MessageRepository, SessionRepository};
pub use store::SqliteStore;
