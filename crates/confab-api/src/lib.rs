//! Confab API crate - axum HTTP server for chat sessions and messages.
//!
//! Serves the persistence interface consumed by the chat orchestrator:
//! listing and creating sessions, and listing and appending messages.
//! Every route except `/health` requires a bearer token.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use auth::Identity;
pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
