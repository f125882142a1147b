//! Route handler functions for all API endpoints.
//!
//! Each handler resolves the caller's [`Identity`], works on a store scoped
//! to that user and returns JSON. Sessions owned by someone else are
//! reported as not found.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use confab_core::persistence::PersistenceService;
use confab_core::types::{
    title_from_seed, AppendTurnRequest, CreateSessionRequest, SessionId, SessionRecord, StoredTurn,
};

use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid session id: {}", raw)))
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

// =============================================================================
// Public endpoints
// =============================================================================

/// GET /health - liveness and uptime.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        started_at: state.started_at,
    })
}

// =============================================================================
// Sessions
// =============================================================================

/// GET /chats - the caller's sessions, newest first.
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    let sessions = state.store_for(&identity.user_id).list_sessions()?;
    Ok(Json(sessions))
}

/// POST /chats - create a session owned by the caller.
pub async fn create_chat(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionRecord>), ApiError> {
    let request = json_body(body)?;
    let title = title_from_seed(request.title.trim());

    let record = state
        .store_for(&identity.user_id)
        .create_session(&title)
        .await?;
    tracing::info!(session_id = %record.id, user = %identity.user_id, "Session created");

    Ok((StatusCode::CREATED, Json(record)))
}

// =============================================================================
// Messages
// =============================================================================

/// GET /chats/{id}/messages - turns of a session, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StoredTurn>>, ApiError> {
    let session_id = parse_session_id(&id)?;
    let turns = state
        .store_for(&identity.user_id)
        .list_turns(session_id)
        .await?;
    Ok(Json(turns))
}

/// POST /chats/{id}/messages - append one turn with its attachments.
pub async fn append_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    body: Result<Json<AppendTurnRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StoredTurn>), ApiError> {
    let session_id = parse_session_id(&id)?;
    let request = json_body(body)?;
    let message = request
        .message
        .ok_or_else(|| ApiError::BadRequest("Message is required".to_string()))?;

    let stored = state
        .store_for(&identity.user_id)
        .append_turn(session_id, message, request.attachments)
        .await?;
    tracing::debug!(session_id = %session_id, turn_id = %stored.id, "Message appended");

    Ok((StatusCode::CREATED, Json(stored)))
}
