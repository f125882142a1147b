//! API authentication via bearer tokens.
//!
//! A valid `Authorization: Bearer <token>` header resolves to the configured
//! user identity, which handlers receive as an [`Identity`] extension.

use std::path::Path;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;

use confab_core::config::ApiConfig;
use confab_core::error::Result;

use crate::error::ApiError;
use crate::state::AppState;

/// The user a request acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

/// Generate a random 32-character hex token.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

/// Load the token from `token_path`, or generate and save a new one.
pub fn load_or_generate_token(token_path: &Path) -> Result<String> {
    if let Ok(contents) = std::fs::read_to_string(token_path) {
        let token = contents.trim().to_string();
        if !token.is_empty() {
            tracing::info!("API token loaded from {}", token_path.display());
            return Ok(token);
        }
    }

    let token = generate_token();
    if let Some(parent) = token_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(token_path, &token)?;

    // Owner-only access.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(token_path, std::fs::Permissions::from_mode(0o600))?;
    }
    tracing::info!("API token saved to {}", token_path.display());

    Ok(token)
}

/// The token to serve with: an explicit `api.token`, else the token file
/// under `data_dir`.
pub fn resolve_token(api: &ApiConfig, data_dir: &Path) -> Result<String> {
    match api.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => Ok(token.to_string()),
        None => load_or_generate_token(&data_dir.join(&api.token_file)),
    }
}

/// Middleware that validates Bearer token authentication.
///
/// On success the request carries an [`Identity`]; otherwise the response
/// is a 401 with the usual JSON error body.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(value) = req.headers().get("authorization") else {
        return ApiError::Unauthorized("Missing Authorization header".into()).into_response();
    };

    let Ok(value) = value.to_str() else {
        return ApiError::Unauthorized("Invalid Authorization header encoding".into())
            .into_response();
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if token == state.api_token => {
            req.extensions_mut().insert(Identity {
                user_id: state.user_id.clone(),
            });
            next.run(req).await
        }
        _ => ApiError::Unauthorized("Invalid bearer token".into()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_is_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_token_persisted_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("api_token");

        let first = load_or_generate_token(&path).unwrap();
        let second = load_or_generate_token(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_configured_token_wins() {
        let dir = tempfile::tempdir().unwrap();
        let api = ApiConfig {
            token: Some("fixed".into()),
            ..ApiConfig::default()
        };
        assert_eq!(resolve_token(&api, dir.path()).unwrap(), "fixed");
        assert!(!dir.path().join(&api.token_file).exists());
    }
}
