//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use invoicing_core::{PortError, TokenKind, User};
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::ApiError;
use crate::web::state::AppState;

/// The authenticated caller, inserted into request extensions by `require_auth`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// The raw bearer token of the current request, kept so logout can revoke it.
#[derive(Debug, Clone)]
pub struct AccessToken(pub String);

/// Pulls the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware that validates the bearer access token and loads the user.
///
/// If valid, inserts `CurrentUser` and `AccessToken` into request extensions.
/// If the token is missing, expired, revoked, or belongs to an inactive user,
/// returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // 1. Extract the bearer token
    let token = bearer_token(req.headers())
        .ok_or_else(|| {
            ApiError::Unauthorized("Authentication credentials were not provided.".to_string())
        })?
        .to_string();

    // 2. Validate it against the token store
    let user_id = state
        .db
        .validate_auth_token(&token, TokenKind::Access)
        .await
        .map_err(|e| {
            if !matches!(e, PortError::Unauthorized) {
                error!("Failed to validate access token: {:?}", e);
            }
            ApiError::Unauthorized("Given token not valid or expired.".to_string())
        })?;

    // 3. Load the user; deactivated accounts lose access immediately
    let user = match state.db.get_user(user_id).await {
        Ok(user) if user.is_active => user,
        Ok(user) => {
            warn!("Rejected token for inactive user {}", user.id);
            return Err(ApiError::Unauthorized("User account is disabled.".to_string()));
        }
        Err(PortError::NotFound(_)) => {
            return Err(ApiError::Unauthorized("User not found.".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    // 4. Continue to the handler
    req.extensions_mut().insert(CurrentUser(user));
    req.extensions_mut().insert(AccessToken(token));
    Ok(next.run(req).await)
}
