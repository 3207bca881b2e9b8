//! services/api/src/web/auth.rs
//!
//! Identity endpoints: registration, login, token refresh, logout, the current
//! user's account and preferences, password changes, and user administration.

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use invoicing_core::domain::USER_ORDERING_FIELDS;
use invoicing_core::validation::validate_new_password;
use invoicing_core::{
    Language, NewUser, PortError, ProfilePatch, Role, TokenKind, User, UserFilter, UserPatch,
    UserProfile, ValidationErrors,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::middleware::{AccessToken, CurrentUser};
use crate::web::pagination::{page_request, parse_ordering, Paginated};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub password_confirm: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Any role except `admin`; defaults to `viewer`.
    #[schema(value_type = Option<String>)]
    pub role: Option<Role>,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Deserialize, Default, ToSchema)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub new_password_confirm: String,
}

/// Body of PUT and PATCH on a user. PUT additionally requires `email` and `username`.
#[derive(Deserialize, Default, ToSchema)]
pub struct UserUpdateRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Only administrators may change this.
    #[schema(value_type = Option<String>)]
    pub role: Option<Role>,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    /// Only administrators may change this.
    pub is_active: Option<bool>,
}

#[derive(Deserialize, Default, ToSchema)]
pub struct ProfileUpdateRequest {
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub timezone: Option<String>,
    #[schema(value_type = Option<String>)]
    pub language: Option<Language>,
    pub receive_email_notifications: Option<bool>,
    pub receive_sms_notifications: Option<bool>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserListParams {
    #[param(value_type = Option<String>)]
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    /// Case-insensitive match on username, email, first or last name.
    pub search: Option<String>,
    /// One of `created_at`, `username`, `email`; prefix with `-` for descending.
    pub ordering: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    #[schema(value_type = String)]
    pub role: Role,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            full_name: user.full_name(),
            id: user.id,
            email: user.email,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            phone_number: user.phone_number,
            company: user.company,
            address: user.address,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ProfileResponse {
    pub user_id: i64,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub timezone: String,
    #[schema(value_type = String)]
    pub language: Language,
    pub receive_email_notifications: bool,
    pub receive_sms_notifications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserProfile> for ProfileResponse {
    fn from(p: UserProfile) -> Self {
        Self {
            user_id: p.user_id,
            avatar: p.avatar,
            bio: p.bio,
            website: p.website,
            timezone: p.timezone,
            language: p.language,
            receive_email_notifications: p.receive_email_notifications,
            receive_sms_notifications: p.receive_sms_notifications,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub message: String,
    pub user: UserResponse,
    pub tokens: TokenPair,
}

#[derive(Serialize, ToSchema)]
pub struct RefreshResponse {
    pub access: String,
}

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

//=========================================================================================
// Password and Token Helpers
//=========================================================================================

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            ApiError::Internal("Failed to hash password".to_string())
        })
}

pub fn verify_password(password: &str, hashed_password: &str) -> Result<bool, ApiError> {
    let parsed_hash = PasswordHash::new(hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        ApiError::Internal("Authentication error".to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

async fn issue_token(state: &AppState, user_id: i64, kind: TokenKind) -> Result<String, ApiError> {
    let ttl = match kind {
        TokenKind::Access => state.config.access_token_ttl,
        TokenKind::Refresh => state.config.refresh_token_ttl,
    };
    let token = Uuid::new_v4().to_string();
    state
        .db
        .create_auth_token(&token, user_id, kind, Utc::now() + ttl)
        .await?;
    Ok(token)
}

async fn issue_token_pair(state: &AppState, user_id: i64) -> Result<TokenPair, ApiError> {
    Ok(TokenPair {
        access: issue_token(state, user_id, TokenKind::Access).await?,
        refresh: issue_token(state, user_id, TokenKind::Refresh).await?,
    })
}

//=========================================================================================
// User Update Rules
//=========================================================================================

/// Builds the updated user, enforcing who may change what.
fn apply_user_update(
    actor: &User,
    target: User,
    req: UserUpdateRequest,
    full: bool,
) -> Result<User, ApiError> {
    if full {
        let mut missing = ValidationErrors::new();
        if req.email.is_none() {
            missing.add("email", "This field is required.");
        }
        if req.username.is_none() {
            missing.add("username", "This field is required.");
        }
        missing.into_result()?;
    }

    let changes_role = req.role.is_some_and(|r| r != target.role);
    let changes_active = req.is_active.is_some_and(|a| a != target.is_active);
    if (changes_role || changes_active) && !actor.is_admin() {
        return Err(ApiError::forbidden(
            "Only administrators can change roles or account status.",
        ));
    }

    let updated = target.apply(UserPatch {
        email: req.email,
        username: req.username,
        first_name: req.first_name,
        last_name: req.last_name,
        role: req.role,
        phone_number: req.phone_number,
        company: req.company,
        address: req.address,
        is_active: req.is_active,
    });
    updated.validate()?;
    Ok(updated)
}

/// Own record, or any record for an administrator.
fn ensure_can_access(actor: &User, user_id: i64) -> Result<(), ApiError> {
    if actor.id == user_id || actor.is_admin() {
        Ok(())
    } else {
        warn!("User {} denied access to user {}", actor.id, user_id);
        Err(ApiError::forbidden(
            "You don't have permission to access this user.",
        ))
    }
}

//=========================================================================================
// Public Handlers
//=========================================================================================

/// POST /auth/register/ - Create a new user account
#[utoipa::path(
    post,
    path = "/api/v1/auth/register/",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created successfully", body = UserResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Email or username already taken")
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    // 1. Validate the password pair and the requested role
    let mut errors = match validate_new_password("password", &req.password, &req.password_confirm)
    {
        Ok(()) => ValidationErrors::new(),
        Err(errors) => errors,
    };
    let role = req.role.unwrap_or_default();
    if role == Role::Admin {
        errors.add("role", "Administrator accounts cannot be self-registered.");
    }

    let mut new_user = NewUser {
        email: req.email.trim().to_string(),
        username: req.username.trim().to_string(),
        first_name: req.first_name,
        last_name: req.last_name,
        role,
        phone_number: req.phone_number.filter(|v| !v.trim().is_empty()),
        company: req.company.filter(|v| !v.trim().is_empty()),
        address: req.address.filter(|v| !v.trim().is_empty()),
        hashed_password: String::new(),
    };
    if let Err(field_errors) = new_user.validate() {
        for field in field_errors.fields() {
            for message in field_errors.messages(field) {
                errors.add(field, message.clone());
            }
        }
    }
    errors.into_result()?;

    // 2. Hash the password and create the user
    new_user.hashed_password = hash_password(&req.password)?;
    let user = state.db.create_user(new_user).await?;
    info!("Registered user {} ({})", user.id, user.role.as_str());

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// POST /auth/login/ - Exchange credentials for an access and a refresh token
#[utoipa::path(
    post,
    path = "/api/v1/auth/login/",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    // 1. Look the user up by email
    let creds = match state.db.get_user_credentials_by_email(req.email.trim()).await {
        Ok(creds) => creds,
        Err(PortError::NotFound(_)) => return Err(invalid()),
        Err(e) => return Err(e.into()),
    };

    // 2. Verify the password and the account status
    if !verify_password(&req.password, &creds.hashed_password)? || !creds.user.is_active {
        warn!("Failed login for user {}", creds.user.id);
        return Err(invalid());
    }

    // 3. Issue tokens
    let tokens = issue_token_pair(&state, creds.user.id).await?;
    info!("User {} logged in", creds.user.id);

    Ok(Json(LoginResponse {
        message: "Login successful".to_string(),
        user: creds.user.into(),
        tokens,
    }))
}

/// POST /auth/token/refresh/ - Mint a new access token from a refresh token
#[utoipa::path(
    post,
    path = "/api/v1/auth/token/refresh/",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = RefreshResponse),
        (status = 401, description = "Refresh token invalid, expired or revoked")
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let user_id = state
        .db
        .validate_auth_token(&req.refresh, TokenKind::Refresh)
        .await
        .map_err(|_| ApiError::Unauthorized("Token is invalid or expired".to_string()))?;

    let user = state.db.get_user(user_id).await?;
    if !user.is_active {
        return Err(ApiError::Unauthorized("User account is disabled.".to_string()));
    }

    let access = issue_token(&state, user.id, TokenKind::Access).await?;
    Ok(Json(RefreshResponse { access }))
}

//=========================================================================================
// Authenticated Handlers
//=========================================================================================

/// POST /auth/logout/ - Revoke the presented access token and, if given, a refresh token
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout/",
    tag = "auth",
    request_body(content = LogoutRequest, description = "Optional refresh token to revoke"),
    responses(
        (status = 200, description = "Logout successful", body = MessageResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(AccessToken(access)): Extension<AccessToken>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // An empty body is allowed; anything else must be valid JSON.
    let req: LogoutRequest = if body.iter().all(u8::is_ascii_whitespace) {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    if let Some(refresh) = req.refresh_token.filter(|t| !t.trim().is_empty()) {
        // Only the owner may revoke a refresh token.
        match state.db.validate_auth_token(&refresh, TokenKind::Refresh).await {
            Ok(owner) if owner == user.id => state.db.revoke_auth_token(&refresh).await?,
            Ok(_) | Err(PortError::Unauthorized) => {
                return Err(ApiError::BadRequest("Token is invalid or expired".to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    }
    state.db.revoke_auth_token(&access).await?;
    info!("User {} logged out", user.id);

    Ok(MessageResponse::new("Logout successful"))
}

/// GET /auth/profile/ - The current user
#[utoipa::path(
    get,
    path = "/api/v1/auth/profile/",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn current_user_handler(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<UserResponse> {
    Json(user.into())
}

/// PUT /auth/profile/ - Replace the current user's account fields
#[utoipa::path(
    put,
    path = "/api/v1/auth/profile/",
    tag = "auth",
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Role or status change by a non-administrator")
    )
)]
pub async fn replace_current_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    payload: Result<Json<UserUpdateRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(req) = payload?;
    let updated = apply_user_update(&user, user.clone(), req, true)?;
    Ok(Json(state.db.update_user(&updated).await?.into()))
}

/// PATCH /auth/profile/ - Partially update the current user's account fields
#[utoipa::path(
    patch,
    path = "/api/v1/auth/profile/",
    tag = "auth",
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn update_current_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    payload: Result<Json<UserUpdateRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(req) = payload?;
    let updated = apply_user_update(&user, user.clone(), req, false)?;
    Ok(Json(state.db.update_user(&updated).await?.into()))
}

/// GET /auth/profile/edit/ - The current user's preferences, created on first access
#[utoipa::path(
    get,
    path = "/api/v1/auth/profile/edit/",
    tag = "auth",
    responses((status = 200, description = "Preferences", body = ProfileResponse))
)]
pub async fn get_preferences_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = state.db.get_or_create_profile(user.id).await?;
    Ok(Json(profile.into()))
}

/// PUT or PATCH /auth/profile/edit/ - Update the current user's preferences
#[utoipa::path(
    patch,
    path = "/api/v1/auth/profile/edit/",
    tag = "auth",
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Updated preferences", body = ProfileResponse),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn update_preferences_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    payload: Result<Json<ProfileUpdateRequest>, JsonRejection>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let Json(req) = payload?;
    let current = state.db.get_or_create_profile(user.id).await?;
    let updated = current.apply(ProfilePatch {
        avatar: req.avatar,
        bio: req.bio,
        website: req.website,
        timezone: req.timezone,
        language: req.language,
        receive_email_notifications: req.receive_email_notifications,
        receive_sms_notifications: req.receive_sms_notifications,
    });
    updated.validate()?;
    Ok(Json(state.db.update_profile(&updated).await?.into()))
}

/// POST /auth/change-password/ - Rotate the current user's password
#[utoipa::path(
    post,
    path = "/api/v1/auth/change-password/",
    tag = "auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed; all tokens revoked", body = MessageResponse),
        (status = 400, description = "Old password wrong or new password invalid")
    )
)]
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    // 1. Check the old password
    let creds = state.db.get_user_credentials_by_email(&user.email).await?;
    if !verify_password(&req.old_password, &creds.hashed_password)? {
        return Err(ValidationErrors::single("old_password", "Old password is incorrect.").into());
    }

    // 2. Validate and store the new one
    validate_new_password("new_password", &req.new_password, &req.new_password_confirm)?;
    let hashed = hash_password(&req.new_password)?;
    state.db.set_password(user.id, &hashed).await?;

    // 3. Every outstanding token was issued against the old password
    let revoked = state.db.revoke_user_tokens(user.id).await?;
    info!("User {} changed password; revoked {} tokens", user.id, revoked);

    Ok(MessageResponse::new("Password changed successfully"))
}

/// GET /auth/users/ - List users
#[utoipa::path(
    get,
    path = "/api/v1/auth/users/",
    tag = "auth",
    params(UserListParams),
    responses(
        (status = 200, description = "A page of users", body = Paginated<UserResponse>),
        (status = 400, description = "Invalid filter or ordering")
    )
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<UserListParams>, QueryRejection>,
) -> Result<Json<Paginated<UserResponse>>, ApiError> {
    let Query(params) = params?;
    let filter = UserFilter {
        role: params.role,
        is_active: params.is_active,
        search: params.search,
        ordering: parse_ordering(params.ordering.as_deref(), USER_ORDERING_FIELDS)?,
    };
    let page = page_request(&state.config, params.page, params.page_size);
    let users = state.db.list_users(&filter, page).await?;
    Ok(Json(Paginated::from_page(users, UserResponse::from)))
}

/// GET /auth/users/{id}/ - A single user (own record, or any for administrators)
#[utoipa::path(
    get,
    path = "/api/v1/auth/users/{id}/",
    tag = "auth",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 403, description = "Not your record"),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(user_id): Path<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.db.get_user(user_id).await?;
    ensure_can_access(&actor, user.id)?;
    Ok(Json(user.into()))
}

/// PUT /auth/users/{id}/ - Replace a user's account fields
#[utoipa::path(
    put,
    path = "/api/v1/auth/users/{id}/",
    tag = "auth",
    params(("id" = i64, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 403, description = "Not your record, or role change by a non-administrator"),
        (status = 404, description = "User not found")
    )
)]
pub async fn replace_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(user_id): Path<i64>,
    payload: Result<Json<UserUpdateRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(req) = payload?;
    let target = state.db.get_user(user_id).await?;
    ensure_can_access(&actor, target.id)?;
    let updated = apply_user_update(&actor, target, req, true)?;
    Ok(Json(state.db.update_user(&updated).await?.into()))
}

/// PATCH /auth/users/{id}/ - Partially update a user's account fields
#[utoipa::path(
    patch,
    path = "/api/v1/auth/users/{id}/",
    tag = "auth",
    params(("id" = i64, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 403, description = "Not your record, or role change by a non-administrator"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(user_id): Path<i64>,
    payload: Result<Json<UserUpdateRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(req) = payload?;
    let target = state.db.get_user(user_id).await?;
    ensure_can_access(&actor, target.id)?;
    let updated = apply_user_update(&actor, target, req, false)?;
    Ok(Json(state.db.update_user(&updated).await?.into()))
}

/// DELETE /auth/users/{id}/ - Delete a user account
#[utoipa::path(
    delete,
    path = "/api/v1/auth/users/{id}/",
    tag = "auth",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 403, description = "Not your record"),
        (status = 404, description = "User not found")
    )
)]
pub async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let target = state.db.get_user(user_id).await?;
    ensure_can_access(&actor, target.id)?;
    state.db.delete_user(target.id).await?;
    info!("User {} deleted user {}", actor.id, target.id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user(id: i64, role: Role) -> User {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        User {
            id,
            email: format!("user{}@example.com", id),
            username: format!("user{}", id),
            first_name: "Test".into(),
            last_name: "User".into(),
            role,
            phone_number: None,
            company: None,
            address: None,
            is_active: true,
            is_superuser: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn passwords_verify_against_their_hash() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn non_admins_cannot_change_their_role() {
        let me = user(1, Role::Viewer);
        let req = UserUpdateRequest {
            role: Some(Role::Admin),
            ..Default::default()
        };
        let err = apply_user_update(&me, me.clone(), req, false).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn resubmitting_the_current_role_is_not_a_change() {
        let me = user(1, Role::Accountant);
        let req = UserUpdateRequest {
            role: Some(Role::Accountant),
            first_name: Some("Ada".into()),
            ..Default::default()
        };
        let updated = apply_user_update(&me, me.clone(), req, false).unwrap();
        assert_eq!(updated.first_name, "Ada");
    }

    #[test]
    fn admins_can_change_roles_and_full_updates_need_identity_fields() {
        let admin = user(1, Role::Admin);
        let target = user(2, Role::Viewer);
        let req = UserUpdateRequest {
            role: Some(Role::Accountant),
            ..Default::default()
        };
        assert!(matches!(
            apply_user_update(&admin, target.clone(), req, true),
            Err(ApiError::Validation(_))
        ));

        let req = UserUpdateRequest {
            email: Some("new@example.com".into()),
            username: Some("renamed".into()),
            role: Some(Role::Accountant),
            ..Default::default()
        };
        let updated = apply_user_update(&admin, target, req, true).unwrap();
        assert_eq!(updated.role, Role::Accountant);
        assert_eq!(updated.username, "renamed");
    }

    #[test]
    fn access_is_limited_to_self_unless_admin() {
        assert!(ensure_can_access(&user(1, Role::Viewer), 1).is_ok());
        assert!(ensure_can_access(&user(1, Role::Viewer), 2).is_err());
        assert!(ensure_can_access(&user(1, Role::Admin), 2).is_ok());
    }
}
