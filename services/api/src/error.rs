//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and its mapping
//! onto HTTP responses.

use crate::config::ConfigError;
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use invoicing_core::{PortError, ValidationErrors};
use serde_json::json;
use tracing::{error, warn};

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure while applying the embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Field-level problems with a request payload.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// A malformed request that is not tied to a single field.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(errors)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn forbidden(message: &str) -> Self {
        ApiError::Forbidden(message.to_string())
    }

    pub fn not_found(message: &str) -> Self {
        ApiError::NotFound(message.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(errors) | ApiError::Port(PortError::Validation(errors)) => {
                (StatusCode::BAD_REQUEST, json!({ "errors": errors }))
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": message }))
            }
            ApiError::Port(PortError::Unauthorized) => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Authentication credentials were not provided or are invalid." }),
            ),
            ApiError::Forbidden(message) | ApiError::Port(PortError::Forbidden(message)) => {
                warn!("Forbidden: {}", message);
                (StatusCode::FORBIDDEN, json!({ "error": message }))
            }
            ApiError::NotFound(message) | ApiError::Port(PortError::NotFound(message)) => {
                (StatusCode::NOT_FOUND, json!({ "error": message }))
            }
            ApiError::Port(PortError::Conflict(message)) => {
                warn!("Conflict: {}", message);
                (StatusCode::CONFLICT, json!({ "error": message }))
            }
            other => {
                error!("Request failed: {:?}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "An internal server error occurred." }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
