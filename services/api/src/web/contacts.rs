//! services/api/src/web/contacts.rs
//!
//! Contact sub-resource of a client. Every route is scoped by the client id in
//! the path; a contact that belongs to another client is reported as missing.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use invoicing_core::domain::blank_to_none;
use invoicing_core::{rules, ClientContact, ContactDraft, ContactPatch};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

/// Full contact payload for POST and PUT. Missing text fields are treated as blank.
#[derive(Deserialize, Default, ToSchema)]
#[serde(default)]
pub struct ContactRequest {
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    pub email: String,
    pub phone_number: Option<String>,
    pub is_primary: bool,
    pub is_billing_contact: bool,
    pub notes: Option<String>,
}

impl ContactRequest {
    fn into_draft(self) -> ContactDraft {
        ContactDraft {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            title: self.title.and_then(blank_to_none),
            email: self.email.trim().to_string(),
            phone_number: self.phone_number.and_then(blank_to_none),
            is_primary: self.is_primary,
            is_billing_contact: self.is_billing_contact,
            notes: self.notes.and_then(blank_to_none),
        }
    }
}

/// Partial contact payload for PATCH. An empty string clears an optional field.
#[derive(Deserialize, Default, ToSchema)]
pub struct ContactPatchRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub is_primary: Option<bool>,
    pub is_billing_contact: Option<bool>,
    pub notes: Option<String>,
}

impl From<ContactPatchRequest> for ContactPatch {
    fn from(req: ContactPatchRequest) -> Self {
        ContactPatch {
            first_name: req.first_name,
            last_name: req.last_name,
            title: req.title,
            email: req.email,
            phone_number: req.phone_number,
            is_primary: req.is_primary,
            is_billing_contact: req.is_billing_contact,
            notes: req.notes,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ContactResponse {
    pub id: i64,
    pub client: i64,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub title: Option<String>,
    pub email: String,
    pub phone_number: Option<String>,
    pub is_primary: bool,
    pub is_billing_contact: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ClientContact> for ContactResponse {
    fn from(c: ClientContact) -> Self {
        Self {
            full_name: rules::full_name(&c),
            id: c.id,
            client: c.client_id,
            first_name: c.first_name,
            last_name: c.last_name,
            title: c.title,
            email: c.email,
            phone_number: c.phone_number,
            is_primary: c.is_primary,
            is_billing_contact: c.is_billing_contact,
            notes: c.notes,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /clients/{client_id}/contacts/ - Contacts of a client, primary first
#[utoipa::path(
    get,
    path = "/api/v1/clients/{client_id}/contacts/",
    tag = "contacts",
    params(("client_id" = i64, Path, description = "Client id")),
    responses(
        (status = 200, description = "Contacts", body = Vec<ContactResponse>),
        (status = 404, description = "Client not found")
    )
)]
pub async fn list_contacts_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<i64>,
) -> Result<Json<Vec<ContactResponse>>, ApiError> {
    state.db.get_client(client_id).await?;
    let contacts = state.db.list_contacts(client_id).await?;
    Ok(Json(contacts.into_iter().map(ContactResponse::from).collect()))
}

/// POST /clients/{client_id}/contacts/ - Add a contact; a primary contact demotes the previous one
#[utoipa::path(
    post,
    path = "/api/v1/clients/{client_id}/contacts/",
    tag = "contacts",
    params(("client_id" = i64, Path, description = "Client id")),
    request_body = ContactRequest,
    responses(
        (status = 201, description = "Contact created", body = ContactResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Client not found"),
        (status = 409, description = "A contact with this email already exists for this client")
    )
)]
pub async fn create_contact_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<i64>,
    payload: Result<Json<ContactRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let draft = req.into_draft();
    draft.validate()?;

    let contact = state.db.create_contact(client_id, draft).await?;
    if contact.is_primary {
        info!("Contact {} is now primary for client {}", contact.id, client_id);
    }
    Ok((StatusCode::CREATED, Json(ContactResponse::from(contact))))
}

/// GET /clients/{client_id}/contacts/{id}/ - One contact of a client
#[utoipa::path(
    get,
    path = "/api/v1/clients/{client_id}/contacts/{id}/",
    tag = "contacts",
    params(
        ("client_id" = i64, Path, description = "Client id"),
        ("id" = i64, Path, description = "Contact id")
    ),
    responses(
        (status = 200, description = "Contact", body = ContactResponse),
        (status = 404, description = "Contact not found")
    )
)]
pub async fn get_contact_handler(
    State(state): State<Arc<AppState>>,
    Path((client_id, contact_id)): Path<(i64, i64)>,
) -> Result<Json<ContactResponse>, ApiError> {
    let contact = state.db.get_contact(client_id, contact_id).await?;
    Ok(Json(contact.into()))
}

/// PUT /clients/{client_id}/contacts/{id}/ - Replace a contact
#[utoipa::path(
    put,
    path = "/api/v1/clients/{client_id}/contacts/{id}/",
    tag = "contacts",
    params(
        ("client_id" = i64, Path, description = "Client id"),
        ("id" = i64, Path, description = "Contact id")
    ),
    request_body = ContactRequest,
    responses(
        (status = 200, description = "Contact updated", body = ContactResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Contact not found"),
        (status = 409, description = "Duplicate email for this client")
    )
)]
pub async fn replace_contact_handler(
    State(state): State<Arc<AppState>>,
    Path((client_id, contact_id)): Path<(i64, i64)>,
    payload: Result<Json<ContactRequest>, JsonRejection>,
) -> Result<Json<ContactResponse>, ApiError> {
    let Json(req) = payload?;
    state.db.get_contact(client_id, contact_id).await?;
    let draft = req.into_draft();
    draft.validate()?;
    let contact = state.db.update_contact(client_id, contact_id, draft).await?;
    Ok(Json(contact.into()))
}

/// PATCH /clients/{client_id}/contacts/{id}/ - Partially update a contact
#[utoipa::path(
    patch,
    path = "/api/v1/clients/{client_id}/contacts/{id}/",
    tag = "contacts",
    params(
        ("client_id" = i64, Path, description = "Client id"),
        ("id" = i64, Path, description = "Contact id")
    ),
    request_body = ContactPatchRequest,
    responses(
        (status = 200, description = "Contact updated", body = ContactResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Contact not found"),
        (status = 409, description = "Duplicate email for this client")
    )
)]
pub async fn update_contact_handler(
    State(state): State<Arc<AppState>>,
    Path((client_id, contact_id)): Path<(i64, i64)>,
    payload: Result<Json<ContactPatchRequest>, JsonRejection>,
) -> Result<Json<ContactResponse>, ApiError> {
    let Json(req) = payload?;
    let current = state.db.get_contact(client_id, contact_id).await?;
    let draft = current.to_draft().apply(req.into());
    draft.validate()?;
    let contact = state.db.update_contact(client_id, contact_id, draft).await?;
    Ok(Json(contact.into()))
}

/// DELETE /clients/{client_id}/contacts/{id}/ - Remove a contact
#[utoipa::path(
    delete,
    path = "/api/v1/clients/{client_id}/contacts/{id}/",
    tag = "contacts",
    params(
        ("client_id" = i64, Path, description = "Client id"),
        ("id" = i64, Path, description = "Contact id")
    ),
    responses(
        (status = 204, description = "Contact deleted"),
        (status = 404, description = "Contact not found")
    )
)]
pub async fn delete_contact_handler(
    State(state): State<Arc<AppState>>,
    Path((client_id, contact_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    state.db.delete_contact(client_id, contact_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
