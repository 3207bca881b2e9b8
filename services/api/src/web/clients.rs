//! services/api/src/web/clients.rs
//!
//! Client endpoints: list/create, detail/update/soft-delete, statistics and
//! the activate/deactivate actions.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use invoicing_core::domain::{blank_to_none, CLIENT_ORDERING_FIELDS};
use invoicing_core::{
    rules, Client, ClientContact, ClientDraft, ClientFilter, ClientPatch, ClientStats,
    ClientSummary, ClientType, PrimaryContactSummary,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::web::contacts::ContactResponse;
use crate::web::middleware::CurrentUser;
use crate::web::pagination::{page_request, parse_ordering, Paginated};
use crate::web::state::AppState;

//=========================================================================================
// Request Types
//=========================================================================================

fn default_country() -> String {
    "USA".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_payment_terms() -> i32 {
    30
}

fn default_true() -> bool {
    true
}

/// Full client payload for POST and PUT. `client_code` is assigned by the server
/// and ignored if sent.
#[derive(Deserialize, ToSchema)]
pub struct ClientRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    #[schema(value_type = String, example = "company")]
    pub client_type: ClientType,
    #[serde(default)]
    pub email: String,
    pub phone_number: Option<String>,
    pub website: Option<String>,
    #[serde(default)]
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state_province: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
    pub tax_id: Option<String>,
    pub registration_number: Option<String>,
    #[serde(default = "default_payment_terms")]
    pub payment_terms: i32,
    #[serde(default)]
    pub credit_limit: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub notes: Option<String>,
}

impl ClientRequest {
    fn into_draft(self) -> ClientDraft {
        ClientDraft {
            name: self.name.trim().to_string(),
            client_type: self.client_type,
            email: self.email.trim().to_string(),
            phone_number: self.phone_number.and_then(blank_to_none),
            website: self.website.and_then(blank_to_none),
            address_line_1: self.address_line_1,
            address_line_2: self.address_line_2.and_then(blank_to_none),
            city: self.city,
            state_province: self.state_province,
            postal_code: self.postal_code,
            country: self.country,
            tax_id: self.tax_id.and_then(blank_to_none),
            registration_number: self.registration_number.and_then(blank_to_none),
            payment_terms: self.payment_terms,
            credit_limit: self.credit_limit,
            currency: self.currency,
            is_active: self.is_active,
            notes: self.notes.and_then(blank_to_none),
        }
    }
}

/// Partial client payload for PATCH.
#[derive(Deserialize, Default, ToSchema)]
pub struct ClientPatchRequest {
    pub name: Option<String>,
    #[schema(value_type = Option<String>)]
    pub client_type: Option<ClientType>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub website: Option<String>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub state_province: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub tax_id: Option<String>,
    pub registration_number: Option<String>,
    pub payment_terms: Option<i32>,
    pub credit_limit: Option<Decimal>,
    pub currency: Option<String>,
    pub is_active: Option<bool>,
    pub notes: Option<String>,
}

impl From<ClientPatchRequest> for ClientPatch {
    fn from(req: ClientPatchRequest) -> Self {
        ClientPatch {
            name: req.name,
            client_type: req.client_type,
            email: req.email,
            phone_number: req.phone_number,
            website: req.website,
            address_line_1: req.address_line_1,
            address_line_2: req.address_line_2,
            city: req.city,
            state_province: req.state_province,
            postal_code: req.postal_code,
            country: req.country,
            tax_id: req.tax_id,
            registration_number: req.registration_number,
            payment_terms: req.payment_terms,
            credit_limit: req.credit_limit,
            currency: req.currency,
            is_active: req.is_active,
            notes: req.notes,
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ClientListParams {
    #[param(value_type = Option<String>)]
    pub client_type: Option<ClientType>,
    pub is_active: Option<bool>,
    pub country: Option<String>,
    pub currency: Option<String>,
    /// Case-insensitive match on name, email, client code or city.
    pub search: Option<String>,
    /// One of `name`, `created_at`, `client_code`; prefix with `-` for descending.
    pub ordering: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

//=========================================================================================
// Response Types
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct PrimaryContactResponse {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl From<PrimaryContactSummary> for PrimaryContactResponse {
    fn from(s: PrimaryContactSummary) -> Self {
        Self {
            name: s.name,
            email: s.email,
            phone: s.phone,
        }
    }
}

/// A client with its contacts and derived fields.
#[derive(Serialize, ToSchema)]
pub struct ClientResponse {
    pub id: i64,
    pub name: String,
    #[schema(value_type = String)]
    pub client_type: ClientType,
    pub client_code: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub website: Option<String>,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub city: String,
    pub state_province: String,
    pub postal_code: String,
    pub country: String,
    pub full_address: String,
    pub tax_id: Option<String>,
    pub registration_number: Option<String>,
    pub payment_terms: i32,
    pub credit_limit: Decimal,
    pub currency: String,
    pub is_active: bool,
    pub notes: Option<String>,
    pub primary_contact: Option<PrimaryContactResponse>,
    pub contacts: Vec<ContactResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<i64>,
}

impl ClientResponse {
    fn new(client: Client, contacts: Vec<ClientContact>) -> Self {
        Self {
            full_address: rules::full_address(&client),
            primary_contact: rules::primary_contact_summary(&contacts).map(Into::into),
            contacts: contacts.into_iter().map(ContactResponse::from).collect(),
            id: client.id,
            name: client.name,
            client_type: client.client_type,
            client_code: client.client_code,
            email: client.email,
            phone_number: client.phone_number,
            website: client.website,
            address_line_1: client.address_line_1,
            address_line_2: client.address_line_2,
            city: client.city,
            state_province: client.state_province,
            postal_code: client.postal_code,
            country: client.country,
            tax_id: client.tax_id,
            registration_number: client.registration_number,
            payment_terms: client.payment_terms,
            credit_limit: client.credit_limit,
            currency: client.currency,
            is_active: client.is_active,
            notes: client.notes,
            created_at: client.created_at,
            updated_at: client.updated_at,
            created_by: client.created_by,
        }
    }
}

/// One row of the client list.
#[derive(Serialize, ToSchema)]
pub struct ClientSummaryResponse {
    pub id: i64,
    pub name: String,
    pub client_code: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub city: String,
    pub country: String,
    pub is_active: bool,
    pub primary_contact: Option<PrimaryContactResponse>,
    pub total_invoices: i64,
    pub created_at: DateTime<Utc>,
}

impl From<ClientSummary> for ClientSummaryResponse {
    fn from(s: ClientSummary) -> Self {
        Self {
            id: s.id,
            name: s.name,
            client_code: s.client_code,
            email: s.email,
            phone_number: s.phone_number,
            city: s.city,
            country: s.country,
            is_active: s.is_active,
            primary_contact: s.primary_contact.map(Into::into),
            total_invoices: s.total_invoices,
            created_at: s.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ClientStatsResponse {
    pub total_contacts: i64,
    pub primary_contacts: i64,
    pub billing_contacts: i64,
    pub total_invoices: i64,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub outstanding_amount: Decimal,
}

impl From<ClientStats> for ClientStatsResponse {
    fn from(s: ClientStats) -> Self {
        Self {
            total_contacts: s.total_contacts,
            primary_contacts: s.primary_contacts,
            billing_contacts: s.billing_contacts,
            total_invoices: s.total_invoices,
            total_amount: s.total_amount,
            paid_amount: s.paid_amount,
            outstanding_amount: s.outstanding_amount,
        }
    }
}

/// Returned by the activate and deactivate actions.
#[derive(Serialize, ToSchema)]
pub struct ClientStatusResponse {
    pub message: String,
    pub id: i64,
    pub client_code: String,
    pub is_active: bool,
}

//=========================================================================================
// Handlers
//=========================================================================================

async fn client_detail(state: &AppState, client: Client) -> Result<ClientResponse, ApiError> {
    let contacts = state.db.list_contacts(client.id).await?;
    Ok(ClientResponse::new(client, contacts))
}

/// GET /clients/ - List clients
#[utoipa::path(
    get,
    path = "/api/v1/clients/",
    tag = "clients",
    params(ClientListParams),
    responses(
        (status = 200, description = "A page of clients", body = Paginated<ClientSummaryResponse>),
        (status = 400, description = "Invalid filter or ordering")
    )
)]
pub async fn list_clients_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ClientListParams>, QueryRejection>,
) -> Result<Json<Paginated<ClientSummaryResponse>>, ApiError> {
    let Query(params) = params?;
    let filter = ClientFilter {
        client_type: params.client_type,
        is_active: params.is_active,
        country: params.country.filter(|c| !c.is_empty()),
        currency: params.currency.filter(|c| !c.is_empty()),
        search: params.search,
        ordering: parse_ordering(params.ordering.as_deref(), CLIENT_ORDERING_FIELDS)?,
    };
    let page = page_request(&state.config, params.page, params.page_size);
    let clients = state.db.list_clients(&filter, page).await?;
    Ok(Json(Paginated::from_page(clients, ClientSummaryResponse::from)))
}

/// POST /clients/ - Create a client; the client code is assigned on save
#[utoipa::path(
    post,
    path = "/api/v1/clients/",
    tag = "clients",
    request_body = ClientRequest,
    responses(
        (status = 201, description = "Client created", body = ClientResponse),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn create_client_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    payload: Result<Json<ClientRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let draft = req.into_draft();
    draft.validate()?;

    let client = state.db.create_client(draft, Some(user.id)).await?;
    info!("User {} created client {}", user.id, client.client_code);
    Ok((StatusCode::CREATED, Json(ClientResponse::new(client, Vec::new()))))
}

/// GET /clients/{id}/ - Client detail with contacts
#[utoipa::path(
    get,
    path = "/api/v1/clients/{id}/",
    tag = "clients",
    params(("id" = i64, Path, description = "Client id")),
    responses(
        (status = 200, description = "Client", body = ClientResponse),
        (status = 404, description = "Client not found")
    )
)]
pub async fn get_client_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<i64>,
) -> Result<Json<ClientResponse>, ApiError> {
    let client = state.db.get_client(client_id).await?;
    Ok(Json(client_detail(&state, client).await?))
}

/// PUT /clients/{id}/ - Replace a client's fields; the client code never changes
#[utoipa::path(
    put,
    path = "/api/v1/clients/{id}/",
    tag = "clients",
    params(("id" = i64, Path, description = "Client id")),
    request_body = ClientRequest,
    responses(
        (status = 200, description = "Client updated", body = ClientResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Client not found")
    )
)]
pub async fn replace_client_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<i64>,
    payload: Result<Json<ClientRequest>, JsonRejection>,
) -> Result<Json<ClientResponse>, ApiError> {
    let Json(req) = payload?;
    state.db.get_client(client_id).await?;
    let draft = req.into_draft();
    draft.validate()?;
    let client = state.db.update_client(client_id, draft).await?;
    Ok(Json(client_detail(&state, client).await?))
}

/// PATCH /clients/{id}/ - Partially update a client
#[utoipa::path(
    patch,
    path = "/api/v1/clients/{id}/",
    tag = "clients",
    params(("id" = i64, Path, description = "Client id")),
    request_body = ClientPatchRequest,
    responses(
        (status = 200, description = "Client updated", body = ClientResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Client not found")
    )
)]
pub async fn update_client_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<i64>,
    payload: Result<Json<ClientPatchRequest>, JsonRejection>,
) -> Result<Json<ClientResponse>, ApiError> {
    let Json(req) = payload?;
    let current = state.db.get_client(client_id).await?;
    let draft = current.to_draft().apply(req.into());
    draft.validate()?;
    let client = state.db.update_client(client_id, draft).await?;
    Ok(Json(client_detail(&state, client).await?))
}

/// DELETE /clients/{id}/ - Soft delete: the client is deactivated, never removed
#[utoipa::path(
    delete,
    path = "/api/v1/clients/{id}/",
    tag = "clients",
    params(("id" = i64, Path, description = "Client id")),
    responses(
        (status = 204, description = "Client deactivated"),
        (status = 404, description = "Client not found")
    )
)]
pub async fn delete_client_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(client_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let client = state.db.set_client_active(client_id, false).await?;
    info!("User {} soft-deleted client {}", user.id, client.client_code);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /clients/{id}/stats/ - Contact counts and invoice totals
#[utoipa::path(
    get,
    path = "/api/v1/clients/{id}/stats/",
    tag = "clients",
    params(("id" = i64, Path, description = "Client id")),
    responses(
        (status = 200, description = "Statistics", body = ClientStatsResponse),
        (status = 404, description = "Client not found")
    )
)]
pub async fn client_stats_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<i64>,
) -> Result<Json<ClientStatsResponse>, ApiError> {
    let stats = state.db.client_stats(client_id).await?;
    Ok(Json(stats.into()))
}

async fn set_active(
    state: &AppState,
    client_id: i64,
    is_active: bool,
) -> Result<Json<ClientStatusResponse>, ApiError> {
    let client = state.db.set_client_active(client_id, is_active).await?;
    let message = if is_active {
        "Client activated successfully"
    } else {
        "Client deactivated successfully"
    };
    Ok(Json(ClientStatusResponse {
        message: message.to_string(),
        id: client.id,
        client_code: client.client_code,
        is_active: client.is_active,
    }))
}

/// POST /clients/{id}/activate/
#[utoipa::path(
    post,
    path = "/api/v1/clients/{id}/activate/",
    tag = "clients",
    params(("id" = i64, Path, description = "Client id")),
    responses(
        (status = 200, description = "Client activated", body = ClientStatusResponse),
        (status = 404, description = "Client not found")
    )
)]
pub async fn activate_client_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<i64>,
) -> Result<Json<ClientStatusResponse>, ApiError> {
    set_active(&state, client_id, true).await
}

/// POST /clients/{id}/deactivate/
#[utoipa::path(
    post,
    path = "/api/v1/clients/{id}/deactivate/",
    tag = "clients",
    params(("id" = i64, Path, description = "Client id")),
    responses(
        (status = 200, description = "Client deactivated", body = ClientStatusResponse),
        (status = 404, description = "Client not found")
    )
)]
pub async fn deactivate_client_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<i64>,
) -> Result<Json<ClientStatusResponse>, ApiError> {
    set_active(&state, client_id, false).await
}
