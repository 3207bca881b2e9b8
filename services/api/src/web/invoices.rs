//! services/api/src/web/invoices.rs
//!
//! Invoice endpoints. Reading is open to every authenticated user; writing
//! requires the invoice-creation capability.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use invoicing_core::domain::{blank_to_none, INVOICE_ORDERING_FIELDS};
use invoicing_core::{
    rules, Invoice, InvoiceDraft, InvoiceFilter, InvoicePatch, InvoiceStatus, PortError, User,
    ValidationErrors,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::web::middleware::CurrentUser;
use crate::web::pagination::{page_request, parse_ordering, Paginated};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct InvoiceCreateRequest {
    pub client_id: i64,
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "draft")]
    pub status: InvoiceStatus,
    /// Defaults to today.
    pub issue_date: Option<NaiveDate>,
    /// Defaults to the issue date plus the client's payment terms.
    pub due_date: Option<NaiveDate>,
    pub subtotal: Option<Decimal>,
    /// Percentage, 0 to 100. Defaults to 0.
    #[serde(default)]
    pub tax_rate: Decimal,
    pub notes: Option<String>,
    pub terms_and_conditions: Option<String>,
}

/// Body of PUT and PATCH. PUT additionally requires the dates and the subtotal.
/// The client of an invoice cannot be changed.
#[derive(Deserialize, Default, ToSchema)]
pub struct InvoiceUpdateRequest {
    #[schema(value_type = Option<String>)]
    pub status: Option<InvoiceStatus>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Option<Decimal>,
    pub tax_rate: Option<Decimal>,
    pub notes: Option<String>,
    pub terms_and_conditions: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct InvoiceListParams {
    pub client_id: Option<i64>,
    #[param(value_type = Option<String>)]
    pub status: Option<InvoiceStatus>,
    /// One of `issue_date`, `due_date`, `total_amount`, `created_at`; prefix with `-` for descending.
    pub ordering: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct InvoiceResponse {
    pub id: i64,
    pub invoice_number: String,
    pub client: i64,
    #[schema(value_type = String)]
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub terms_and_conditions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<i64>,
}

impl From<Invoice> for InvoiceResponse {
    fn from(i: Invoice) -> Self {
        Self {
            id: i.id,
            invoice_number: i.invoice_number,
            client: i.client_id,
            status: i.status,
            issue_date: i.issue_date,
            due_date: i.due_date,
            subtotal: i.subtotal,
            tax_rate: i.tax_rate,
            tax_amount: i.tax_amount,
            total_amount: i.total_amount,
            notes: i.notes,
            terms_and_conditions: i.terms_and_conditions,
            created_at: i.created_at,
            updated_at: i.updated_at,
            created_by: i.created_by,
        }
    }
}

fn ensure_can_write(user: &User) -> Result<(), ApiError> {
    if user.can_create_invoices() {
        Ok(())
    } else {
        warn!("User {} ({}) may not write invoices", user.id, user.role.as_str());
        Err(ApiError::forbidden(
            "You do not have permission to create or modify invoices.",
        ))
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /invoices/ - List invoices
#[utoipa::path(
    get,
    path = "/api/v1/invoices/",
    tag = "invoices",
    params(InvoiceListParams),
    responses(
        (status = 200, description = "A page of invoices", body = Paginated<InvoiceResponse>),
        (status = 400, description = "Invalid filter or ordering")
    )
)]
pub async fn list_invoices_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<InvoiceListParams>, QueryRejection>,
) -> Result<Json<Paginated<InvoiceResponse>>, ApiError> {
    let Query(params) = params?;
    let filter = InvoiceFilter {
        client_id: params.client_id,
        status: params.status,
        ordering: parse_ordering(params.ordering.as_deref(), INVOICE_ORDERING_FIELDS)?,
    };
    let page = page_request(&state.config, params.page, params.page_size);
    let invoices = state.db.list_invoices(&filter, page).await?;
    Ok(Json(Paginated::from_page(invoices, InvoiceResponse::from)))
}

/// POST /invoices/ - Create an invoice for an active client
#[utoipa::path(
    post,
    path = "/api/v1/invoices/",
    tag = "invoices",
    request_body = InvoiceCreateRequest,
    responses(
        (status = 201, description = "Invoice created", body = InvoiceResponse),
        (status = 400, description = "Invalid request or inactive client"),
        (status = 403, description = "Role may not create invoices")
    )
)]
pub async fn create_invoice_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    payload: Result<Json<InvoiceCreateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_can_write(&user)?;
    let Json(req) = payload?;

    // 1. The client must exist and be active
    let client = match state.db.get_client(req.client_id).await {
        Ok(client) => client,
        Err(PortError::NotFound(_)) => {
            return Err(ValidationErrors::single("client_id", "Client not found.").into());
        }
        Err(e) => return Err(e.into()),
    };
    if !client.is_active {
        return Err(
            ValidationErrors::single("client_id", "Cannot invoice an inactive client.").into(),
        );
    }

    // 2. Fill in the defaults
    let subtotal = req
        .subtotal
        .ok_or_else(|| ValidationErrors::single("subtotal", "This field is required."))?;
    let issue_date = req.issue_date.unwrap_or_else(|| Utc::now().date_naive());
    let due_date = match req.due_date {
        Some(due_date) => due_date,
        None => rules::calculate_due_date(issue_date, client.payment_terms).ok_or_else(|| {
            ValidationErrors::single(
                "due_date",
                "The client's payment terms put the due date out of range.",
            )
        })?,
    };
    let draft = InvoiceDraft {
        client_id: client.id,
        status: req.status,
        issue_date,
        due_date,
        subtotal,
        tax_rate: req.tax_rate,
        notes: req.notes.and_then(blank_to_none),
        terms_and_conditions: req.terms_and_conditions.and_then(blank_to_none),
    };
    draft.validate()?;

    // 3. Persist under a fresh number
    let number = rules::generate_invoice_number(Utc::now());
    let invoice = state.db.create_invoice(&number, draft, Some(user.id)).await?;
    info!(
        "User {} created invoice {} for client {}",
        user.id, invoice.invoice_number, client.client_code
    );
    Ok((StatusCode::CREATED, Json(InvoiceResponse::from(invoice))))
}

/// GET /invoices/{id}/
#[utoipa::path(
    get,
    path = "/api/v1/invoices/{id}/",
    tag = "invoices",
    params(("id" = i64, Path, description = "Invoice id")),
    responses(
        (status = 200, description = "Invoice", body = InvoiceResponse),
        (status = 404, description = "Invoice not found")
    )
)]
pub async fn get_invoice_handler(
    State(state): State<Arc<AppState>>,
    Path(invoice_id): Path<i64>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    Ok(Json(state.db.get_invoice(invoice_id).await?.into()))
}

async fn update_invoice(
    state: &AppState,
    user: &User,
    invoice_id: i64,
    req: InvoiceUpdateRequest,
    full: bool,
) -> Result<Json<InvoiceResponse>, ApiError> {
    ensure_can_write(user)?;
    if full {
        let mut missing = ValidationErrors::new();
        for (field, present) in [
            ("issue_date", req.issue_date.is_some()),
            ("due_date", req.due_date.is_some()),
            ("subtotal", req.subtotal.is_some()),
        ] {
            if !present {
                missing.add(field, "This field is required.");
            }
        }
        missing.into_result()?;
    }

    let current = state.db.get_invoice(invoice_id).await?;
    let draft = current.to_draft().apply(InvoicePatch {
        status: req.status,
        issue_date: req.issue_date,
        due_date: req.due_date,
        subtotal: req.subtotal,
        tax_rate: req.tax_rate,
        notes: req.notes,
        terms_and_conditions: req.terms_and_conditions,
    });
    draft.validate()?;
    Ok(Json(state.db.update_invoice(invoice_id, draft).await?.into()))
}

/// PUT /invoices/{id}/
#[utoipa::path(
    put,
    path = "/api/v1/invoices/{id}/",
    tag = "invoices",
    params(("id" = i64, Path, description = "Invoice id")),
    request_body = InvoiceUpdateRequest,
    responses(
        (status = 200, description = "Invoice updated", body = InvoiceResponse),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Role may not modify invoices"),
        (status = 404, description = "Invoice not found")
    )
)]
pub async fn replace_invoice_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(invoice_id): Path<i64>,
    payload: Result<Json<InvoiceUpdateRequest>, JsonRejection>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let Json(req) = payload?;
    update_invoice(&state, &user, invoice_id, req, true).await
}

/// PATCH /invoices/{id}/
#[utoipa::path(
    patch,
    path = "/api/v1/invoices/{id}/",
    tag = "invoices",
    params(("id" = i64, Path, description = "Invoice id")),
    request_body = InvoiceUpdateRequest,
    responses(
        (status = 200, description = "Invoice updated", body = InvoiceResponse),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Role may not modify invoices"),
        (status = 404, description = "Invoice not found")
    )
)]
pub async fn update_invoice_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(invoice_id): Path<i64>,
    payload: Result<Json<InvoiceUpdateRequest>, JsonRejection>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let Json(req) = payload?;
    update_invoice(&state, &user, invoice_id, req, false).await
}

/// DELETE /invoices/{id}/ - Refused while payments reference the invoice
#[utoipa::path(
    delete,
    path = "/api/v1/invoices/{id}/",
    tag = "invoices",
    params(("id" = i64, Path, description = "Invoice id")),
    responses(
        (status = 204, description = "Invoice deleted"),
        (status = 403, description = "Role may not modify invoices"),
        (status = 404, description = "Invoice not found"),
        (status = 409, description = "Invoice has recorded payments")
    )
)]
pub async fn delete_invoice_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(invoice_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    ensure_can_write(&user)?;
    state.db.delete_invoice(invoice_id).await?;
    info!("User {} deleted invoice {}", user.id, invoice_id);
    Ok(StatusCode::NO_CONTENT)
}
