//! services/api/src/web/payments.rs
//!
//! Payment endpoints. Writing requires the payment-management capability.

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
use invoicing_core::domain::{blank_to_none, PAYMENT_ORDERING_FIELDS};
use invoicing_core::{
    Payment, PaymentDraft, PaymentFilter, PaymentMethod, PaymentPatch, PaymentStatus, PortError,
    User, ValidationErrors,
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

#[derive(Deserialize, ToSchema)]
pub struct PaymentCreateRequest {
    pub invoice_id: i64,
    #[serde(default)]
    pub payment_reference: String,
    pub amount: Decimal,
    /// Defaults to today.
    pub payment_date: Option<NaiveDate>,
    #[schema(value_type = String, example = "bank_transfer")]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "pending")]
    pub status: PaymentStatus,
    pub notes: Option<String>,
}

/// Body of PUT and PATCH. PUT additionally requires reference, amount, date and method.
#[derive(Deserialize, Default, ToSchema)]
pub struct PaymentUpdateRequest {
    pub payment_reference: Option<String>,
    pub amount: Option<Decimal>,
    pub payment_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>)]
    pub payment_method: Option<PaymentMethod>,
    #[schema(value_type = Option<String>)]
    pub status: Option<PaymentStatus>,
    pub notes: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaymentListParams {
    pub invoice_id: Option<i64>,
    #[param(value_type = Option<String>)]
    pub status: Option<PaymentStatus>,
    #[param(value_type = Option<String>)]
    pub payment_method: Option<PaymentMethod>,
    /// One of `payment_date`, `amount`, `created_at`; prefix with `-` for descending.
    pub ordering: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct PaymentResponse {
    pub id: i64,
    pub invoice: i64,
    pub payment_reference: String,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    #[schema(value_type = String)]
    pub payment_method: PaymentMethod,
    #[schema(value_type = String)]
    pub status: PaymentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<i64>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id,
            invoice: p.invoice_id,
            payment_reference: p.payment_reference,
            amount: p.amount,
            payment_date: p.payment_date,
            payment_method: p.payment_method,
            status: p.status,
            notes: p.notes,
            created_at: p.created_at,
            updated_at: p.updated_at,
            created_by: p.created_by,
        }
    }
}

fn ensure_can_write(user: &User) -> Result<(), ApiError> {
    if user.can_manage_payments() {
        Ok(())
    } else {
        warn!("User {} ({}) may not manage payments", user.id, user.role.as_str());
        Err(ApiError::forbidden(
            "You do not have permission to manage payments.",
        ))
    }
}

/// GET /payments/ - List payments
#[utoipa::path(
    get,
    path = "/api/v1/payments/",
    tag = "payments",
    params(PaymentListParams),
    responses(
        (status = 200, description = "A page of payments", body = Paginated<PaymentResponse>),
        (status = 400, description = "Invalid filter or ordering")
    )
)]
pub async fn list_payments_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<PaymentListParams>, QueryRejection>,
) -> Result<Json<Paginated<PaymentResponse>>, ApiError> {
    let Query(params) = params?;
    let filter = PaymentFilter {
        invoice_id: params.invoice_id,
        status: params.status,
        payment_method: params.payment_method,
        ordering: parse_ordering(params.ordering.as_deref(), PAYMENT_ORDERING_FIELDS)?,
    };
    let page = page_request(&state.config, params.page, params.page_size);
    let payments = state.db.list_payments(&filter, page).await?;
    Ok(Json(Paginated::from_page(payments, PaymentResponse::from)))
}

/// POST /payments/ - Record a payment against an invoice
#[utoipa::path(
    post,
    path = "/api/v1/payments/",
    tag = "payments",
    request_body = PaymentCreateRequest,
    responses(
        (status = 201, description = "Payment recorded", body = PaymentResponse),
        (status = 400, description = "Invalid request or unknown invoice"),
        (status = 403, description = "Role may not manage payments")
    )
)]
pub async fn create_payment_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    payload: Result<Json<PaymentCreateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_can_write(&user)?;
    let Json(req) = payload?;

    match state.db.get_invoice(req.invoice_id).await {
        Ok(_) => {}
        Err(PortError::NotFound(_)) => {
            return Err(ValidationErrors::single("invoice_id", "Invoice not found.").into());
        }
        Err(e) => return Err(e.into()),
    }

    let draft = PaymentDraft {
        invoice_id: req.invoice_id,
        payment_reference: req.payment_reference.trim().to_string(),
        amount: req.amount,
        payment_date: req.payment_date.unwrap_or_else(|| Utc::now().date_naive()),
        payment_method: req.payment_method,
        status: req.status,
        notes: req.notes.and_then(blank_to_none),
    };
    draft.validate()?;

    let payment = state.db.create_payment(draft, Some(user.id)).await?;
    info!(
        "User {} recorded payment {} of {} on invoice {}",
        user.id, payment.id, payment.amount, payment.invoice_id
    );
    Ok((StatusCode::CREATED, Json(PaymentResponse::from(payment))))
}

/// GET /payments/{id}/
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}/",
    tag = "payments",
    params(("id" = i64, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment", body = PaymentResponse),
        (status = 404, description = "Payment not found")
    )
)]
pub async fn get_payment_handler(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<i64>,
) -> Result<Json<PaymentResponse>, ApiError> {
    Ok(Json(state.db.get_payment(payment_id).await?.into()))
}

async fn update_payment(
    state: &AppState,
    user: &User,
    payment_id: i64,
    req: PaymentUpdateRequest,
    full: bool,
) -> Result<Json<PaymentResponse>, ApiError> {
    ensure_can_write(user)?;
    if full {
        let mut missing = ValidationErrors::new();
        for (field, present) in [
            ("payment_reference", req.payment_reference.is_some()),
            ("amount", req.amount.is_some()),
            ("payment_date", req.payment_date.is_some()),
            ("payment_method", req.payment_method.is_some()),
        ] {
            if !present {
                missing.add(field, "This field is required.");
            }
        }
        missing.into_result()?;
    }

    let current = state.db.get_payment(payment_id).await?;
    let draft = current.to_draft().apply(PaymentPatch {
        payment_reference: req.payment_reference,
        amount: req.amount,
        payment_date: req.payment_date,
        payment_method: req.payment_method,
        status: req.status,
        notes: req.notes,
    });
    draft.validate()?;
    Ok(Json(state.db.update_payment(payment_id, draft).await?.into()))
}

/// PUT /payments/{id}/
#[utoipa::path(
    put,
    path = "/api/v1/payments/{id}/",
    tag = "payments",
    params(("id" = i64, Path, description = "Payment id")),
    request_body = PaymentUpdateRequest,
    responses(
        (status = 200, description = "Payment updated", body = PaymentResponse),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Role may not manage payments"),
        (status = 404, description = "Payment not found")
    )
)]
pub async fn replace_payment_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(payment_id): Path<i64>,
    payload: Result<Json<PaymentUpdateRequest>, JsonRejection>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let Json(req) = payload?;
    update_payment(&state, &user, payment_id, req, true).await
}

/// PATCH /payments/{id}/
#[utoipa::path(
    patch,
    path = "/api/v1/payments/{id}/",
    tag = "payments",
    params(("id" = i64, Path, description = "Payment id")),
    request_body = PaymentUpdateRequest,
    responses(
        (status = 200, description = "Payment updated", body = PaymentResponse),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Role may not manage payments"),
        (status = 404, description = "Payment not found")
    )
)]
pub async fn update_payment_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(payment_id): Path<i64>,
    payload: Result<Json<PaymentUpdateRequest>, JsonRejection>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let Json(req) = payload?;
    update_payment(&state, &user, payment_id, req, false).await
}

/// DELETE /payments/{id}/
#[utoipa::path(
    delete,
    path = "/api/v1/payments/{id}/",
    tag = "payments",
    params(("id" = i64, Path, description = "Payment id")),
    responses(
        (status = 204, description = "Payment deleted"),
        (status = 403, description = "Role may not manage payments"),
        (status = 404, description = "Payment not found")
    )
)]
pub async fn delete_payment_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(payment_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    ensure_can_write(&user)?;
    state.db.delete_payment(payment_id).await?;
    info!("User {} deleted payment {}", user.id, payment_id);
    Ok(StatusCode::NO_CONTENT)
}
