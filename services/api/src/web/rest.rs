//! services/api/src/web/rest.rs
//!
//! Assembles the REST router and holds the master definition for the OpenAPI
//! specification.

use crate::config::ConfigError;
use crate::error::ApiError;
use crate::web::{auth, clients, contacts, invoices, middleware::require_auth, payments};
use crate::web::state::AppState;
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::register_handler,
        auth::login_handler,
        auth::refresh_handler,
        auth::logout_handler,
        auth::current_user_handler,
        auth::replace_current_user_handler,
        auth::update_current_user_handler,
        auth::get_preferences_handler,
        auth::update_preferences_handler,
        auth::change_password_handler,
        auth::list_users_handler,
        auth::get_user_handler,
        auth::replace_user_handler,
        auth::update_user_handler,
        auth::delete_user_handler,
        clients::list_clients_handler,
        clients::create_client_handler,
        clients::get_client_handler,
        clients::replace_client_handler,
        clients::update_client_handler,
        clients::delete_client_handler,
        clients::client_stats_handler,
        clients::activate_client_handler,
        clients::deactivate_client_handler,
        contacts::list_contacts_handler,
        contacts::create_contact_handler,
        contacts::get_contact_handler,
        contacts::replace_contact_handler,
        contacts::update_contact_handler,
        contacts::delete_contact_handler,
        invoices::list_invoices_handler,
        invoices::create_invoice_handler,
        invoices::get_invoice_handler,
        invoices::replace_invoice_handler,
        invoices::update_invoice_handler,
        invoices::delete_invoice_handler,
        payments::list_payments_handler,
        payments::create_payment_handler,
        payments::get_payment_handler,
        payments::replace_payment_handler,
        payments::update_payment_handler,
        payments::delete_payment_handler,
    ),
    components(
        schemas(
            auth::UserResponse,
            auth::LoginResponse,
            auth::ProfileResponse,
            clients::ClientResponse,
            clients::ClientSummaryResponse,
            clients::ClientStatsResponse,
            contacts::ContactResponse,
            invoices::InvoiceResponse,
            payments::PaymentResponse,
        )
    ),
    tags(
        (name = "auth", description = "Accounts, bearer tokens and preferences."),
        (name = "clients", description = "Client records, statistics and activation."),
        (name = "contacts", description = "Contacts scoped to a client."),
        (name = "invoices", description = "Invoices issued to clients."),
        (name = "payments", description = "Payments recorded against invoices.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Router
//=========================================================================================

/// Builds the full application: `/api/v1` routes, CORS, request tracing and Swagger UI.
pub fn build_router(app_state: Arc<AppState>) -> Result<Router, ApiError> {
    let origin = app_state
        .config
        .cors_allowed_origin
        .parse::<HeaderValue>()
        .map_err(|e| {
            ConfigError::InvalidValue("CORS_ALLOWED_ORIGIN".to_string(), e.to_string())
        })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/register/", post(auth::register_handler))
        .route("/auth/login/", post(auth::login_handler))
        .route("/auth/token/refresh/", post(auth::refresh_handler));

    // Protected routes (bearer token required)
    let protected_routes = Router::new()
        .route("/auth/logout/", post(auth::logout_handler))
        .route(
            "/auth/profile/",
            get(auth::current_user_handler)
                .put(auth::replace_current_user_handler)
                .patch(auth::update_current_user_handler),
        )
        .route(
            "/auth/profile/edit/",
            get(auth::get_preferences_handler)
                .put(auth::update_preferences_handler)
                .patch(auth::update_preferences_handler),
        )
        .route("/auth/change-password/", post(auth::change_password_handler))
        .route("/auth/users/", get(auth::list_users_handler))
        .route(
            "/auth/users/{id}/",
            get(auth::get_user_handler)
                .put(auth::replace_user_handler)
                .patch(auth::update_user_handler)
                .delete(auth::delete_user_handler),
        )
        .route(
            "/clients/",
            get(clients::list_clients_handler).post(clients::create_client_handler),
        )
        .route(
            "/clients/{id}/",
            get(clients::get_client_handler)
                .put(clients::replace_client_handler)
                .patch(clients::update_client_handler)
                .delete(clients::delete_client_handler),
        )
        .route("/clients/{id}/stats/", get(clients::client_stats_handler))
        .route("/clients/{id}/activate/", post(clients::activate_client_handler))
        .route("/clients/{id}/deactivate/", post(clients::deactivate_client_handler))
        .route(
            "/clients/{client_id}/contacts/",
            get(contacts::list_contacts_handler).post(contacts::create_contact_handler),
        )
        .route(
            "/clients/{client_id}/contacts/{id}/",
            get(contacts::get_contact_handler)
                .put(contacts::replace_contact_handler)
                .patch(contacts::update_contact_handler)
                .delete(contacts::delete_contact_handler),
        )
        .route(
            "/invoices/",
            get(invoices::list_invoices_handler).post(invoices::create_invoice_handler),
        )
        .route(
            "/invoices/{id}/",
            get(invoices::get_invoice_handler)
                .put(invoices::replace_invoice_handler)
                .patch(invoices::update_invoice_handler)
                .delete(invoices::delete_invoice_handler),
        )
        .route(
            "/payments/",
            get(payments::list_payments_handler).post(payments::create_payment_handler),
        )
        .route(
            "/payments/{id}/",
            get(payments::get_payment_handler)
                .put(payments::replace_payment_handler)
                .patch(payments::update_payment_handler)
                .delete(payments::delete_payment_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Ok(Router::new()
        .nest("/api/v1", api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}
