//! crates/invoicing_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete store behind them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Client, ClientContact, ClientDraft, ClientFilter, ClientStats, ClientSummary, ContactDraft,
    Invoice, InvoiceDraft, InvoiceFilter, NewUser, Page, PageRequest, Payment, PaymentDraft,
    PaymentFilter, TokenKind, User, UserCredentials, UserFilter, UserProfile,
};
use crate::validation::ValidationErrors;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A uniqueness or referential constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl From<ValidationErrors> for PortError {
    fn from(errors: ValidationErrors) -> Self {
        PortError::Validation(errors)
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    async fn create_user(&self, user: NewUser) -> PortResult<User>;

    async fn get_user(&self, user_id: i64) -> PortResult<User>;

    async fn get_user_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> PortResult<Page<User>>;

    /// Writes the editable columns of `user` (everything but id, superuser flag and timestamps).
    async fn update_user(&self, user: &User) -> PortResult<User>;

    async fn set_password(&self, user_id: i64, hashed_password: &str) -> PortResult<()>;

    /// Deletes the user; `created_by` references elsewhere are cleared, not cascaded.
    async fn delete_user(&self, user_id: i64) -> PortResult<()>;

    // --- Profiles ---
    async fn get_or_create_profile(&self, user_id: i64) -> PortResult<UserProfile>;

    async fn update_profile(&self, profile: &UserProfile) -> PortResult<UserProfile>;

    // --- Auth Tokens ---
    async fn create_auth_token(
        &self,
        token: &str,
        user_id: i64,
        kind: TokenKind,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Returns the owning user id of an unexpired, unrevoked token of `kind`.
    async fn validate_auth_token(&self, token: &str, kind: TokenKind) -> PortResult<i64>;

    async fn revoke_auth_token(&self, token: &str) -> PortResult<()>;

    async fn revoke_user_tokens(&self, user_id: i64) -> PortResult<u64>;

    // --- Clients ---
    /// Inserts a client and assigns its code in the same unit of work.
    async fn create_client(&self, draft: ClientDraft, created_by: Option<i64>) -> PortResult<Client>;

    async fn get_client(&self, client_id: i64) -> PortResult<Client>;

    async fn list_clients(
        &self,
        filter: &ClientFilter,
        page: PageRequest,
    ) -> PortResult<Page<ClientSummary>>;

    /// Writes every field of `draft`. The client code is never touched.
    async fn update_client(&self, client_id: i64, draft: ClientDraft) -> PortResult<Client>;

    async fn set_client_active(&self, client_id: i64, is_active: bool) -> PortResult<Client>;

    async fn client_stats(&self, client_id: i64) -> PortResult<ClientStats>;

    /// Finalizes any client code still carrying the placeholder suffix.
    async fn repair_placeholder_codes(&self) -> PortResult<u64>;

    // --- Client Contacts ---
    async fn list_contacts(&self, client_id: i64) -> PortResult<Vec<ClientContact>>;

    async fn get_contact(&self, client_id: i64, contact_id: i64) -> PortResult<ClientContact>;

    /// Inserts a contact; a primary contact demotes every other primary of the client.
    async fn create_contact(&self, client_id: i64, draft: ContactDraft) -> PortResult<ClientContact>;

    async fn update_contact(
        &self,
        client_id: i64,
        contact_id: i64,
        draft: ContactDraft,
    ) -> PortResult<ClientContact>;

    async fn delete_contact(&self, client_id: i64, contact_id: i64) -> PortResult<()>;

    // --- Invoices ---
    async fn create_invoice(
        &self,
        invoice_number: &str,
        draft: InvoiceDraft,
        created_by: Option<i64>,
    ) -> PortResult<Invoice>;

    async fn get_invoice(&self, invoice_id: i64) -> PortResult<Invoice>;

    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
        page: PageRequest,
    ) -> PortResult<Page<Invoice>>;

    async fn update_invoice(&self, invoice_id: i64, draft: InvoiceDraft) -> PortResult<Invoice>;

    /// Refuses with `Conflict` while payments reference the invoice.
    async fn delete_invoice(&self, invoice_id: i64) -> PortResult<()>;

    // --- Payments ---
    async fn create_payment(&self, draft: PaymentDraft, created_by: Option<i64>) -> PortResult<Payment>;

    async fn get_payment(&self, payment_id: i64) -> PortResult<Payment>;

    async fn list_payments(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
    ) -> PortResult<Page<Payment>>;

    async fn update_payment(&self, payment_id: i64, draft: PaymentDraft) -> PortResult<Payment>;

    async fn delete_payment(&self, payment_id: i64) -> PortResult<()>;
}
