//! crates/invoicing_core/src/domain.rs
//!
//! Defines the pure, core data structures for the invoicing back-office.
//! These structs are independent of any database schema; the enums carry
//! their snake_case wire/storage names.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

//=========================================================================================
// Enumerations
//=========================================================================================

/// Returned when a stored or submitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a valid {kind}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Implements `as_str` and `FromStr` from one list of variant/name pairs.
macro_rules! impl_text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError::new($kind, other)),
                }
            }
        }
    };
}

/// User role in the system. Gates capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Accountant,
    Client,
    #[default]
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    #[default]
    Individual,
    Company,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    #[default]
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Check,
    BankTransfer,
    CreditCard,
    Online,
}

/// Preferred interface language on a user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    En,
    Es,
    Fr,
    De,
}

/// Kind of an opaque bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl_text_enum!(Role, "role", {
    Admin => "admin",
    Accountant => "accountant",
    Client => "client",
    Viewer => "viewer",
});
impl_text_enum!(ClientType, "client type", {
    Individual => "individual",
    Company => "company",
});
impl_text_enum!(InvoiceStatus, "invoice status", {
    Draft => "draft",
    Sent => "sent",
    Paid => "paid",
    Overdue => "overdue",
    Cancelled => "cancelled",
});
impl_text_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Paid => "paid",
    Cancelled => "cancelled",
});
impl_text_enum!(PaymentMethod, "payment method", {
    Cash => "cash",
    Check => "check",
    BankTransfer => "bank_transfer",
    CreditCard => "credit_card",
    Online => "online",
});
impl_text_enum!(Language, "language", {
    En => "en",
    Es => "es",
    Fr => "fr",
    De => "de",
});
impl_text_enum!(TokenKind, "token kind", {
    Access => "access",
    Refresh => "refresh",
});

//=========================================================================================
// Users
//=========================================================================================

// Represents a user - used throughout app
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// First and last name joined by a space, trimmed at both ends.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

// Only used internally for login/password checks - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub hashed_password: String,
}

/// Everything needed to insert a user row. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    pub hashed_password: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    pub is_active: Option<bool>,
}

/// Presentation preferences, one per user, created lazily.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: i64,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub timezone: String,
    pub language: Language,
    pub receive_email_notifications: bool,
    pub receive_sms_notifications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub timezone: Option<String>,
    pub language: Option<Language>,
    pub receive_email_notifications: Option<bool>,
    pub receive_sms_notifications: Option<bool>,
}

impl User {
    pub fn apply(mut self, patch: UserPatch) -> Self {
        if let Some(v) = patch.email {
            self.email = v;
        }
        if let Some(v) = patch.username {
            self.username = v;
        }
        if let Some(v) = patch.first_name {
            self.first_name = v;
        }
        if let Some(v) = patch.last_name {
            self.last_name = v;
        }
        if let Some(v) = patch.role {
            self.role = v;
        }
        if let Some(v) = patch.phone_number {
            self.phone_number = blank_to_none(v);
        }
        if let Some(v) = patch.company {
            self.company = blank_to_none(v);
        }
        if let Some(v) = patch.address {
            self.address = blank_to_none(v);
        }
        if let Some(v) = patch.is_active {
            self.is_active = v;
        }
        self
    }
}

impl UserProfile {
    /// The profile a user gets on first access.
    pub fn default_for(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            avatar: None,
            bio: None,
            website: None,
            timezone: "UTC".to_string(),
            language: Language::En,
            receive_email_notifications: true,
            receive_sms_notifications: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(mut self, patch: ProfilePatch) -> Self {
        if let Some(v) = patch.avatar {
            self.avatar = blank_to_none(v);
        }
        if let Some(v) = patch.bio {
            self.bio = blank_to_none(v);
        }
        if let Some(v) = patch.website {
            self.website = blank_to_none(v);
        }
        if let Some(v) = patch.timezone {
            self.timezone = v;
        }
        if let Some(v) = patch.language {
            self.language = v;
        }
        if let Some(v) = patch.receive_email_notifications {
            self.receive_email_notifications = v;
        }
        if let Some(v) = patch.receive_sms_notifications {
            self.receive_sms_notifications = v;
        }
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<SortOrder>,
}

//=========================================================================================
// Clients and contacts
//=========================================================================================

/// A billable party.
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub id: i64,
    pub name: String,
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
    pub tax_id: Option<String>,
    pub registration_number: Option<String>,
    pub payment_terms: i32,
    pub credit_limit: Decimal,
    pub currency: String,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Weak reference; cleared when the creating user is deleted.
    pub created_by: Option<i64>,
}

/// The writable fields of a client. `client_code` is deliberately absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientDraft {
    pub name: String,
    pub client_type: ClientType,
    pub email: String,
    pub phone_number: Option<String>,
    pub website: Option<String>,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub city: String,
    pub state_province: String,
    pub postal_code: String,
    pub country: String,
    pub tax_id: Option<String>,
    pub registration_number: Option<String>,
    pub payment_terms: i32,
    pub credit_limit: Decimal,
    pub currency: String,
    pub is_active: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientPatch {
    pub name: Option<String>,
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

impl Client {
    pub fn to_draft(&self) -> ClientDraft {
        ClientDraft {
            name: self.name.clone(),
            client_type: self.client_type,
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            website: self.website.clone(),
            address_line_1: self.address_line_1.clone(),
            address_line_2: self.address_line_2.clone(),
            city: self.city.clone(),
            state_province: self.state_province.clone(),
            postal_code: self.postal_code.clone(),
            country: self.country.clone(),
            tax_id: self.tax_id.clone(),
            registration_number: self.registration_number.clone(),
            payment_terms: self.payment_terms,
            credit_limit: self.credit_limit,
            currency: self.currency.clone(),
            is_active: self.is_active,
            notes: self.notes.clone(),
        }
    }
}

impl ClientDraft {
    /// Overlays every field present in `patch`. Empty strings clear optional fields.
    pub fn apply(mut self, patch: ClientPatch) -> Self {
        if let Some(v) = patch.name {
            self.name = v;
        }
        if let Some(v) = patch.client_type {
            self.client_type = v;
        }
        if let Some(v) = patch.email {
            self.email = v;
        }
        if let Some(v) = patch.phone_number {
            self.phone_number = blank_to_none(v);
        }
        if let Some(v) = patch.website {
            self.website = blank_to_none(v);
        }
        if let Some(v) = patch.address_line_1 {
            self.address_line_1 = v;
        }
        if let Some(v) = patch.address_line_2 {
            self.address_line_2 = blank_to_none(v);
        }
        if let Some(v) = patch.city {
            self.city = v;
        }
        if let Some(v) = patch.state_province {
            self.state_province = v;
        }
        if let Some(v) = patch.postal_code {
            self.postal_code = v;
        }
        if let Some(v) = patch.country {
            self.country = v;
        }
        if let Some(v) = patch.tax_id {
            self.tax_id = blank_to_none(v);
        }
        if let Some(v) = patch.registration_number {
            self.registration_number = blank_to_none(v);
        }
        if let Some(v) = patch.payment_terms {
            self.payment_terms = v;
        }
        if let Some(v) = patch.credit_limit {
            self.credit_limit = v;
        }
        if let Some(v) = patch.currency {
            self.currency = v;
        }
        if let Some(v) = patch.is_active {
            self.is_active = v;
        }
        if let Some(v) = patch.notes {
            self.notes = blank_to_none(v);
        }
        self
    }
}

/// A person associated with exactly one client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientContact {
    pub id: i64,
    pub client_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    pub email: String,
    pub phone_number: Option<String>,
    pub is_primary: bool,
    pub is_billing_contact: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactDraft {
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    pub email: String,
    pub phone_number: Option<String>,
    pub is_primary: bool,
    pub is_billing_contact: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContactPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub is_primary: Option<bool>,
    pub is_billing_contact: Option<bool>,
    pub notes: Option<String>,
}

impl ClientContact {
    pub fn to_draft(&self) -> ContactDraft {
        ContactDraft {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            title: self.title.clone(),
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            is_primary: self.is_primary,
            is_billing_contact: self.is_billing_contact,
            notes: self.notes.clone(),
        }
    }
}

impl ContactDraft {
    pub fn apply(mut self, patch: ContactPatch) -> Self {
        if let Some(v) = patch.first_name {
            self.first_name = v;
        }
        if let Some(v) = patch.last_name {
            self.last_name = v;
        }
        if let Some(v) = patch.title {
            self.title = blank_to_none(v);
        }
        if let Some(v) = patch.email {
            self.email = v;
        }
        if let Some(v) = patch.phone_number {
            self.phone_number = blank_to_none(v);
        }
        if let Some(v) = patch.is_primary {
            self.is_primary = v;
        }
        if let Some(v) = patch.is_billing_contact {
            self.is_billing_contact = v;
        }
        if let Some(v) = patch.notes {
            self.notes = blank_to_none(v);
        }
        self
    }
}

/// Condensed primary contact shown on client list rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimaryContactSummary {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// One row of the client list.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSummary {
    pub id: i64,
    pub name: String,
    pub client_code: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub city: String,
    pub country: String,
    pub is_active: bool,
    pub primary_contact: Option<PrimaryContactSummary>,
    pub total_invoices: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientStats {
    pub total_contacts: i64,
    pub primary_contacts: i64,
    pub billing_contacts: i64,
    pub total_invoices: i64,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub outstanding_amount: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct ClientFilter {
    pub client_type: Option<ClientType>,
    pub is_active: Option<bool>,
    pub country: Option<String>,
    pub currency: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<SortOrder>,
}

//=========================================================================================
// Invoices and payments
//=========================================================================================

/// A billing document for one client.
#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub id: i64,
    pub invoice_number: String,
    pub client_id: i64,
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

/// Writable invoice fields. Tax and total are derived from these.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceDraft {
    pub client_id: i64,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub notes: Option<String>,
    pub terms_and_conditions: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InvoicePatch {
    pub status: Option<InvoiceStatus>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Option<Decimal>,
    pub tax_rate: Option<Decimal>,
    pub notes: Option<String>,
    pub terms_and_conditions: Option<String>,
}

impl Invoice {
    pub fn to_draft(&self) -> InvoiceDraft {
        InvoiceDraft {
            client_id: self.client_id,
            status: self.status,
            issue_date: self.issue_date,
            due_date: self.due_date,
            subtotal: self.subtotal,
            tax_rate: self.tax_rate,
            notes: self.notes.clone(),
            terms_and_conditions: self.terms_and_conditions.clone(),
        }
    }
}

impl InvoiceDraft {
    pub fn apply(mut self, patch: InvoicePatch) -> Self {
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.issue_date {
            self.issue_date = v;
        }
        if let Some(v) = patch.due_date {
            self.due_date = v;
        }
        if let Some(v) = patch.subtotal {
            self.subtotal = v;
        }
        if let Some(v) = patch.tax_rate {
            self.tax_rate = v;
        }
        if let Some(v) = patch.notes {
            self.notes = blank_to_none(v);
        }
        if let Some(v) = patch.terms_and_conditions {
            self.terms_and_conditions = blank_to_none(v);
        }
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub client_id: Option<i64>,
    pub status: Option<InvoiceStatus>,
    pub ordering: Option<SortOrder>,
}

/// A recorded payment against one invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub invoice_id: i64,
    pub payment_reference: String,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDraft {
    pub invoice_id: i64,
    pub payment_reference: String,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentPatch {
    pub payment_reference: Option<String>,
    pub amount: Option<Decimal>,
    pub payment_date: Option<NaiveDate>,
    pub payment_method: Option<PaymentMethod>,
    pub status: Option<PaymentStatus>,
    pub notes: Option<String>,
}

impl Payment {
    pub fn to_draft(&self) -> PaymentDraft {
        PaymentDraft {
            invoice_id: self.invoice_id,
            payment_reference: self.payment_reference.clone(),
            amount: self.amount,
            payment_date: self.payment_date,
            payment_method: self.payment_method,
            status: self.status,
            notes: self.notes.clone(),
        }
    }
}

impl PaymentDraft {
    pub fn apply(mut self, patch: PaymentPatch) -> Self {
        if let Some(v) = patch.payment_reference {
            self.payment_reference = v;
        }
        if let Some(v) = patch.amount {
            self.amount = v;
        }
        if let Some(v) = patch.payment_date {
            self.payment_date = v;
        }
        if let Some(v) = patch.payment_method {
            self.payment_method = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.notes {
            self.notes = blank_to_none(v);
        }
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub invoice_id: Option<i64>,
    pub status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub ordering: Option<SortOrder>,
}

//=========================================================================================
// Paging and ordering
//=========================================================================================

pub const USER_ORDERING_FIELDS: &[&str] = &["created_at", "username", "email"];
pub const CLIENT_ORDERING_FIELDS: &[&str] = &["name", "created_at", "client_code"];
pub const INVOICE_ORDERING_FIELDS: &[&str] = &["issue_date", "due_date", "total_amount", "created_at"];
pub const PAYMENT_ORDERING_FIELDS: &[&str] = &["payment_date", "amount", "created_at"];

/// A sort key taken from a fixed list of column names. A leading `-` means descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub field: &'static str,
    pub descending: bool,
}

impl SortOrder {
    pub const NEWEST_FIRST: SortOrder = SortOrder {
        field: "created_at",
        descending: true,
    };

    /// Returns `None` when the field is not in `allowed`.
    pub fn parse(raw: &str, allowed: &[&'static str]) -> Option<SortOrder> {
        let (name, descending) = match raw.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (raw, false),
        };
        allowed
            .iter()
            .copied()
            .find(|f| *f == name)
            .map(|field| SortOrder { field, descending })
    }

    pub fn direction(&self) -> &'static str {
        if self.descending {
            "DESC"
        } else {
            "ASC"
        }
    }
}

/// A 1-based page request, already clamped by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    /// Rows to skip. Saturates rather than overflowing on absurd page numbers.
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.page_size.max(0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub count: i64,
    pub page: i64,
    pub page_size: i64,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            page: self.page,
            page_size: self.page_size,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

/// Empty or whitespace-only optional text is stored as absent.
pub fn blank_to_none(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_their_storage_names() {
        for role in [Role::Admin, Role::Accountant, Role::Client, Role::Viewer] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert_eq!(
            "bank_transfer".parse::<PaymentMethod>(),
            Ok(PaymentMethod::BankTransfer)
        );
        let err = "refunded".parse::<PaymentStatus>().unwrap_err();
        assert_eq!(err.to_string(), "'refunded' is not a valid payment status");
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&PaymentMethod::CreditCard).unwrap();
        assert_eq!(json, "\"credit_card\"");
        let status: InvoiceStatus = serde_json::from_str("\"overdue\"").unwrap();
        assert_eq!(status, InvoiceStatus::Overdue);
    }

    #[test]
    fn contact_patch_clears_optional_text_with_blank_string() {
        let draft = ContactDraft {
            first_name: "Ana".into(),
            last_name: "Lima".into(),
            title: Some("CFO".into()),
            email: "ana@example.com".into(),
            phone_number: None,
            is_primary: false,
            is_billing_contact: false,
            notes: None,
        };
        let patched = draft.apply(ContactPatch {
            title: Some("  ".into()),
            is_primary: Some(true),
            ..Default::default()
        });
        assert_eq!(patched.title, None);
        assert!(patched.is_primary);
        assert_eq!(patched.first_name, "Ana");
    }

    #[test]
    fn sort_order_accepts_only_listed_fields() {
        let order = SortOrder::parse("-name", CLIENT_ORDERING_FIELDS).unwrap();
        assert_eq!(order.field, "name");
        assert_eq!(order.direction(), "DESC");
        assert_eq!(
            SortOrder::parse("client_code", CLIENT_ORDERING_FIELDS).map(|o| o.descending),
            Some(false)
        );
        assert!(SortOrder::parse("password; DROP TABLE", CLIENT_ORDERING_FIELDS).is_none());
    }

    #[test]
    fn page_offset_is_one_based() {
        let req = PageRequest { page: 3, page_size: 20 };
        assert_eq!(req.offset(), 40);
        let first = PageRequest { page: 0, page_size: 20 };
        assert_eq!(first.offset(), 0);
        let last = PageRequest { page: i64::MAX, page_size: 100 };
        assert_eq!(last.offset(), i64::MAX);
    }
}
