//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Every operation that spans more than one row write runs inside a single
//! transaction: client code assignment (insert then finalize) and contact
//! primary exclusivity (lock the client row, clear other primaries, write).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use invoicing_core::domain::{
    Client, ClientContact, ClientDraft, ClientFilter, ClientStats, ClientSummary, ClientType,
    ContactDraft, Invoice, InvoiceDraft, InvoiceFilter, InvoiceStatus, Language, NewUser, Page,
    PageRequest, Payment, PaymentDraft, PaymentFilter, PaymentMethod, PaymentStatus,
    PrimaryContactSummary, Role, SortOrder, TokenKind, User, UserCredentials, UserFilter,
    UserProfile,
};
use invoicing_core::ports::{DatabaseService, PortError, PortResult};
use invoicing_core::rules;
use rust_decimal::Decimal;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArguments, PgTypeInfo, PgValueRef};
use sqlx::{query::QueryAs, Decode, FromRow, PgPool, Postgres, QueryBuilder, Type};
use std::str::FromStr;
use tracing::{info, warn};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Maps a `sqlx` error onto the port taxonomy. `what` names the missing record.
fn port_error(e: sqlx::Error, what: &str) -> PortError {
    match &e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} not found", what)),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => PortError::Conflict(unique_message(db.constraint()).to_string()),
            Some("23503") => PortError::Conflict(foreign_key_message(db.constraint()).to_string()),
            Some("23514") => PortError::Conflict(format!(
                "A value violates the check constraint {}.",
                db.constraint().unwrap_or("on this table")
            )),
            _ => PortError::Unexpected(e.to_string()),
        },
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn unique_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("users_email_key") => "A user with this email already exists.",
        Some("users_username_key") => "A user with this username already exists.",
        Some("clients_client_code_key") => "A client with this code already exists.",
        Some("uq_client_contacts_client_email") => {
            "A contact with this email already exists for this client."
        }
        Some("uq_client_contacts_one_primary") => "This client already has a primary contact.",
        Some("invoices_invoice_number_key") => "An invoice with this number already exists.",
        _ => "A record with these values already exists.",
    }
}

fn foreign_key_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("invoices_client_id_fkey") => "The client is referenced by invoices or does not exist.",
        Some("payments_invoice_id_fkey") => {
            "The invoice is referenced by payments or does not exist."
        }
        _ => "The record is referenced by, or refers to, a missing record.",
    }
}

/// Escapes LIKE metacharacters and wraps the term for a contains-match.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

/// A `VARCHAR` column holding one of the core enums in its snake_case form.
///
/// Decoding fails the row (and so the query) on an unknown value.
struct Stored<T>(T);

impl<T> Type<Postgres> for Stored<T> {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r, T> Decode<'r, Postgres> for Stored<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<'r, Postgres>>::decode(value)?;
        Ok(Stored(raw.parse()?))
    }
}

const USER_COLUMNS: &str = "id, email, username, first_name, last_name, role, phone_number, \
     company, address, is_active, is_superuser, created_at, updated_at";

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    email: String,
    username: String,
    first_name: String,
    last_name: String,
    role: Stored<Role>,
    phone_number: Option<String>,
    company: Option<String>,
    address: Option<String>,
    is_active: bool,
    is_superuser: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            email: self.email,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            role: self.role.0,
            phone_number: self.phone_number,
            company: self.company,
            address: self.address,
            is_active: self.is_active,
            is_superuser: self.is_superuser,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    #[sqlx(flatten)]
    user: UserRecord,
    hashed_password: String,
}

const PROFILE_COLUMNS: &str = "user_id, avatar, bio, website, timezone, language, \
     receive_email_notifications, receive_sms_notifications, created_at, updated_at";

#[derive(FromRow)]
struct ProfileRecord {
    user_id: i64,
    avatar: Option<String>,
    bio: Option<String>,
    website: Option<String>,
    timezone: String,
    language: Stored<Language>,
    receive_email_notifications: bool,
    receive_sms_notifications: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ProfileRecord {
    fn to_domain(self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            avatar: self.avatar,
            bio: self.bio,
            website: self.website,
            timezone: self.timezone,
            language: self.language.0,
            receive_email_notifications: self.receive_email_notifications,
            receive_sms_notifications: self.receive_sms_notifications,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const CLIENT_COLUMNS: &str = "id, name, client_type, client_code, email, phone_number, website, \
     address_line_1, address_line_2, city, state_province, postal_code, country, tax_id, \
     registration_number, payment_terms, credit_limit, currency, is_active, notes, created_at, \
     updated_at, created_by";

#[derive(FromRow)]
struct ClientRecord {
    id: i64,
    name: String,
    client_type: Stored<ClientType>,
    client_code: String,
    email: String,
    phone_number: Option<String>,
    website: Option<String>,
    address_line_1: String,
    address_line_2: Option<String>,
    city: String,
    state_province: String,
    postal_code: String,
    country: String,
    tax_id: Option<String>,
    registration_number: Option<String>,
    payment_terms: i32,
    credit_limit: Decimal,
    currency: String,
    is_active: bool,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    created_by: Option<i64>,
}
impl ClientRecord {
    fn to_domain(self) -> Client {
        Client {
            id: self.id,
            name: self.name,
            client_type: self.client_type.0,
            client_code: self.client_code,
            email: self.email,
            phone_number: self.phone_number,
            website: self.website,
            address_line_1: self.address_line_1,
            address_line_2: self.address_line_2,
            city: self.city,
            state_province: self.state_province,
            postal_code: self.postal_code,
            country: self.country,
            tax_id: self.tax_id,
            registration_number: self.registration_number,
            payment_terms: self.payment_terms,
            credit_limit: self.credit_limit,
            currency: self.currency,
            is_active: self.is_active,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
            created_by: self.created_by,
        }
    }
}

#[derive(FromRow)]
struct ClientSummaryRecord {
    id: i64,
    name: String,
    client_code: String,
    email: String,
    phone_number: Option<String>,
    city: String,
    country: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    total_invoices: i64,
    pc_first_name: Option<String>,
    pc_last_name: Option<String>,
    pc_email: Option<String>,
    pc_phone: Option<String>,
}
impl ClientSummaryRecord {
    fn to_domain(self) -> ClientSummary {
        let primary_contact = match (self.pc_first_name, self.pc_last_name, self.pc_email) {
            (Some(first), Some(last), Some(email)) => Some(PrimaryContactSummary {
                name: format!("{} {}", first, last),
                email,
                phone: self.pc_phone,
            }),
            _ => None,
        };
        ClientSummary {
            id: self.id,
            name: self.name,
            client_code: self.client_code,
            email: self.email,
            phone_number: self.phone_number,
            city: self.city,
            country: self.country,
            is_active: self.is_active,
            primary_contact,
            total_invoices: self.total_invoices,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ClientStatsRecord {
    total_contacts: i64,
    primary_contacts: i64,
    billing_contacts: i64,
    total_invoices: i64,
    total_amount: Decimal,
    paid_amount: Decimal,
}

const CONTACT_COLUMNS: &str = "id, client_id, first_name, last_name, title, email, phone_number, \
     is_primary, is_billing_contact, notes, created_at, updated_at";

#[derive(FromRow)]
struct ContactRecord {
    id: i64,
    client_id: i64,
    first_name: String,
    last_name: String,
    title: Option<String>,
    email: String,
    phone_number: Option<String>,
    is_primary: bool,
    is_billing_contact: bool,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ContactRecord {
    fn to_domain(self) -> ClientContact {
        ClientContact {
            id: self.id,
            client_id: self.client_id,
            first_name: self.first_name,
            last_name: self.last_name,
            title: self.title,
            email: self.email,
            phone_number: self.phone_number,
            is_primary: self.is_primary,
            is_billing_contact: self.is_billing_contact,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const INVOICE_COLUMNS: &str = "id, invoice_number, client_id, status, issue_date, due_date, \
     subtotal, tax_rate, tax_amount, total_amount, notes, terms_and_conditions, created_at, \
     updated_at, created_by";

#[derive(FromRow)]
struct InvoiceRecord {
    id: i64,
    invoice_number: String,
    client_id: i64,
    status: Stored<InvoiceStatus>,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    subtotal: Decimal,
    tax_rate: Decimal,
    tax_amount: Decimal,
    total_amount: Decimal,
    notes: Option<String>,
    terms_and_conditions: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    created_by: Option<i64>,
}
impl InvoiceRecord {
    fn to_domain(self) -> Invoice {
        Invoice {
            id: self.id,
            invoice_number: self.invoice_number,
            client_id: self.client_id,
            status: self.status.0,
            issue_date: self.issue_date,
            due_date: self.due_date,
            subtotal: self.subtotal,
            tax_rate: self.tax_rate,
            tax_amount: self.tax_amount,
            total_amount: self.total_amount,
            notes: self.notes,
            terms_and_conditions: self.terms_and_conditions,
            created_at: self.created_at,
            updated_at: self.updated_at,
            created_by: self.created_by,
        }
    }
}

const PAYMENT_COLUMNS: &str = "id, invoice_id, payment_reference, amount, payment_date, \
     payment_method, status, notes, created_at, updated_at, created_by";

#[derive(FromRow)]
struct PaymentRecord {
    id: i64,
    invoice_id: i64,
    payment_reference: String,
    amount: Decimal,
    payment_date: NaiveDate,
    payment_method: Stored<PaymentMethod>,
    status: Stored<PaymentStatus>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    created_by: Option<i64>,
}
impl PaymentRecord {
    fn to_domain(self) -> Payment {
        Payment {
            id: self.id,
            invoice_id: self.invoice_id,
            payment_method: self.payment_method.0,
            status: self.status.0,
            payment_reference: self.payment_reference,
            amount: self.amount,
            payment_date: self.payment_date,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
            created_by: self.created_by,
        }
    }
}

//=========================================================================================
// Bind Helpers
//=========================================================================================

type PgQueryAs<'q, O> = QueryAs<'q, Postgres, O, PgArguments>;

/// Binds the 18 writable client columns in declaration order.
fn bind_client<'q, O>(query: PgQueryAs<'q, O>, draft: ClientDraft) -> PgQueryAs<'q, O> {
    query
        .bind(draft.name)
        .bind(draft.client_type.as_str())
        .bind(draft.email)
        .bind(draft.phone_number)
        .bind(draft.website)
        .bind(draft.address_line_1)
        .bind(draft.address_line_2)
        .bind(draft.city)
        .bind(draft.state_province)
        .bind(draft.postal_code)
        .bind(draft.country)
        .bind(draft.tax_id)
        .bind(draft.registration_number)
        .bind(draft.payment_terms)
        .bind(draft.credit_limit)
        .bind(draft.currency)
        .bind(draft.is_active)
        .bind(draft.notes)
}

/// Binds the 8 writable contact columns in declaration order.
fn bind_contact<'q, O>(query: PgQueryAs<'q, O>, draft: ContactDraft) -> PgQueryAs<'q, O> {
    query
        .bind(draft.first_name)
        .bind(draft.last_name)
        .bind(draft.title)
        .bind(draft.email)
        .bind(draft.phone_number)
        .bind(draft.is_primary)
        .bind(draft.is_billing_contact)
        .bind(draft.notes)
}

/// Binds the 9 stored invoice columns derived from a draft.
fn bind_invoice<'q, O>(
    query: PgQueryAs<'q, O>,
    draft: InvoiceDraft,
) -> PortResult<PgQueryAs<'q, O>> {
    let (tax_amount, total_amount) = draft.totals()?;
    Ok(query
        .bind(draft.status.as_str())
        .bind(draft.issue_date)
        .bind(draft.due_date)
        .bind(draft.subtotal)
        .bind(draft.tax_rate)
        .bind(tax_amount)
        .bind(total_amount)
        .bind(draft.notes)
        .bind(draft.terms_and_conditions))
}

/// Binds the 6 writable payment columns (the invoice is bound separately).
fn bind_payment<'q, O>(query: PgQueryAs<'q, O>, draft: PaymentDraft) -> PgQueryAs<'q, O> {
    query
        .bind(draft.payment_reference)
        .bind(draft.amount)
        .bind(draft.payment_date)
        .bind(draft.payment_method.as_str())
        .bind(draft.status.as_str())
        .bind(draft.notes)
}

//=========================================================================================
// Dynamic List Filters
//=========================================================================================

fn push_user_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(is_active);
    }
    if let Some(term) = filter.search.as_deref().filter(|t| !t.trim().is_empty()) {
        let pattern = like_pattern(term.trim());
        qb.push(" AND (username ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_client_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &ClientFilter) {
    if let Some(client_type) = filter.client_type {
        qb.push(" AND c.client_type = ").push_bind(client_type.as_str());
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND c.is_active = ").push_bind(is_active);
    }
    if let Some(country) = filter.country.clone() {
        qb.push(" AND c.country = ").push_bind(country);
    }
    if let Some(currency) = filter.currency.clone() {
        qb.push(" AND c.currency = ").push_bind(currency);
    }
    if let Some(term) = filter.search.as_deref().filter(|t| !t.trim().is_empty()) {
        let pattern = like_pattern(term.trim());
        qb.push(" AND (c.name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.client_code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.city ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_invoice_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &InvoiceFilter) {
    if let Some(client_id) = filter.client_id {
        qb.push(" AND client_id = ").push_bind(client_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
}

fn push_payment_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &PaymentFilter) {
    if let Some(invoice_id) = filter.invoice_id {
        qb.push(" AND invoice_id = ").push_bind(invoice_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(method) = filter.payment_method {
        qb.push(" AND payment_method = ").push_bind(method.as_str());
    }
}

/// Appends ORDER BY (with an id tie-break) and the page window.
fn push_order_and_page(
    qb: &mut QueryBuilder<'_, Postgres>,
    prefix: &str,
    order: Option<SortOrder>,
    page: PageRequest,
) {
    // Field names come from the fixed lists in the domain, never from the request.
    let order = order.unwrap_or(SortOrder::NEWEST_FIRST);
    qb.push(format!(
        " ORDER BY {prefix}{} {}, {prefix}id {}",
        order.field,
        order.direction(),
        order.direction()
    ));
    qb.push(" LIMIT ")
        .push_bind(page.page_size)
        .push(" OFFSET ")
        .push_bind(page.offset());
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

impl DbAdapter {
    /// Locks the client row so contact writes for that client are serialized.
    async fn lock_client(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        client_id: i64,
    ) -> PortResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM clients WHERE id = $1 FOR UPDATE")
            .bind(client_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(unexpected)?
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound("Client not found".to_string()))
    }

    /// Demotes every primary contact of the client except `keep_id`.
    async fn clear_other_primaries(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        client_id: i64,
        keep_id: Option<i64>,
    ) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE client_contacts SET is_primary = FALSE, updated_at = NOW() \
             WHERE client_id = $1 AND is_primary AND ($2::BIGINT IS NULL OR id <> $2)",
        )
        .bind(client_id)
        .bind(keep_id)
        .execute(&mut **tx)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DatabaseService for DbAdapter {
    // --- User Management ---

    async fn create_user(&self, user: NewUser) -> PortResult<User> {
        let sql = format!(
            "INSERT INTO users (email, username, first_name, last_name, role, phone_number, \
             company, address, hashed_password) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {USER_COLUMNS}"
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user.email)
            .bind(user.username)
            .bind(user.first_name)
            .bind(user.last_name)
            .bind(user.role.as_str())
            .bind(user.phone_number)
            .bind(user.company)
            .bind(user.address)
            .bind(user.hashed_password)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "User"))?;
        Ok(record.to_domain())
    }

    async fn get_user(&self, user_id: i64) -> PortResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "User"))?;
        Ok(record.to_domain())
    }

    async fn get_user_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let sql = format!(
            "SELECT {USER_COLUMNS}, hashed_password FROM users WHERE lower(email) = lower($1)"
        );
        let record = sqlx::query_as::<_, CredentialsRecord>(&sql)
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "User"))?;
        Ok(UserCredentials {
            user: record.user.to_domain(),
            hashed_password: record.hashed_password,
        })
    }

    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> PortResult<Page<User>> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users WHERE TRUE");
        push_user_filters(&mut count_qb, filter);
        let count = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {USER_COLUMNS} FROM users WHERE TRUE"
        ));
        push_user_filters(&mut qb, filter);
        push_order_and_page(&mut qb, "", filter.ordering, page);
        let records = qb
            .build_query_as::<UserRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(Page {
            count,
            page: page.page,
            page_size: page.page_size,
            results: records.into_iter().map(UserRecord::to_domain).collect(),
        })
    }

    async fn update_user(&self, user: &User) -> PortResult<User> {
        let sql = format!(
            "UPDATE users SET email = $1, username = $2, first_name = $3, last_name = $4, \
             role = $5, phone_number = $6, company = $7, address = $8, is_active = $9, \
             updated_at = NOW() WHERE id = $10 RETURNING {USER_COLUMNS}"
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(&user.email)
            .bind(&user.username)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.role.as_str())
            .bind(&user.phone_number)
            .bind(&user.company)
            .bind(&user.address)
            .bind(user.is_active)
            .bind(user.id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "User"))?;
        Ok(record.to_domain())
    }

    async fn set_password(&self, user_id: i64, hashed_password: &str) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE users SET hashed_password = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(hashed_password)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound("User not found".to_string()));
        }
        Ok(())
    }

    async fn delete_user(&self, user_id: i64) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| port_error(e, "User"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound("User not found".to_string()));
        }
        Ok(())
    }

    // --- Profiles ---

    async fn get_or_create_profile(&self, user_id: i64) -> PortResult<UserProfile> {
        sqlx::query(
            "INSERT INTO user_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| port_error(e, "User"))?;

        let sql = format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = $1");
        let record = sqlx::query_as::<_, ProfileRecord>(&sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Profile"))?;
        Ok(record.to_domain())
    }

    async fn update_profile(&self, profile: &UserProfile) -> PortResult<UserProfile> {
        let sql = format!(
            "UPDATE user_profiles SET avatar = $1, bio = $2, website = $3, timezone = $4, \
             language = $5, receive_email_notifications = $6, receive_sms_notifications = $7, \
             updated_at = NOW() WHERE user_id = $8 RETURNING {PROFILE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, ProfileRecord>(&sql)
            .bind(&profile.avatar)
            .bind(&profile.bio)
            .bind(&profile.website)
            .bind(&profile.timezone)
            .bind(profile.language.as_str())
            .bind(profile.receive_email_notifications)
            .bind(profile.receive_sms_notifications)
            .bind(profile.user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Profile"))?;
        Ok(record.to_domain())
    }

    // --- Auth Tokens ---

    async fn create_auth_token(
        &self,
        token: &str,
        user_id: i64,
        kind: TokenKind,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO auth_tokens (token, user_id, kind, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(token)
        .bind(user_id)
        .bind(kind.as_str())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_token(&self, token: &str, kind: TokenKind) -> PortResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM auth_tokens WHERE token = $1 AND kind = $2 \
             AND revoked_at IS NULL AND expires_at > NOW()",
        )
        .bind(token)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or(PortError::Unauthorized)
    }

    async fn revoke_auth_token(&self, token: &str) -> PortResult<()> {
        sqlx::query(
            "UPDATE auth_tokens SET revoked_at = NOW() WHERE token = $1 AND revoked_at IS NULL",
        )
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn revoke_user_tokens(&self, user_id: i64) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE auth_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected())
    }

    // --- Clients ---

    async fn create_client(&self, draft: ClientDraft, created_by: Option<i64>) -> PortResult<Client> {
        // Concurrent creations with the same initials queue on the placeholder's
        // unique index entry until the first transaction commits its final code.
        let placeholder = rules::placeholder_code(&draft.name);
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let insert = format!(
            "INSERT INTO clients (name, client_type, email, phone_number, website, \
             address_line_1, address_line_2, city, state_province, postal_code, country, \
             tax_id, registration_number, payment_terms, credit_limit, currency, is_active, \
             notes, client_code, created_by) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
             $11, $12, $13, $14, $15, $16, $17, $18, $19, $20) RETURNING {CLIENT_COLUMNS}"
        );
        let inserted = bind_client(sqlx::query_as::<_, ClientRecord>(&insert), draft)
            .bind(&placeholder)
            .bind(created_by)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| port_error(e, "Client"))?;

        let code = rules::finalize_code(&inserted.client_code, inserted.id);
        let finalize = format!(
            "UPDATE clients SET client_code = $1 WHERE id = $2 RETURNING {CLIENT_COLUMNS}"
        );
        let record = sqlx::query_as::<_, ClientRecord>(&finalize)
            .bind(&code)
            .bind(inserted.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| port_error(e, "Client"))?;

        tx.commit().await.map_err(unexpected)?;
        info!("Created client {} with code {}", record.id, record.client_code);
        Ok(record.to_domain())
    }

    async fn get_client(&self, client_id: i64) -> PortResult<Client> {
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1");
        let record = sqlx::query_as::<_, ClientRecord>(&sql)
            .bind(client_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Client"))?;
        Ok(record.to_domain())
    }

    async fn list_clients(
        &self,
        filter: &ClientFilter,
        page: PageRequest,
    ) -> PortResult<Page<ClientSummary>> {
        let mut count_qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM clients c WHERE TRUE");
        push_client_filters(&mut count_qb, filter);
        let count = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT c.id, c.name, c.client_code, c.email, c.phone_number, c.city, c.country, \
             c.is_active, c.created_at, \
             (SELECT COUNT(*) FROM invoices i WHERE i.client_id = c.id) AS total_invoices, \
             p.first_name AS pc_first_name, p.last_name AS pc_last_name, \
             p.email AS pc_email, p.phone_number AS pc_phone \
             FROM clients c \
             LEFT JOIN LATERAL (SELECT cc.first_name, cc.last_name, cc.email, cc.phone_number \
                 FROM client_contacts cc WHERE cc.client_id = c.id AND cc.is_primary \
                 ORDER BY cc.id LIMIT 1) p ON TRUE \
             WHERE TRUE",
        );
        push_client_filters(&mut qb, filter);
        push_order_and_page(&mut qb, "c.", filter.ordering, page);
        let records = qb
            .build_query_as::<ClientSummaryRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(Page {
            count,
            page: page.page,
            page_size: page.page_size,
            results: records.into_iter().map(|r| r.to_domain()).collect(),
        })
    }

    async fn update_client(&self, client_id: i64, draft: ClientDraft) -> PortResult<Client> {
        let sql = format!(
            "UPDATE clients SET name = $1, client_type = $2, email = $3, phone_number = $4, \
             website = $5, address_line_1 = $6, address_line_2 = $7, city = $8, \
             state_province = $9, postal_code = $10, country = $11, tax_id = $12, \
             registration_number = $13, payment_terms = $14, credit_limit = $15, \
             currency = $16, is_active = $17, notes = $18, updated_at = NOW() \
             WHERE id = $19 RETURNING {CLIENT_COLUMNS}"
        );
        let record = bind_client(sqlx::query_as::<_, ClientRecord>(&sql), draft)
            .bind(client_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Client"))?;
        Ok(record.to_domain())
    }

    async fn set_client_active(&self, client_id: i64, is_active: bool) -> PortResult<Client> {
        let sql = format!(
            "UPDATE clients SET is_active = $1, updated_at = NOW() WHERE id = $2 \
             RETURNING {CLIENT_COLUMNS}"
        );
        let record = sqlx::query_as::<_, ClientRecord>(&sql)
            .bind(is_active)
            .bind(client_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Client"))?;
        Ok(record.to_domain())
    }

    async fn client_stats(&self, client_id: i64) -> PortResult<ClientStats> {
        self.get_client(client_id).await?;
        let record = sqlx::query_as::<_, ClientStatsRecord>(
            "SELECT \
             (SELECT COUNT(*) FROM client_contacts WHERE client_id = $1) AS total_contacts, \
             (SELECT COUNT(*) FROM client_contacts WHERE client_id = $1 AND is_primary) \
                 AS primary_contacts, \
             (SELECT COUNT(*) FROM client_contacts WHERE client_id = $1 AND is_billing_contact) \
                 AS billing_contacts, \
             (SELECT COUNT(*) FROM invoices WHERE client_id = $1) AS total_invoices, \
             (SELECT COALESCE(SUM(total_amount), 0) FROM invoices \
                 WHERE client_id = $1 AND status <> 'cancelled') AS total_amount, \
             (SELECT COALESCE(SUM(p.amount), 0) FROM payments p \
                 JOIN invoices i ON i.id = p.invoice_id \
                 WHERE i.client_id = $1 AND i.status <> 'cancelled' AND p.status = 'paid') \
                 AS paid_amount",
        )
        .bind(client_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(ClientStats {
            total_contacts: record.total_contacts,
            primary_contacts: record.primary_contacts,
            billing_contacts: record.billing_contacts,
            total_invoices: record.total_invoices,
            total_amount: record.total_amount,
            paid_amount: record.paid_amount,
            outstanding_amount: record.total_amount - record.paid_amount,
        })
    }

    async fn repair_placeholder_codes(&self) -> PortResult<u64> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let pending = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, client_code FROM clients WHERE client_code LIKE $1 FOR UPDATE",
        )
        .bind(format!("%{}", rules::PLACEHOLDER_SUFFIX))
        .fetch_all(&mut *tx)
        .await
        .map_err(unexpected)?;

        let mut repaired = 0;
        for (id, code) in pending {
            let final_code = rules::finalize_code(&code, id);
            warn!("Finalizing placeholder client code {} -> {}", code, final_code);
            sqlx::query("UPDATE clients SET client_code = $1 WHERE id = $2")
                .bind(&final_code)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| port_error(e, "Client"))?;
            repaired += 1;
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(repaired)
    }

    // --- Client Contacts ---

    async fn list_contacts(&self, client_id: i64) -> PortResult<Vec<ClientContact>> {
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM client_contacts WHERE client_id = $1 \
             ORDER BY is_primary DESC, last_name ASC, first_name ASC"
        );
        let records = sqlx::query_as::<_, ContactRecord>(&sql)
            .bind(client_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_contact(&self, client_id: i64, contact_id: i64) -> PortResult<ClientContact> {
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM client_contacts WHERE id = $1 AND client_id = $2"
        );
        let record = sqlx::query_as::<_, ContactRecord>(&sql)
            .bind(contact_id)
            .bind(client_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Contact"))?;
        Ok(record.to_domain())
    }

    async fn create_contact(&self, client_id: i64, draft: ContactDraft) -> PortResult<ClientContact> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        Self::lock_client(&mut tx, client_id).await?;
        if draft.is_primary {
            Self::clear_other_primaries(&mut tx, client_id, None).await?;
        }

        let sql = format!(
            "INSERT INTO client_contacts (first_name, last_name, title, email, phone_number, \
             is_primary, is_billing_contact, notes, client_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {CONTACT_COLUMNS}"
        );
        let record = bind_contact(sqlx::query_as::<_, ContactRecord>(&sql), draft)
            .bind(client_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| port_error(e, "Contact"))?;

        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn update_contact(
        &self,
        client_id: i64,
        contact_id: i64,
        draft: ContactDraft,
    ) -> PortResult<ClientContact> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        Self::lock_client(&mut tx, client_id).await?;
        if draft.is_primary {
            Self::clear_other_primaries(&mut tx, client_id, Some(contact_id)).await?;
        }

        let sql = format!(
            "UPDATE client_contacts SET first_name = $1, last_name = $2, title = $3, \
             email = $4, phone_number = $5, is_primary = $6, is_billing_contact = $7, \
             notes = $8, updated_at = NOW() WHERE id = $9 AND client_id = $10 \
             RETURNING {CONTACT_COLUMNS}"
        );
        let record = bind_contact(sqlx::query_as::<_, ContactRecord>(&sql), draft)
            .bind(contact_id)
            .bind(client_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| port_error(e, "Contact"))?;

        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn delete_contact(&self, client_id: i64, contact_id: i64) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM client_contacts WHERE id = $1 AND client_id = $2")
            .bind(contact_id)
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound("Contact not found".to_string()));
        }
        Ok(())
    }

    // --- Invoices ---

    async fn create_invoice(
        &self,
        invoice_number: &str,
        draft: InvoiceDraft,
        created_by: Option<i64>,
    ) -> PortResult<Invoice> {
        let client_id = draft.client_id;
        let sql = format!(
            "INSERT INTO invoices (status, issue_date, due_date, subtotal, tax_rate, tax_amount, \
             total_amount, notes, terms_and_conditions, invoice_number, client_id, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {INVOICE_COLUMNS}"
        );
        let record = bind_invoice(sqlx::query_as::<_, InvoiceRecord>(&sql), draft)?
            .bind(invoice_number)
            .bind(client_id)
            .bind(created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Invoice"))?;
        Ok(record.to_domain())
    }

    async fn get_invoice(&self, invoice_id: i64) -> PortResult<Invoice> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1");
        let record = sqlx::query_as::<_, InvoiceRecord>(&sql)
            .bind(invoice_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Invoice"))?;
        Ok(record.to_domain())
    }

    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
        page: PageRequest,
    ) -> PortResult<Page<Invoice>> {
        let mut count_qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM invoices WHERE TRUE");
        push_invoice_filters(&mut count_qb, filter);
        let count = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE TRUE"
        ));
        push_invoice_filters(&mut qb, filter);
        push_order_and_page(&mut qb, "", filter.ordering, page);
        let records = qb
            .build_query_as::<InvoiceRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(Page {
            count,
            page: page.page,
            page_size: page.page_size,
            results: records.into_iter().map(InvoiceRecord::to_domain).collect(),
        })
    }

    async fn update_invoice(&self, invoice_id: i64, draft: InvoiceDraft) -> PortResult<Invoice> {
        let sql = format!(
            "UPDATE invoices SET status = $1, issue_date = $2, due_date = $3, subtotal = $4, \
             tax_rate = $5, tax_amount = $6, total_amount = $7, notes = $8, \
             terms_and_conditions = $9, updated_at = NOW() WHERE id = $10 \
             RETURNING {INVOICE_COLUMNS}"
        );
        let record = bind_invoice(sqlx::query_as::<_, InvoiceRecord>(&sql), draft)?
            .bind(invoice_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Invoice"))?;
        Ok(record.to_domain())
    }

    async fn delete_invoice(&self, invoice_id: i64) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let payments = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM payments WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;
        if payments > 0 {
            return Err(PortError::Conflict(
                "Invoice has recorded payments and cannot be deleted.".to_string(),
            ));
        }

        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| port_error(e, "Invoice"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound("Invoice not found".to_string()));
        }
        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    // --- Payments ---

    async fn create_payment(&self, draft: PaymentDraft, created_by: Option<i64>) -> PortResult<Payment> {
        let invoice_id = draft.invoice_id;
        let sql = format!(
            "INSERT INTO payments (payment_reference, amount, payment_date, payment_method, \
             status, notes, invoice_id, created_by) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {PAYMENT_COLUMNS}"
        );
        let record = bind_payment(sqlx::query_as::<_, PaymentRecord>(&sql), draft)
            .bind(invoice_id)
            .bind(created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Payment"))?;
        Ok(record.to_domain())
    }

    async fn get_payment(&self, payment_id: i64) -> PortResult<Payment> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let record = sqlx::query_as::<_, PaymentRecord>(&sql)
            .bind(payment_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Payment"))?;
        Ok(record.to_domain())
    }

    async fn list_payments(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
    ) -> PortResult<Page<Payment>> {
        let mut count_qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM payments WHERE TRUE");
        push_payment_filters(&mut count_qb, filter);
        let count = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE TRUE"
        ));
        push_payment_filters(&mut qb, filter);
        push_order_and_page(&mut qb, "", filter.ordering, page);
        let records = qb
            .build_query_as::<PaymentRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(Page {
            count,
            page: page.page,
            page_size: page.page_size,
            results: records.into_iter().map(PaymentRecord::to_domain).collect(),
        })
    }

    async fn update_payment(&self, payment_id: i64, draft: PaymentDraft) -> PortResult<Payment> {
        let sql = format!(
            "UPDATE payments SET payment_reference = $1, amount = $2, payment_date = $3, \
             payment_method = $4, status = $5, notes = $6, updated_at = NOW() WHERE id = $7 \
             RETURNING {PAYMENT_COLUMNS}"
        );
        let record = bind_payment(sqlx::query_as::<_, PaymentRecord>(&sql), draft)
            .bind(payment_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, "Payment"))?;
        Ok(record.to_domain())
    }

    async fn delete_payment(&self, payment_id: i64) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM payments WHERE id = $1")
            .bind(payment_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound("Payment not found".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_pattern("acme"), "%acme%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn constraint_names_map_to_readable_conflicts() {
        assert_eq!(
            unique_message(Some("uq_client_contacts_client_email")),
            "A contact with this email already exists for this client."
        );
        assert_eq!(
            unique_message(Some("something_else")),
            "A record with these values already exists."
        );
        assert_eq!(
            foreign_key_message(Some("payments_invoice_id_fkey")),
            "The invoice is referenced by payments or does not exist."
        );
    }

    #[test]
    fn order_clause_uses_the_whitelisted_field_and_pages() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT id FROM clients c WHERE TRUE");
        let order = SortOrder::parse("-name", invoicing_core::domain::CLIENT_ORDERING_FIELDS);
        push_order_and_page(&mut qb, "c.", order, PageRequest { page: 2, page_size: 10 });
        assert_eq!(
            qb.sql(),
            "SELECT id FROM clients c WHERE TRUE ORDER BY c.name DESC, c.id DESC LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn default_order_is_newest_first() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT id FROM invoices WHERE TRUE");
        push_order_and_page(&mut qb, "", None, PageRequest { page: 1, page_size: 20 });
        assert!(qb.sql().contains("ORDER BY created_at DESC, id DESC"));
    }
}
