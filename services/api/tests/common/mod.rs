//! Shared fixtures for the HTTP-level tests: an in-memory `DatabaseService`
//! that applies the same rules as the Postgres adapter, a server spawned on an
//! ephemeral port, and a minimal raw HTTP/1.1 client.
#![allow(dead_code)]

use api_lib::config::Config;
use api_lib::web::{build_router, AppState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use invoicing_core::domain::SortOrder;
use invoicing_core::ports::{DatabaseService, PortError, PortResult};
use invoicing_core::{
    rules, Client, ClientContact, ClientDraft, ClientFilter, ClientStats, ClientSummary,
    ContactDraft, Invoice, InvoiceDraft, InvoiceFilter, InvoiceStatus, NewUser, Page, PageRequest,
    Payment, PaymentDraft, PaymentFilter, PaymentStatus, Role, TokenKind, User, UserCredentials,
    UserFilter, UserProfile,
};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

//=========================================================================================
// In-memory store
//=========================================================================================

struct TokenRow {
    user_id: i64,
    kind: TokenKind,
    expires_at: DateTime<Utc>,
    revoked: bool,
}

#[derive(Default)]
struct Tables {
    last_id: i64,
    users: BTreeMap<i64, (User, String)>,
    profiles: HashMap<i64, UserProfile>,
    tokens: HashMap<String, TokenRow>,
    clients: BTreeMap<i64, Client>,
    contacts: BTreeMap<i64, ClientContact>,
    invoices: BTreeMap<i64, Invoice>,
    payments: BTreeMap<i64, Payment>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Default)]
pub struct MemoryDb {
    tables: Mutex<Tables>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes a role directly, standing in for an administrator's console.
    pub async fn set_role(&self, user_id: i64, role: Role) {
        let mut t = self.tables.lock().await;
        if let Some((user, _)) = t.users.get_mut(&user_id) {
            user.role = role;
        }
    }

    /// Inserts a client whose code was never finalized.
    pub async fn insert_unfinalized_client(&self, draft: ClientDraft) -> i64 {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        let client = client_from_draft(id, rules::placeholder_code(&draft.name), draft, None);
        t.clients.insert(id, client);
        id
    }

    pub async fn client_code(&self, client_id: i64) -> Option<String> {
        let t = self.tables.lock().await;
        t.clients.get(&client_id).map(|c| c.client_code.clone())
    }
}

fn not_found(what: &str) -> PortError {
    PortError::NotFound(format!("{} not found", what))
}

fn conflict(message: &str) -> PortError {
    PortError::Conflict(message.to_string())
}

fn client_from_draft(id: i64, code: String, d: ClientDraft, created_by: Option<i64>) -> Client {
    let now = Utc::now();
    Client {
        id,
        name: d.name,
        client_type: d.client_type,
        client_code: code,
        email: d.email,
        phone_number: d.phone_number,
        website: d.website,
        address_line_1: d.address_line_1,
        address_line_2: d.address_line_2,
        city: d.city,
        state_province: d.state_province,
        postal_code: d.postal_code,
        country: d.country,
        tax_id: d.tax_id,
        registration_number: d.registration_number,
        payment_terms: d.payment_terms,
        credit_limit: d.credit_limit,
        currency: d.currency,
        is_active: d.is_active,
        notes: d.notes,
        created_at: now,
        updated_at: now,
        created_by,
    }
}

fn contact_from_draft(id: i64, client_id: i64, d: ContactDraft, created_at: DateTime<Utc>) -> ClientContact {
    ClientContact {
        id,
        client_id,
        first_name: d.first_name,
        last_name: d.last_name,
        title: d.title,
        email: d.email,
        phone_number: d.phone_number,
        is_primary: d.is_primary,
        is_billing_contact: d.is_billing_contact,
        notes: d.notes,
        created_at,
        updated_at: Utc::now(),
    }
}

/// A sortable column value.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum Key {
    Text(String),
    Time(DateTime<Utc>),
    Date(chrono::NaiveDate),
    Money(Decimal),
}

fn paginate<T>(
    mut rows: Vec<T>,
    order: Option<SortOrder>,
    key: impl Fn(&T, &str) -> Key,
    id: impl Fn(&T) -> i64,
    page: PageRequest,
) -> Page<T> {
    let order = order.unwrap_or(SortOrder::NEWEST_FIRST);
    rows.sort_by(|a, b| {
        let ord = key(a, order.field)
            .cmp(&key(b, order.field))
            .then_with(|| id(a).cmp(&id(b)));
        if order.descending {
            ord.reverse()
        } else {
            ord
        }
    });
    let count = rows.len() as i64;
    let results = rows
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.page_size as usize)
        .collect();
    Page {
        count,
        page: page.page,
        page_size: page.page_size,
        results,
    }
}

fn matches(term: &Option<String>, fields: &[&String]) -> bool {
    match term.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        None => true,
        Some(t) => {
            let t = t.to_lowercase();
            fields.iter().any(|f| f.to_lowercase().contains(&t))
        }
    }
}

#[async_trait]
impl DatabaseService for MemoryDb {
    async fn create_user(&self, user: NewUser) -> PortResult<User> {
        let mut t = self.tables.lock().await;
        if t.users.values().any(|(u, _)| u.email == user.email) {
            return Err(conflict("A user with this email already exists."));
        }
        if t.users.values().any(|(u, _)| u.username == user.username) {
            return Err(conflict("A user with this username already exists."));
        }
        let id = t.next_id();
        let now = Utc::now();
        let created = User {
            id,
            email: user.email,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            phone_number: user.phone_number,
            company: user.company,
            address: user.address,
            is_active: true,
            is_superuser: false,
            created_at: now,
            updated_at: now,
        };
        t.users.insert(id, (created.clone(), user.hashed_password));
        Ok(created)
    }

    async fn get_user(&self, user_id: i64) -> PortResult<User> {
        let t = self.tables.lock().await;
        t.users
            .get(&user_id)
            .map(|(u, _)| u.clone())
            .ok_or_else(|| not_found("User"))
    }

    async fn get_user_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let t = self.tables.lock().await;
        t.users
            .values()
            .find(|(u, _)| u.email.eq_ignore_ascii_case(email))
            .map(|(u, h)| UserCredentials {
                user: u.clone(),
                hashed_password: h.clone(),
            })
            .ok_or_else(|| not_found("User"))
    }

    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> PortResult<Page<User>> {
        let t = self.tables.lock().await;
        let rows = t
            .users
            .values()
            .map(|(u, _)| u)
            .filter(|u| filter.role.map_or(true, |r| u.role == r))
            .filter(|u| filter.is_active.map_or(true, |a| u.is_active == a))
            .filter(|u| {
                matches(
                    &filter.search,
                    &[&u.username, &u.email, &u.first_name, &u.last_name],
                )
            })
            .cloned()
            .collect();
        Ok(paginate(
            rows,
            filter.ordering,
            |u: &User, field| match field {
                "username" => Key::Text(u.username.clone()),
                "email" => Key::Text(u.email.clone()),
                _ => Key::Time(u.created_at),
            },
            |u| u.id,
            page,
        ))
    }

    async fn update_user(&self, user: &User) -> PortResult<User> {
        let mut t = self.tables.lock().await;
        if t
            .users
            .values()
            .any(|(u, _)| u.id != user.id && u.email == user.email)
        {
            return Err(conflict("A user with this email already exists."));
        }
        if t
            .users
            .values()
            .any(|(u, _)| u.id != user.id && u.username == user.username)
        {
            return Err(conflict("A user with this username already exists."));
        }
        let (stored, _) = t.users.get_mut(&user.id).ok_or_else(|| not_found("User"))?;
        *stored = User {
            updated_at: Utc::now(),
            ..user.clone()
        };
        Ok(stored.clone())
    }

    async fn set_password(&self, user_id: i64, hashed_password: &str) -> PortResult<()> {
        let mut t = self.tables.lock().await;
        let (_, hash) = t.users.get_mut(&user_id).ok_or_else(|| not_found("User"))?;
        *hash = hashed_password.to_string();
        Ok(())
    }

    async fn delete_user(&self, user_id: i64) -> PortResult<()> {
        let mut t = self.tables.lock().await;
        t.users.remove(&user_id).ok_or_else(|| not_found("User"))?;
        t.profiles.remove(&user_id);
        t.tokens.retain(|_, row| row.user_id != user_id);
        for c in t.clients.values_mut().filter(|c| c.created_by == Some(user_id)) {
            c.created_by = None;
        }
        for i in t.invoices.values_mut().filter(|i| i.created_by == Some(user_id)) {
            i.created_by = None;
        }
        for p in t.payments.values_mut().filter(|p| p.created_by == Some(user_id)) {
            p.created_by = None;
        }
        Ok(())
    }

    async fn get_or_create_profile(&self, user_id: i64) -> PortResult<UserProfile> {
        let mut t = self.tables.lock().await;
        if !t.users.contains_key(&user_id) {
            return Err(not_found("User"));
        }
        Ok(t.profiles
            .entry(user_id)
            .or_insert_with(|| UserProfile::default_for(user_id, Utc::now()))
            .clone())
    }

    async fn update_profile(&self, profile: &UserProfile) -> PortResult<UserProfile> {
        let mut t = self.tables.lock().await;
        let stored = t
            .profiles
            .get_mut(&profile.user_id)
            .ok_or_else(|| not_found("Profile"))?;
        *stored = UserProfile {
            updated_at: Utc::now(),
            ..profile.clone()
        };
        Ok(stored.clone())
    }

    async fn create_auth_token(
        &self,
        token: &str,
        user_id: i64,
        kind: TokenKind,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut t = self.tables.lock().await;
        t.tokens.insert(
            token.to_string(),
            TokenRow {
                user_id,
                kind,
                expires_at,
                revoked: false,
            },
        );
        Ok(())
    }

    async fn validate_auth_token(&self, token: &str, kind: TokenKind) -> PortResult<i64> {
        let t = self.tables.lock().await;
        match t.tokens.get(token) {
            Some(row) if row.kind == kind && !row.revoked && row.expires_at > Utc::now() => {
                Ok(row.user_id)
            }
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn revoke_auth_token(&self, token: &str) -> PortResult<()> {
        let mut t = self.tables.lock().await;
        if let Some(row) = t.tokens.get_mut(token) {
            row.revoked = true;
        }
        Ok(())
    }

    async fn revoke_user_tokens(&self, user_id: i64) -> PortResult<u64> {
        let mut t = self.tables.lock().await;
        let mut revoked = 0;
        for row in t
            .tokens
            .values_mut()
            .filter(|r| r.user_id == user_id && !r.revoked)
        {
            row.revoked = true;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn create_client(&self, draft: ClientDraft, created_by: Option<i64>) -> PortResult<Client> {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        let code = rules::finalize_code(&rules::placeholder_code(&draft.name), id);
        if t.clients.values().any(|c| c.client_code == code) {
            return Err(conflict("A client with this code already exists."));
        }
        let client = client_from_draft(id, code, draft, created_by);
        t.clients.insert(id, client.clone());
        Ok(client)
    }

    async fn get_client(&self, client_id: i64) -> PortResult<Client> {
        let t = self.tables.lock().await;
        t.clients
            .get(&client_id)
            .cloned()
            .ok_or_else(|| not_found("Client"))
    }

    async fn list_clients(
        &self,
        filter: &ClientFilter,
        page: PageRequest,
    ) -> PortResult<Page<ClientSummary>> {
        let t = self.tables.lock().await;
        let rows: Vec<&Client> = t
            .clients
            .values()
            .filter(|c| filter.client_type.map_or(true, |ty| c.client_type == ty))
            .filter(|c| filter.is_active.map_or(true, |a| c.is_active == a))
            .filter(|c| filter.country.as_ref().map_or(true, |v| &c.country == v))
            .filter(|c| filter.currency.as_ref().map_or(true, |v| &c.currency == v))
            .filter(|c| matches(&filter.search, &[&c.name, &c.email, &c.client_code, &c.city]))
            .collect();
        let page = paginate(
            rows,
            filter.ordering,
            |c: &&Client, field| match field {
                "name" => Key::Text(c.name.clone()),
                "client_code" => Key::Text(c.client_code.clone()),
                _ => Key::Time(c.created_at),
            },
            |c| c.id,
            page,
        );
        Ok(page.map(|c| {
            let contacts: Vec<ClientContact> = t
                .contacts
                .values()
                .filter(|k| k.client_id == c.id)
                .cloned()
                .collect();
            ClientSummary {
                id: c.id,
                name: c.name.clone(),
                client_code: c.client_code.clone(),
                email: c.email.clone(),
                phone_number: c.phone_number.clone(),
                city: c.city.clone(),
                country: c.country.clone(),
                is_active: c.is_active,
                primary_contact: rules::primary_contact_summary(&contacts),
                total_invoices: t.invoices.values().filter(|i| i.client_id == c.id).count() as i64,
                created_at: c.created_at,
            }
        }))
    }

    async fn update_client(&self, client_id: i64, draft: ClientDraft) -> PortResult<Client> {
        let mut t = self.tables.lock().await;
        let stored = t.clients.get_mut(&client_id).ok_or_else(|| not_found("Client"))?;
        let updated = Client {
            client_code: stored.client_code.clone(),
            created_at: stored.created_at,
            created_by: stored.created_by,
            ..client_from_draft(client_id, String::new(), draft, None)
        };
        *stored = updated;
        Ok(stored.clone())
    }

    async fn set_client_active(&self, client_id: i64, is_active: bool) -> PortResult<Client> {
        let mut t = self.tables.lock().await;
        let stored = t.clients.get_mut(&client_id).ok_or_else(|| not_found("Client"))?;
        stored.is_active = is_active;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn client_stats(&self, client_id: i64) -> PortResult<ClientStats> {
        let t = self.tables.lock().await;
        if !t.clients.contains_key(&client_id) {
            return Err(not_found("Client"));
        }
        let contacts: Vec<&ClientContact> =
            t.contacts.values().filter(|c| c.client_id == client_id).collect();
        let invoices: Vec<&Invoice> =
            t.invoices.values().filter(|i| i.client_id == client_id).collect();
        let billable: Vec<&&Invoice> = invoices
            .iter()
            .filter(|i| i.status != InvoiceStatus::Cancelled)
            .collect();
        let total_amount: Decimal = billable.iter().map(|i| i.total_amount).sum();
        let paid_amount: Decimal = t
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Paid)
            .filter(|p| billable.iter().any(|i| i.id == p.invoice_id))
            .map(|p| p.amount)
            .sum();
        Ok(ClientStats {
            total_contacts: contacts.len() as i64,
            primary_contacts: contacts.iter().filter(|c| c.is_primary).count() as i64,
            billing_contacts: contacts.iter().filter(|c| c.is_billing_contact).count() as i64,
            total_invoices: invoices.len() as i64,
            total_amount,
            paid_amount,
            outstanding_amount: total_amount - paid_amount,
        })
    }

    async fn repair_placeholder_codes(&self) -> PortResult<u64> {
        let mut t = self.tables.lock().await;
        let mut repaired = 0;
        for client in t
            .clients
            .values_mut()
            .filter(|c| rules::is_placeholder_code(&c.client_code))
        {
            client.client_code = rules::finalize_code(&client.client_code, client.id);
            repaired += 1;
        }
        Ok(repaired)
    }

    async fn list_contacts(&self, client_id: i64) -> PortResult<Vec<ClientContact>> {
        let t = self.tables.lock().await;
        let mut contacts: Vec<ClientContact> = t
            .contacts
            .values()
            .filter(|c| c.client_id == client_id)
            .cloned()
            .collect();
        contacts.sort_by(|a, b| {
            b.is_primary
                .cmp(&a.is_primary)
                .then_with(|| a.last_name.cmp(&b.last_name))
                .then_with(|| a.first_name.cmp(&b.first_name))
        });
        Ok(contacts)
    }

    async fn get_contact(&self, client_id: i64, contact_id: i64) -> PortResult<ClientContact> {
        let t = self.tables.lock().await;
        t.contacts
            .get(&contact_id)
            .filter(|c| c.client_id == client_id)
            .cloned()
            .ok_or_else(|| not_found("Contact"))
    }

    async fn create_contact(&self, client_id: i64, draft: ContactDraft) -> PortResult<ClientContact> {
        let mut t = self.tables.lock().await;
        if !t.clients.contains_key(&client_id) {
            return Err(PortError::NotFound("Client not found".to_string()));
        }
        let id = t.next_id();
        let contact = contact_from_draft(id, client_id, draft, Utc::now());
        write_contact(&mut t, contact)
    }

    async fn update_contact(
        &self,
        client_id: i64,
        contact_id: i64,
        draft: ContactDraft,
    ) -> PortResult<ClientContact> {
        let mut t = self.tables.lock().await;
        if !t.clients.contains_key(&client_id) {
            return Err(PortError::NotFound("Client not found".to_string()));
        }
        let created_at = t
            .contacts
            .get(&contact_id)
            .filter(|c| c.client_id == client_id)
            .map(|c| c.created_at)
            .ok_or_else(|| not_found("Contact"))?;
        let contact = contact_from_draft(contact_id, client_id, draft, created_at);
        write_contact(&mut t, contact)
    }

    async fn delete_contact(&self, client_id: i64, contact_id: i64) -> PortResult<()> {
        let mut t = self.tables.lock().await;
        match t.contacts.get(&contact_id) {
            Some(c) if c.client_id == client_id => {
                t.contacts.remove(&contact_id);
                Ok(())
            }
            _ => Err(not_found("Contact")),
        }
    }

    async fn create_invoice(
        &self,
        invoice_number: &str,
        draft: InvoiceDraft,
        created_by: Option<i64>,
    ) -> PortResult<Invoice> {
        let mut t = self.tables.lock().await;
        if !t.clients.contains_key(&draft.client_id) {
            return Err(conflict("The client is referenced by invoices or does not exist."));
        }
        if t.invoices.values().any(|i| i.invoice_number == invoice_number) {
            return Err(conflict("An invoice with this number already exists."));
        }
        let id = t.next_id();
        let now = Utc::now();
        let (tax_amount, total_amount) = draft.totals()?;
        let invoice = Invoice {
            id,
            invoice_number: invoice_number.to_string(),
            client_id: draft.client_id,
            status: draft.status,
            issue_date: draft.issue_date,
            due_date: draft.due_date,
            subtotal: draft.subtotal,
            tax_rate: draft.tax_rate,
            tax_amount,
            total_amount,
            notes: draft.notes,
            terms_and_conditions: draft.terms_and_conditions,
            created_at: now,
            updated_at: now,
            created_by,
        };
        t.invoices.insert(id, invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, invoice_id: i64) -> PortResult<Invoice> {
        let t = self.tables.lock().await;
        t.invoices
            .get(&invoice_id)
            .cloned()
            .ok_or_else(|| not_found("Invoice"))
    }

    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
        page: PageRequest,
    ) -> PortResult<Page<Invoice>> {
        let t = self.tables.lock().await;
        let rows = t
            .invoices
            .values()
            .filter(|i| filter.client_id.map_or(true, |c| i.client_id == c))
            .filter(|i| filter.status.map_or(true, |s| i.status == s))
            .cloned()
            .collect();
        Ok(paginate(
            rows,
            filter.ordering,
            |i: &Invoice, field| match field {
                "issue_date" => Key::Date(i.issue_date),
                "due_date" => Key::Date(i.due_date),
                "total_amount" => Key::Money(i.total_amount),
                _ => Key::Time(i.created_at),
            },
            |i| i.id,
            page,
        ))
    }

    async fn update_invoice(&self, invoice_id: i64, draft: InvoiceDraft) -> PortResult<Invoice> {
        let mut t = self.tables.lock().await;
        let stored = t.invoices.get_mut(&invoice_id).ok_or_else(|| not_found("Invoice"))?;
        let (tax_amount, total_amount) = draft.totals()?;
        stored.status = draft.status;
        stored.issue_date = draft.issue_date;
        stored.due_date = draft.due_date;
        stored.subtotal = draft.subtotal;
        stored.tax_rate = draft.tax_rate;
        stored.tax_amount = tax_amount;
        stored.total_amount = total_amount;
        stored.notes = draft.notes;
        stored.terms_and_conditions = draft.terms_and_conditions;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_invoice(&self, invoice_id: i64) -> PortResult<()> {
        let mut t = self.tables.lock().await;
        if t.payments.values().any(|p| p.invoice_id == invoice_id) {
            return Err(conflict("Invoice has recorded payments and cannot be deleted."));
        }
        t.invoices
            .remove(&invoice_id)
            .map(|_| ())
            .ok_or_else(|| not_found("Invoice"))
    }

    async fn create_payment(&self, draft: PaymentDraft, created_by: Option<i64>) -> PortResult<Payment> {
        let mut t = self.tables.lock().await;
        if !t.invoices.contains_key(&draft.invoice_id) {
            return Err(conflict("The invoice is referenced by payments or does not exist."));
        }
        let id = t.next_id();
        let now = Utc::now();
        let payment = Payment {
            id,
            invoice_id: draft.invoice_id,
            payment_reference: draft.payment_reference,
            amount: draft.amount,
            payment_date: draft.payment_date,
            payment_method: draft.payment_method,
            status: draft.status,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
            created_by,
        };
        t.payments.insert(id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, payment_id: i64) -> PortResult<Payment> {
        let t = self.tables.lock().await;
        t.payments
            .get(&payment_id)
            .cloned()
            .ok_or_else(|| not_found("Payment"))
    }

    async fn list_payments(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
    ) -> PortResult<Page<Payment>> {
        let t = self.tables.lock().await;
        let rows = t
            .payments
            .values()
            .filter(|p| filter.invoice_id.map_or(true, |i| p.invoice_id == i))
            .filter(|p| filter.status.map_or(true, |s| p.status == s))
            .filter(|p| filter.payment_method.map_or(true, |m| p.payment_method == m))
            .cloned()
            .collect();
        Ok(paginate(
            rows,
            filter.ordering,
            |p: &Payment, field| match field {
                "payment_date" => Key::Date(p.payment_date),
                "amount" => Key::Money(p.amount),
                _ => Key::Time(p.created_at),
            },
            |p| p.id,
            page,
        ))
    }

    async fn update_payment(&self, payment_id: i64, draft: PaymentDraft) -> PortResult<Payment> {
        let mut t = self.tables.lock().await;
        let stored = t.payments.get_mut(&payment_id).ok_or_else(|| not_found("Payment"))?;
        stored.payment_reference = draft.payment_reference;
        stored.amount = draft.amount;
        stored.payment_date = draft.payment_date;
        stored.payment_method = draft.payment_method;
        stored.status = draft.status;
        stored.notes = draft.notes;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_payment(&self, payment_id: i64) -> PortResult<()> {
        let mut t = self.tables.lock().await;
        t.payments
            .remove(&payment_id)
            .map(|_| ())
            .ok_or_else(|| not_found("Payment"))
    }
}

/// Stores a contact, demoting the client's other primaries when it is primary.
fn write_contact(t: &mut Tables, contact: ClientContact) -> PortResult<ClientContact> {
    if t.contacts.values().any(|c| {
        c.client_id == contact.client_id && c.id != contact.id && c.email == contact.email
    }) {
        return Err(conflict(
            "A contact with this email already exists for this client.",
        ));
    }
    let mut siblings: Vec<ClientContact> = t
        .contacts
        .values()
        .filter(|c| c.client_id == contact.client_id && c.id != contact.id)
        .cloned()
        .collect();
    if contact.is_primary {
        rules::clear_other_primaries(&mut siblings, contact.id);
    }
    for sibling in siblings {
        t.contacts.insert(sibling.id, sibling);
    }
    t.contacts.insert(contact.id, contact.clone());
    Ok(contact)
}

//=========================================================================================
// Server and raw HTTP client
//=========================================================================================

pub struct TestServer {
    pub addr: SocketAddr,
    pub db: Arc<MemoryDb>,
}

pub async fn spawn_app() -> TestServer {
    let db = Arc::new(MemoryDb::new());
    let state = Arc::new(AppState::new(db.clone(), Arc::new(Config::for_tests())));
    let app = build_router(state).expect("router");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
    TestServer { addr, db }
}

pub struct Response {
    pub status: u16,
    pub head: String,
    pub body: String,
}

impl Response {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|e| panic!("body is not JSON ({}): {}", e, self.body))
    }
}

pub async fn send(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<&Value>,
) -> Response {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let payload = body.map(|b| b.to_string());
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    if let Some(token) = token {
        req.push_str(&format!("Authorization: Bearer {token}\r\n"));
    }
    match &payload {
        Some(p) => {
            req.push_str("Content-Type: application/json\r\n");
            req.push_str(&format!("Content-Length: {}\r\n", p.len()));
        }
        None => req.push_str("Content-Length: 0\r\n"),
    }
    req.push_str("\r\n");
    if let Some(p) = &payload {
        req.push_str(p);
    }
    stream
        .write_all(req.as_bytes())
        .await
        .expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("http response must have separator");
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("http status");
    Response {
        status,
        head: head.to_string(),
        body: body.to_string(),
    }
}

//=========================================================================================
// Fixtures
//=========================================================================================

/// Registers and logs in a user with the given role, returning `(user_id, access_token)`.
pub async fn login_as(server: &TestServer, username: &str, role: Role) -> (i64, String) {
    let registered = send(
        server.addr,
        "POST",
        "/api/v1/auth/register/",
        None,
        Some(&serde_json::json!({
            "email": format!("{username}@example.com"),
            "username": username,
            "password": "s3cret-pass",
            "password_confirm": "s3cret-pass",
            "first_name": "Test",
            "last_name": "User",
        })),
    )
    .await;
    assert_eq!(registered.status, 201, "register: {}", registered.body);
    let user_id = registered.json()["id"].as_i64().expect("user id");
    server.db.set_role(user_id, role).await;

    let login = send(
        server.addr,
        "POST",
        "/api/v1/auth/login/",
        None,
        Some(&serde_json::json!({
            "email": format!("{username}@example.com"),
            "password": "s3cret-pass",
        })),
    )
    .await;
    assert_eq!(login.status, 200, "login: {}", login.body);
    let token = login.json()["tokens"]["access"]
        .as_str()
        .expect("access token")
        .to_string();
    (user_id, token)
}

pub fn client_body(name: &str) -> Value {
    serde_json::json!({
        "name": name,
        "client_type": "company",
        "email": "billing@example.com",
        "phone_number": "+15551234567",
        "address_line_1": "1 Main St",
        "city": "Springfield",
        "state_province": "IL",
        "postal_code": "62701",
        "payment_terms": 15,
    })
}

pub fn client_draft(name: &str) -> ClientDraft {
    ClientDraft {
        name: name.to_string(),
        client_type: invoicing_core::ClientType::Company,
        email: "billing@example.com".to_string(),
        phone_number: None,
        website: None,
        address_line_1: "1 Main St".to_string(),
        address_line_2: None,
        city: "Springfield".to_string(),
        state_province: "IL".to_string(),
        postal_code: "62701".to_string(),
        country: "USA".to_string(),
        tax_id: None,
        registration_number: None,
        payment_terms: 30,
        credit_limit: Decimal::ZERO,
        currency: "USD".to_string(),
        is_active: true,
        notes: None,
    }
}

pub async fn create_client(server: &TestServer, token: &str, name: &str) -> Value {
    let res = send(
        server.addr,
        "POST",
        "/api/v1/clients/",
        Some(token),
        Some(&client_body(name)),
    )
    .await;
    assert_eq!(res.status, 201, "create client: {}", res.body);
    res.json()
}

pub fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal serialized as string")
        .parse()
        .expect("decimal")
}
