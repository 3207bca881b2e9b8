//! crates/invoicing_core/src/rules.rs
//!
//! The save-time and read-time rules of the back-office: client code
//! assignment, primary-contact exclusivity, derived fields, invoicing
//! helpers and role capabilities. Everything here is pure; the store
//! adapters call into these functions inside their transactions.

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Client, ClientContact, PrimaryContactSummary, Role, User};

//=========================================================================================
// Client code assignment
//=========================================================================================

/// Suffix carried by a client code between the first and the second write.
pub const PLACEHOLDER_SUFFIX: &str = "-TMP";

/// Up to two initials, one per leading whitespace-separated token.
///
/// Non-alphabetic leading characters are passed through as they are.
pub fn client_initials(name: &str) -> String {
    name.split_whitespace()
        .take(2)
        .filter_map(|part| part.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

/// The code written on the first insert, before the identifier exists.
pub fn placeholder_code(name: &str) -> String {
    format!("{}{}", client_initials(name), PLACEHOLDER_SUFFIX)
}

pub fn is_placeholder_code(code: &str) -> bool {
    code.ends_with(PLACEHOLDER_SUFFIX)
}

/// Replaces the placeholder suffix with the zero-padded identifier.
///
/// Codes that are already final are returned unchanged, so the call is
/// idempotent and safe to use from the repair pass.
pub fn finalize_code(code: &str, id: i64) -> String {
    match code.strip_suffix(PLACEHOLDER_SUFFIX) {
        Some(initials) => format!("{}-{:04}", initials, id),
        None => code.to_string(),
    }
}

//=========================================================================================
// Primary-contact exclusivity
//=========================================================================================

/// Clears `is_primary` on every contact except `keep_id`.
///
/// Returns the ids that were flipped. Callers scope `contacts` to a single
/// client and hold that client's lock while doing so.
pub fn clear_other_primaries(contacts: &mut [ClientContact], keep_id: i64) -> Vec<i64> {
    contacts
        .iter_mut()
        .filter(|c| c.is_primary && c.id != keep_id)
        .map(|c| {
            c.is_primary = false;
            c.id
        })
        .collect()
}

//=========================================================================================
// Derived read-only fields
//=========================================================================================

pub fn full_address(client: &Client) -> String {
    let mut lines = vec![client.address_line_1.clone()];
    if let Some(line_2) = client
        .address_line_2
        .as_deref()
        .filter(|l| !l.trim().is_empty())
    {
        lines.push(line_2.to_string());
    }
    lines.push(format!(
        "{}, {} {}",
        client.city, client.state_province, client.postal_code
    ));
    lines.push(client.country.clone());
    lines.join("\n")
}

pub fn full_name(contact: &ClientContact) -> String {
    format!("{} {}", contact.first_name, contact.last_name)
}

/// First contact flagged primary, in the order given. Absence is not an error.
pub fn primary_contact(contacts: &[ClientContact]) -> Option<&ClientContact> {
    contacts.iter().find(|c| c.is_primary)
}

pub fn primary_contact_summary(contacts: &[ClientContact]) -> Option<PrimaryContactSummary> {
    primary_contact(contacts).map(|c| PrimaryContactSummary {
        name: full_name(c),
        email: c.email.clone(),
        phone: c.phone_number.clone(),
    })
}

//=========================================================================================
// Invoicing helpers
//=========================================================================================

/// `INV-<YYYYMMDD>-<8 upper-case hex chars>`.
pub fn generate_invoice_number(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "INV-{}-{}",
        now.format("%Y%m%d"),
        random[..8].to_uppercase()
    )
}

/// `None` for negative terms or a date past the end of the calendar.
pub fn calculate_due_date(issue_date: NaiveDate, payment_terms_days: i32) -> Option<NaiveDate> {
    let days = u64::try_from(payment_terms_days).ok()?;
    issue_date.checked_add_days(Days::new(days))
}

/// Returns `(tax_amount, total_amount)` rounded to cents, or `None` when the
/// arithmetic leaves the range of `Decimal`.
pub fn compute_tax(subtotal: Decimal, tax_rate: Decimal) -> Option<(Decimal, Decimal)> {
    let tax_amount = subtotal
        .checked_mul(tax_rate)?
        .checked_div(Decimal::ONE_HUNDRED)?
        .round_dp(2);
    let total_amount = subtotal.checked_add(tax_amount)?.round_dp(2);
    Some((tax_amount, total_amount))
}

//=========================================================================================
// Capabilities
//=========================================================================================

/// What a role may do. Derived on every request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub create_invoices: bool,
    pub manage_payments: bool,
}

impl Role {
    pub fn capabilities(&self) -> Capabilities {
        let staff = matches!(self, Role::Admin | Role::Accountant);
        Capabilities {
            create_invoices: staff,
            manage_payments: staff,
        }
    }
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin || self.is_superuser
    }

    pub fn is_accountant(&self) -> bool {
        self.role == Role::Accountant
    }

    pub fn is_client(&self) -> bool {
        self.role == Role::Client
    }

    pub fn can_create_invoices(&self) -> bool {
        self.is_admin() || self.role.capabilities().create_invoices
    }

    pub fn can_manage_payments(&self) -> bool {
        self.is_admin() || self.role.capabilities().manage_payments
    }
}
