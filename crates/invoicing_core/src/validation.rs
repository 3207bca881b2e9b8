//! crates/invoicing_core/src/validation.rs
//!
//! Field-level validation of the write models. Failures are collected per
//! field so the API can report all of them in one 400 response.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{
    ClientDraft, ContactDraft, InvoiceDraft, NewUser, PaymentDraft, User, UserProfile,
};
use crate::rules;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?1?\d{9,15}$").expect("phone regex"));
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));
static CURRENCY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}$").expect("currency regex"));

pub const PHONE_MESSAGE: &str =
    "Phone number must be entered in the format: \"+999999999\". Up to 15 digits allowed.";
pub const POSITIVE_MESSAGE: &str = "Amount must be positive.";
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PAYMENT_TERMS_DAYS: i32 = 3650;
/// 9999999999.99, the largest value a `NUMERIC(12,2)` column holds.
pub const MAX_MONEY: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);
pub const MONEY_DIGITS_MESSAGE: &str = "Ensure that there are no more than 12 digits in total.";
const TOTAL_DIGITS_MESSAGE: &str = "Ensure the total amount has no more than 12 digits in total.";

/// Per-field validation messages, ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    fn required(&mut self, field: &str, value: &str, max_len: usize) {
        if value.trim().is_empty() {
            self.add(field, "This field may not be blank.");
        } else {
            self.max_len(field, value, max_len);
        }
    }

    fn max_len(&mut self, field: &str, value: &str, max_len: usize) {
        if value.chars().count() > max_len {
            self.add(
                field,
                format!("Ensure this field has no more than {} characters.", max_len),
            );
        }
    }

    fn optional(&mut self, field: &str, value: Option<&str>, max_len: usize) {
        if let Some(v) = value {
            self.max_len(field, v, max_len);
        }
    }

    fn email(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.add(field, "This field may not be blank.");
        } else if !is_valid_email(value) {
            self.add(field, "Enter a valid email address.");
        } else {
            self.max_len(field, value, 254);
        }
    }

    fn phone(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value {
            if !is_valid_phone(v) {
                self.add(field, PHONE_MESSAGE);
            }
        }
    }

    fn url(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value {
            if !(v.starts_with("http://") || v.starts_with("https://")) {
                self.add(field, "Enter a valid URL.");
            }
            self.max_len(field, v, 200);
        }
    }

    fn positive(&mut self, field: &str, value: Decimal) {
        if let Err(message) = validate_positive_amount(value) {
            self.add(field, message);
        }
    }

    fn money(&mut self, field: &str, value: Decimal) {
        if value.abs() > MAX_MONEY {
            self.add(field, MONEY_DIGITS_MESSAGE);
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

pub fn is_valid_phone(value: &str) -> bool {
    PHONE_RE.is_match(value)
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn validate_positive_amount(value: Decimal) -> Result<(), &'static str> {
    if value <= Decimal::ZERO {
        Err(POSITIVE_MESSAGE)
    } else {
        Ok(())
    }
}

impl ClientDraft {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut e = ValidationErrors::new();
        e.required("name", &self.name, 200);
        e.email("email", &self.email);
        e.phone("phone_number", self.phone_number.as_deref());
        e.url("website", self.website.as_deref());
        e.required("address_line_1", &self.address_line_1, 200);
        e.optional("address_line_2", self.address_line_2.as_deref(), 200);
        e.required("city", &self.city, 100);
        e.required("state_province", &self.state_province, 100);
        e.required("postal_code", &self.postal_code, 20);
        e.required("country", &self.country, 100);
        e.optional("tax_id", self.tax_id.as_deref(), 50);
        e.optional("registration_number", self.registration_number.as_deref(), 50);
        if self.payment_terms < 0 {
            e.add("payment_terms", "Ensure this value is greater than or equal to 0.");
        } else if self.payment_terms > MAX_PAYMENT_TERMS_DAYS {
            e.add(
                "payment_terms",
                format!(
                    "Ensure this value is less than or equal to {}.",
                    MAX_PAYMENT_TERMS_DAYS
                ),
            );
        }
        if self.credit_limit < Decimal::ZERO {
            e.add("credit_limit", "Ensure this value is greater than or equal to 0.");
        }
        e.money("credit_limit", self.credit_limit);
        if !CURRENCY_RE.is_match(&self.currency) {
            e.add("currency", "Currency must be a three-letter upper-case ISO code.");
        }
        e.into_result()
    }
}

impl ContactDraft {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut e = ValidationErrors::new();
        e.required("first_name", &self.first_name, 50);
        e.required("last_name", &self.last_name, 50);
        e.optional("title", self.title.as_deref(), 100);
        e.email("email", &self.email);
        e.phone("phone_number", self.phone_number.as_deref());
        e.into_result()
    }
}

impl InvoiceDraft {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut e = ValidationErrors::new();
        e.positive("subtotal", self.subtotal);
        e.money("subtotal", self.subtotal);
        let rate_ok = self.tax_rate >= Decimal::ZERO && self.tax_rate <= Decimal::ONE_HUNDRED;
        if !rate_ok {
            e.add("tax_rate", "Tax rate must be between 0 and 100.");
        }
        if self.due_date < self.issue_date {
            e.add("due_date", "Due date cannot be before the issue date.");
        }
        if rate_ok && e.messages("subtotal").is_empty() && self.totals().is_err() {
            e.add("subtotal", TOTAL_DIGITS_MESSAGE);
        }
        e.into_result()
    }

    /// `(tax_amount, total_amount)` for storage. Fails on `subtotal` when the
    /// total would not fit a money column.
    pub fn totals(&self) -> Result<(Decimal, Decimal), ValidationErrors> {
        match rules::compute_tax(self.subtotal, self.tax_rate) {
            Some((tax, total)) if total.abs() <= MAX_MONEY => Ok((tax, total)),
            _ => Err(ValidationErrors::single("subtotal", TOTAL_DIGITS_MESSAGE)),
        }
    }
}

impl PaymentDraft {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut e = ValidationErrors::new();
        e.required("payment_reference", &self.payment_reference, 100);
        e.positive("amount", self.amount);
        e.money("amount", self.amount);
        e.into_result()
    }
}

impl NewUser {
    /// Validates everything except the password, which never reaches here in clear.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut e = ValidationErrors::new();
        e.email("email", &self.email);
        e.required("username", &self.username, 150);
        e.optional("first_name", Some(&self.first_name), 150);
        e.optional("last_name", Some(&self.last_name), 150);
        e.phone("phone_number", self.phone_number.as_deref());
        e.optional("company", self.company.as_deref(), 200);
        e.into_result()
    }
}

impl User {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut e = ValidationErrors::new();
        e.email("email", &self.email);
        e.required("username", &self.username, 150);
        e.optional("first_name", Some(&self.first_name), 150);
        e.optional("last_name", Some(&self.last_name), 150);
        e.phone("phone_number", self.phone_number.as_deref());
        e.optional("company", self.company.as_deref(), 200);
        e.into_result()
    }
}

impl UserProfile {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut e = ValidationErrors::new();
        e.optional("bio", self.bio.as_deref(), 500);
        e.url("website", self.website.as_deref());
        e.required("timezone", &self.timezone, 50);
        e.into_result()
    }
}

/// Checks a new password and its confirmation.
pub fn validate_new_password(
    field: &str,
    password: &str,
    confirmation: &str,
) -> Result<(), ValidationErrors> {
    let mut e = ValidationErrors::new();
    if password.chars().count() < MIN_PASSWORD_LEN {
        e.add(
            field,
            format!(
                "This password is too short. It must contain at least {} characters.",
                MIN_PASSWORD_LEN
            ),
        );
    }
    if password != confirmation {
        e.add(field, "Password fields didn't match.");
    }
    e.into_result()
}
