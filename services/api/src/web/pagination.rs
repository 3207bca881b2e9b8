//! services/api/src/web/pagination.rs
//!
//! Page-number pagination and `ordering` parameter handling shared by the
//! list endpoints.

use crate::config::Config;
use crate::error::ApiError;
use invoicing_core::{Page, PageRequest, SortOrder, ValidationErrors};
use serde::Serialize;
use utoipa::ToSchema;

/// One page of a list endpoint.
#[derive(Serialize, ToSchema)]
pub struct Paginated<T> {
    /// Total number of matching records across all pages.
    pub count: i64,
    pub page: i64,
    pub page_size: i64,
    pub results: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn from_page<U>(page: Page<U>, f: impl FnMut(U) -> T) -> Self {
        let page = page.map(f);
        Self {
            count: page.count,
            page: page.page,
            page_size: page.page_size,
            results: page.results,
        }
    }
}

/// Clamps the size to `1..=max_page_size` and the page to `1..`, capped so
/// that the row offset always fits in an `i64`.
pub fn page_request(config: &Config, page: Option<i64>, page_size: Option<i64>) -> PageRequest {
    let page_size = page_size
        .unwrap_or(config.default_page_size)
        .clamp(1, config.max_page_size.max(1));
    PageRequest {
        page: page.unwrap_or(1).clamp(1, i64::MAX / page_size),
        page_size,
    }
}

/// Parses `ordering`; an unknown field is a validation error, not a silent default.
pub fn parse_ordering(
    raw: Option<&str>,
    allowed: &[&'static str],
) -> Result<Option<SortOrder>, ApiError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(raw) => SortOrder::parse(raw, allowed).map(Some).ok_or_else(|| {
            ApiError::Validation(ValidationErrors::single(
                "ordering",
                format!("Unknown ordering field '{}'. Allowed: {}.", raw, allowed.join(", ")),
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoicing_core::domain::CLIENT_ORDERING_FIELDS;

    #[test]
    fn page_size_is_clamped() {
        let config = Config::for_tests();
        assert_eq!(
            page_request(&config, None, None),
            PageRequest { page: 1, page_size: 20 }
        );
        assert_eq!(page_request(&config, Some(0), Some(1000)).page_size, 100);
        assert_eq!(page_request(&config, Some(-3), Some(0)), PageRequest { page: 1, page_size: 1 });
    }

    #[test]
    fn huge_page_numbers_keep_the_offset_in_range() {
        let config = Config::for_tests();
        let req = page_request(&config, Some(i64::MAX), Some(100));
        assert_eq!(req.page, i64::MAX / 100);
        assert!(req.offset() > 0);
        assert!(req.offset() <= i64::MAX - 100);

        let req = page_request(&config, Some(i64::MAX), None);
        assert_eq!(req.offset(), (i64::MAX / 20 - 1) * 20);
    }

    #[test]
    fn ordering_rejects_unknown_fields() {
        assert_eq!(parse_ordering(None, CLIENT_ORDERING_FIELDS).unwrap(), None);
        let order = parse_ordering(Some("-client_code"), CLIENT_ORDERING_FIELDS)
            .unwrap()
            .unwrap();
        assert_eq!(order.field, "client_code");
        assert!(order.descending);
        assert!(parse_ordering(Some("tax_id"), CLIENT_ORDERING_FIELDS).is_err());
    }
}
