//! services/api/src/lib.rs
//!
//! The invoicing API service: configuration, errors, the Postgres adapter and
//! the axum web layer. The binaries in `src/bin` only wire these together.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
