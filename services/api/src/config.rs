//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::Duration;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub db_max_connections: u32,
    pub log_level: Level,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub cors_allowed_origin: String,
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address: SocketAddr = parse_var("BIND_ADDRESS", "0.0.0.0:3000")?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let db_max_connections: u32 = parse_var("DB_MAX_CONNECTIONS", "5")?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Token Lifetimes ---
        let access_minutes: i64 = parse_var("ACCESS_TOKEN_TTL_MINUTES", "60")?;
        let refresh_days: i64 = parse_var("REFRESH_TOKEN_TTL_DAYS", "7")?;

        // --- Load HTTP Settings ---
        let cors_allowed_origin = std::env::var("CORS_ALLOWED_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let default_page_size: i64 = parse_var("DEFAULT_PAGE_SIZE", "20")?;
        let max_page_size: i64 = parse_var("MAX_PAGE_SIZE", "100")?;
        if default_page_size < 1 || max_page_size < default_page_size {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_PAGE_SIZE".to_string(),
                "must be at least 1 and not exceed MAX_PAGE_SIZE".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            database_url,
            db_max_connections,
            log_level,
            access_token_ttl: Duration::minutes(access_minutes),
            refresh_token_ttl: Duration::days(refresh_days),
            cors_allowed_origin,
            default_page_size,
            max_page_size,
        })
    }

    /// A configuration that needs no environment, for tests and tooling.
    pub fn for_tests() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: String::new(),
            db_max_connections: 1,
            log_level: Level::INFO,
            access_token_ttl: Duration::minutes(60),
            refresh_token_ttl: Duration::days(7),
            cors_allowed_origin: "http://localhost:3000".to_string(),
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// Reads `name`, falling back to `default`, and parses it.
fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let port: u32 = parse_var("INVOICING_TEST_UNSET_VAR", "5").unwrap();
        assert_eq!(port, 5);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = parse_var::<i64>("INVOICING_TEST_UNSET_VAR", "abc").unwrap_err();
        assert!(err.to_string().contains("INVOICING_TEST_UNSET_VAR"));
    }
}
