//! Configuration constants and connection settings for the loader
//!
//! This module centralizes all tunable parameters and constants used throughout
//! the application, plus the environment fallback used to build a database URL.

use anyhow::{Result, anyhow};
use sqlx::postgres::PgConnectOptions;
use std::time::Duration;

// ============================================================================
// Connection Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

/// Timeout for any single statement sent to the sink; hitting it is fatal
pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Load Configuration
// ============================================================================

/// Prefix of the per-row rollback point names
pub const SAVEPOINT_PREFIX: &str = "sp";

/// Maximum characters of a single field value echoed into a warning message
pub const WARNING_VALUE_PREVIEW: usize = 40;

/// Separator between component values of a composite natural-key placeholder
pub const NATURAL_KEY_SEPARATOR: char = '|';

// ============================================================================
// I/O Configuration
// ============================================================================

/// Extension appended to a dataset id to find its file in a data directory
pub const CSV_EXTENSION: &str = "csv";

/// Default directory the reconciler writes corrected datasets to
pub const DEFAULT_CORRECTED_DIR: &str = "data_corrected";

// ============================================================================
// Database Settings
// ============================================================================

/// Individual connection parameters, as found in a `.env` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
}

impl DatabaseSettings {
    /// Read `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER` and `DB_PASSWORD`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("Environment variable {} is not set", key))
        };

        let port = match lookup("DB_PORT").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u16>()
                    .map_err(|e| anyhow!("Invalid DB_PORT '{}': {}", raw, e))?,
            ),
            None => None,
        };

        Ok(Self {
            host: required("DB_HOST")?,
            port,
            database: required("DB_NAME")?,
            user: required("DB_USER")?,
            password: lookup("DB_PASSWORD").filter(|v| !v.is_empty()),
        })
    }

    /// Postgres options built field by field, so credentials need no escaping
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .username(&self.user)
            .database(&self.database);
        if let Some(port) = self.port {
            options = options.port(port);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        options
    }
}

/// Where to connect: a URL given by the user, or the `DB_*` settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Url(String),
    Settings(DatabaseSettings),
}

/// Pick the connect target: explicit URL first, then the `DB_*` variables
pub fn resolve_connect_target(explicit: Option<String>) -> Result<ConnectTarget> {
    if let Some(url) = explicit.filter(|u| !u.trim().is_empty()) {
        return Ok(ConnectTarget::Url(url));
    }
    let settings = DatabaseSettings::from_env().map_err(|e| {
        anyhow!(
            "{}.\n\
             Provide --database-url, set DATABASE_URL, or define DB_HOST/DB_NAME/DB_USER \
             (and optionally DB_PORT/DB_PASSWORD) in the environment or a .env file.",
            e
        )
    })?;
    Ok(ConnectTarget::Settings(settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_settings_from_full_environment() {
        let settings = DatabaseSettings::from_lookup(lookup_from(&[
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "5433"),
            ("DB_NAME", "dealership"),
            ("DB_USER", "loader"),
            ("DB_PASSWORD", "s3cret"),
        ]))
        .unwrap();

        let options = settings.connect_options();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_username(), "loader");
        assert_eq!(options.get_database(), Some("dealership"));
    }

    #[test]
    fn test_password_with_reserved_characters() {
        let settings = DatabaseSettings::from_lookup(lookup_from(&[
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "5433"),
            ("DB_NAME", "dealership"),
            ("DB_USER", "loader"),
            ("DB_PASSWORD", "p@ss/w#rd:%"),
        ]))
        .unwrap();
        assert_eq!(settings.password.as_deref(), Some("p@ss/w#rd:%"));

        let options = settings.connect_options();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("dealership"));
    }

    #[test]
    fn test_settings_without_port_or_password() {
        let settings = DatabaseSettings::from_lookup(lookup_from(&[
            ("DB_HOST", "localhost"),
            ("DB_NAME", "dealership"),
            ("DB_USER", "loader"),
        ]))
        .unwrap();

        assert_eq!(settings.port, None);
        assert_eq!(settings.password, None);
        let options = settings.connect_options();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_database(), Some("dealership"));
    }

    #[test]
    fn test_settings_missing_host_is_error() {
        let result = DatabaseSettings::from_lookup(lookup_from(&[
            ("DB_NAME", "dealership"),
            ("DB_USER", "loader"),
        ]));
        assert!(result.unwrap_err().to_string().contains("DB_HOST"));
    }

    #[test]
    fn test_invalid_port_is_error() {
        let result = DatabaseSettings::from_lookup(lookup_from(&[
            ("DB_HOST", "localhost"),
            ("DB_PORT", "fifty"),
            ("DB_NAME", "dealership"),
            ("DB_USER", "loader"),
        ]));
        assert!(result.unwrap_err().to_string().contains("Invalid DB_PORT"));
    }

    #[test]
    fn test_explicit_url_wins() {
        let target = resolve_connect_target(Some("sqlite::memory:".to_string())).unwrap();
        assert_eq!(target, ConnectTarget::Url("sqlite::memory:".to_string()));
    }
}
