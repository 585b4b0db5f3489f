use std::fmt;
use std::str::FromStr;

use crate::error::{DbmateError, Result};
use crate::url::ConnectionDescriptor;

/// Environment variable consulted for the connection string by default.
pub const DEFAULT_ENV_VAR: &str = "DATABASE_URL";

/// How pending migrations are grouped into transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// Each migration commits on its own; a failure keeps earlier progress.
    #[default]
    PerMigration,
    /// All pending migrations commit together or not at all.
    Batch,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionMode::PerMigration => write!(f, "per-migration"),
            TransactionMode::Batch => write!(f, "batch"),
        }
    }
}

impl FromStr for TransactionMode {
    type Err = DbmateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-migration" | "per_migration" | "migration" => Ok(TransactionMode::PerMigration),
            "batch" => Ok(TransactionMode::Batch),
            other => Err(DbmateError::Config(format!(
                "Unknown transaction mode '{}' (expected 'per-migration' or 'batch')",
                other
            ))),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Name of the environment variable holding the connection URL.
    pub env_var: String,

    /// Transaction grouping for applied migrations.
    pub transaction_mode: TransactionMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            env_var: DEFAULT_ENV_VAR.to_string(),
            transaction_mode: TransactionMode::default(),
        }
    }
}

impl DatabaseConfig {
    /// Read the connection string from the configured environment variable.
    pub fn url(&self) -> Result<String> {
        self.url_from(|name| std::env::var(name).ok())
    }

    /// Resolve the connection string through an arbitrary lookup.
    pub fn url_from<F>(&self, lookup: F) -> Result<String>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        match lookup(&self.env_var) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(DbmateError::Config(format!(
                "Environment variable {} is not set",
                self.env_var
            ))),
        }
    }

    /// Read and parse the connection string.
    pub fn descriptor(&self) -> Result<ConnectionDescriptor> {
        ConnectionDescriptor::parse(&self.url()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_database_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.env_var, "DATABASE_URL");
        assert_eq!(config.transaction_mode, TransactionMode::PerMigration);
    }

    #[test]
    fn test_url_from_lookup() {
        let config = DatabaseConfig {
            env_var: "TEST_DB".to_string(),
            ..Default::default()
        };
        let url = config
            .url_from(|name| {
                assert_eq!(name, "TEST_DB");
                Some("postgres://localhost/test".to_string())
            })
            .unwrap();
        assert_eq!(url, "postgres://localhost/test");
    }

    #[test]
    fn test_missing_url_is_config_error() {
        let config = DatabaseConfig::default();
        let err = config.url_from(|_| None).unwrap_err();
        assert!(matches!(err, DbmateError::Config(_)));
        assert!(err.to_string().contains("DATABASE_URL"));

        let err = config.url_from(|_| Some("   ".to_string())).unwrap_err();
        assert!(matches!(err, DbmateError::Config(_)));
    }

    #[test]
    fn test_parse_transaction_mode() {
        assert_eq!(
            "batch".parse::<TransactionMode>().unwrap(),
            TransactionMode::Batch
        );
        assert_eq!(
            "Per-Migration".parse::<TransactionMode>().unwrap(),
            TransactionMode::PerMigration
        );
        assert!("nested".parse::<TransactionMode>().is_err());
        assert_eq!(TransactionMode::Batch.to_string(), "batch");
    }
}
