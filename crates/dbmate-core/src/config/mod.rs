mod database;

pub use database::{DatabaseConfig, TransactionMode, DEFAULT_ENV_VAR};

use std::path::PathBuf;

/// Directory scanned for migration files by default.
pub const DEFAULT_MIGRATIONS_DIR: &str = "./db/migrations";

/// Root configuration for a dbmate invocation.
#[derive(Debug, Clone)]
pub struct DbmateConfig {
    /// Directory containing migration files.
    pub migrations_dir: PathBuf,

    /// Database configuration.
    pub database: DatabaseConfig,
}

impl Default for DbmateConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            database: DatabaseConfig::default(),
        }
    }
}

impl DbmateConfig {
    /// Override the migrations directory.
    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Override the environment variable holding the database URL.
    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.database.env_var = name.into();
        self
    }

    /// Override the transaction grouping.
    pub fn with_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.database.transaction_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbmateConfig::default();
        assert_eq!(config.migrations_dir, PathBuf::from("./db/migrations"));
        assert_eq!(config.database.env_var, "DATABASE_URL");
    }

    #[test]
    fn test_builder_overrides() {
        let config = DbmateConfig::default()
            .with_migrations_dir("sql")
            .with_env_var("PRIMARY_DB")
            .with_transaction_mode(TransactionMode::Batch);
        assert_eq!(config.migrations_dir, PathBuf::from("sql"));
        assert_eq!(config.database.env_var, "PRIMARY_DB");
        assert_eq!(config.database.transaction_mode, TransactionMode::Batch);
    }
}
