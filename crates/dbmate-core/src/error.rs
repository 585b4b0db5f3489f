use thiserror::Error;

/// Core error type for dbmate operations.
#[derive(Error, Debug)]
pub enum DbmateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid database URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Malformed migration {file}: {reason}")]
    MalformedMigration { file: String, reason: String },

    #[error("Migration {version} failed: {source}")]
    SqlExecution {
        version: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Can't rollback: no migrations have been applied")]
    NoMigrationsApplied,

    #[error("Can't find migration file for applied version {0}")]
    MissingMigration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl DbmateError {
    /// Shorthand for a malformed migration file error.
    pub fn malformed(file: impl Into<String>, reason: impl Into<String>) -> Self {
        DbmateError::MalformedMigration {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using DbmateError.
pub type Result<T> = std::result::Result<T, DbmateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = DbmateError::malformed("20240101000000_users.sql", "missing up marker");
        assert_eq!(
            err.to_string(),
            "Malformed migration 20240101000000_users.sql: missing up marker"
        );
    }

    #[test]
    fn test_invalid_url_from_parse_error() {
        let err: DbmateError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, DbmateError::InvalidUrl(_)));
        assert!(err.to_string().starts_with("Invalid database URL"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: DbmateError = io.into();
        assert!(matches!(err, DbmateError::Io(_)));
    }
}
