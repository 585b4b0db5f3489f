//! Database drivers.
//!
//! Every supported engine implements the same administrative capability set
//! behind the [`Driver`] trait. The engine is chosen from the connection URL
//! scheme by [`driver_for`].

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use sqlx::{AnyConnection, Connection, Row};
use tracing::{debug, warn};

use dbmate_core::error::{DbmateError, Result};
use dbmate_core::url::ConnectionDescriptor;

use crate::migrations::AppliedVersion;

/// Name of the ledger table inside the target database.
pub const VERSION_TABLE: &str = "schema_migrations";

/// Boxed future returned by driver operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Administrative capability set for one database engine.
///
/// A driver is bound to a single connection descriptor. Connections it hands
/// out are owned by the caller, which is responsible for closing them.
pub trait Driver: Send + Sync {
    /// Short engine name used in log output.
    fn name(&self) -> &'static str;

    /// Create the target database. Succeeds if it already exists.
    fn create_database(&self) -> DriverFuture<'_, ()>;

    /// Drop the target database. Succeeds if it does not exist.
    fn drop_database(&self) -> DriverFuture<'_, ()>;

    /// Open a connection to the target database.
    fn connect(&self) -> DriverFuture<'_, AnyConnection>;

    /// Create the ledger table if it is missing.
    fn ensure_version_table<'a>(&'a self, conn: &'a mut AnyConnection) -> DriverFuture<'a, ()>;

    /// Every version currently recorded in the ledger.
    fn applied_versions<'a>(
        &'a self,
        conn: &'a mut AnyConnection,
    ) -> DriverFuture<'a, HashSet<String>>;

    /// Ledger rows with their application time, ascending by version.
    fn applied_records<'a>(
        &'a self,
        conn: &'a mut AnyConnection,
    ) -> DriverFuture<'a, Vec<AppliedVersion>>;

    /// Insert a ledger row for `version`.
    fn record_applied<'a>(
        &'a self,
        conn: &'a mut AnyConnection,
        version: &'a str,
    ) -> DriverFuture<'a, ()>;

    /// Delete the ledger row for `version`.
    fn record_rolled_back<'a>(
        &'a self,
        conn: &'a mut AnyConnection,
        version: &'a str,
    ) -> DriverFuture<'a, ()>;

    /// Run raw migration SQL, which may hold several statements.
    fn execute<'a>(&'a self, conn: &'a mut AnyConnection, sql: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            if sql.trim().is_empty() {
                return Ok(());
            }
            sqlx::Executor::execute(conn, sqlx::raw_sql(sql)).await?;
            Ok(())
        })
    }
}

/// Select the driver matching the descriptor's scheme.
pub fn driver_for(descriptor: &ConnectionDescriptor) -> Result<Box<dyn Driver>> {
    match descriptor.engine() {
        "postgres" | "postgresql" => Ok(Box::new(PostgresDriver::new(descriptor.clone()))),
        "mysql" | "mariadb" => Ok(Box::new(MySqlDriver::new(descriptor.clone()))),
        "sqlite" | "sqlite3" => Ok(Box::new(SqliteDriver::new(descriptor.clone())?)),
        other => Err(DbmateError::UnsupportedDriver(other.to_string())),
    }
}

/// Open a connection through the `Any` driver.
pub(crate) async fn connect_url(url: &str) -> Result<AnyConnection> {
    sqlx::any::install_default_drivers();
    AnyConnection::connect(url)
        .await
        .map_err(|e| DbmateError::Connection(e.to_string()))
}

/// Close a connection, logging instead of failing.
pub async fn close(conn: AnyConnection) {
    if let Err(e) = conn.close().await {
        warn!("Failed to close database connection: {}", e);
    }
}

/// Ledger statements for one SQL dialect.
pub(crate) struct LedgerSql {
    pub create_table: &'static str,
    pub select_versions: &'static str,
    pub select_records: &'static str,
    pub insert: &'static str,
    pub delete: &'static str,
}

impl LedgerSql {
    pub(crate) async fn ensure(&self, conn: &mut AnyConnection) -> Result<()> {
        sqlx::query(self.create_table)
            .execute(conn)
            .await
            .map_err(|e| DbmateError::Ledger(format!("Failed to create {}: {}", VERSION_TABLE, e)))?;
        Ok(())
    }

    pub(crate) async fn versions(&self, conn: &mut AnyConnection) -> Result<HashSet<String>> {
        let rows = sqlx::query(self.select_versions)
            .fetch_all(conn)
            .await
            .map_err(|e| DbmateError::Ledger(format!("Failed to read applied versions: {}", e)))?;

        let mut versions = HashSet::with_capacity(rows.len());
        for row in rows {
            let version: String = row
                .try_get("version")
                .map_err(|e| DbmateError::Ledger(format!("Failed to decode version: {}", e)))?;
            versions.insert(version);
        }
        Ok(versions)
    }

    pub(crate) async fn records(&self, conn: &mut AnyConnection) -> Result<Vec<AppliedVersion>> {
        let rows = sqlx::query(self.select_records)
            .fetch_all(conn)
            .await
            .map_err(|e| DbmateError::Ledger(format!("Failed to read applied versions: {}", e)))?;

        rows.iter()
            .map(|row| {
                let version: String = row
                    .try_get("version")
                    .map_err(|e| DbmateError::Ledger(format!("Failed to decode version: {}", e)))?;
                let seconds: i64 = row.try_get("applied_at").map_err(|e| {
                    DbmateError::Ledger(format!("Failed to decode applied_at: {}", e))
                })?;
                let applied_at = DateTime::<Utc>::from_timestamp(seconds, 0).ok_or_else(|| {
                    DbmateError::Ledger(format!("Invalid applied_at for {}: {}", version, seconds))
                })?;
                Ok(AppliedVersion {
                    version,
                    applied_at,
                })
            })
            .collect()
    }

    pub(crate) async fn insert(&self, conn: &mut AnyConnection, version: &str) -> Result<()> {
        sqlx::query(self.insert)
            .bind(version)
            .execute(conn)
            .await
            .map_err(|e| DbmateError::Ledger(format!("Failed to record migration {}: {}", version, e)))?;
        debug!("Recorded version {} in {}", version, VERSION_TABLE);
        Ok(())
    }

    pub(crate) async fn delete(&self, conn: &mut AnyConnection, version: &str) -> Result<()> {
        let result = sqlx::query(self.delete)
            .bind(version)
            .execute(conn)
            .await
            .map_err(|e| DbmateError::Ledger(format!("Failed to remove migration {}: {}", version, e)))?;
        if result.rows_affected() == 0 {
            return Err(DbmateError::Ledger(format!(
                "Version {} is not recorded in {}",
                version, VERSION_TABLE
            )));
        }
        Ok(())
    }
}

/// Quote an identifier by wrapping it in `quote` and doubling embedded quotes.
pub(crate) fn quote_identifier(name: &str, quote: char) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push(quote);
    for c in name.chars() {
        if c == quote {
            quoted.push(quote);
        }
        quoted.push(c);
    }
    quoted.push(quote);
    quoted
}

/// Database name from the descriptor, rejecting an empty path.
pub(crate) fn require_database_name(descriptor: &ConnectionDescriptor) -> Result<String> {
    let name = descriptor.database_name();
    if name.is_empty() {
        return Err(DbmateError::Config(
            "Database URL does not name a database".to_string(),
        ));
    }
    Ok(name)
}
