use std::collections::HashSet;

use sqlx::AnyConnection;
use tracing::info;

use dbmate_core::url::ConnectionDescriptor;

use super::{
    close, connect_url, quote_identifier, require_database_name, Driver, DriverFuture, LedgerSql,
};
use crate::migrations::AppliedVersion;

static LEDGER: LedgerSql = LedgerSql {
    create_table: "CREATE TABLE IF NOT EXISTS schema_migrations (\
                   version VARCHAR(255) PRIMARY KEY, \
                   applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP)",
    select_versions: "SELECT version FROM schema_migrations",
    select_records: "SELECT version, CAST(UNIX_TIMESTAMP(applied_at) AS SIGNED) AS applied_at \
                     FROM schema_migrations ORDER BY version ASC",
    insert: "INSERT INTO schema_migrations (version) VALUES (?)",
    delete: "DELETE FROM schema_migrations WHERE version = ?",
};

/// MySQL and MariaDB driver.
///
/// MySQL commits DDL implicitly, so a failing migration that already ran
/// schema statements cannot be fully undone by the surrounding transaction.
pub struct MySqlDriver {
    descriptor: ConnectionDescriptor,
}

impl MySqlDriver {
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self { descriptor }
    }

    /// Server URL without a default database.
    fn admin_url(&self) -> String {
        self.descriptor.with_path("").to_string()
    }
}

impl Driver for MySqlDriver {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn create_database(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            let name = require_database_name(&self.descriptor)?;
            let mut conn = connect_url(&self.admin_url()).await?;

            let sql = format!(
                "CREATE DATABASE IF NOT EXISTS {}",
                quote_identifier(&name, '`')
            );
            let result = sqlx::Executor::execute(&mut conn, sqlx::raw_sql(&sql)).await;
            close(conn).await;

            result?;
            info!("Database {} is present", name);
            Ok(())
        })
    }

    fn drop_database(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            let name = require_database_name(&self.descriptor)?;
            let mut conn = connect_url(&self.admin_url()).await?;

            let sql = format!("DROP DATABASE IF EXISTS {}", quote_identifier(&name, '`'));
            let result = sqlx::Executor::execute(&mut conn, sqlx::raw_sql(&sql)).await;
            close(conn).await;

            result?;
            info!("Dropped database {}", name);
            Ok(())
        })
    }

    fn connect(&self) -> DriverFuture<'_, AnyConnection> {
        Box::pin(async move { connect_url(self.descriptor.as_str()).await })
    }

    fn ensure_version_table<'a>(&'a self, conn: &'a mut AnyConnection) -> DriverFuture<'a, ()> {
        Box::pin(LEDGER.ensure(conn))
    }

    fn applied_versions<'a>(
        &'a self,
        conn: &'a mut AnyConnection,
    ) -> DriverFuture<'a, HashSet<String>> {
        Box::pin(LEDGER.versions(conn))
    }

    fn applied_records<'a>(
        &'a self,
        conn: &'a mut AnyConnection,
    ) -> DriverFuture<'a, Vec<AppliedVersion>> {
        Box::pin(LEDGER.records(conn))
    }

    fn record_applied<'a>(
        &'a self,
        conn: &'a mut AnyConnection,
        version: &'a str,
    ) -> DriverFuture<'a, ()> {
        Box::pin(LEDGER.insert(conn, version))
    }

    fn record_rolled_back<'a>(
        &'a self,
        conn: &'a mut AnyConnection,
        version: &'a str,
    ) -> DriverFuture<'a, ()> {
        Box::pin(LEDGER.delete(conn, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_url_drops_database() {
        let driver =
            MySqlDriver::new(ConnectionDescriptor::parse("mysql://root:pw@localhost:3306/shop").unwrap());
        assert_eq!(driver.admin_url(), "mysql://root:pw@localhost:3306");
    }

    #[test]
    fn test_ledger_uses_positional_placeholders() {
        assert!(LEDGER.insert.ends_with("VALUES (?)"));
        assert!(LEDGER.delete.ends_with("version = ?"));
    }
}
