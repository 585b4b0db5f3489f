use std::collections::HashSet;

use sqlx::AnyConnection;
use tracing::{debug, info};

use dbmate_core::url::ConnectionDescriptor;

use super::{
    close, connect_url, quote_identifier, require_database_name, Driver, DriverFuture, LedgerSql,
};
use crate::migrations::AppliedVersion;

/// SQLSTATE raised by `CREATE DATABASE` when the name is taken.
const DUPLICATE_DATABASE: &str = "42P04";

/// Maintenance database used for CREATE/DROP DATABASE.
const ADMIN_DATABASE: &str = "postgres";

static LEDGER: LedgerSql = LedgerSql {
    create_table: "CREATE TABLE IF NOT EXISTS schema_migrations (\
                   version VARCHAR(255) PRIMARY KEY, \
                   applied_at TIMESTAMPTZ NOT NULL DEFAULT now())",
    select_versions: "SELECT version FROM schema_migrations",
    select_records: "SELECT version, CAST(EXTRACT(EPOCH FROM applied_at) AS BIGINT) AS applied_at \
                     FROM schema_migrations ORDER BY version ASC",
    insert: "INSERT INTO schema_migrations (version) VALUES ($1)",
    delete: "DELETE FROM schema_migrations WHERE version = $1",
};

/// PostgreSQL driver.
pub struct PostgresDriver {
    descriptor: ConnectionDescriptor,
}

impl PostgresDriver {
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self { descriptor }
    }

    /// URL of the maintenance database on the same server.
    fn admin_url(&self) -> String {
        self.descriptor
            .with_path(&format!("/{}", ADMIN_DATABASE))
            .to_string()
    }
}

fn is_duplicate_database(err: &sqlx::Error) -> bool {
    is_duplicate_code(err.as_database_error().and_then(|e| e.code()).as_deref())
}

fn is_duplicate_code(code: Option<&str>) -> bool {
    code == Some(DUPLICATE_DATABASE)
}

impl Driver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn create_database(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            let name = require_database_name(&self.descriptor)?;
            let mut conn = connect_url(&self.admin_url()).await?;

            let sql = format!("CREATE DATABASE {}", quote_identifier(&name, '"'));
            let result = sqlx::Executor::execute(&mut conn, sqlx::raw_sql(&sql)).await;
            close(conn).await;

            match result {
                Ok(_) => {
                    info!("Created database {}", name);
                    Ok(())
                }
                Err(e) if is_duplicate_database(&e) => {
                    debug!("Database {} already exists", name);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn drop_database(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            let name = require_database_name(&self.descriptor)?;
            let mut conn = connect_url(&self.admin_url()).await?;

            let sql = format!("DROP DATABASE IF EXISTS {}", quote_identifier(&name, '"'));
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
