use std::collections::HashSet;
use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use sqlx::AnyConnection;
use tracing::{debug, info};

use dbmate_core::error::{DbmateError, Result};
use dbmate_core::url::ConnectionDescriptor;

use super::{close, connect_url, Driver, DriverFuture, LedgerSql};
use crate::migrations::AppliedVersion;

static LEDGER: LedgerSql = LedgerSql {
    create_table: "CREATE TABLE IF NOT EXISTS schema_migrations (\
                   version TEXT PRIMARY KEY, \
                   applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')))",
    select_versions: "SELECT version FROM schema_migrations",
    select_records: "SELECT version, applied_at FROM schema_migrations ORDER BY version ASC",
    insert: "INSERT INTO schema_migrations (version) VALUES (?)",
    delete: "DELETE FROM schema_migrations WHERE version = ?",
};

const SCHEME_PREFIXES: [&str; 4] = ["sqlite3://", "sqlite://", "sqlite3:", "sqlite:"];

/// Characters escaped when a file path is put back into a `sqlite:` URL.
const PATH_ESCAPES: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b'?').add(b'#');

/// SQLite driver. The database is a single file on local disk.
pub struct SqliteDriver {
    path: PathBuf,
}

impl SqliteDriver {
    pub fn new(descriptor: ConnectionDescriptor) -> Result<Self> {
        let path = database_path(descriptor.as_str());
        if path.as_os_str().is_empty() {
            return Err(DbmateError::Config(
                "SQLite URL does not name a database file".to_string(),
            ));
        }
        Ok(Self { path })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn url(&self, create: bool) -> String {
        let mode = if create { "rwc" } else { "rw" };
        let path = self.path.to_string_lossy();
        format!(
            "sqlite:{}?mode={}",
            utf8_percent_encode(&path, PATH_ESCAPES),
            mode
        )
    }
}

/// File path named by a `sqlite:` URL.
///
/// Everything after the scheme up to the query string is the path, so both
/// `sqlite:db/app.sqlite3` and `sqlite:///tmp/app.sqlite3` work. The path is
/// percent-decoded, so `my%20db.sqlite3` names `my db.sqlite3`.
fn database_path(raw: &str) -> PathBuf {
    let rest = SCHEME_PREFIXES
        .iter()
        .find_map(|prefix| raw.strip_prefix(prefix))
        .unwrap_or(raw);
    let rest = rest.split('?').next().unwrap_or_default();
    PathBuf::from(percent_decode_str(rest).decode_utf8_lossy().into_owned())
}

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn create_database(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            if self.path.exists() {
                debug!("Database {} already exists", self.path.display());
                return Ok(());
            }
            let conn = connect_url(&self.url(true)).await?;
            close(conn).await;
            info!("Created database {}", self.path.display());
            Ok(())
        })
    }

    fn drop_database(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    info!("Dropped database {}", self.path.display());
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Database {} does not exist", self.path.display());
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn connect(&self) -> DriverFuture<'_, AnyConnection> {
        Box::pin(async move { connect_url(&self.url(false)).await })
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
