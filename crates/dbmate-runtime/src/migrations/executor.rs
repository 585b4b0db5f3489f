use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::{Any, AnyConnection, Connection, Transaction};
use tracing::{debug, info, warn};

use dbmate_core::config::{DbmateConfig, TransactionMode};
use dbmate_core::error::{DbmateError, Result};
use dbmate_core::url::ConnectionDescriptor;

use super::ledger::{latest_version, AppliedVersion, VersionLedger};
use super::store::{self, Migration};
use crate::driver::{close, driver_for, Driver};

/// Executes migrations against a database.
///
/// One executor serves one invocation: it owns the driver bound to the
/// target database and the resolved migrations directory. Every operation
/// opens its own connection and closes it before returning.
pub struct MigrationExecutor {
    driver: Box<dyn Driver>,
    migrations_dir: PathBuf,
    transaction_mode: TransactionMode,
}

/// Outcome of applying pending migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Versions applied by this run, in order.
    pub applied: Vec<String>,
    /// Migrations on disk that were already applied.
    pub skipped: usize,
}

impl MigrationReport {
    /// True when the run had nothing to do.
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// A migration file and whether it has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub version: String,
    pub name: String,
    pub file_name: String,
    pub applied_at: Option<DateTime<Utc>>,
}

impl StatusEntry {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Applied and pending migrations for a database.
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    /// Every migration file, ascending by version.
    pub migrations: Vec<StatusEntry>,
    /// Ledger rows with no matching file on disk.
    pub missing: Vec<AppliedVersion>,
}

impl MigrationStatus {
    pub fn applied_count(&self) -> usize {
        self.migrations.iter().filter(|m| m.is_applied()).count()
    }

    pub fn pending_count(&self) -> usize {
        self.migrations.len() - self.applied_count()
    }
}

impl MigrationExecutor {
    /// Create a new migration executor.
    pub fn new(driver: Box<dyn Driver>, migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            migrations_dir: migrations_dir.into(),
            transaction_mode: TransactionMode::default(),
        }
    }

    /// Build an executor for a connection URL.
    pub fn from_url(url: &str, migrations_dir: impl Into<PathBuf>) -> Result<Self> {
        let descriptor = ConnectionDescriptor::parse(url)?;
        Ok(Self::new(driver_for(&descriptor)?, migrations_dir))
    }

    /// Build an executor from resolved configuration.
    ///
    /// Reads the connection URL from the configured environment variable.
    pub fn from_config(config: &DbmateConfig) -> Result<Self> {
        let descriptor = config.database.descriptor()?;
        Ok(
            Self::new(driver_for(&descriptor)?, config.migrations_dir.clone())
                .with_transaction_mode(config.database.transaction_mode),
        )
    }

    pub fn with_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    fn ledger(&self) -> VersionLedger<'_> {
        VersionLedger::new(self.driver.as_ref())
    }

    /// Create the database if it does not exist.
    pub async fn create_database(&self) -> Result<()> {
        self.driver.create_database().await
    }

    /// Drop the database if it exists.
    pub async fn drop_database(&self) -> Result<()> {
        self.driver.drop_database().await
    }

    /// Write a new, empty migration file.
    pub fn new_migration(&self, name: &str) -> Result<PathBuf> {
        let path = store::create_new(&self.migrations_dir, name)?;
        info!("Created migration {:?}", path);
        Ok(path)
    }

    /// Create the database if necessary, then apply pending migrations.
    pub async fn up(&self) -> Result<MigrationReport> {
        let migrations = store::scan(&self.migrations_dir)?;
        self.driver.create_database().await?;
        self.migrate_loaded(&migrations).await
    }

    /// Apply pending migrations to an existing database.
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let migrations = store::scan(&self.migrations_dir)?;
        self.migrate_loaded(&migrations).await
    }

    /// Revert the most recently applied migration.
    ///
    /// Returns the version that was rolled back.
    pub async fn rollback(&self) -> Result<String> {
        let migrations = store::scan(&self.migrations_dir)?;

        let mut conn = self.driver.connect().await?;
        let result = self.rollback_latest(&mut conn, &migrations).await;
        close(conn).await;

        result
    }

    /// Report which migrations are applied and which are pending.
    pub async fn status(&self) -> Result<MigrationStatus> {
        let migrations = store::scan(&self.migrations_dir)?;

        let mut conn = self.driver.connect().await?;
        let result = self.collect_status(&mut conn, &migrations).await;
        close(conn).await;

        result
    }

    async fn migrate_loaded(&self, migrations: &[Migration]) -> Result<MigrationReport> {
        let mut conn = self.driver.connect().await?;
        let result = self.apply_pending(&mut conn, migrations).await;
        close(conn).await;

        result
    }

    async fn apply_pending(
        &self,
        conn: &mut AnyConnection,
        migrations: &[Migration],
    ) -> Result<MigrationReport> {
        let ledger = self.ledger();
        ledger.ensure(conn).await?;
        let applied = ledger.applied_set(conn).await?;

        let pending = pending_migrations(migrations, &applied);
        let mut report = MigrationReport {
            applied: Vec::with_capacity(pending.len()),
            skipped: migrations.len() - pending.len(),
        };

        if pending.is_empty() {
            info!("No pending migrations");
            return Ok(report);
        }
        debug!(
            "{} pending migrations ({} transaction)",
            pending.len(),
            self.transaction_mode
        );

        match self.transaction_mode {
            TransactionMode::PerMigration => {
                for migration in pending {
                    let mut tx = conn.begin().await?;
                    let outcome = self.apply(&mut tx, migration).await;
                    finish(tx, outcome).await?;

                    info!("Migration applied: {}", migration.file_name);
                    report.applied.push(migration.version.clone());
                }
            }
            TransactionMode::Batch => {
                let mut tx = conn.begin().await?;
                let mut outcome = Ok(());
                for migration in &pending {
                    outcome = self.apply(&mut tx, migration).await;
                    if outcome.is_err() {
                        break;
                    }
                }
                finish(tx, outcome).await?;

                info!("Applied {} migrations in one transaction", pending.len());
                report
                    .applied
                    .extend(pending.iter().map(|m| m.version.clone()));
            }
        }

        Ok(report)
    }

    async fn apply(&self, conn: &mut AnyConnection, migration: &Migration) -> Result<()> {
        info!("Applying migration: {}", migration.file_name);
        self.driver
            .execute(conn, &migration.up_sql)
            .await
            .map_err(|e| in_migration(e, &migration.version))?;
        self.ledger().record_applied(conn, &migration.version).await
    }

    async fn revert(&self, conn: &mut AnyConnection, migration: &Migration) -> Result<()> {
        info!("Rolling back migration: {}", migration.file_name);
        self.driver
            .execute(conn, &migration.down_sql)
            .await
            .map_err(|e| in_migration(e, &migration.version))?;
        self.ledger()
            .record_rolled_back(conn, &migration.version)
            .await
    }

    async fn rollback_latest(
        &self,
        conn: &mut AnyConnection,
        migrations: &[Migration],
    ) -> Result<String> {
        let ledger = self.ledger();
        ledger.ensure(conn).await?;
        let applied = ledger.applied_set(conn).await?;

        let target = latest_version(&applied).ok_or(DbmateError::NoMigrationsApplied)?;
        let migration = migrations
            .iter()
            .find(|m| &m.version == target)
            .ok_or_else(|| DbmateError::MissingMigration(target.clone()))?;

        let mut tx = conn.begin().await?;
        let outcome = self.revert(&mut tx, migration).await;
        finish(tx, outcome).await?;

        info!("Migration rolled back: {}", migration.file_name);
        Ok(migration.version.clone())
    }

    async fn collect_status(
        &self,
        conn: &mut AnyConnection,
        migrations: &[Migration],
    ) -> Result<MigrationStatus> {
        let ledger = self.ledger();
        ledger.ensure(conn).await?;
        let records = ledger.records(conn).await?;

        let applied_at: HashMap<&str, DateTime<Utc>> = records
            .iter()
            .map(|r| (r.version.as_str(), r.applied_at))
            .collect();
        let on_disk: HashSet<&str> = migrations.iter().map(|m| m.version.as_str()).collect();

        let entries = migrations
            .iter()
            .map(|m| StatusEntry {
                version: m.version.clone(),
                name: m.name.clone(),
                file_name: m.file_name.clone(),
                applied_at: applied_at.get(m.version.as_str()).copied(),
            })
            .collect();

        let missing = records
            .iter()
            .filter(|r| !on_disk.contains(r.version.as_str()))
            .cloned()
            .collect();

        Ok(MigrationStatus {
            migrations: entries,
            missing,
        })
    }
}

/// Migrations not yet recorded in the ledger, in version order.
fn pending_migrations<'m>(
    migrations: &'m [Migration],
    applied: &HashSet<String>,
) -> Vec<&'m Migration> {
    migrations
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .collect()
}

/// Tag a SQL failure with the migration that raised it.
fn in_migration(err: DbmateError, version: &str) -> DbmateError {
    match err {
        DbmateError::Sql(source) => DbmateError::SqlExecution {
            version: version.to_string(),
            source,
        },
        other => other,
    }
}

/// Commit on success, roll back on failure. The original error wins.
async fn finish(tx: Transaction<'_, Any>, outcome: Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => {
            tx.commit().await?;
            Ok(())
        }
        Err(err) => {
            if let Err(e) = tx.rollback().await {
                warn!("Failed to roll back transaction: {}", e);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        db_path: PathBuf,
        migrations_dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let db_path = dir.path().join("test.sqlite3");
            let migrations_dir = dir.path().join("db").join("migrations");
            fs::create_dir_all(&migrations_dir).unwrap();
            Self {
                _dir: dir,
                db_path,
                migrations_dir,
            }
        }

        fn write(&self, file_name: &str, up: &str, down: &str) {
            let contents = format!("-- migrate:up\n{}\n\n-- migrate:down\n{}\n", up, down);
            fs::write(self.migrations_dir.join(file_name), contents).unwrap();
        }

        fn executor(&self) -> MigrationExecutor {
            let url = format!("sqlite:{}", self.db_path.display());
            MigrationExecutor::from_url(&url, &self.migrations_dir).unwrap()
        }

        async fn applied(&self) -> HashSet<String> {
            let executor = self.executor();
            let mut conn = executor.driver().connect().await.unwrap();
            let versions = executor.driver().applied_versions(&mut conn).await.unwrap();
            close(conn).await;
            versions
        }

        async fn table_exists(&self, table: &str) -> bool {
            let executor = self.executor();
            let mut conn = executor.driver().connect().await.unwrap();
            let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&mut conn)
                .await
                .unwrap();
            close(conn).await;
            row.map(|r| r.get::<String, _>("name") == table)
                .unwrap_or(false)
        }
    }

    fn three_tables(fx: &Fixture) {
        fx.write(
            "20240101000000_create_users.sql",
            "CREATE TABLE users (id INTEGER PRIMARY KEY);",
            "DROP TABLE users;",
        );
        fx.write(
            "20240102000000_create_posts.sql",
            "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER);",
            "DROP TABLE posts;",
        );
        fx.write(
            "20240103000000_create_tags.sql",
            "CREATE TABLE tags (id INTEGER PRIMARY KEY);\nCREATE TABLE post_tags (post_id INTEGER, tag_id INTEGER);",
            "DROP TABLE post_tags;\nDROP TABLE tags;",
        );
    }

    #[tokio::test]
    async fn test_up_creates_database_and_applies_in_order() {
        let fx = Fixture::new();
        three_tables(&fx);

        let report = fx.executor().up().await.unwrap();
        assert_eq!(
            report.applied,
            vec!["20240101000000", "20240102000000", "20240103000000"]
        );
        assert_eq!(report.skipped, 0);
        assert!(fx.db_path.exists());
        assert!(fx.table_exists("post_tags").await);
        assert_eq!(fx.applied().await.len(), 3);
    }

    #[tokio::test]
    async fn test_up_twice_is_idempotent() {
        let fx = Fixture::new();
        three_tables(&fx);
        let executor = fx.executor();

        executor.up().await.unwrap();
        let second = executor.up().await.unwrap();

        assert!(second.is_empty());
        assert_eq!(second.skipped, 3);
        assert_eq!(fx.applied().await.len(), 3);
    }

    #[tokio::test]
    async fn test_migrate_applies_only_new_files() {
        let fx = Fixture::new();
        fx.write(
            "20240101000000_create_users.sql",
            "CREATE TABLE users (id INTEGER PRIMARY KEY);",
            "DROP TABLE users;",
        );
        let executor = fx.executor();
        executor.up().await.unwrap();

        fx.write(
            "20240102000000_add_email.sql",
            "ALTER TABLE users ADD COLUMN email TEXT;",
            "ALTER TABLE users DROP COLUMN email;",
        );
        let report = executor.migrate().await.unwrap();
        assert_eq!(report.applied, vec!["20240102000000"]);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_migrate_does_not_provision() {
        let fx = Fixture::new();
        three_tables(&fx);

        let err = fx.executor().migrate().await.unwrap_err();
        assert!(matches!(err, DbmateError::Connection(_)));
        assert!(!fx.db_path.exists());
    }

    #[tokio::test]
    async fn test_rollback_reverts_only_latest() {
        let fx = Fixture::new();
        three_tables(&fx);
        let executor = fx.executor();
        executor.up().await.unwrap();

        let version = executor.rollback().await.unwrap();
        assert_eq!(version, "20240103000000");

        let applied = fx.applied().await;
        assert_eq!(applied.len(), 2);
        assert!(!applied.contains("20240103000000"));
        assert!(!fx.table_exists("tags").await);
        assert!(fx.table_exists("posts").await);

        let version = executor.rollback().await.unwrap();
        assert_eq!(version, "20240102000000");
        assert_eq!(fx.applied().await.len(), 1);
        assert!(fx.table_exists("users").await);
    }

    #[tokio::test]
    async fn test_rollback_with_nothing_applied() {
        let fx = Fixture::new();
        three_tables(&fx);
        let executor = fx.executor();
        executor.create_database().await.unwrap();

        let err = executor.rollback().await.unwrap_err();
        assert!(matches!(err, DbmateError::NoMigrationsApplied));
    }

    #[tokio::test]
    async fn test_rollback_missing_file() {
        let fx = Fixture::new();
        three_tables(&fx);
        let executor = fx.executor();
        executor.up().await.unwrap();

        fs::remove_file(fx.migrations_dir.join("20240103000000_create_tags.sql")).unwrap();
        let err = executor.rollback().await.unwrap_err();
        assert!(matches!(err, DbmateError::MissingMigration(ref v) if v == "20240103000000"));
        assert_eq!(fx.applied().await.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_migration_keeps_earlier_progress() {
        let fx = Fixture::new();
        fx.write(
            "20240101000000_create_users.sql",
            "CREATE TABLE users (id INTEGER PRIMARY KEY);",
            "DROP TABLE users;",
        );
        fx.write(
            "20240102000000_create_posts.sql",
            "CREATE TABLE posts (id INTEGER PRIMARY KEY);",
            "DROP TABLE posts;",
        );
        fx.write(
            "20240103000000_broken.sql",
            "CREATE TABLE partial (id INTEGER);\nINSERT INTO no_such_table VALUES (1);",
            "DROP TABLE partial;",
        );
        fx.write(
            "20240104000000_after.sql",
            "CREATE TABLE after_broken (id INTEGER);",
            "DROP TABLE after_broken;",
        );

        let err = fx.executor().up().await.unwrap_err();
        assert!(matches!(
            err,
            DbmateError::SqlExecution { ref version, .. } if version == "20240103000000"
        ));

        let applied = fx.applied().await;
        assert!(applied.contains("20240101000000"));
        assert!(applied.contains("20240102000000"));
        assert!(!applied.contains("20240103000000"));
        assert!(!applied.contains("20240104000000"));
        assert!(!fx.table_exists("partial").await);
        assert!(!fx.table_exists("after_broken").await);
    }

    #[tokio::test]
    async fn test_batch_mode_is_all_or_nothing() {
        let fx = Fixture::new();
        fx.write(
            "20240101000000_create_users.sql",
            "CREATE TABLE users (id INTEGER PRIMARY KEY);",
            "DROP TABLE users;",
        );
        fx.write(
            "20240102000000_broken.sql",
            "INSERT INTO no_such_table VALUES (1);",
            "",
        );

        let executor = fx.executor().with_transaction_mode(TransactionMode::Batch);
        let err = executor.up().await.unwrap_err();
        assert!(matches!(err, DbmateError::SqlExecution { .. }));

        assert!(fx.applied().await.is_empty());
        assert!(!fx.table_exists("users").await);
    }

    #[tokio::test]
    async fn test_batch_mode_applies_everything() {
        let fx = Fixture::new();
        three_tables(&fx);

        let executor = fx.executor().with_transaction_mode(TransactionMode::Batch);
        let report = executor.up().await.unwrap();
        assert_eq!(report.applied.len(), 3);
        assert_eq!(fx.applied().await.len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_file_rejected_before_database_access() {
        let fx = Fixture::new();
        three_tables(&fx);
        fs::write(
            fx.migrations_dir.join("20240104000000_no_markers.sql"),
            "-- migrate:up\nCREATE TABLE x (id INTEGER);\n",
        )
        .unwrap();

        let err = fx.executor().up().await.unwrap_err();
        assert!(matches!(err, DbmateError::MalformedMigration { .. }));
        assert!(!fx.db_path.exists());
    }

    #[tokio::test]
    async fn test_missing_migrations_dir_fails_before_provisioning() {
        let fx = Fixture::new();
        let url = format!("sqlite:{}", fx.db_path.display());
        let executor =
            MigrationExecutor::from_url(&url, fx.migrations_dir.join("typo")).unwrap();

        let err = executor.up().await.unwrap_err();
        assert!(matches!(err, DbmateError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
        assert!(!fx.db_path.exists());
    }

    #[tokio::test]
    async fn test_create_and_drop_are_idempotent() {
        let fx = Fixture::new();
        let executor = fx.executor();

        executor.drop_database().await.unwrap();
        executor.create_database().await.unwrap();
        executor.create_database().await.unwrap();
        assert!(fx.db_path.exists());

        executor.drop_database().await.unwrap();
        executor.drop_database().await.unwrap();
        assert!(!fx.db_path.exists());
    }

    #[tokio::test]
    async fn test_status_reports_pending_and_missing() {
        let fx = Fixture::new();
        three_tables(&fx);
        let executor = fx.executor();
        executor.up().await.unwrap();
        executor.rollback().await.unwrap();

        fs::remove_file(fx.migrations_dir.join("20240101000000_create_users.sql")).unwrap();

        let status = executor.status().await.unwrap();
        assert_eq!(status.migrations.len(), 2);
        assert_eq!(status.applied_count(), 1);
        assert_eq!(status.pending_count(), 1);
        assert!(status.migrations[0].is_applied());
        assert_eq!(status.migrations[1].name, "create_tags");
        assert!(!status.migrations[1].is_applied());

        assert_eq!(status.missing.len(), 1);
        assert_eq!(status.missing[0].version, "20240101000000");
    }

    #[tokio::test]
    async fn test_new_migration_is_picked_up() {
        let fx = Fixture::new();
        let executor = fx.executor();

        let path = executor.new_migration("create widgets").unwrap();
        assert!(path.starts_with(&fx.migrations_dir));
        assert!(path.to_str().unwrap().ends_with("_create_widgets.sql"));

        let report = executor.up().await.unwrap();
        assert_eq!(report.applied.len(), 1);
    }

    #[test]
    fn test_in_migration_tags_sql_errors() {
        let err = in_migration(DbmateError::Sql(sqlx::Error::RowNotFound), "20240101000000");
        assert!(matches!(
            err,
            DbmateError::SqlExecution { ref version, .. } if version == "20240101000000"
        ));

        let err = in_migration(DbmateError::NoMigrationsApplied, "20240101000000");
        assert!(matches!(err, DbmateError::NoMigrationsApplied));
    }

    #[test]
    fn test_pending_migrations() {
        let migrations = store::migrations_from_snapshot(vec![
            store::MigrationSource::new("2_b.sql", "-- migrate:up\n-- migrate:down\n"),
            store::MigrationSource::new("1_a.sql", "-- migrate:up\n-- migrate:down\n"),
            store::MigrationSource::new("3_c.sql", "-- migrate:up\n-- migrate:down\n"),
        ])
        .unwrap();
        let applied: HashSet<String> = ["2".to_string()].into_iter().collect();

        let pending: Vec<_> = pending_migrations(&migrations, &applied)
            .into_iter()
            .map(|m| m.version.as_str())
            .collect();
        assert_eq!(pending, vec!["1", "3"]);
    }
}
