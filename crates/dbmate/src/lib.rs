//! Database schema migrations for PostgreSQL, MySQL and SQLite.
//!
//! Migrations are plain SQL files named `<version>_<name>.sql`, each holding a
//! `-- migrate:up` and a `-- migrate:down` section. Applied versions are
//! recorded in a `schema_migrations` table inside the target database.
//!
//! ```no_run
//! use dbmate::prelude::*;
//!
//! # async fn run() -> dbmate::Result<()> {
//! let config = DbmateConfig::default().with_migrations_dir("db/migrations");
//! let executor = MigrationExecutor::from_config(&config)?;
//! let report = executor.up().await?;
//! println!("applied {} migrations", report.applied.len());
//! # Ok(())
//! # }
//! ```

pub use dbmate_core::{
    ConnectionDescriptor, DatabaseConfig, DbmateConfig, DbmateError, Result, TransactionMode,
};
pub use dbmate_runtime::{
    driver_for, Driver, Migration, MigrationExecutor, MigrationReport, MigrationSource,
    MigrationStatus, StatusEntry,
};

pub mod prelude {
    pub use dbmate_core::{DbmateConfig, DbmateError, Result, TransactionMode};
    pub use dbmate_runtime::{MigrationExecutor, MigrationReport, MigrationStatus};
}
