pub mod driver;
pub mod migrations;

pub use driver::{driver_for, Driver, MySqlDriver, PostgresDriver, SqliteDriver};
pub use migrations::{
    Migration, MigrationExecutor, MigrationReport, MigrationSource, MigrationStatus, StatusEntry,
};
