mod executor;
mod ledger;
pub mod store;

pub use executor::{MigrationExecutor, MigrationReport, MigrationStatus, StatusEntry};
pub use ledger::{latest_version, AppliedVersion, VersionLedger};
pub use store::{Migration, MigrationSource};
