//! Version ledger: the table inside the target database that records which
//! migrations have been applied.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::AnyConnection;
use tracing::debug;

use dbmate_core::error::Result;

use crate::driver::Driver;

/// A ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedVersion {
    pub version: String,
    pub applied_at: DateTime<Utc>,
}

/// Thin persistence layer over a driver's ledger operations.
///
/// `record_applied` and `record_rolled_back` are meant to run on the same
/// transaction as the migration SQL they account for.
pub struct VersionLedger<'d> {
    driver: &'d dyn Driver,
}

impl<'d> VersionLedger<'d> {
    pub fn new(driver: &'d dyn Driver) -> Self {
        Self { driver }
    }

    /// Create the ledger table if needed. Safe to call on every invocation.
    pub async fn ensure(&self, conn: &mut AnyConnection) -> Result<()> {
        self.driver.ensure_version_table(conn).await
    }

    /// Versions currently recorded as applied.
    pub async fn applied_set(&self, conn: &mut AnyConnection) -> Result<HashSet<String>> {
        let applied = self.driver.applied_versions(conn).await?;
        debug!("Already applied migrations: {:?}", applied);
        Ok(applied)
    }

    /// Ledger rows ascending by version.
    pub async fn records(&self, conn: &mut AnyConnection) -> Result<Vec<AppliedVersion>> {
        self.driver.applied_records(conn).await
    }

    pub async fn record_applied(&self, conn: &mut AnyConnection, version: &str) -> Result<()> {
        self.driver.record_applied(conn, version).await
    }

    pub async fn record_rolled_back(&self, conn: &mut AnyConnection, version: &str) -> Result<()> {
        self.driver.record_rolled_back(conn, version).await
    }
}

/// Most recent applied version, by version order.
pub fn latest_version(applied: &HashSet<String>) -> Option<&String> {
    applied.iter().max()
}
