//! Versioned schema migrations for the embedded datastore
//!
//! Migrations are bundled into the binary from `migrations/` and tracked in
//! the `_sqlx_migrations` table. Applying is idempotent: versions already
//! recorded are skipped, and a database left dirty by an interrupted run is
//! refused rather than patched over.

use crate::config::DatastoreConfig;
use crate::error::{DatabaseError, DatabaseResult};
use serde::Serialize;
use sqlx::migrate::{Migrate, MigrateError, Migrator};
use sqlx::sqlite::SqliteConnection;
use sqlx::{ConnectOptions, Connection};
use std::collections::HashMap;
use tracing::{info, warn};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Outcome of one migration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub previous_version: i64,
    pub current_version: i64,
    pub applied: Vec<i64>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Highest bundled migration version
pub fn latest_version() -> i64 {
    MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .map(|migration| migration.version)
        .max()
        .unwrap_or(0)
}

/// Apply every pending migration to the datastore at `uri`
pub async fn migrate(uri: &str) -> DatabaseResult<MigrationReport> {
    let mut conn = connect(uri, true).await?;
    let result = apply_pending(&mut conn).await;

    if let Err(e) = conn.close().await {
        warn!("Failed to close migration connection: {}", e);
    }
    result
}

/// Version recorded in the datastore at `uri`, 0 when nothing is applied
pub async fn current_version(uri: &str) -> DatabaseResult<i64> {
    let mut conn = connect(uri, false).await?;
    let result = read_version(&mut conn).await;

    if let Err(e) = conn.close().await {
        warn!("Failed to close migration connection: {}", e);
    }
    result
}

async fn connect(uri: &str, create_if_missing: bool) -> DatabaseResult<SqliteConnection> {
    let options = DatastoreConfig {
        create_if_missing,
        ..Default::default()
    }
    .connect_options(uri)?;

    options
        .connect()
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))
}

async fn read_version(conn: &mut SqliteConnection) -> DatabaseResult<i64> {
    conn.ensure_migrations_table().await?;
    if let Some(version) = conn.dirty_version().await? {
        return Err(DatabaseError::DirtyDatabase(version));
    }
    let applied = conn.list_applied_migrations().await?;
    Ok(applied.iter().map(|m| m.version).max().unwrap_or(0))
}

async fn apply_pending(conn: &mut SqliteConnection) -> DatabaseResult<MigrationReport> {
    let previous_version = read_version(conn).await?;
    info!("Datastore schema at version {}", previous_version);

    let applied: HashMap<i64, _> = conn
        .list_applied_migrations()
        .await?
        .into_iter()
        .map(|m| (m.version, m.checksum))
        .collect();

    for version in applied.keys() {
        let bundled = MIGRATOR.iter().any(|m| m.version == *version);
        if !bundled {
            return Err(MigrateError::VersionMissing(*version).into());
        }
    }

    let mut report = MigrationReport {
        previous_version,
        current_version: previous_version,
        applied: Vec::new(),
    };

    for migration in MIGRATOR.iter() {
        if migration.migration_type.is_down_migration() {
            continue;
        }
        match applied.get(&migration.version) {
            Some(checksum) if *checksum != migration.checksum => {
                return Err(MigrateError::VersionMismatch(migration.version).into());
            }
            Some(_) => continue,
            None => {
                conn.apply(migration).await?;
                info!(
                    "Applied migration {} ({})",
                    migration.version, migration.description
                );
                report.applied.push(migration.version);
                report.current_version = report.current_version.max(migration.version);
            }
        }
    }

    if report.is_noop() {
        info!("Datastore schema is up to date");
    } else {
        info!(
            "Migrated datastore schema from version {} to {}",
            report.previous_version, report.current_version
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_versions_are_contiguous() {
        let versions: Vec<i64> = MIGRATOR.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
        assert_eq!(latest_version(), 4);
    }
}
