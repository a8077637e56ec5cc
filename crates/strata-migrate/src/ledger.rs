//! Version ledger.
//!
//! This module manages the table recording which migration versions have
//! been applied, and the companion lock table used to keep two runners
//! from migrating the same database at once.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};

/// Default name of the ledger table.
pub const DEFAULT_LEDGER_TABLE: &str = "strata_migrations";

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Migration version.
    pub version: i64,
    /// Migration name.
    pub name: String,
    /// When the migration started.
    pub start_time: DateTime<Utc>,
    /// When the migration committed.
    pub end_time: DateTime<Utc>,
    /// Whether reverting past this migration requires force.
    pub breakpoint: bool,
}

/// How `set_breakpoint` changes the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointChange {
    /// Set the flag.
    Set,
    /// Clear the flag.
    Unset,
    /// Invert the flag.
    Toggle,
}

/// The current holder of the migration lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    /// Identity of the holder.
    pub owner: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

type EntryRow = (i64, String, DateTime<Utc>, DateTime<Utc>, bool);

/// Manages the ledger and lock tables.
///
/// Every method takes the connection to use, so ledger writes join the
/// transaction of the migration they belong to.
#[derive(Debug, Clone)]
pub struct VersionLedger {
    table: String,
    lock_table: String,
}

impl Default for VersionLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_TABLE)
    }
}

impl VersionLedger {
    /// Creates a ledger stored in `table`; the lock lives in `<table>_lock`.
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            lock_table: format!("{table}_lock"),
            table,
        }
    }

    /// The ledger table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The lock table name.
    #[must_use]
    pub fn lock_table(&self) -> &str {
        &self.lock_table
    }

    fn quoted(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Creates the ledger and lock tables if they are missing.
    pub async fn ensure_store(&self, conn: &mut SqliteConnection) -> Result<()> {
        let ledger_sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
    version BIGINT NOT NULL PRIMARY KEY,
    migration_name VARCHAR(100) NOT NULL,
    start_time TIMESTAMP NOT NULL,
    end_time TIMESTAMP NOT NULL,
    breakpoint BOOLEAN NOT NULL DEFAULT FALSE
)",
            Self::quoted(&self.table)
        );
        let lock_sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id INTEGER NOT NULL PRIMARY KEY,
    owner VARCHAR(255) NOT NULL,
    acquired_at TIMESTAMP NOT NULL
)",
            Self::quoted(&self.lock_table)
        );

        sqlx::query(&ledger_sql).execute(&mut *conn).await?;
        sqlx::query(&lock_sql).execute(&mut *conn).await?;
        Ok(())
    }

    /// Returns true if the ledger table has been created.
    pub async fn store_exists(&self, conn: &mut SqliteConnection) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(&self.table)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(row.is_some())
    }

    /// Returns every applied entry, ascending by version.
    pub async fn list_applied(&self, conn: &mut SqliteConnection) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT version, migration_name, start_time, end_time, breakpoint \
             FROM {} ORDER BY version",
            Self::quoted(&self.table)
        );
        let rows: Vec<EntryRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;

        Ok(rows
            .into_iter()
            .map(
                |(version, name, start_time, end_time, breakpoint)| LedgerEntry {
                    version,
                    name,
                    start_time,
                    end_time,
                    breakpoint,
                },
            )
            .collect())
    }

    /// Returns the entry for `version`, if applied.
    pub async fn get(
        &self,
        conn: &mut SqliteConnection,
        version: i64,
    ) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT version, migration_name, start_time, end_time, breakpoint \
             FROM {} WHERE version = ?",
            Self::quoted(&self.table)
        );
        let row: Option<EntryRow> = sqlx::query_as(&sql)
            .bind(version)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(
            |(version, name, start_time, end_time, breakpoint)| LedgerEntry {
                version,
                name,
                start_time,
                end_time,
                breakpoint,
            },
        ))
    }

    /// Records a migration as applied.
    ///
    /// Fails with [`MigrateError::DuplicateVersion`] if it already is.
    pub async fn record_applied(
        &self,
        conn: &mut SqliteConnection,
        entry: &LedgerEntry,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (version, migration_name, start_time, end_time, breakpoint) \
             VALUES (?, ?, ?, ?, ?)",
            Self::quoted(&self.table)
        );
        let result = sqlx::query(&sql)
            .bind(entry.version)
            .bind(&entry.name)
            .bind(entry.start_time)
            .bind(entry.end_time)
            .bind(entry.breakpoint)
            .execute(&mut *conn)
            .await;

        match result {
            Ok(_) => {
                debug!(version = entry.version, "Recorded migration in ledger");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(MigrateError::DuplicateVersion {
                    version: entry.version,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a migration record (for rollback).
    ///
    /// Fails with [`MigrateError::MissingLedgerEntry`] if there is none.
    pub async fn record_reverted(&self, conn: &mut SqliteConnection, version: i64) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE version = ?", Self::quoted(&self.table));
        let result = sqlx::query(&sql)
            .bind(version)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MigrateError::MissingLedgerEntry { version });
        }

        debug!(version, "Removed migration from ledger");
        Ok(())
    }

    /// Changes the breakpoint flag of an applied version, returning the new
    /// value.
    pub async fn set_breakpoint(
        &self,
        conn: &mut SqliteConnection,
        version: i64,
        change: BreakpointChange,
    ) -> Result<bool> {
        let entry = self
            .get(conn, version)
            .await?
            .ok_or(MigrateError::MissingLedgerEntry { version })?;

        let value = match change {
            BreakpointChange::Set => true,
            BreakpointChange::Unset => false,
            BreakpointChange::Toggle => !entry.breakpoint,
        };

        let sql = format!(
            "UPDATE {} SET breakpoint = ? WHERE version = ?",
            Self::quoted(&self.table)
        );
        sqlx::query(&sql)
            .bind(value)
            .bind(version)
            .execute(&mut *conn)
            .await?;
        Ok(value)
    }

    /// Clears every breakpoint, returning how many were set.
    pub async fn remove_all_breakpoints(&self, conn: &mut SqliteConnection) -> Result<u64> {
        let sql = format!(
            "UPDATE {} SET breakpoint = FALSE WHERE breakpoint = TRUE",
            Self::quoted(&self.table)
        );
        let result = sqlx::query(&sql).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    /// Takes the migration lock for `owner`.
    ///
    /// Fails with [`MigrateError::LockContention`] naming the current holder
    /// if the lock is already taken.
    pub async fn acquire_lock(&self, conn: &mut SqliteConnection, owner: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, owner, acquired_at) VALUES (1, ?, ?)",
            Self::quoted(&self.lock_table)
        );
        let result = sqlx::query(&sql)
            .bind(owner)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await;

        match result {
            Ok(_) => {
                debug!(owner, "Acquired migration lock");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                let holder = self.lock_holder(conn).await?;
                let (owner, acquired_at) = holder
                    .map(|h| (h.owner, h.acquired_at))
                    .unwrap_or_else(|| ("unknown".to_string(), Utc::now()));
                Err(MigrateError::LockContention { owner, acquired_at })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Releases the migration lock held by `owner`.
    pub async fn release_lock(&self, conn: &mut SqliteConnection, owner: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE id = 1 AND owner = ?",
            Self::quoted(&self.lock_table)
        );
        let result = sqlx::query(&sql).bind(owner).execute(&mut *conn).await?;
        if result.rows_affected() == 0 {
            warn!(owner, "Migration lock was not held at release");
        } else {
            debug!(owner, "Released migration lock");
        }
        Ok(())
    }

    /// Removes the lock regardless of its owner, returning the old holder.
    pub async fn force_unlock(&self, conn: &mut SqliteConnection) -> Result<Option<LockHolder>> {
        let holder = self.lock_holder(conn).await?;
        let sql = format!("DELETE FROM {}", Self::quoted(&self.lock_table));
        sqlx::query(&sql).execute(&mut *conn).await?;
        Ok(holder)
    }

    /// Returns the current lock holder, if any.
    pub async fn lock_holder(&self, conn: &mut SqliteConnection) -> Result<Option<LockHolder>> {
        let sql = format!(
            "SELECT owner, acquired_at FROM {} WHERE id = 1",
            Self::quoted(&self.lock_table)
        );
        let row: Option<(String, DateTime<Utc>)> =
            sqlx::query_as(&sql).fetch_optional(&mut *conn).await?;
        Ok(row.map(|(owner, acquired_at)| LockHolder { owner, acquired_at }))
    }
}
