//! Migration runner.
//!
//! This module applies and reverts migrations against a database. Each run
//! holds one pooled connection for its whole duration: the lock, the
//! ledger reads and every migration transaction go through it.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Connection;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::context::{Schema, SchemaMode};
use crate::dialect::MigrationDialect;
use crate::error::{MigrateError, Result};
use crate::inverse::{invert_all, Irreversible};
use crate::ledger::{BreakpointChange, LedgerEntry, LockHolder, VersionLedger};
use crate::migration::{Migration, MigrationFn, MigrationLogic};
use crate::operations::ChangeSet;

/// Outcome of a `migrate_up` or `migrate_down` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Versions applied, in order.
    pub applied: Vec<i64>,
    /// Versions reverted, in order.
    pub reverted: Vec<i64>,
    /// Compiled statements. Only filled in dry-run mode.
    pub statements: Vec<String>,
    /// The run stopped early because cancellation was requested.
    pub cancelled: bool,
    /// Nothing was executed.
    pub dry_run: bool,
}

impl RunReport {
    /// Returns true if no version changed state.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.reverted.is_empty()
    }
}

/// Status of one migration version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Migration version.
    pub version: i64,
    /// Migration name.
    pub name: String,
    /// Whether the version is recorded in the ledger.
    pub applied: bool,
    /// When it was applied.
    pub applied_at: Option<DateTime<Utc>>,
    /// Whether a breakpoint is set.
    pub breakpoint: bool,
    /// Recorded in the ledger but not among the provided migrations.
    pub missing: bool,
}

/// What a migration runs in one direction.
enum Step {
    /// Author-written logic.
    Logic(MigrationFn),
    /// Statements compiled ahead of time.
    Statements(Vec<String>),
}

enum LedgerWrite {
    Applied { start_time: DateTime<Utc> },
    Reverted,
}

/// Releases the migration lock if a locked run is dropped before it could
/// release the lock itself.
struct LockGuard {
    pool: SqlitePool,
    ledger: VersionLedger,
    owner: String,
    armed: bool,
}

impl LockGuard {
    fn new(pool: &SqlitePool, ledger: &VersionLedger, owner: &str) -> Self {
        Self {
            pool: pool.clone(),
            ledger: ledger.clone(),
            owner: owner.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(owner = %self.owner, "Run dropped outside a runtime; migration lock left in place");
                return;
            }
        };

        let pool = self.pool.clone();
        let ledger = self.ledger.clone();
        let owner = std::mem::take(&mut self.owner);
        warn!(owner = %owner, "Run dropped while holding the migration lock; releasing it");
        handle.spawn(async move {
            let released = match pool.acquire().await {
                Ok(mut conn) => ledger.release_lock(&mut conn, &owner).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = released {
                warn!(error = %e, owner = %owner, "Failed to release migration lock");
            }
        });
    }
}

/// Applies and reverts a fixed set of migrations.
pub struct MigrationRunner<D: MigrationDialect> {
    pool: SqlitePool,
    dialect: D,
    ledger: VersionLedger,
    migrations: Vec<Migration>,
    config: RunnerConfig,
    cancel: Arc<AtomicBool>,
}

impl<D: MigrationDialect> MigrationRunner<D> {
    /// Creates a runner with the default configuration.
    ///
    /// Fails with [`MigrateError::InvalidDefinition`] if two migrations
    /// share a version.
    pub fn new(pool: SqlitePool, dialect: D, migrations: Vec<Migration>) -> Result<Self> {
        Self::with_config(pool, dialect, migrations, RunnerConfig::default())
    }

    /// Creates a runner with an explicit configuration.
    pub fn with_config(
        pool: SqlitePool,
        dialect: D,
        mut migrations: Vec<Migration>,
        config: RunnerConfig,
    ) -> Result<Self> {
        migrations.sort_by_key(Migration::version);
        if let Some(pair) = migrations
            .windows(2)
            .find(|pair| pair[0].version() == pair[1].version())
        {
            return Err(MigrateError::InvalidDefinition {
                version: pair[1].version(),
                name: pair[1].name().to_string(),
                reason: format!("version is also used by '{}'", pair[0].name()),
            });
        }

        Ok(Self {
            pool,
            dialect,
            ledger: VersionLedger::new(config.ledger_table.clone()),
            migrations,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The migrations, ascending by version.
    #[must_use]
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    /// Returns the ledger.
    #[must_use]
    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// A flag that, once set, stops a run before its next migration.
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn find(&self, version: i64) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, Migration::version)
            .ok()
            .map(|i| &self.migrations[i])
    }

    /// Creates the ledger and lock tables.
    pub async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.ledger.ensure_store(&mut conn).await
    }

    /// Applies pending migrations up to and including `target`, or all of
    /// them when no target is given.
    ///
    /// Stops at the first failure; versions applied before it stay applied.
    pub async fn migrate_up(&self, target: Option<i64>) -> Result<RunReport> {
        let mut conn = self.pool.acquire().await?;
        if self.config.dry_run {
            return self.run_up(&mut conn, target).await;
        }

        self.ledger.ensure_store(&mut conn).await?;
        self.ledger
            .acquire_lock(&mut conn, &self.config.lock_owner)
            .await?;
        let guard = LockGuard::new(&self.pool, &self.ledger, &self.config.lock_owner);

        let outcome = AssertUnwindSafe(self.run_up(&mut conn, target))
            .catch_unwind()
            .await;
        self.finish_locked(&mut conn, guard, outcome).await
    }

    /// Reverts applied migrations with a version at or above `target`,
    /// newest first. Without a target only the newest one is reverted.
    ///
    /// A breakpoint on any of them fails the run unless `force` is set.
    pub async fn migrate_down(&self, target: Option<i64>, force: bool) -> Result<RunReport> {
        let mut conn = self.pool.acquire().await?;
        if self.config.dry_run {
            return self.run_down(&mut conn, target, force).await;
        }

        self.ledger.ensure_store(&mut conn).await?;
        self.ledger
            .acquire_lock(&mut conn, &self.config.lock_owner)
            .await?;
        let guard = LockGuard::new(&self.pool, &self.ledger, &self.config.lock_owner);

        let outcome = AssertUnwindSafe(self.run_down(&mut conn, target, force))
            .catch_unwind()
            .await;
        self.finish_locked(&mut conn, guard, outcome).await
    }

    /// Releases the lock after a locked run, then returns its outcome or
    /// resumes its panic.
    ///
    /// The run's own error takes precedence over a failed release.
    async fn finish_locked(
        &self,
        conn: &mut SqliteConnection,
        guard: LockGuard,
        outcome: std::thread::Result<Result<RunReport>>,
    ) -> Result<RunReport> {
        let released = self
            .ledger
            .release_lock(conn, &self.config.lock_owner)
            .await;
        guard.disarm();

        match outcome {
            Ok(outcome) => {
                let report = outcome?;
                released?;
                Ok(report)
            }
            Err(payload) => {
                if let Err(e) = released {
                    warn!(error = %e, "Failed to release migration lock after a panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Lists every provided migration with its ledger state, plus ledger
    /// entries that have no matching migration.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>> {
        let mut conn = self.pool.acquire().await?;
        let mut entries: BTreeMap<i64, LedgerEntry> = self
            .applied_entries(&mut conn)
            .await?
            .into_iter()
            .map(|entry| (entry.version, entry))
            .collect();

        let mut statuses: Vec<MigrationStatus> = self
            .migrations
            .iter()
            .map(|migration| {
                let entry = entries.remove(&migration.version());
                MigrationStatus {
                    version: migration.version(),
                    name: migration.name().to_string(),
                    applied: entry.is_some(),
                    applied_at: entry.as_ref().map(|e| e.end_time),
                    breakpoint: entry.as_ref().is_some_and(|e| e.breakpoint),
                    missing: false,
                }
            })
            .collect();

        statuses.extend(entries.into_values().map(|entry| MigrationStatus {
            version: entry.version,
            name: entry.name,
            applied: true,
            applied_at: Some(entry.end_time),
            breakpoint: entry.breakpoint,
            missing: true,
        }));
        statuses.sort_by_key(|s| s.version);
        Ok(statuses)
    }

    /// Changes the breakpoint flag of an applied version.
    pub async fn set_breakpoint(&self, version: i64, change: BreakpointChange) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        self.ledger.ensure_store(&mut conn).await?;
        let value = self.ledger.set_breakpoint(&mut conn, version, change).await?;
        info!(version, breakpoint = value, "Updated breakpoint");
        Ok(value)
    }

    /// Clears every breakpoint.
    pub async fn remove_all_breakpoints(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        self.ledger.ensure_store(&mut conn).await?;
        self.ledger.remove_all_breakpoints(&mut conn).await
    }

    /// Returns the current lock holder.
    pub async fn lock_holder(&self) -> Result<Option<LockHolder>> {
        let mut conn = self.pool.acquire().await?;
        self.ledger.ensure_store(&mut conn).await?;
        self.ledger.lock_holder(&mut conn).await
    }

    /// Removes a stale lock regardless of its owner.
    pub async fn force_unlock(&self) -> Result<Option<LockHolder>> {
        let mut conn = self.pool.acquire().await?;
        self.ledger.ensure_store(&mut conn).await?;
        let holder = self.ledger.force_unlock(&mut conn).await?;
        if let Some(holder) = &holder {
            warn!(owner = %holder.owner, "Removed migration lock");
        }
        Ok(holder)
    }

    /// Compiles the forward statements of `version` without executing them.
    ///
    /// Returns `None` if no migration has that version.
    pub async fn sql_for(&self, version: i64) -> Result<Option<Vec<String>>> {
        let Some(migration) = self.find(version) else {
            return Ok(None);
        };
        let mut conn = self.pool.acquire().await?;
        let recorded = self
            .record(&mut conn, migration, migration.forward())
            .await?;
        Ok(Some(self.compile_sets(migration, &recorded)?))
    }

    /// Compiles the statements that would revert `version`.
    ///
    /// Fails the same way `migrate_down` would if it is not reversible.
    pub async fn rollback_sql_for(&self, version: i64) -> Result<Option<Vec<String>>> {
        let Some(migration) = self.find(version) else {
            return Ok(None);
        };
        let mut conn = self.pool.acquire().await?;
        let step = self.plan_down(&mut conn, migration).await?;
        Ok(Some(self.step_statements(&mut conn, migration, step).await?))
    }

    async fn applied_entries(&self, conn: &mut SqliteConnection) -> Result<Vec<LedgerEntry>> {
        if self.ledger.store_exists(conn).await? {
            self.ledger.list_applied(conn).await
        } else {
            Ok(Vec::new())
        }
    }

    async fn run_up(&self, conn: &mut SqliteConnection, target: Option<i64>) -> Result<RunReport> {
        let dry_run = self.config.dry_run;
        let applied: BTreeSet<i64> = self
            .applied_entries(conn)
            .await?
            .into_iter()
            .map(|entry| entry.version)
            .collect();

        let pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.version()))
            .filter(|m| target.map_or(true, |t| m.version() <= t))
            .collect();

        let mut report = RunReport {
            dry_run,
            ..RunReport::default()
        };
        if pending.is_empty() {
            info!("No migrations to apply");
            return Ok(report);
        }

        for migration in pending {
            if self.is_cancelled() {
                warn!(
                    version = migration.version(),
                    "Cancellation requested, stopping"
                );
                report.cancelled = true;
                break;
            }

            if dry_run {
                let recorded = self
                    .record(conn, migration, migration.forward())
                    .await?;
                report
                    .statements
                    .extend(self.compile_sets(migration, &recorded)?);
                report.applied.push(migration.version());
                continue;
            }

            info!(
                version = migration.version(),
                name = %migration.name(),
                "Applying migration"
            );
            let start_time = Utc::now();
            self.transact(
                conn,
                migration,
                Step::Logic(migration.forward()),
                LedgerWrite::Applied { start_time },
            )
            .await?;
            info!(
                version = migration.version(),
                name = %migration.name(),
                "Migration applied successfully"
            );
            report.applied.push(migration.version());
        }

        Ok(report)
    }

    async fn run_down(
        &self,
        conn: &mut SqliteConnection,
        target: Option<i64>,
        force: bool,
    ) -> Result<RunReport> {
        let dry_run = self.config.dry_run;
        let applied = self.applied_entries(conn).await?;
        let candidates: Vec<&LedgerEntry> = match target {
            None => applied.last().into_iter().collect(),
            Some(target) => applied
                .iter()
                .rev()
                .filter(|entry| entry.version >= target)
                .collect(),
        };

        let mut report = RunReport {
            dry_run,
            ..RunReport::default()
        };
        if candidates.is_empty() {
            info!("No migrations to revert");
            return Ok(report);
        }

        let mut reverting = Vec::with_capacity(candidates.len());
        for entry in &candidates {
            if entry.breakpoint && !force {
                return Err(MigrateError::BreakpointReached {
                    version: entry.version,
                    name: entry.name.clone(),
                });
            }
            let migration = self
                .find(entry.version)
                .ok_or_else(|| MigrateError::MissingMigration {
                    version: entry.version,
                    name: entry.name.clone(),
                })?;
            reverting.push(migration);
        }

        // Plan every reversal before the first one runs.
        let mut plans = Vec::with_capacity(reverting.len());
        for migration in reverting {
            let step = self.plan_down(conn, migration).await?;
            plans.push((migration, step));
        }

        for (migration, step) in plans {
            if self.is_cancelled() {
                warn!(
                    version = migration.version(),
                    "Cancellation requested, stopping"
                );
                report.cancelled = true;
                break;
            }

            if dry_run {
                let statements = self.step_statements(conn, migration, step).await?;
                report.statements.extend(statements);
                report.reverted.push(migration.version());
                continue;
            }

            info!(
                version = migration.version(),
                name = %migration.name(),
                "Reverting migration"
            );
            self.transact(conn, migration, step, LedgerWrite::Reverted)
                .await?;
            info!(
                version = migration.version(),
                name = %migration.name(),
                "Migration reverted successfully"
            );
            report.reverted.push(migration.version());
        }

        Ok(report)
    }

    /// Decides how `migration` is reverted.
    ///
    /// A reversible migration is replayed in record mode and its inverse
    /// compiled here, so irreversibility surfaces before anything runs.
    async fn plan_down(&self, conn: &mut SqliteConnection, migration: &Migration) -> Result<Step> {
        match *migration.logic() {
            MigrationLogic::Explicit { down, .. } => Ok(Step::Logic(down)),
            MigrationLogic::Reversible { change } => {
                let recorded = self.record(conn, migration, change).await?;
                let inverse =
                    invert_all(&recorded).map_err(|reason| irreversible(migration, reason))?;
                debug!(
                    version = migration.version(),
                    change_sets = inverse.len(),
                    "Derived inverse change sets"
                );
                Ok(Step::Statements(self.compile_sets(migration, &inverse)?))
            }
        }
    }

    async fn step_statements(
        &self,
        conn: &mut SqliteConnection,
        migration: &Migration,
        step: Step,
    ) -> Result<Vec<String>> {
        match step {
            Step::Statements(statements) => Ok(statements),
            Step::Logic(logic) => {
                let recorded = self.record(conn, migration, logic).await?;
                self.compile_sets(migration, &recorded)
            }
        }
    }

    /// Runs `logic` in record mode and returns what it committed.
    async fn record(
        &self,
        conn: &mut SqliteConnection,
        migration: &Migration,
        logic: MigrationFn,
    ) -> Result<Vec<ChangeSet>> {
        let mut schema = Schema::new(conn, &self.dialect, SchemaMode::Record);
        logic(&mut schema)
            .await
            .map_err(|e| with_context(migration, e))?;
        Ok(schema.into_recorded())
    }

    fn compile_sets(&self, migration: &Migration, change_sets: &[ChangeSet]) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        for change_set in change_sets {
            let compiled = self
                .dialect
                .compile_change_set(change_set)
                .map_err(|e| with_context(migration, e))?;
            statements.extend(compiled);
        }
        Ok(statements)
    }

    /// Runs one step and its ledger write as a unit.
    ///
    /// With transactional DDL both share a transaction that is rolled back
    /// on failure. Otherwise statements run one by one and a failure after
    /// the first executed statement is reported as partially applied.
    async fn transact(
        &self,
        conn: &mut SqliteConnection,
        migration: &Migration,
        step: Step,
        write: LedgerWrite,
    ) -> Result<()> {
        if self.dialect.supports_transactional_ddl() {
            let mut tx = conn
                .begin()
                .await
                .map_err(|e| with_context(migration, e.into()))?;

            let (result, executed) = self.run_step(&mut tx, &step).await;
            let result = match result {
                Ok(()) => self.write_ledger(&mut tx, migration, &write).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    tx.commit()
                        .await
                        .map_err(|e| with_context(migration, e.into()))?;
                    debug!(
                        version = migration.version(),
                        statements = executed,
                        "Committed migration transaction"
                    );
                    Ok(())
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(
                            version = migration.version(),
                            error = %rollback,
                            "Failed to roll back migration transaction"
                        );
                    }
                    Err(with_context(migration, e))
                }
            }
        } else {
            let (result, executed) = self.run_step(conn, &step).await;
            let result = match result {
                Ok(()) => self.write_ledger(conn, migration, &write).await,
                Err(e) => Err(e),
            };

            result.map_err(|e| {
                if executed > 0 {
                    MigrateError::PartiallyApplied {
                        version: migration.version(),
                        name: migration.name().to_string(),
                        statements_executed: executed,
                        source: Box::new(e),
                    }
                } else {
                    with_context(migration, e)
                }
            })
        }
    }

    async fn run_step(&self, conn: &mut SqliteConnection, step: &Step) -> (Result<()>, usize) {
        let mut schema = Schema::new(conn, &self.dialect, SchemaMode::Execute);
        let result = match step {
            Step::Logic(logic) => (*logic)(&mut schema).await,
            Step::Statements(statements) => schema.run_statements(statements).await,
        };
        (result, schema.statements_executed())
    }

    async fn write_ledger(
        &self,
        conn: &mut SqliteConnection,
        migration: &Migration,
        write: &LedgerWrite,
    ) -> Result<()> {
        match write {
            LedgerWrite::Applied { start_time } => {
                let entry = LedgerEntry {
                    version: migration.version(),
                    name: migration.name().to_string(),
                    start_time: *start_time,
                    end_time: Utc::now(),
                    breakpoint: false,
                };
                self.ledger.record_applied(conn, &entry).await
            }
            LedgerWrite::Reverted => self.ledger.record_reverted(conn, migration.version()).await,
        }
    }
}

/// Attaches the migration's version and name to an error that lacks them.
fn with_context(migration: &Migration, error: MigrateError) -> MigrateError {
    match error {
        e @ (MigrateError::TransactionFailure { .. }
        | MigrateError::PartiallyApplied { .. }
        | MigrateError::IrreversibleMigration { .. }
        | MigrateError::AmbiguousIntent { .. }
        | MigrateError::BreakpointReached { .. }
        | MigrateError::MissingMigration { .. }) => e,
        other => MigrateError::TransactionFailure {
            version: migration.version(),
            name: migration.name().to_string(),
            source: Box::new(other),
        },
    }
}

fn irreversible(migration: &Migration, reason: Irreversible) -> MigrateError {
    match reason {
        Irreversible::Operation(operation) => MigrateError::IrreversibleMigration {
            version: migration.version(),
            name: migration.name().to_string(),
            operation: Box::new(operation),
        },
        Irreversible::AmbiguousIntent { table } => MigrateError::AmbiguousIntent {
            version: migration.version(),
            name: migration.name().to_string(),
            table,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::operations::ChangeOperation;
    use crate::schema::{ColumnOptions, ColumnType, ForeignKeyOptions, IndexOptions};
    use futures::future::BoxFuture;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    fn create_users<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let users = schema
                .table("users")
                .add_column("email", ColumnType::String, ColumnOptions::new().limit(255))
                .add_index(["email"], IndexOptions::new().unique());
            schema.create(users).await
        })
    }

    fn add_bio<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let users = schema
                .table("users")
                .add_column("bio", ColumnType::Text, ColumnOptions::new().nullable());
            schema.update(users).await
        })
    }

    fn remove_bio<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let users = schema.table("users").drop_column("bio");
            schema.update(users).await
        })
    }

    fn save_profiles<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let profiles = schema.table("profiles").add_column(
                "handle",
                ColumnType::String,
                ColumnOptions::new(),
            );
            schema.save(profiles).await
        })
    }

    fn seed_admin<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            schema
                .execute("INSERT INTO users (email) VALUES ('admin@example.com')")
                .await?;
            Ok(())
        })
    }

    fn unseed_admin<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            schema
                .execute("DELETE FROM users WHERE email = 'admin@example.com'")
                .await?;
            Ok(())
        })
    }

    fn broken<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let audit = schema.table("audit").add_column(
                "event",
                ColumnType::Text,
                ColumnOptions::new(),
            );
            schema.create(audit).await?;
            schema.execute("INSERT INTO no_such_table VALUES (1)").await?;
            Ok(())
        })
    }

    async fn table_exists(pool: &SqlitePool, name: &str) -> bool {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(name)
                .fetch_optional(pool)
                .await
                .unwrap();
        row.is_some()
    }

    async fn column_count(pool: &SqlitePool, table: &str) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pragma_table_info(?)")
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap();
        count
    }

    async fn applied_versions(runner: &MigrationRunner<SqliteDialect>) -> Vec<i64> {
        runner
            .status()
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.applied)
            .map(|s| s.version)
            .collect()
    }

    fn runner(pool: &SqlitePool, migrations: Vec<Migration>) -> MigrationRunner<SqliteDialect> {
        MigrationRunner::new(pool.clone(), SqliteDialect::new(), migrations).unwrap()
    }

    #[tokio::test]
    async fn test_up_applies_in_version_order() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![
                Migration::reversible(2, "add_bio", add_bio),
                Migration::reversible(1, "create_users", create_users),
            ],
        );

        let report = runner.migrate_up(None).await.unwrap();
        assert_eq!(report.applied, vec![1, 2]);
        assert!(!report.cancelled);
        assert!(table_exists(&pool, "users").await);
        assert_eq!(column_count(&pool, "users").await, 3);
        assert_eq!(applied_versions(&runner).await, vec![1, 2]);

        let again = runner.migrate_up(None).await.unwrap();
        assert!(again.is_noop());
    }

    #[tokio::test]
    async fn test_up_respects_target() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(2, "add_bio", add_bio),
            ],
        );

        let report = runner.migrate_up(Some(1)).await.unwrap();
        assert_eq!(report.applied, vec![1]);
        assert_eq!(column_count(&pool, "users").await, 2);
    }

    #[tokio::test]
    async fn test_down_without_target_reverts_latest_only() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(2, "add_bio", add_bio),
            ],
        );
        runner.migrate_up(None).await.unwrap();

        let report = runner.migrate_down(None, false).await.unwrap();
        assert_eq!(report.reverted, vec![2]);
        assert_eq!(column_count(&pool, "users").await, 2);
        assert_eq!(applied_versions(&runner).await, vec![1]);
    }

    #[tokio::test]
    async fn test_up_then_down_round_trip() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(2, "add_bio", add_bio),
                Migration::explicit(3, "seed_admin", seed_admin, unseed_admin),
            ],
        );
        runner.migrate_up(None).await.unwrap();

        let report = runner.migrate_down(Some(1), false).await.unwrap();
        assert_eq!(report.reverted, vec![3, 2, 1]);
        assert!(!table_exists(&pool, "users").await);
        assert!(applied_versions(&runner).await.is_empty());

        // The ledger and lock tables survive.
        assert!(table_exists(&pool, "strata_migrations").await);
        assert!(runner.lock_holder().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_up_rolls_back_and_stops() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::explicit(2, "broken", broken, unseed_admin),
                Migration::reversible(3, "add_bio", add_bio),
            ],
        );

        let err = runner.migrate_up(None).await.unwrap_err();
        match &err {
            MigrateError::TransactionFailure { version, name, .. } => {
                assert_eq!(*version, 2);
                assert_eq!(name, "broken");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.exit_code(), 1);
        assert!(!table_exists(&pool, "audit").await);
        assert_eq!(applied_versions(&runner).await, vec![1]);
        assert!(runner.lock_holder().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_irreversible_drop_blocks_down() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(2, "add_bio", add_bio),
                Migration::reversible(3, "remove_bio", remove_bio),
            ],
        );
        runner.migrate_up(None).await.unwrap();

        let err = runner.migrate_down(None, false).await.unwrap_err();
        match &err {
            MigrateError::IrreversibleMigration {
                version, operation, ..
            } => {
                assert_eq!(*version, 3);
                assert_eq!(**operation, ChangeOperation::drop_column("users", "bio"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.exit_code(), 2);
        assert_eq!(applied_versions(&runner).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_irreversible_is_detected_before_any_reversal() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(2, "add_bio", add_bio),
                Migration::reversible(3, "remove_bio", remove_bio),
                Migration::reversible(4, "add_bio_again", add_bio),
            ],
        );
        runner.migrate_up(None).await.unwrap();

        let err = runner.migrate_down(Some(1), false).await.unwrap_err();
        assert_eq!(err.version(), Some(3));
        // Version 4 was reversible but is still applied.
        assert_eq!(applied_versions(&runner).await, vec![1, 2, 3, 4]);
        assert_eq!(column_count(&pool, "users").await, 3);
    }

    #[tokio::test]
    async fn test_save_blocks_down_as_ambiguous() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![Migration::reversible(1, "save_profiles", save_profiles)],
        );
        runner.migrate_up(None).await.unwrap();
        assert!(table_exists(&pool, "profiles").await);

        let err = runner.migrate_down(None, false).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::AmbiguousIntent { version: 1, ref table, .. } if table == "profiles"
        ));
    }

    #[tokio::test]
    async fn test_breakpoint_requires_force() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(2, "add_bio", add_bio),
            ],
        );
        runner.migrate_up(None).await.unwrap();
        assert!(runner
            .set_breakpoint(1, BreakpointChange::Set)
            .await
            .unwrap());

        let err = runner.migrate_down(Some(1), false).await.unwrap_err();
        assert!(matches!(err, MigrateError::BreakpointReached { version: 1, .. }));
        assert_eq!(applied_versions(&runner).await, vec![1, 2]);

        let report = runner.migrate_down(Some(1), true).await.unwrap();
        assert_eq!(report.reverted, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_missing_migration_blocks_down() {
        let pool = create_test_pool().await;
        let full = runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(2, "add_bio", add_bio),
            ],
        );
        full.migrate_up(None).await.unwrap();

        let partial = runner(
            &pool,
            vec![Migration::reversible(1, "create_users", create_users)],
        );
        let err = partial.migrate_down(None, false).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::MissingMigration { version: 2, ref name } if name == "add_bio"
        ));

        let status = partial.status().await.unwrap();
        assert_eq!(status.len(), 2);
        assert!(status[1].missing);
        assert!(!status[0].missing);
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let pool = create_test_pool().await;
        let runner = MigrationRunner::with_config(
            pool.clone(),
            SqliteDialect::new(),
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::explicit(2, "seed_admin", seed_admin, unseed_admin),
            ],
            RunnerConfig::new().dry_run(true),
        )
        .unwrap();

        let report = runner.migrate_up(None).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.applied, vec![1, 2]);
        assert_eq!(report.statements.len(), 3);
        assert!(report.statements[0].starts_with("CREATE TABLE \"users\""));
        assert!(report.statements[1].starts_with("CREATE UNIQUE INDEX"));
        assert!(report.statements[2].starts_with("INSERT INTO users"));

        assert!(!table_exists(&pool, "users").await);
        assert!(!table_exists(&pool, "strata_migrations").await);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_version() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![Migration::reversible(1, "create_users", create_users)],
        );
        runner.cancel_handle().store(true, Ordering::SeqCst);

        let report = runner.migrate_up(None).await.unwrap();
        assert!(report.cancelled);
        assert!(report.applied.is_empty());
        assert!(!table_exists(&pool, "users").await);
    }

    #[tokio::test]
    async fn test_held_lock_blocks_up() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![Migration::reversible(1, "create_users", create_users)],
        );
        {
            let mut conn = pool.acquire().await.unwrap();
            runner.ledger().ensure_store(&mut conn).await.unwrap();
            runner
                .ledger()
                .acquire_lock(&mut conn, "other-deploy")
                .await
                .unwrap();
        }

        let err = runner.migrate_up(None).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::LockContention { ref owner, .. } if owner == "other-deploy"
        ));
        assert_eq!(err.exit_code(), 3);
        assert!(!table_exists(&pool, "users").await);

        let old = runner.force_unlock().await.unwrap().unwrap();
        assert_eq!(old.owner, "other-deploy");
        assert_eq!(runner.migrate_up(None).await.unwrap().applied, vec![1]);
    }

    fn create_tags_then_panic<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let tags = schema
                .table("tags")
                .add_column("label", ColumnType::String, ColumnOptions::new());
            schema.create(tags).await?;
            let seed: fn() -> Result<()> = || panic!("tag seeding went wrong");
            seed()
        })
    }

    fn panic_on_down<'a>(_schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async {
            let unseed: fn() -> Result<()> = || panic!("cannot undo seed");
            unseed()
        })
    }

    fn noop<'a>(_schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    #[tokio::test]
    async fn test_panicking_up_releases_lock() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(2, "create_tags", create_tags_then_panic),
            ],
        );

        let caught = AssertUnwindSafe(runner.migrate_up(None))
            .catch_unwind()
            .await;
        assert!(caught.is_err());

        assert_eq!(runner.lock_holder().await.unwrap(), None);
        assert_eq!(applied_versions(&runner).await, vec![1]);
        assert!(!table_exists(&pool, "tags").await);

        let fixed = self::runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(2, "add_bio", add_bio),
            ],
        );
        assert_eq!(fixed.migrate_up(None).await.unwrap().applied, vec![2]);
    }

    #[tokio::test]
    async fn test_panicking_down_releases_lock() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![Migration::explicit(1, "seed", noop, panic_on_down)],
        );
        runner.migrate_up(None).await.unwrap();

        let caught = AssertUnwindSafe(runner.migrate_down(None, false))
            .catch_unwind()
            .await;
        assert!(caught.is_err());

        assert_eq!(runner.lock_holder().await.unwrap(), None);
        assert_eq!(applied_versions(&runner).await, vec![1]);
    }

    #[tokio::test]
    async fn test_create_with_index_staged_before_foreign_key() {
        fn create_posts<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                let posts = schema
                    .table("posts")
                    .add_column("author_id", ColumnType::BigInteger, ColumnOptions::new())
                    .add_index(["author_id"], IndexOptions::new())
                    .add_foreign_key(["author_id"], "users", ["id"], ForeignKeyOptions::new());
                schema.create(posts).await
            })
        }

        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(2, "create_posts", create_posts),
            ],
        );
        assert_eq!(runner.migrate_up(None).await.unwrap().applied, vec![1, 2]);
        assert!(table_exists(&pool, "posts").await);

        runner.migrate_down(Some(2), false).await.unwrap();
        assert!(!table_exists(&pool, "posts").await);
    }

    #[tokio::test]
    async fn test_sql_previews() {
        let pool = create_test_pool().await;
        let runner = runner(
            &pool,
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(2, "add_bio", add_bio),
            ],
        );

        let forward = runner.sql_for(2).await.unwrap().unwrap();
        assert_eq!(
            forward,
            vec!["ALTER TABLE \"users\" ADD COLUMN \"bio\" TEXT".to_string()]
        );
        let backward = runner.rollback_sql_for(2).await.unwrap().unwrap();
        assert_eq!(
            backward,
            vec!["ALTER TABLE \"users\" DROP COLUMN \"bio\"".to_string()]
        );
        assert_eq!(
            runner.rollback_sql_for(1).await.unwrap().unwrap(),
            vec!["DROP TABLE \"users\"".to_string()]
        );
        assert!(runner.sql_for(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_versions_are_rejected() {
        let pool = create_test_pool().await;
        let result = MigrationRunner::new(
            pool,
            SqliteDialect::new(),
            vec![
                Migration::reversible(1, "create_users", create_users),
                Migration::reversible(1, "add_bio", add_bio),
            ],
        );
        assert!(matches!(
            result,
            Err(MigrateError::InvalidDefinition { version: 1, .. })
        ));
    }
}
