//! The schema context handed to migration logic.
//!
//! [`Schema`] is bound to the connection (usually an open transaction) of
//! one migration. In execute mode every committed change set is compiled
//! by the dialect and run immediately. In record mode nothing is executed:
//! change sets are collected so the runner can invert them or print them.

use std::collections::BTreeMap;

use sqlx::sqlite::{SqliteConnection, SqliteRow};
use tracing::debug;

use crate::dialect::MigrationDialect;
use crate::error::{MigrateError, Result};
use crate::operations::{ChangeIntent, ChangeOperation, ChangeSet};
use crate::schema::TableOptions;
use crate::table::Table;

/// Whether committed change sets are executed or only recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMode {
    /// Compile and run every committed change set.
    Execute,
    /// Collect change sets without running them.
    Record,
}

/// Schema operations available to a migration's logic.
pub struct Schema<'c> {
    conn: &'c mut SqliteConnection,
    dialect: &'c dyn MigrationDialect,
    mode: SchemaMode,
    recorded: Vec<ChangeSet>,
    executed: usize,
}

impl<'c> Schema<'c> {
    /// Creates a schema context over `conn`.
    pub fn new(
        conn: &'c mut SqliteConnection,
        dialect: &'c dyn MigrationDialect,
        mode: SchemaMode,
    ) -> Self {
        Self {
            conn,
            dialect,
            mode,
            recorded: Vec::new(),
            executed: 0,
        }
    }

    /// The current mode.
    #[must_use]
    pub const fn mode(&self) -> SchemaMode {
        self.mode
    }

    /// Returns true when change sets are recorded instead of executed.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.mode == SchemaMode::Record
    }

    /// Number of statements executed so far through this context.
    #[must_use]
    pub const fn statements_executed(&self) -> usize {
        self.executed
    }

    /// Change sets recorded so far.
    #[must_use]
    pub fn recorded(&self) -> &[ChangeSet] {
        &self.recorded
    }

    /// Consumes the context, returning the recorded change sets.
    #[must_use]
    pub fn into_recorded(self) -> Vec<ChangeSet> {
        self.recorded
    }

    /// Opens a builder for `name` with default options.
    pub fn table(&self, name: impl Into<String>) -> Table {
        Table::new(name, TableOptions::default())
    }

    /// Opens a builder for `name` with explicit options.
    pub fn table_with(&self, name: impl Into<String>, options: TableOptions) -> Table {
        Table::new(name, options)
    }

    /// Creates the table with every staged operation.
    ///
    /// Fails with [`MigrateError::TableAlreadyExists`] if the table exists.
    pub async fn create(&mut self, table: Table) -> Result<()> {
        if self.mode == SchemaMode::Execute && self.has_table(table.name()).await? {
            return Err(MigrateError::TableAlreadyExists(table.name().to_string()));
        }
        self.commit(table.into_change_set(ChangeIntent::Create))
            .await
    }

    /// Applies the staged operations to an existing table.
    ///
    /// Fails with [`MigrateError::TableNotFound`] if the table is missing.
    pub async fn update(&mut self, table: Table) -> Result<()> {
        if self.mode == SchemaMode::Execute && !self.has_table(table.name()).await? {
            return Err(MigrateError::TableNotFound(table.name().to_string()));
        }
        self.commit(table.into_change_set(ChangeIntent::Update))
            .await
    }

    /// Creates or updates the table depending on whether it exists.
    ///
    /// The committed set is tagged [`ChangeIntent::Ambiguous`], so a
    /// migration using this cannot be reverted automatically.
    pub async fn save(&mut self, table: Table) -> Result<()> {
        let intent = if self.has_table(table.name()).await? {
            ChangeIntent::Update
        } else {
            ChangeIntent::Create
        };
        let change_set = table.into_change_set(intent);
        let change_set = ChangeSet::new(
            change_set.table().to_string(),
            ChangeIntent::Ambiguous,
            change_set.into_operations(),
        );
        self.commit(change_set).await
    }

    /// Drops a table immediately. This can never be reverted automatically.
    pub async fn drop_table(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        let change_set = ChangeSet::new(
            name.clone(),
            ChangeIntent::Update,
            vec![ChangeOperation::drop_table(name)],
        );
        self.commit(change_set).await
    }

    /// Checks whether a table exists.
    pub async fn has_table(&mut self, name: &str) -> Result<bool> {
        let row = sqlx::query(self.dialect.table_exists_sql())
            .bind(name)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.is_some())
    }

    /// Checks whether `table` has a foreign key over exactly `columns`.
    pub async fn has_foreign_key(&mut self, table: &str, columns: &[&str]) -> Result<bool> {
        let rows: Vec<(i64, String)> = sqlx::query_as(self.dialect.foreign_keys_sql())
            .bind(table)
            .fetch_all(&mut *self.conn)
            .await?;

        let mut constraints: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for (id, column) in rows {
            constraints.entry(id).or_default().push(column);
        }

        let mut wanted: Vec<&str> = columns.to_vec();
        wanted.sort_unstable();
        Ok(constraints.values().any(|cols| {
            let mut cols: Vec<&str> = cols.iter().map(String::as_str).collect();
            cols.sort_unstable();
            cols == wanted
        }))
    }

    /// Executes a raw statement, returning the number of affected rows.
    ///
    /// Raw statements bypass change tracking. While recording, the
    /// statement is not run; it is recorded as an irreversible
    /// [`ChangeOperation::Execute`] and `0` is returned.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        if self.mode == SchemaMode::Record {
            self.recorded.push(ChangeSet::new(
                String::new(),
                ChangeIntent::Update,
                vec![ChangeOperation::Execute {
                    statement: sql.to_string(),
                }],
            ));
            return Ok(0);
        }

        debug!(sql = %sql, "Executing raw SQL");
        let result = sqlx::query(sql).execute(&mut *self.conn).await?;
        self.executed += 1;
        Ok(result.rows_affected())
    }

    /// Runs a query and returns every row. Runs in both modes.
    pub async fn query(&mut self, sql: &str) -> Result<Vec<SqliteRow>> {
        Ok(sqlx::query(sql).fetch_all(&mut *self.conn).await?)
    }

    /// Runs a query and returns the first row, if any.
    pub async fn fetch_row(&mut self, sql: &str) -> Result<Option<SqliteRow>> {
        Ok(sqlx::query(sql).fetch_optional(&mut *self.conn).await?)
    }

    /// Runs a query and returns every row.
    pub async fn fetch_all(&mut self, sql: &str) -> Result<Vec<SqliteRow>> {
        self.query(sql).await
    }

    /// Commits a change set: executes it, or records it.
    pub(crate) async fn commit(&mut self, change_set: ChangeSet) -> Result<()> {
        if self.mode == SchemaMode::Record {
            self.recorded.push(change_set);
            return Ok(());
        }

        let statements = self.dialect.compile_change_set(&change_set)?;
        self.run_statements(&statements).await
    }

    /// Executes already compiled statements one by one.
    pub(crate) async fn run_statements(&mut self, statements: &[String]) -> Result<()> {
        for sql in statements {
            debug!(sql = %sql, "Executing SQL");
            sqlx::query(sql).execute(&mut *self.conn).await?;
            self.executed += 1;
        }
        Ok(())
    }
}
