//! Versioned, reversible database migrations for Rust.
//!
//! `strata-migrate` applies an explicit, versioned set of migrations to a
//! database and records each applied version in a ledger table:
//! - Migrations are plain values with either `up`/`down` steps or a single
//!   reversible `change` step
//! - Reversal of `change` migrations is derived from what they record
//! - SQL generation is dialect-aware (SQLite, PostgreSQL)
//!
//! # Architecture
//!
//! - **Ledger** - Records applied versions, breakpoints and the run lock
//! - **Runner** - Orders migrations, wraps each in a transaction, updates
//!   the ledger
//! - **Table builder** - Stages operations for one table as a change set
//! - **Inverse** - Derives the inverse of recorded change sets
//! - **Dialect** - Database-specific SQL generation
//!
//! # Example
//!
//! ```rust,no_run
//! use futures::future::BoxFuture;
//! use sqlx::sqlite::SqlitePoolOptions;
//! use strata_migrate::prelude::*;
//!
//! fn create_users<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
//!     Box::pin(async move {
//!         let users = schema
//!             .table("users")
//!             .add_column("email", ColumnType::String, ColumnOptions::new().limit(255))
//!             .add_index(["email"], IndexOptions::new().unique());
//!         schema.create(users).await
//!     })
//! }
//!
//! # async fn run() -> Result<()> {
//! let pool = SqlitePoolOptions::new().connect("sqlite:app.db").await?;
//! let runner = MigrationRunner::new(
//!     pool,
//!     SqliteDialect::new(),
//!     vec![Migration::reversible(20240101120000, "create_users", create_users)],
//! )?;
//!
//! runner.migrate_up(None).await?;
//! runner.migrate_down(None, false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Apply pending migrations
//! strata migrate
//!
//! # Show migration status
//! strata status
//!
//! # Revert the latest migration
//! strata rollback
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod dialect;
pub mod error;
pub mod inverse;
pub mod ledger;
pub mod migration;
pub mod operations;
pub mod runner;
pub mod schema;
pub mod table;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::RunnerConfig;
    pub use crate::context::{Schema, SchemaMode};
    pub use crate::dialect::{MigrationDialect, PostgresDialect, SqliteDialect};
    pub use crate::error::{MigrateError, Result};
    pub use crate::inverse::{invert, invert_all, Irreversible};
    pub use crate::ledger::{BreakpointChange, LedgerEntry, LockHolder, VersionLedger};
    pub use crate::migration::{
        version_from_timestamp, Migration, MigrationBuilder, MigrationFn, MigrationLogic,
    };
    pub use crate::operations::{ChangeIntent, ChangeOperation, ChangeSet};
    pub use crate::runner::{MigrationRunner, MigrationStatus, RunReport};
    pub use crate::schema::{
        ColumnOptions, ColumnSpec, ColumnType, DefaultValue, ForeignKeyAction,
        ForeignKeyOptions, ForeignKeySpec, IndexOptions, TableOptions,
    };
    pub use crate::table::Table;
}
