//! Error types for the migration system.

use chrono::{DateTime, Utc};

use crate::operations::ChangeOperation;

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The ledger already holds an entry for this version.
    #[error("Version {version} is already recorded in the ledger")]
    DuplicateVersion {
        /// The duplicated version.
        version: i64,
    },

    /// The ledger holds no entry for this version.
    #[error("Version {version} is not recorded in the ledger")]
    MissingLedgerEntry {
        /// The version that was expected in the ledger.
        version: i64,
    },

    /// The ledger references a version that is not in the discovered set.
    #[error("Migration {version} ({name}) is recorded as applied but was not provided")]
    MissingMigration {
        /// Version found in the ledger.
        version: i64,
        /// Name stored in the ledger.
        name: String,
    },

    /// A reversible migration contains an operation that cannot be undone.
    #[error("Migration {version} ({name}) is not reversible: {operation}")]
    IrreversibleMigration {
        /// Migration version.
        version: i64,
        /// Migration name.
        name: String,
        /// The first operation that blocks the inversion.
        operation: Box<ChangeOperation>,
    },

    /// A change set committed through `save()` was needed for a reversal.
    #[error(
        "Migration {version} ({name}) used save() on table '{table}'; \
         create-or-update intent cannot be reversed automatically"
    )]
    AmbiguousIntent {
        /// Migration version.
        version: i64,
        /// Migration name.
        name: String,
        /// Table of the ambiguous change set.
        table: String,
    },

    /// Reverting would cross a migration marked with a breakpoint.
    #[error("Migration {version} ({name}) has a breakpoint set; use force to revert past it")]
    BreakpointReached {
        /// Migration version.
        version: i64,
        /// Migration name.
        name: String,
    },

    /// The dialect cannot compile the requested operation.
    #[error("The {dialect} dialect does not support {operation}")]
    UnsupportedOperation {
        /// Dialect name.
        dialect: &'static str,
        /// Short description of the operation.
        operation: String,
    },

    /// A migration failed and its transaction was rolled back.
    #[error("Migration {version} ({name}) failed and was rolled back: {source}")]
    TransactionFailure {
        /// Migration version.
        version: i64,
        /// Migration name.
        name: String,
        /// Underlying cause.
        #[source]
        source: Box<MigrateError>,
    },

    /// A migration failed mid-way on a dialect without transactional DDL.
    #[error(
        "Migration {version} ({name}) failed after {statements_executed} statement(s) \
         without transactional DDL; the schema is partially applied: {source}"
    )]
    PartiallyApplied {
        /// Migration version.
        version: i64,
        /// Migration name.
        name: String,
        /// Statements that had already been executed.
        statements_executed: usize,
        /// Underlying cause.
        #[source]
        source: Box<MigrateError>,
    },

    /// Another runner holds the migration lock.
    #[error("Migration lock is held by '{owner}' since {acquired_at}")]
    LockContention {
        /// Identity of the lock holder.
        owner: String,
        /// When the holder acquired the lock.
        acquired_at: DateTime<Utc>,
    },

    /// A migration definition is malformed.
    #[error("Invalid migration {version} ({name}): {reason}")]
    InvalidDefinition {
        /// Migration version.
        version: i64,
        /// Migration name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// `create()` was called for a table that already exists.
    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),

    /// `update()` was called for a table that does not exist.
    #[error("Table '{0}' does not exist")]
    TableNotFound(String),

    /// A table would be created without any column.
    #[error("Table '{0}' has no columns")]
    EmptyTable(String),

    /// Database error during migration execution.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrateError {
    /// Returns the migration version this error is attributed to, if any.
    #[must_use]
    pub const fn version(&self) -> Option<i64> {
        match self {
            Self::DuplicateVersion { version }
            | Self::MissingLedgerEntry { version }
            | Self::MissingMigration { version, .. }
            | Self::IrreversibleMigration { version, .. }
            | Self::AmbiguousIntent { version, .. }
            | Self::BreakpointReached { version, .. }
            | Self::TransactionFailure { version, .. }
            | Self::PartiallyApplied { version, .. }
            | Self::InvalidDefinition { version, .. } => Some(*version),
            _ => None,
        }
    }

    /// Returns true if the failure was caused by a reversal being blocked.
    #[must_use]
    pub const fn is_irreversible(&self) -> bool {
        matches!(
            self,
            Self::IrreversibleMigration { .. }
                | Self::AmbiguousIntent { .. }
                | Self::BreakpointReached { .. }
        )
    }

    /// Process exit code for this error.
    ///
    /// `1` is a generic failure, `2` a blocked reversal, `3` lock contention.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.is_irreversible() {
            2
        } else if matches!(self, Self::LockContention { .. }) {
            3
        } else {
            1
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
