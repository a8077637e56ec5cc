//! Change operations and change sets.
//!
//! A [`ChangeOperation`] is one schema mutation. A [`ChangeSet`] is the
//! ordered list of operations committed by one table builder session, and
//! its order is what the inverse is derived from.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::{
    ColumnSpec, ForeignKeySpec, IndexOptions, TableOptions, foreign_key_name, index_name,
};

/// A single schema mutation.
///
/// The drop variants carry an optional definition of the object they
/// remove. Drops staged by migration authors never have one; drops derived
/// from an inversion do, so they can in turn be inverted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeOperation {
    /// Create a table. Its columns follow as `AddColumn` operations.
    CreateTable {
        /// Table name.
        table: String,
        /// Primary key options.
        options: TableOptions,
    },

    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,
        /// Options the table was created with, when known.
        definition: Option<TableOptions>,
    },

    /// Rename a table.
    RenameTable {
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },

    /// Add a column.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnSpec,
    },

    /// Drop a column.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        name: String,
        /// The dropped column's definition, when known.
        definition: Option<ColumnSpec>,
    },

    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Current column name.
        from: String,
        /// New column name.
        to: String,
    },

    /// Add an index.
    AddIndex {
        /// Table name.
        table: String,
        /// Indexed columns.
        columns: Vec<String>,
        /// Index options.
        options: IndexOptions,
    },

    /// Drop an index.
    DropIndex {
        /// Table name.
        table: String,
        /// Indexed columns.
        columns: Vec<String>,
        /// Options the index was created with, when known.
        definition: Option<IndexOptions>,
    },

    /// Add a foreign key constraint.
    AddForeignKey {
        /// Table name.
        table: String,
        /// Foreign key definition.
        foreign_key: ForeignKeySpec,
    },

    /// Drop a foreign key constraint.
    DropForeignKey {
        /// Table name.
        table: String,
        /// Constrained columns.
        columns: Vec<String>,
        /// The dropped constraint's definition, when known.
        definition: Option<ForeignKeySpec>,
    },

    /// Raw statement issued through `execute` while recording.
    Execute {
        /// The statement.
        statement: String,
    },
}

impl ChangeOperation {
    /// Creates a `DropTable` operation without a restore definition.
    #[must_use]
    pub fn drop_table(table: impl Into<String>) -> Self {
        Self::DropTable {
            table: table.into(),
            definition: None,
        }
    }

    /// Creates a `DropColumn` operation without a restore definition.
    #[must_use]
    pub fn drop_column(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DropColumn {
            table: table.into(),
            name: name.into(),
            definition: None,
        }
    }

    /// Creates a `DropIndex` operation without a restore definition.
    #[must_use]
    pub fn drop_index(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self::DropIndex {
            table: table.into(),
            columns,
            definition: None,
        }
    }

    /// Creates a `DropForeignKey` operation without a restore definition.
    #[must_use]
    pub fn drop_foreign_key(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self::DropForeignKey {
            table: table.into(),
            columns,
            definition: None,
        }
    }

    /// Returns the table this operation targets, if any.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::CreateTable { table, .. }
            | Self::DropTable { table, .. }
            | Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::AddIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::DropForeignKey { table, .. } => Some(table),
            Self::RenameTable { from, .. } => Some(from),
            Self::Execute { .. } => None,
        }
    }

    /// Returns the operation kind, e.g. `"add_column"`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "create_table",
            Self::DropTable { .. } => "drop_table",
            Self::RenameTable { .. } => "rename_table",
            Self::AddColumn { .. } => "add_column",
            Self::DropColumn { .. } => "drop_column",
            Self::RenameColumn { .. } => "rename_column",
            Self::AddIndex { .. } => "add_index",
            Self::DropIndex { .. } => "drop_index",
            Self::AddForeignKey { .. } => "add_foreign_key",
            Self::DropForeignKey { .. } => "drop_foreign_key",
            Self::Execute { .. } => "execute",
        }
    }

    /// Returns a human-readable description of this operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable { table, .. } => format!("create table '{table}'"),
            Self::DropTable { table, .. } => format!("drop table '{table}'"),
            Self::RenameTable { from, to } => format!("rename table '{from}' to '{to}'"),
            Self::AddColumn { table, column } => {
                format!("add column '{}' to table '{table}'", column.name)
            }
            Self::DropColumn { table, name, .. } => {
                format!("drop column '{name}' from table '{table}'")
            }
            Self::RenameColumn { table, from, to } => {
                format!("rename column '{from}' to '{to}' in table '{table}'")
            }
            Self::AddIndex {
                table,
                columns,
                options,
            } => format!(
                "add index '{}' on table '{table}'",
                options
                    .name
                    .clone()
                    .unwrap_or_else(|| index_name(table, columns))
            ),
            Self::DropIndex { table, columns, .. } => format!(
                "drop index on ({}) from table '{table}'",
                columns.join(", ")
            ),
            Self::AddForeignKey { table, foreign_key } => format!(
                "add foreign key '{}' to table '{table}'",
                foreign_key
                    .options
                    .constraint
                    .clone()
                    .unwrap_or_else(|| foreign_key_name(table, &foreign_key.columns))
            ),
            Self::DropForeignKey { table, columns, .. } => format!(
                "drop foreign key on ({}) from table '{table}'",
                columns.join(", ")
            ),
            Self::Execute { .. } => "execute raw SQL".to_string(),
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// How a change set was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeIntent {
    /// Committed with `create()`; starts with `CreateTable`.
    Create,
    /// Committed with `update()`; alters an existing table.
    Update,
    /// Committed with `save()`; create or update was decided at run time.
    Ambiguous,
    /// Tears a table down; produced by inverting a `Create` set.
    Drop,
}

/// An ordered, immutable sequence of operations on one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    table: String,
    intent: ChangeIntent,
    operations: Vec<ChangeOperation>,
}

impl ChangeSet {
    /// Creates a change set.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        intent: ChangeIntent,
        operations: Vec<ChangeOperation>,
    ) -> Self {
        Self {
            table: table.into(),
            intent,
            operations,
        }
    }

    /// Name of the table at the start of this change set.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name of the table once every rename in this set has been applied.
    #[must_use]
    pub fn final_table(&self) -> &str {
        let mut current = self.table.as_str();
        for op in &self.operations {
            if let ChangeOperation::RenameTable { from, to } = op {
                if from == current {
                    current = to.as_str();
                }
            }
        }
        current
    }

    /// The commit intent.
    #[must_use]
    pub const fn intent(&self) -> ChangeIntent {
        self.intent
    }

    /// The operations, in execution order.
    #[must_use]
    pub fn operations(&self) -> &[ChangeOperation] {
        &self.operations
    }

    /// Returns true if the set has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Consumes the set, returning its operations.
    #[must_use]
    pub fn into_operations(self) -> Vec<ChangeOperation> {
        self.operations
    }
}
