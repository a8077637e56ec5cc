//! Fluent table builder.
//!
//! A [`Table`] accumulates operations for one table without touching the
//! database. It is consumed by one of the terminals on
//! [`Schema`](crate::context::Schema): `create`, `update` or `save`.
//!
//! ```rust
//! use strata_migrate::prelude::*;
//!
//! let table = Table::new("posts", TableOptions::new())
//!     .add_column("title", ColumnType::String, ColumnOptions::new().limit(200))
//!     .add_column("body", ColumnType::Text, ColumnOptions::new().nullable())
//!     .add_index(["title"], IndexOptions::new());
//!
//! assert_eq!(table.pending().len(), 3);
//! ```

use crate::operations::{ChangeIntent, ChangeOperation, ChangeSet};
use crate::schema::{
    ColumnOptions, ColumnSpec, ColumnType, ForeignKeyOptions, ForeignKeySpec, IndexOptions,
    TableOptions,
};

/// Pending operations for a single table.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "a table does nothing until it is passed to create(), update() or save()"]
pub struct Table {
    name: String,
    current: String,
    options: TableOptions,
    pending: Vec<ChangeOperation>,
}

fn to_names<I, S>(columns: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    columns.into_iter().map(Into::into).collect()
}

impl Table {
    /// Creates a builder for `name`.
    pub fn new(name: impl Into<String>, options: TableOptions) -> Self {
        let name = name.into();
        Self {
            current: name.clone(),
            name,
            options,
            pending: Vec::new(),
        }
    }

    /// The table name the builder was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table options.
    #[must_use]
    pub const fn options(&self) -> &TableOptions {
        &self.options
    }

    /// Operations staged so far.
    #[must_use]
    pub fn pending(&self) -> &[ChangeOperation] {
        &self.pending
    }

    /// Adds a column.
    pub fn add_column(
        mut self,
        name: impl Into<String>,
        column_type: ColumnType,
        options: ColumnOptions,
    ) -> Self {
        self.pending.push(ChangeOperation::AddColumn {
            table: self.current.clone(),
            column: ColumnSpec::new(name, column_type, options),
        });
        self
    }

    /// Drops a column.
    pub fn drop_column(mut self, name: impl Into<String>) -> Self {
        self.pending
            .push(ChangeOperation::drop_column(self.current.clone(), name));
        self
    }

    /// Renames a column.
    pub fn rename_column(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.pending.push(ChangeOperation::RenameColumn {
            table: self.current.clone(),
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Adds an index over `columns`.
    pub fn add_index<I, S>(mut self, columns: I, options: IndexOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.push(ChangeOperation::AddIndex {
            table: self.current.clone(),
            columns: to_names(columns),
            options,
        });
        self
    }

    /// Drops the index over `columns`.
    pub fn drop_index<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.push(ChangeOperation::drop_index(
            self.current.clone(),
            to_names(columns),
        ));
        self
    }

    /// Adds a foreign key from `columns` to `referenced_columns` of
    /// `referenced_table`.
    pub fn add_foreign_key<I, S, J, T>(
        mut self,
        columns: I,
        referenced_table: impl Into<String>,
        referenced_columns: J,
        options: ForeignKeyOptions,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.pending.push(ChangeOperation::AddForeignKey {
            table: self.current.clone(),
            foreign_key: ForeignKeySpec {
                columns: to_names(columns),
                referenced_table: referenced_table.into(),
                referenced_columns: to_names(referenced_columns),
                options,
            },
        });
        self
    }

    /// Drops the foreign key on `columns`.
    pub fn drop_foreign_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.push(ChangeOperation::drop_foreign_key(
            self.current.clone(),
            to_names(columns),
        ));
        self
    }

    /// Renames the table. Operations staged afterwards target the new name.
    pub fn rename(mut self, to: impl Into<String>) -> Self {
        let to = to.into();
        self.pending.push(ChangeOperation::RenameTable {
            from: self.current.clone(),
            to: to.clone(),
        });
        self.current = to;
        self
    }

    /// Consumes the builder into a change set with the given intent.
    ///
    /// A `Create` set gets its `CreateTable` operation prepended.
    pub(crate) fn into_change_set(self, intent: ChangeIntent) -> ChangeSet {
        let mut operations = Vec::with_capacity(self.pending.len() + 1);
        if intent == ChangeIntent::Create {
            operations.push(ChangeOperation::CreateTable {
                table: self.name.clone(),
                options: self.options,
            });
        }
        operations.extend(self.pending);
        ChangeSet::new(self.name, intent, operations)
    }
}
