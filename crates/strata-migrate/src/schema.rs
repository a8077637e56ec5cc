//! Schema descriptor types.
//!
//! These types describe columns, indexes, foreign keys and table-level
//! options as migration authors declare them. They are portable: the
//! dialect decides how each one is spelled for a particular engine.

use serde::{Deserialize, Serialize};

/// Portable column types understood by every dialect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Integer (32-bit).
    Integer,
    /// Big integer (64-bit).
    BigInteger,
    /// Small integer (16-bit).
    SmallInteger,
    /// Variable-length string; the column `limit` sets the length.
    String,
    /// Fixed-length string; the column `limit` sets the length.
    Char,
    /// Unbounded text.
    Text,
    /// Boolean.
    Boolean,
    /// Floating point (single precision).
    Float,
    /// Floating point (double precision).
    Double,
    /// Exact decimal with precision and scale.
    Decimal(u8, u8),
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Date and time.
    DateTime,
    /// Timestamp.
    Timestamp,
    /// Binary data.
    Binary,
    /// JSON document.
    Json,
    /// UUID.
    Uuid,
}

impl ColumnType {
    /// Returns the portable name used in descriptions and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::BigInteger => "biginteger",
            Self::SmallInteger => "smallinteger",
            Self::String => "string",
            Self::Char => "char",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Float => "float",
            Self::Double => "double",
            Self::Decimal(_, _) => "decimal",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Timestamp => "timestamp",
            Self::Binary => "binary",
            Self::Json => "json",
            Self::Uuid => "uuid",
        }
    }
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum DefaultValue {
    /// No default value.
    #[default]
    None,
    /// NULL default.
    Null,
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// SQL expression (e.g., "CURRENT_TIMESTAMP").
    Expression(String),
}

impl DefaultValue {
    /// Returns the SQL representation of this default value.
    ///
    /// Booleans are written as `1`/`0`; dialects with a native boolean
    /// literal override this in their column definition.
    #[must_use]
    pub fn to_sql(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Null => Some("NULL".to_string()),
            Self::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
            Self::Expression(expr) => Some(expr.clone()),
        }
    }
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted/updated).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub const fn to_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// Options accepted by `add_column`.
///
/// Columns are `NOT NULL` unless `nullable()` is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ColumnOptions {
    /// Length limit for string-like columns.
    pub limit: Option<u32>,
    /// Default value.
    pub default: DefaultValue,
    /// Whether the column allows NULL values.
    pub null: bool,
}

impl ColumnOptions {
    /// Creates options for a `NOT NULL` column without default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the length limit.
    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default = value;
        self
    }

    /// Allows NULL values.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.null = true;
        self
    }
}

/// A fully specified column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Portable column type.
    pub column_type: ColumnType,
    /// Column options.
    pub options: ColumnOptions,
}

impl ColumnSpec {
    /// Creates a new column spec.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType, options: ColumnOptions) -> Self {
        Self {
            name: name.into(),
            column_type,
            options,
        }
    }
}

/// Options accepted by `add_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexOptions {
    /// Whether this is a unique index.
    pub unique: bool,
    /// Explicit index name; derived from table and columns when absent.
    pub name: Option<String>,
}

impl IndexOptions {
    /// Creates default (non-unique, unnamed) index options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the index unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets an explicit index name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Options accepted by `add_foreign_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ForeignKeyOptions {
    /// Explicit constraint name; derived from table and columns when absent.
    pub constraint: Option<String>,
    /// ON DELETE action.
    pub on_delete: ForeignKeyAction,
    /// ON UPDATE action.
    pub on_update: ForeignKeyAction,
}

impl ForeignKeyOptions {
    /// Creates default foreign key options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit constraint name.
    #[must_use]
    pub fn constraint(mut self, name: impl Into<String>) -> Self {
        self.constraint = Some(name.into());
        self
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub const fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Sets the ON UPDATE action.
    #[must_use]
    pub const fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = action;
        self
    }
}

/// A foreign key from local columns to a referenced table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    /// Local columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced columns.
    pub referenced_columns: Vec<String>,
    /// Constraint options.
    pub options: ForeignKeyOptions,
}

/// The synthetic primary key column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IdColumn {
    /// Auto-incrementing column named `id`.
    #[default]
    Default,
    /// Auto-incrementing column with a custom name.
    Named(String),
    /// No synthetic column.
    Disabled,
}

/// Table-level options passed to `Schema::table_with`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TableOptions {
    /// Synthetic id column policy.
    pub id: IdColumn,
    /// Explicit primary key columns; defaults to the id column.
    pub primary_key: Vec<String>,
}

impl TableOptions {
    /// Creates default options (auto-incrementing `id` primary key).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables the synthetic id column.
    #[must_use]
    pub fn without_id(mut self) -> Self {
        self.id = IdColumn::Disabled;
        self
    }

    /// Renames the synthetic id column.
    #[must_use]
    pub fn id(mut self, name: impl Into<String>) -> Self {
        self.id = IdColumn::Named(name.into());
        self
    }

    /// Sets explicit primary key columns.
    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the name of the synthetic id column, if any.
    #[must_use]
    pub fn id_column(&self) -> Option<&str> {
        match &self.id {
            IdColumn::Default => Some("id"),
            IdColumn::Named(name) => Some(name),
            IdColumn::Disabled => None,
        }
    }

    /// Returns the effective primary key columns.
    #[must_use]
    pub fn primary_key_columns(&self) -> Vec<String> {
        if !self.primary_key.is_empty() {
            return self.primary_key.clone();
        }
        self.id_column()
            .map(|id| vec![id.to_string()])
            .unwrap_or_default()
    }
}

/// Default index name for `table` over `columns`.
#[must_use]
pub fn index_name(table: &str, columns: &[String]) -> String {
    format!("idx_{}_{}", table, columns.join("_"))
}

/// Default foreign key constraint name for `table` over `columns`.
#[must_use]
pub fn foreign_key_name(table: &str, columns: &[String]) -> String {
    format!("fk_{}_{}", table, columns.join("_"))
}
