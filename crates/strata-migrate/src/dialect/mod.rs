//! Database dialect implementations.
//!
//! Each dialect knows how to compile change operations into statements for
//! one database system. The runner only talks to [`MigrationDialect`]; it
//! never inspects which engine it is driving.

mod postgres;
mod sqlite;

pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::error::{MigrateError, Result};
use crate::operations::{ChangeOperation, ChangeSet};
use crate::schema::{
    ColumnSpec, ColumnType, DefaultValue, ForeignKeySpec, IndexOptions, TableOptions,
    foreign_key_name, index_name,
};

/// Trait for database-specific statement generation.
///
/// Every operation kind has a compiler method. Most have a default written
/// in portable SQL; a dialect overrides what its engine spells differently
/// and returns [`MigrateError::UnsupportedOperation`] for what its engine
/// cannot do at all.
pub trait MigrationDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns whether DDL statements can be rolled back in a transaction.
    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    /// Returns the engine type name for a portable column type.
    fn type_name(&self, column_type: &ColumnType, limit: Option<u32>) -> String;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Returns the SQL literal for a default value.
    fn default_sql(&self, value: &DefaultValue) -> Option<String> {
        value.to_sql()
    }

    /// Generates the definition of the synthetic id column.
    ///
    /// `primary_key` is true when the id column is the whole primary key and
    /// can be declared inline.
    fn id_column_definition(&self, name: &str, primary_key: bool) -> String;

    /// Generates column definition SQL.
    fn column_definition(&self, column: &ColumnSpec) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.type_name(&column.column_type, column.options.limit),
        ];

        if !column.options.null {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default_sql) = self.default_sql(&column.options.default) {
            parts.push(format!("DEFAULT {default_sql}"));
        }

        parts.join(" ")
    }

    /// Generates a table-level foreign key clause.
    fn foreign_key_clause(&self, table: &str, foreign_key: &ForeignKeySpec) -> String {
        let name = foreign_key
            .options
            .constraint
            .clone()
            .unwrap_or_else(|| foreign_key_name(table, &foreign_key.columns));
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            self.quote_identifier(&name),
            self.quote_list(&foreign_key.columns),
            self.quote_identifier(&foreign_key.referenced_table),
            self.quote_list(&foreign_key.referenced_columns),
            foreign_key.options.on_delete.to_sql(),
            foreign_key.options.on_update.to_sql(),
        )
    }

    /// Quotes and comma-joins a list of identifiers.
    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote_identifier(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Generates SQL for CREATE TABLE, including the synthetic id column and
    /// the primary key policy of `options`.
    fn create_table(
        &self,
        table: &str,
        options: &TableOptions,
        columns: &[ColumnSpec],
        foreign_keys: &[ForeignKeySpec],
    ) -> Result<Vec<String>> {
        let primary_key = options.primary_key_columns();
        let mut definitions = Vec::new();
        let mut inline_primary_key = false;

        if let Some(id) = options.id_column() {
            if !columns.iter().any(|c| c.name == id) {
                inline_primary_key = primary_key.len() == 1 && primary_key[0] == id;
                definitions.push(self.id_column_definition(id, inline_primary_key));
            }
        }

        definitions.extend(columns.iter().map(|c| self.column_definition(c)));
        if definitions.is_empty() {
            return Err(MigrateError::EmptyTable(table.to_string()));
        }

        if !primary_key.is_empty() && !inline_primary_key {
            definitions.push(format!("PRIMARY KEY ({})", self.quote_list(&primary_key)));
        }

        definitions.extend(
            foreign_keys
                .iter()
                .map(|fk| self.foreign_key_clause(table, fk)),
        );

        Ok(vec![format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.quote_identifier(table),
            definitions.join(",\n    ")
        )])
    }

    /// Generates SQL for DROP TABLE.
    fn drop_table(&self, table: &str) -> Result<Vec<String>> {
        Ok(vec![format!("DROP TABLE {}", self.quote_identifier(table))])
    }

    /// Generates SQL for renaming a table.
    fn rename_table(&self, from: &str, to: &str) -> Result<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        )])
    }

    /// Generates SQL for adding a column.
    fn add_column(&self, table: &str, column: &ColumnSpec) -> Result<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(column)
        )])
    }

    /// Generates SQL for dropping a column.
    fn drop_column(&self, table: &str, name: &str) -> Result<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        )])
    }

    /// Generates SQL for renaming a column.
    fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote_identifier(table),
            self.quote_identifier(from),
            self.quote_identifier(to)
        )])
    }

    /// Generates SQL for creating an index.
    fn add_index(
        &self,
        table: &str,
        columns: &[String],
        options: &IndexOptions,
    ) -> Result<Vec<String>> {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| index_name(table, columns));
        let unique = if options.unique { "UNIQUE " } else { "" };
        Ok(vec![format!(
            "CREATE {unique}INDEX {} ON {} ({})",
            self.quote_identifier(&name),
            self.quote_identifier(table),
            self.quote_list(columns)
        )])
    }

    /// Generates SQL for dropping an index by name.
    fn drop_index(&self, table: &str, name: &str) -> Result<Vec<String>>;

    /// Generates SQL for adding a foreign key to an existing table.
    fn add_foreign_key(&self, table: &str, foreign_key: &ForeignKeySpec) -> Result<Vec<String>>;

    /// Generates SQL for dropping a foreign key constraint by name.
    fn drop_foreign_key(&self, table: &str, constraint: &str) -> Result<Vec<String>>;

    /// Query returning one row per table named by the single bound parameter.
    fn table_exists_sql(&self) -> &'static str;

    /// Query returning `(constraint id, column)` rows for the foreign keys of
    /// the table named by the single bound parameter, ordered by constraint.
    fn foreign_keys_sql(&self) -> &'static str;

    /// Compiles one operation.
    fn compile(&self, operation: &ChangeOperation) -> Result<Vec<String>> {
        match operation {
            ChangeOperation::CreateTable { table, options } => {
                self.create_table(table, options, &[], &[])
            }
            ChangeOperation::DropTable { table, .. } => self.drop_table(table),
            ChangeOperation::RenameTable { from, to } => self.rename_table(from, to),
            ChangeOperation::AddColumn { table, column } => self.add_column(table, column),
            ChangeOperation::DropColumn { table, name, .. } => self.drop_column(table, name),
            ChangeOperation::RenameColumn { table, from, to } => {
                self.rename_column(table, from, to)
            }
            ChangeOperation::AddIndex {
                table,
                columns,
                options,
            } => self.add_index(table, columns, options),
            ChangeOperation::DropIndex {
                table,
                columns,
                definition,
            } => {
                let name = definition
                    .as_ref()
                    .and_then(|d| d.name.clone())
                    .unwrap_or_else(|| index_name(table, columns));
                self.drop_index(table, &name)
            }
            ChangeOperation::AddForeignKey { table, foreign_key } => {
                self.add_foreign_key(table, foreign_key)
            }
            ChangeOperation::DropForeignKey {
                table,
                columns,
                definition,
            } => {
                let name = definition
                    .as_ref()
                    .and_then(|d| d.options.constraint.clone())
                    .unwrap_or_else(|| foreign_key_name(table, columns));
                self.drop_foreign_key(table, &name)
            }
            ChangeOperation::Execute { statement } => Ok(vec![statement.clone()]),
        }
    }

    /// Compiles a whole change set.
    ///
    /// A leading `CreateTable` absorbs every column and foreign key addition
    /// on the same table that comes before the first rename or drop, so they
    /// become part of a single CREATE TABLE statement. The remaining
    /// operations keep their relative order and follow it. Column, index and
    /// foreign key drops that precede a `DropTable` of the same table are
    /// skipped since the table drop removes them.
    fn compile_change_set(&self, change_set: &ChangeSet) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        let mut rest: Vec<&ChangeOperation> = change_set.operations().iter().collect();

        if let Some((ChangeOperation::CreateTable { table, options }, tail)) =
            change_set.operations().split_first()
        {
            let boundary = tail
                .iter()
                .position(|op| {
                    matches!(
                        op,
                        ChangeOperation::RenameTable { .. }
                            | ChangeOperation::RenameColumn { .. }
                            | ChangeOperation::DropTable { .. }
                            | ChangeOperation::DropColumn { .. }
                            | ChangeOperation::DropForeignKey { .. }
                            | ChangeOperation::Execute { .. }
                    )
                })
                .unwrap_or(tail.len());

            let mut columns = Vec::new();
            let mut foreign_keys = Vec::new();
            rest = Vec::with_capacity(tail.len());
            for (i, op) in tail.iter().enumerate() {
                match op {
                    ChangeOperation::AddColumn { table: t, column }
                        if i < boundary && t == table =>
                    {
                        columns.push(column.clone());
                    }
                    ChangeOperation::AddForeignKey { table: t, foreign_key }
                        if i < boundary && t == table =>
                    {
                        foreign_keys.push(foreign_key.clone());
                    }
                    _ => rest.push(op),
                }
            }

            statements.extend(self.create_table(table, options, &columns, &foreign_keys)?);
        }

        for (i, op) in rest.iter().enumerate() {
            if subsumed_by_table_drop(op, &rest[i + 1..]) {
                continue;
            }
            statements.extend(self.compile(op)?);
        }

        Ok(statements)
    }
}

/// Returns true if `op` removes part of a table that `later` drops entirely.
fn subsumed_by_table_drop(op: &ChangeOperation, later: &[&ChangeOperation]) -> bool {
    let table = match op {
        ChangeOperation::DropColumn { table, .. }
        | ChangeOperation::DropIndex { table, .. }
        | ChangeOperation::DropForeignKey { table, .. } => table,
        _ => return false,
    };
    later
        .iter()
        .any(|l| matches!(l, ChangeOperation::DropTable { table: t, .. } if t == table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inverse::invert;
    use crate::operations::ChangeIntent;
    use crate::schema::{ColumnOptions, ForeignKeyOptions};

    fn create_posts() -> ChangeSet {
        ChangeSet::new(
            "posts",
            ChangeIntent::Create,
            vec![
                ChangeOperation::CreateTable {
                    table: "posts".into(),
                    options: TableOptions::new(),
                },
                ChangeOperation::AddColumn {
                    table: "posts".into(),
                    column: ColumnSpec::new("title", ColumnType::String, ColumnOptions::new()),
                },
                ChangeOperation::AddColumn {
                    table: "posts".into(),
                    column: ColumnSpec::new(
                        "author_id",
                        ColumnType::BigInteger,
                        ColumnOptions::new(),
                    ),
                },
                ChangeOperation::AddForeignKey {
                    table: "posts".into(),
                    foreign_key: ForeignKeySpec {
                        columns: vec!["author_id".into()],
                        referenced_table: "users".into(),
                        referenced_columns: vec!["id".into()],
                        options: ForeignKeyOptions::new(),
                    },
                },
                ChangeOperation::AddIndex {
                    table: "posts".into(),
                    columns: vec!["title".into()],
                    options: IndexOptions::new(),
                },
            ],
        )
    }

    #[test]
    fn test_create_set_folds_into_one_statement() {
        let sql = SqliteDialect::new()
            .compile_change_set(&create_posts())
            .unwrap();
        assert_eq!(sql.len(), 2);
        assert!(sql[0].starts_with("CREATE TABLE \"posts\""));
        assert!(sql[0].contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql[0].contains("\"title\" TEXT NOT NULL"));
        assert!(sql[0].contains("FOREIGN KEY (\"author_id\") REFERENCES \"users\" (\"id\")"));
        assert_eq!(
            sql[1],
            "CREATE INDEX \"idx_posts_title\" ON \"posts\" (\"title\")"
        );
    }

    #[test]
    fn test_drop_set_skips_subsumed_drops() {
        let inverse = invert(&create_posts()).unwrap();
        let sql = SqliteDialect::new().compile_change_set(&inverse).unwrap();
        assert_eq!(sql, vec!["DROP TABLE \"posts\"".to_string()]);
    }

    #[test]
    fn test_create_set_folds_foreign_key_staged_after_index() {
        let mut ops = create_posts().operations().to_vec();
        let index = ops.remove(4);
        ops.insert(3, index);
        let cs = ChangeSet::new("posts", ChangeIntent::Create, ops);

        let sql = SqliteDialect::new().compile_change_set(&cs).unwrap();
        assert_eq!(sql.len(), 2);
        assert!(sql[0].contains("FOREIGN KEY (\"author_id\") REFERENCES \"users\" (\"id\")"));
        assert_eq!(
            sql[1],
            "CREATE INDEX \"idx_posts_title\" ON \"posts\" (\"title\")"
        );
    }

    #[test]
    fn test_create_set_stops_folding_at_rename() {
        let cs = ChangeSet::new(
            "posts",
            ChangeIntent::Create,
            vec![
                ChangeOperation::CreateTable {
                    table: "posts".into(),
                    options: TableOptions::new(),
                },
                ChangeOperation::AddColumn {
                    table: "posts".into(),
                    column: ColumnSpec::new("body", ColumnType::Text, ColumnOptions::new()),
                },
                ChangeOperation::RenameColumn {
                    table: "posts".into(),
                    from: "body".into(),
                    to: "content".into(),
                },
                ChangeOperation::AddColumn {
                    table: "posts".into(),
                    column: ColumnSpec::new("body", ColumnType::Text, ColumnOptions::new()),
                },
            ],
        );

        let sql = SqliteDialect::new().compile_change_set(&cs).unwrap();
        assert_eq!(sql.len(), 3);
        assert!(sql[0].contains("\"body\" TEXT NOT NULL"));
        assert_eq!(
            sql[1],
            "ALTER TABLE \"posts\" RENAME COLUMN \"body\" TO \"content\""
        );
        assert!(sql[2].starts_with("ALTER TABLE \"posts\" ADD COLUMN \"body\""));
    }

    #[test]
    fn test_create_table_without_columns_is_rejected() {
        let dialect = SqliteDialect::new();
        let bare = ChangeOperation::CreateTable {
            table: "tags".into(),
            options: TableOptions::new().without_id(),
        };
        assert!(matches!(
            dialect.compile(&bare),
            Err(MigrateError::EmptyTable(table)) if table == "tags"
        ));

        let with_id = ChangeOperation::CreateTable {
            table: "tags".into(),
            options: TableOptions::new(),
        };
        assert!(dialect.compile(&with_id).is_ok());
    }

    #[test]
    fn test_update_set_compiles_each_operation() {
        let cs = ChangeSet::new(
            "users",
            ChangeIntent::Update,
            vec![
                ChangeOperation::RenameColumn {
                    table: "users".into(),
                    from: "name".into(),
                    to: "full_name".into(),
                },
                ChangeOperation::drop_index("users", vec!["email".into()]),
            ],
        );
        let sql = PostgresDialect::new().compile_change_set(&cs).unwrap();
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"users\" RENAME COLUMN \"name\" TO \"full_name\"".to_string(),
                "DROP INDEX \"idx_users_email\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_composite_primary_key() {
        let options = TableOptions::new()
            .without_id()
            .primary_key(["user_id", "role_id"]);
        let columns = vec![
            ColumnSpec::new("user_id", ColumnType::BigInteger, ColumnOptions::new()),
            ColumnSpec::new("role_id", ColumnType::BigInteger, ColumnOptions::new()),
        ];
        let sql = SqliteDialect::new()
            .create_table("user_roles", &options, &columns, &[])
            .unwrap();
        assert!(!sql[0].contains("AUTOINCREMENT"));
        assert!(sql[0].contains("PRIMARY KEY (\"user_id\", \"role_id\")"));
    }

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(
            SqliteDialect::new().quote_identifier("we\"ird"),
            "\"we\"\"ird\""
        );
    }
}
