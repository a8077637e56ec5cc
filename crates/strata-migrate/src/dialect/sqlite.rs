//! SQLite dialect for migrations.
//!
//! SQLite runs DDL inside transactions, but its ALTER TABLE cannot add or
//! drop constraints. Foreign keys are therefore only available when they
//! are declared in the same change set that creates the table.

use crate::error::{MigrateError, Result};
use crate::schema::{ColumnType, ForeignKeySpec};

use super::MigrationDialect;

/// SQLite migration dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn unsupported(operation: &str) -> MigrateError {
        MigrateError::UnsupportedOperation {
            dialect: "sqlite",
            operation: operation.to_string(),
        }
    }
}

impl MigrationDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn type_name(&self, column_type: &ColumnType, _limit: Option<u32>) -> String {
        match column_type {
            ColumnType::Integer | ColumnType::BigInteger | ColumnType::SmallInteger => "INTEGER",
            ColumnType::String | ColumnType::Char | ColumnType::Text => "TEXT",
            ColumnType::Boolean => "INTEGER",
            ColumnType::Float | ColumnType::Double => "REAL",
            ColumnType::Decimal(_, _) => "NUMERIC",
            ColumnType::Date | ColumnType::Time | ColumnType::DateTime | ColumnType::Timestamp => {
                "TEXT"
            }
            ColumnType::Binary => "BLOB",
            ColumnType::Json | ColumnType::Uuid => "TEXT",
        }
        .to_string()
    }

    fn id_column_definition(&self, name: &str, primary_key: bool) -> String {
        if primary_key {
            format!(
                "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                self.quote_identifier(name)
            )
        } else {
            format!("{} INTEGER NOT NULL", self.quote_identifier(name))
        }
    }

    fn drop_index(&self, _table: &str, name: &str) -> Result<Vec<String>> {
        Ok(vec![format!("DROP INDEX {}", self.quote_identifier(name))])
    }

    fn add_foreign_key(&self, table: &str, _foreign_key: &ForeignKeySpec) -> Result<Vec<String>> {
        Err(Self::unsupported(&format!(
            "adding a foreign key to existing table '{table}'"
        )))
    }

    fn drop_foreign_key(&self, table: &str, constraint: &str) -> Result<Vec<String>> {
        Err(Self::unsupported(&format!(
            "dropping foreign key '{constraint}' from table '{table}'"
        )))
    }

    fn table_exists_sql(&self) -> &'static str {
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?"
    }

    fn foreign_keys_sql(&self) -> &'static str {
        "SELECT id, \"from\" FROM pragma_foreign_key_list(?) ORDER BY id, seq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::ChangeOperation;
    use crate::schema::{
        ColumnOptions, ColumnSpec, DefaultValue, ForeignKeyOptions, IndexOptions, TableOptions,
    };

    fn dialect() -> SqliteDialect {
        SqliteDialect::new()
    }

    #[test]
    fn test_create_table_with_default_id() {
        let sql = dialect()
            .create_table(
                "users",
                &TableOptions::new(),
                &[ColumnSpec::new(
                    "name",
                    ColumnType::String,
                    ColumnOptions::new().limit(255),
                )],
                &[],
            )
            .unwrap();

        assert_eq!(sql.len(), 1);
        assert!(sql[0].contains("CREATE TABLE \"users\""));
        assert!(sql[0].contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql[0].contains("\"name\" TEXT NOT NULL"));
        assert!(!sql[0].contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn test_create_table_with_named_id() {
        let sql = dialect()
            .create_table("users", &TableOptions::new().id("user_id"), &[], &[])
            .unwrap();
        assert!(sql[0].contains("\"user_id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
    }

    #[test]
    fn test_drop_table() {
        let sql = dialect()
            .compile(&ChangeOperation::drop_table("users"))
            .unwrap();
        assert_eq!(sql[0], "DROP TABLE \"users\"");
    }

    #[test]
    fn test_rename_table() {
        let sql = dialect()
            .compile(&ChangeOperation::RenameTable {
                from: "users".into(),
                to: "accounts".into(),
            })
            .unwrap();
        assert_eq!(sql[0], "ALTER TABLE \"users\" RENAME TO \"accounts\"");
    }

    #[test]
    fn test_add_column_with_default() {
        let sql = dialect()
            .compile(&ChangeOperation::AddColumn {
                table: "users".into(),
                column: ColumnSpec::new(
                    "is_active",
                    ColumnType::Boolean,
                    ColumnOptions::new().default_value(DefaultValue::Bool(true)),
                ),
            })
            .unwrap();
        assert_eq!(
            sql[0],
            "ALTER TABLE \"users\" ADD COLUMN \"is_active\" INTEGER NOT NULL DEFAULT 1"
        );
    }

    #[test]
    fn test_rename_column() {
        let sql = dialect()
            .compile(&ChangeOperation::RenameColumn {
                table: "users".into(),
                from: "name".into(),
                to: "full_name".into(),
            })
            .unwrap();
        assert_eq!(
            sql[0],
            "ALTER TABLE \"users\" RENAME COLUMN \"name\" TO \"full_name\""
        );
    }

    #[test]
    fn test_unique_index_and_drop() {
        let d = dialect();
        let add = d
            .compile(&ChangeOperation::AddIndex {
                table: "users".into(),
                columns: vec!["email".into()],
                options: IndexOptions::new().unique().name("users_email_unique"),
            })
            .unwrap();
        assert_eq!(
            add[0],
            "CREATE UNIQUE INDEX \"users_email_unique\" ON \"users\" (\"email\")"
        );

        let drop = d
            .compile(&ChangeOperation::DropIndex {
                table: "users".into(),
                columns: vec!["email".into()],
                definition: Some(IndexOptions::new().unique().name("users_email_unique")),
            })
            .unwrap();
        assert_eq!(drop[0], "DROP INDEX \"users_email_unique\"");
    }

    #[test]
    fn test_foreign_key_alteration_is_unsupported() {
        let op = ChangeOperation::AddForeignKey {
            table: "posts".into(),
            foreign_key: ForeignKeySpec {
                columns: vec!["author_id".into()],
                referenced_table: "users".into(),
                referenced_columns: vec!["id".into()],
                options: ForeignKeyOptions::new(),
            },
        };
        let err = dialect().compile(&op).unwrap_err();
        assert!(matches!(
            err,
            MigrateError::UnsupportedOperation {
                dialect: "sqlite",
                ..
            }
        ));

        let err = dialect()
            .compile(&ChangeOperation::drop_foreign_key(
                "posts",
                vec!["author_id".into()],
            ))
            .unwrap_err();
        assert!(err.to_string().contains("fk_posts_author_id"));
    }

    #[test]
    fn test_type_names() {
        let d = dialect();
        assert_eq!(d.type_name(&ColumnType::BigInteger, None), "INTEGER");
        assert_eq!(d.type_name(&ColumnType::String, Some(255)), "TEXT");
        assert_eq!(d.type_name(&ColumnType::Boolean, None), "INTEGER");
        assert_eq!(d.type_name(&ColumnType::DateTime, None), "TEXT");
        assert_eq!(d.type_name(&ColumnType::Binary, None), "BLOB");
    }
}
