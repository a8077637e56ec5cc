//! PostgreSQL dialect for migrations.

use super::MigrationDialect;
use crate::error::Result;
use crate::schema::{ColumnType, DefaultValue, ForeignKeySpec};

/// PostgreSQL dialect for migration SQL generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MigrationDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn type_name(&self, column_type: &ColumnType, limit: Option<u32>) -> String {
        match column_type {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInteger => "BIGINT".to_string(),
            ColumnType::SmallInteger => "SMALLINT".to_string(),
            ColumnType::String => format!("VARCHAR({})", limit.unwrap_or(255)),
            ColumnType::Char => format!("CHAR({})", limit.unwrap_or(1)),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Float => "REAL".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Decimal(p, s) => format!("DECIMAL({p}, {s})"),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::DateTime | ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Binary => "BYTEA".to_string(),
            ColumnType::Json => "JSONB".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
        }
    }

    fn default_sql(&self, value: &DefaultValue) -> Option<String> {
        match value {
            DefaultValue::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
            other => other.to_sql(),
        }
    }

    fn id_column_definition(&self, name: &str, primary_key: bool) -> String {
        // BIGSERIAL carries its own sequence, no AUTOINCREMENT keyword.
        if primary_key {
            format!("{} BIGSERIAL PRIMARY KEY", self.quote_identifier(name))
        } else {
            format!("{} BIGSERIAL NOT NULL", self.quote_identifier(name))
        }
    }

    fn drop_index(&self, _table: &str, name: &str) -> Result<Vec<String>> {
        Ok(vec![format!("DROP INDEX {}", self.quote_identifier(name))])
    }

    fn add_foreign_key(&self, table: &str, foreign_key: &ForeignKeySpec) -> Result<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table),
            self.foreign_key_clause(table, foreign_key)
        )])
    }

    fn drop_foreign_key(&self, table: &str, constraint: &str) -> Result<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_identifier(table),
            self.quote_identifier(constraint)
        )])
    }

    fn table_exists_sql(&self) -> &'static str {
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1"
    }

    fn foreign_keys_sql(&self) -> &'static str {
        "SELECT c.oid::bigint AS id, a.attname AS column_name \
         FROM pg_constraint c \
         JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = ANY (c.conkey) \
         WHERE c.contype = 'f' AND c.conrelid = $1::regclass \
         ORDER BY c.oid, array_position(c.conkey, a.attnum)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::ChangeOperation;
    use crate::schema::{
        ColumnOptions, ColumnSpec, ForeignKeyAction, ForeignKeyOptions, TableOptions,
    };

    fn dialect() -> PostgresDialect {
        PostgresDialect::new()
    }

    #[test]
    fn test_create_table_uses_bigserial() {
        let sql = dialect()
            .create_table(
                "users",
                &TableOptions::new(),
                &[ColumnSpec::new(
                    "active",
                    ColumnType::Boolean,
                    ColumnOptions::new().default_value(DefaultValue::Bool(false)),
                )],
                &[],
            )
            .unwrap();
        assert!(sql[0].contains("\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(sql[0].contains("\"active\" BOOLEAN NOT NULL DEFAULT FALSE"));
    }

    #[test]
    fn test_add_and_drop_foreign_key() {
        let d = dialect();
        let add = d
            .compile(&ChangeOperation::AddForeignKey {
                table: "posts".into(),
                foreign_key: ForeignKeySpec {
                    columns: vec!["author_id".into()],
                    referenced_table: "users".into(),
                    referenced_columns: vec!["id".into()],
                    options: ForeignKeyOptions::new().on_delete(ForeignKeyAction::Cascade),
                },
            })
            .unwrap();
        assert_eq!(
            add[0],
            "ALTER TABLE \"posts\" ADD CONSTRAINT \"fk_posts_author_id\" FOREIGN KEY \
             (\"author_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE ON UPDATE NO ACTION"
        );

        let drop = d
            .compile(&ChangeOperation::drop_foreign_key(
                "posts",
                vec!["author_id".into()],
            ))
            .unwrap();
        assert_eq!(
            drop[0],
            "ALTER TABLE \"posts\" DROP CONSTRAINT \"fk_posts_author_id\""
        );
    }

    #[test]
    fn test_type_names() {
        let d = dialect();
        assert_eq!(d.type_name(&ColumnType::String, Some(100)), "VARCHAR(100)");
        assert_eq!(d.type_name(&ColumnType::String, None), "VARCHAR(255)");
        assert_eq!(d.type_name(&ColumnType::Decimal(10, 2), None), "DECIMAL(10, 2)");
        assert_eq!(d.type_name(&ColumnType::Json, None), "JSONB");
    }

    #[test]
    fn test_transactional_ddl() {
        assert!(dialect().supports_transactional_ddl());
    }
}
