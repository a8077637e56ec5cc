//! Example: Blog Application Migrations
//!
//! This demo applies and reverts the schema of a small blog application
//! with users, posts and seed data against an in-memory SQLite database.
//!
//! Run with: cargo run --example blog -p strata-migrate

use futures::future::BoxFuture;
use sqlx::sqlite::SqlitePoolOptions;
use strata_migrate::cli;
use strata_migrate::prelude::*;

// =============================================================================
// Migration Definitions
// =============================================================================

fn create_users<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let users = schema
            .table("users")
            .add_column("username", ColumnType::String, ColumnOptions::new().limit(100))
            .add_column("email", ColumnType::String, ColumnOptions::new().limit(255))
            .add_column(
                "is_active",
                ColumnType::Boolean,
                ColumnOptions::new().default_value(DefaultValue::Bool(true)),
            )
            .add_column(
                "created_at",
                ColumnType::Timestamp,
                ColumnOptions::new()
                    .default_value(DefaultValue::Expression("CURRENT_TIMESTAMP".to_string())),
            )
            .add_index(["username"], IndexOptions::new().unique());
        schema.create(users).await
    })
}

fn create_posts<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let posts = schema
            .table("posts")
            .add_column("author_id", ColumnType::BigInteger, ColumnOptions::new())
            .add_column("title", ColumnType::String, ColumnOptions::new().limit(200))
            .add_column("body", ColumnType::Text, ColumnOptions::new().nullable())
            .add_foreign_key(
                ["author_id"],
                "users",
                ["id"],
                ForeignKeyOptions::new().on_delete(ForeignKeyAction::Cascade),
            )
            .add_index(["author_id"], IndexOptions::new());
        schema.create(posts).await
    })
}

fn extend_users<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let users = schema
            .table("users")
            .add_column("bio", ColumnType::Text, ColumnOptions::new().nullable())
            .rename_column("username", "handle");
        schema.update(users).await
    })
}

fn seed_admin<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        schema
            .execute("INSERT INTO users (handle, email) VALUES ('admin', 'admin@example.com')")
            .await?;
        Ok(())
    })
}

fn unseed_admin<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        schema
            .execute("DELETE FROM users WHERE handle = 'admin'")
            .await?;
        Ok(())
    })
}

fn migrations() -> Vec<Migration> {
    vec![
        Migration::reversible(20240101090000, "create_users", create_users),
        Migration::reversible(20240102090000, "create_posts", create_posts),
        Migration::reversible(20240103090000, "extend_users", extend_users),
        Migration::explicit(20240104090000, "seed_admin", seed_admin, unseed_admin),
    ]
}

fn print_status(statuses: &[MigrationStatus]) {
    for status in statuses {
        let state = if status.applied { "[X]" } else { "[ ]" };
        println!("  {state} {} {}", status.version, status.name);
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init_tracing(false)?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let runner = MigrationRunner::new(pool, SqliteDialect::new(), migrations())?;

    println!("=== Forward SQL for create_posts ===");
    if let Some(statements) = runner.sql_for(20240102090000).await? {
        for sql in statements {
            println!("{sql};");
        }
    }

    println!("\n=== Applying all migrations ===");
    let report = runner.migrate_up(None).await?;
    println!("Applied: {:?}", report.applied);
    print_status(&runner.status().await?);

    println!("\n=== Rollback SQL for extend_users ===");
    if let Some(statements) = runner.rollback_sql_for(20240103090000).await? {
        for sql in statements {
            println!("{sql};");
        }
    }

    println!("\n=== Reverting the latest migration ===");
    let report = runner.migrate_down(None, false).await?;
    println!("Reverted: {:?}", report.reverted);

    println!("\n=== Protecting create_users with a breakpoint ===");
    runner
        .set_breakpoint(20240101090000, BreakpointChange::Set)
        .await?;
    match runner.migrate_down(Some(20240101090000), false).await {
        Err(e) => println!("Refused: {e}"),
        Ok(report) => println!("Unexpectedly reverted {:?}", report.reverted),
    }

    println!("\n=== Reverting back to create_users ===");
    let report = runner.migrate_down(Some(20240102090000), false).await?;
    println!("Reverted: {:?}", report.reverted);
    print_status(&runner.status().await?);

    Ok(())
}
