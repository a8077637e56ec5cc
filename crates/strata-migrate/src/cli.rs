//! Command-line front end.
//!
//! Migrations are compiled into the application, so the CLI is a library
//! module: an application binary parses [`Cli`] and hands it to [`run`]
//! together with its migration set.
//!
//! ```rust,no_run
//! use clap::Parser;
//! use strata_migrate::cli::{self, Cli};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cli = Cli::parse();
//!     let migrations = Vec::new();
//!     std::process::exit(cli::run(cli, migrations).await);
//! }
//! ```

use std::str::FromStr;

use clap::{Parser, Subcommand, ValueEnum};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::RunnerConfig;
use crate::dialect::SqliteDialect;
use crate::error::Result;
use crate::ledger::{BreakpointChange, DEFAULT_LEDGER_TABLE};
use crate::migration::Migration;
use crate::runner::{MigrationRunner, MigrationStatus, RunReport};

/// Versioned, reversible schema migrations.
#[derive(Debug, Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Database URL.
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:strata.db")]
    pub database: String,

    /// Name of the ledger table.
    #[arg(long, env = "STRATA_LEDGER_TABLE", default_value = DEFAULT_LEDGER_TABLE)]
    pub ledger_table: String,

    /// Identity recorded in the migration lock.
    #[arg(long, env = "STRATA_LOCK_OWNER")]
    pub lock_owner: Option<String>,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the ledger and lock tables.
    Init,

    /// Apply pending migrations.
    Migrate {
        /// Last version to apply (all if not specified).
        #[arg(long = "to")]
        target: Option<i64>,

        /// Print SQL without executing it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert applied migrations.
    Rollback {
        /// Revert every version at or above this one (only the latest if
        /// not specified).
        #[arg(long = "to")]
        target: Option<i64>,

        /// Revert past breakpoints.
        #[arg(short, long)]
        force: bool,

        /// Print SQL without executing it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show migration status.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Change the breakpoint flag of an applied version.
    Breakpoint {
        /// Version to change.
        #[arg(required_unless_present = "remove_all")]
        version: Option<i64>,

        /// How to change the flag.
        #[arg(long, value_enum, default_value_t = BreakpointAction::Toggle)]
        action: BreakpointAction,

        /// Clear every breakpoint.
        #[arg(long, conflicts_with = "version")]
        remove_all: bool,
    },

    /// Show SQL for one migration without executing it.
    Sql {
        /// Migration version.
        version: i64,

        /// Show rollback SQL instead of forward SQL.
        #[arg(short, long)]
        rollback: bool,
    },

    /// Remove a stale migration lock.
    Unlock,
}

/// Breakpoint changes accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BreakpointAction {
    /// Set the flag.
    Set,
    /// Clear the flag.
    Unset,
    /// Invert the flag.
    Toggle,
}

impl From<BreakpointAction> for BreakpointChange {
    fn from(action: BreakpointAction) -> Self {
        match action {
            BreakpointAction::Set => Self::Set,
            BreakpointAction::Unset => Self::Unset,
            BreakpointAction::Toggle => Self::Toggle,
        }
    }
}

impl Cli {
    /// Builds the runner configuration from flags and environment.
    #[must_use]
    pub fn runner_config(&self) -> RunnerConfig {
        let mut config = RunnerConfig::new().ledger_table(self.ledger_table.clone());
        if let Some(owner) = &self.lock_owner {
            config = config.lock_owner(owner.clone());
        }
        match self.command {
            Commands::Migrate { dry_run, .. } | Commands::Rollback { dry_run, .. } => {
                config.dry_run(dry_run)
            }
            _ => config,
        }
    }
}

/// Installs the global `tracing` subscriber.
pub fn init_tracing(verbose: bool) -> std::result::Result<(), SetGlobalDefaultError> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}

/// Runs a parsed command against `migrations` and returns the process exit
/// code.
///
/// `0` is success, `1` a failure, `2` a blocked reversal and `3` lock
/// contention.
pub async fn run(cli: Cli, migrations: Vec<Migration>) -> i32 {
    match execute(cli, migrations).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Command failed");
            e.exit_code()
        }
    }
}

async fn execute(cli: Cli, migrations: Vec<Migration>) -> Result<()> {
    let options = SqliteConnectOptions::from_str(&cli.database)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let config = cli.runner_config();
    let runner = MigrationRunner::with_config(pool, SqliteDialect::new(), migrations, config)?;

    match cli.command {
        Commands::Init => {
            info!("Initializing migration ledger...");
            runner.init().await?;
            info!(table = %runner.ledger().table(), "Ledger table ready.");
        }

        Commands::Migrate { target, .. } => {
            let report = runner.migrate_up(target).await?;
            print_report(&report, "Applied");
        }

        Commands::Rollback { target, force, .. } => {
            let report = runner.migrate_down(target, force).await?;
            print_report(&report, "Reverted");
        }

        Commands::Status { json } => {
            let statuses = runner.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                print_status(&statuses);
            }
        }

        Commands::Breakpoint {
            version,
            action,
            remove_all,
        } => {
            if remove_all {
                let cleared = runner.remove_all_breakpoints().await?;
                println!("Cleared {cleared} breakpoint(s).");
            } else if let Some(version) = version {
                let value = runner.set_breakpoint(version, action.into()).await?;
                let state = if value { "set" } else { "cleared" };
                println!("Breakpoint on {version} {state}.");
            }
        }

        Commands::Sql { version, rollback } => {
            let statements = if rollback {
                runner.rollback_sql_for(version).await?
            } else {
                runner.sql_for(version).await?
            };
            match statements {
                Some(statements) => {
                    for sql in statements {
                        println!("{sql};");
                    }
                }
                None => println!("No migration with version {version}."),
            }
        }

        Commands::Unlock => match runner.force_unlock().await? {
            Some(holder) => println!(
                "Removed lock held by '{}' since {}.",
                holder.owner, holder.acquired_at
            ),
            None => println!("No lock was held."),
        },
    }

    Ok(())
}

fn print_report(report: &RunReport, verb: &str) {
    if report.dry_run {
        println!("-- Dry run, nothing was executed.");
        for sql in &report.statements {
            println!("{sql};");
        }
    }

    let versions = if report.applied.is_empty() {
        &report.reverted
    } else {
        &report.applied
    };
    if versions.is_empty() {
        println!("Nothing to do.");
    }
    for version in versions {
        println!("{verb} {version}");
    }
    if report.cancelled {
        println!("Stopped early: cancellation requested.");
    }
}

fn print_status(statuses: &[MigrationStatus]) {
    if statuses.is_empty() {
        println!("No migrations.");
        return;
    }

    println!("{:<8} {:<16} Name", "Status", "Version");
    for status in statuses {
        let state = if status.missing {
            "missing"
        } else if status.applied {
            "applied"
        } else {
            "pending"
        };
        let marker = if status.breakpoint { " [breakpoint]" } else { "" };
        println!(
            "{:<8} {:<16} {}{}",
            state, status.version, status.name, marker
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_migrate() {
        let cli = Cli::try_parse_from(["strata", "-d", "sqlite::memory:", "migrate", "--to", "5"])
            .unwrap();
        assert_eq!(cli.database, "sqlite::memory:");
        assert!(matches!(
            cli.command,
            Commands::Migrate {
                target: Some(5),
                dry_run: false
            }
        ));
    }

    #[test]
    fn test_runner_config_from_flags() {
        let cli = Cli::try_parse_from([
            "strata",
            "--ledger-table",
            "versions",
            "--lock-owner",
            "ci",
            "rollback",
            "--dry-run",
        ])
        .unwrap();
        let config = cli.runner_config();
        assert_eq!(config.ledger_table, "versions");
        assert_eq!(config.lock_owner, "ci");
        assert!(config.dry_run);
    }

    #[test]
    fn test_breakpoint_arguments() {
        let cli = Cli::try_parse_from(["strata", "breakpoint", "42", "--action", "set"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Breakpoint {
                version: Some(42),
                action: BreakpointAction::Set,
                remove_all: false
            }
        ));

        assert!(Cli::try_parse_from(["strata", "breakpoint"]).is_err());
        assert!(Cli::try_parse_from(["strata", "breakpoint", "--remove-all"]).is_ok());
    }

    #[tokio::test]
    async fn test_run_reports_exit_codes() {
        let cli = Cli::try_parse_from(["strata", "-d", "sqlite::memory:", "migrate"]).unwrap();
        assert_eq!(run(cli, Vec::new()).await, 0);

        let cli = Cli::try_parse_from(["strata", "-d", "sqlite::memory:", "rollback"]).unwrap();
        assert_eq!(run(cli, Vec::new()).await, 0);
    }
}
