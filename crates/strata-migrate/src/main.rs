//! strata CLI
//!
//! Stand-alone binary for inspecting and maintaining the migration ledger.
//! It carries no migrations of its own; applications embed
//! [`strata_migrate::cli::run`] in their own binary to pass theirs.

use clap::Parser;

use strata_migrate::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli::init_tracing(cli.verbose)?;

    let code = cli::run(cli, Vec::new()).await;
    std::process::exit(code);
}
