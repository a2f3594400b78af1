//! wort - a formula build orchestrator CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wort_cli::cmd;
use wort_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let registry = cli.registry.as_deref();

    match cli.command {
        Commands::Install {
            formulas,
            jobs,
            keep_going,
            verbose,
        } => cmd::install::install(&formulas, registry, jobs, keep_going, verbose).await,
        Commands::List => cmd::list::list().await,
        Commands::Plan { formula } => cmd::plan::plan(&formula, registry).await,
        Commands::Info { formula } => cmd::info::info(&formula, registry),
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    }
}
