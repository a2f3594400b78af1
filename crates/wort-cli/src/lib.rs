//! wort - a formula build orchestrator
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Installs third-party libraries from declarative formula files: resolves
//! the dependency graph, fetches and verifies sources, applies patches,
//! and drives the external build tools each formula declares.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.wort/
//! ├── formula/    # Formula registry (one TOML file per formula)
//! ├── cache/      # Verified downloads, keyed by digest
//! ├── build/      # Staged source trees (one per formula being built)
//! ├── cellar/     # Install prefixes by name/version
//! ├── logs/       # Build logs
//! └── state.db    # Installation ledger (SQLite)
//! ```

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "wort")]
#[command(author, version, about = "wort - a formula build orchestrator")]
pub struct Cli {
    /// Formula registry directory (defaults to ~/.wort/formula)
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve and install one or more formulas
    Install {
        /// Formula name(s)
        #[arg(required = true)]
        formulas: Vec<String>,
        /// Parallel worker bound (defaults to the logical CPU count)
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Keep building independent subtrees after a failure
        #[arg(long)]
        keep_going: bool,
        /// Stream build output to the terminal instead of the log files
        #[arg(short, long)]
        verbose: bool,
    },
    /// List installed formulas (the ledger)
    List,
    /// Show the resolved installation plan without building anything
    Plan {
        /// Formula name
        formula: String,
    },
    /// Show formula metadata
    Info {
        /// Formula name
        formula: String,
    },
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}
