//! `wort completions` - shell completion generation.

use clap::CommandFactory;
use clap_complete::Shell;

use crate::Cli;

/// Write completions for `shell` to stdout.
pub fn completions(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "wort", &mut std::io::stdout());
}
