//! CLI subcommand implementations.

pub mod completions;
pub mod info;
pub mod install;
pub mod list;
pub mod plan;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use wort_core::registry::Registry;
use wort_core::{Layout, ledger::LedgerHandle};

/// Resolve the formula registry directory: explicit override, else the
/// layout default.
pub(crate) fn registry_dir(layout: &Layout, override_dir: Option<&Path>) -> PathBuf {
    override_dir.map_or_else(|| layout.formula_dir(), Path::to_path_buf)
}

/// Load the registry, with a friendly error when the directory is absent.
pub(crate) fn load_registry(layout: &Layout, override_dir: Option<&Path>) -> Result<Registry> {
    let dir = registry_dir(layout, override_dir);
    anyhow::ensure!(
        dir.is_dir(),
        "no formula registry at {} (populate it with formula TOML files or pass --registry)",
        dir.display()
    );
    let registry =
        Registry::load(&dir).with_context(|| format!("loading registry from {}", dir.display()))?;
    Ok(registry)
}

/// Spawn the ledger actor for the layout's database.
pub(crate) fn open_ledger(layout: &Layout) -> Result<LedgerHandle> {
    LedgerHandle::spawn_at(&layout.db_path()).context("opening installation ledger")
}
