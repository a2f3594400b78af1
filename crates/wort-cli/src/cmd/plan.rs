//! `wort plan` - print the resolved installation order.

use std::path::Path;

use anyhow::Result;

use wort_core::Layout;
use wort_core::ledger::versions_snapshot;
use wort_core::resolver::resolve;
use wort_schema::{FormulaName, Platform};

/// Resolve `formula` and print the plan without building anything.
pub async fn plan(formula: &str, registry_override: Option<&Path>) -> Result<()> {
    let layout = Layout::default_home();
    let registry = super::load_registry(&layout, registry_override)?;
    let ledger = super::open_ledger(&layout)?;
    let platform = Platform::host();

    let installed = versions_snapshot(&ledger.all().await?);
    let plan = resolve(
        &registry,
        &platform,
        &installed,
        &[FormulaName::new(formula)],
    )?;

    for (i, entry) in plan.entries.iter().enumerate() {
        let marker = if entry.skip { " (already installed)" } else { "" };
        println!(
            "{:>3}. {} {}{marker}",
            i + 1,
            entry.formula.name(),
            entry.formula.version()
        );
    }
    if plan.is_fully_installed() {
        println!("Nothing to build.");
    }
    Ok(())
}
