//! `wort info` - show formula metadata.

use std::path::Path;

use anyhow::Result;

use wort_core::Layout;
use wort_schema::{FormulaName, Platform, Source};

/// Print metadata for one formula.
pub fn info(formula: &str, registry_override: Option<&Path>) -> Result<()> {
    let layout = Layout::default_home();
    let registry = super::load_registry(&layout, registry_override)?;

    let formula = registry.lookup(&FormulaName::new(formula))?;
    let meta = &formula.formula;

    println!("{} {}", meta.name, meta.version);
    if !meta.description.is_empty() {
        println!("{}", meta.description);
    }
    if !meta.homepage.is_empty() {
        println!("Homepage: {}", meta.homepage);
    }
    if !meta.license.is_empty() {
        println!("License: {}", meta.license);
    }

    match &formula.source {
        Source::Archive { url, mirrors, .. } => {
            println!("Source: {url}");
            for mirror in mirrors {
                println!("Mirror: {mirror}");
            }
        }
        Source::Git { url, revision } => println!("Source: {url} @ {revision}"),
        Source::Head { url, branch } => println!(
            "Source: {url} (head{})",
            branch.as_deref().map(|b| format!(", branch {b}")).unwrap_or_default()
        ),
    }

    let deps = formula.effective_deps(&Platform::host());
    if !deps.is_empty() {
        let names: Vec<&str> = deps.iter().map(FormulaName::as_str).collect();
        println!("Dependencies: {}", names.join(", "));
    }
    if !formula.patch.is_empty() {
        println!("Patches: {}", formula.patch.len());
    }
    println!("Steps: {}", formula.step.len());

    Ok(())
}
