//! `wort list` - print the installation ledger.

use anyhow::Result;

use wort_core::Layout;

/// Print one line per installation record.
pub async fn list() -> Result<()> {
    let layout = Layout::default_home();
    let ledger = super::open_ledger(&layout)?;

    let records = ledger.all().await?;
    if records.is_empty() {
        println!("No formulas installed.");
        return Ok(());
    }

    for record in records {
        println!(
            "{:<24} {:<14} {}",
            record.name, record.version, record.prefix
        );
    }
    Ok(())
}
