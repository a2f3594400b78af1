//! Installation ledger.
//!
//! SQLite-backed record of what is currently installed. All access is
//! serialized through the [`LedgerHandle`] actor, which makes the ledger
//! the plan's single mutation point even under parallel builds.

mod actor;
mod db;

pub use actor::LedgerHandle;
pub use db::{InstalledFormula, LedgerDb, LedgerError, versions_snapshot};
