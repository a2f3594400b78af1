//! wort core - the build orchestrator behind the CLI.
//!
//! The pieces mirror the data flow: a [`registry::Registry`] of loaded
//! formulas feeds the [`resolver`], which produces a dependency-ordered
//! [`resolver::Plan`]; the [`orchestrator`] walks the plan, driving the
//! [`fetch::Fetcher`], the [`patch`] applier, and the [`executor`] for
//! each entry, and commits successes to the [`ledger`].

pub mod executor;
pub mod extract;
pub mod fetch;
pub mod ledger;
pub mod orchestrator;
pub mod patch;
pub mod paths;
pub mod registry;
pub mod reporter;
pub mod resolver;

pub use paths::Layout;
pub use reporter::{NullReporter, Reporter};

/// User Agent string for fetch operations.
pub const USER_AGENT: &str = concat!("wort/", env!("CARGO_PKG_VERSION"));
