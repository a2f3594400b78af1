//! Reporter trait for dependency injection
//!
//! This trait allows core logic to report progress and status without
//! being coupled to a specific console or GUI implementation.

use wort_schema::{FormulaName, Version};

/// Progress and status sink for orchestrator runs.
pub trait Reporter: Send + Sync {
    /// A formula entered the fetching stage.
    fn fetching(&self, name: &FormulaName, version: &Version, url: &str);

    /// A formula's source is being verified against its digest.
    fn verifying(&self, name: &FormulaName, version: &Version);

    /// A patch is being applied (1-based index over the effective list).
    fn patching(&self, name: &FormulaName, version: &Version, index: usize, total: usize);

    /// A build step is running (1-based index over the step list).
    fn building(&self, name: &FormulaName, version: &Version, step: usize, total: usize);

    /// A formula reached the installed state.
    fn installed(&self, name: &FormulaName, version: &Version, detail: &str);

    /// A formula failed with a stage-qualified reason.
    fn failed(&self, name: &FormulaName, version: &Version, reason: &str);

    /// A plan entry was skipped (already installed, or dependency failed).
    fn skipped(&self, name: &FormulaName, version: &Version, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Display a final summary of a plan run.
    fn summary(&self, installed: usize, failed: usize, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn fetching(&self, name: &FormulaName, version: &Version, url: &str) {
        (**self).fetching(name, version, url);
    }
    fn verifying(&self, name: &FormulaName, version: &Version) {
        (**self).verifying(name, version);
    }
    fn patching(&self, name: &FormulaName, version: &Version, index: usize, total: usize) {
        (**self).patching(name, version, index, total);
    }
    fn building(&self, name: &FormulaName, version: &Version, step: usize, total: usize) {
        (**self).building(name, version, step, total);
    }
    fn installed(&self, name: &FormulaName, version: &Version, detail: &str) {
        (**self).installed(name, version, detail);
    }
    fn failed(&self, name: &FormulaName, version: &Version, reason: &str) {
        (**self).failed(name, version, reason);
    }
    fn skipped(&self, name: &FormulaName, version: &Version, reason: &str) {
        (**self).skipped(name, version, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
    fn summary(&self, installed: usize, failed: usize, elapsed_secs: f64) {
        (**self).summary(installed, failed, elapsed_secs);
    }
}

/// Reporter that discards everything. Used in tests and library contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn fetching(&self, _: &FormulaName, _: &Version, _: &str) {}
    fn verifying(&self, _: &FormulaName, _: &Version) {}
    fn patching(&self, _: &FormulaName, _: &Version, _: usize, _: usize) {}
    fn building(&self, _: &FormulaName, _: &Version, _: usize, _: usize) {}
    fn installed(&self, _: &FormulaName, _: &Version, _: &str) {}
    fn failed(&self, _: &FormulaName, _: &Version, _: &str) {}
    fn skipped(&self, _: &FormulaName, _: &Version, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn summary(&self, _: usize, _: usize, _: f64) {}
}
