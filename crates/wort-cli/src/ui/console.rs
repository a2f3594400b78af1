//! Plain line-oriented console reporter.

use wort_core::Reporter;
use wort_schema::{FormulaName, Version};

/// Reporter printing one line per event to stdout/stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    /// Create a console reporter.
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for ConsoleReporter {
    fn fetching(&self, name: &FormulaName, version: &Version, url: &str) {
        println!("==> {name} {version}: fetching {url}");
    }

    fn verifying(&self, name: &FormulaName, version: &Version) {
        println!("==> {name} {version}: verifying checksum");
    }

    fn patching(&self, name: &FormulaName, version: &Version, index: usize, total: usize) {
        println!("==> {name} {version}: applying patch {index}/{total}");
    }

    fn building(&self, name: &FormulaName, version: &Version, step: usize, total: usize) {
        println!("==> {name} {version}: running step {step}/{total}");
    }

    fn installed(&self, name: &FormulaName, version: &Version, detail: &str) {
        println!("==> Installed {name} {version} ({detail})");
    }

    fn failed(&self, name: &FormulaName, version: &Version, reason: &str) {
        eprintln!("Error: {name} {version}: {reason}");
    }

    fn skipped(&self, name: &FormulaName, version: &Version, reason: &str) {
        println!("==> Skipped {name} {version}: {reason}");
    }

    fn info(&self, msg: &str) {
        println!("{msg}");
    }

    fn warning(&self, msg: &str) {
        eprintln!("Warning: {msg}");
    }

    fn error(&self, msg: &str) {
        eprintln!("{msg}");
    }

    fn summary(&self, installed: usize, failed: usize, elapsed_secs: f64) {
        if failed > 0 {
            eprintln!("{installed} installed, {failed} failed in {elapsed_secs:.1}s");
        } else if installed > 0 {
            println!("{installed} installed in {elapsed_secs:.1}s");
        }
    }
}
