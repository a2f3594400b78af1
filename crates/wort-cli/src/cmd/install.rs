//! `wort install` - resolve, build, and record formulas.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::ui::ConsoleReporter;
use wort_core::ledger::versions_snapshot;
use wort_core::orchestrator::{ExecOptions, Orchestrator, Outcome};
use wort_core::resolver::resolve;
use wort_core::{Layout, Reporter};
use wort_schema::{FormulaName, Platform};

/// Install `formulas` and their dependencies.
///
/// Exit is non-zero with every failing formula identified when any plan
/// entry fails; resolution-time errors (unknown name, cycle) abort before
/// any build starts.
pub async fn install(
    formulas: &[String],
    registry_override: Option<&Path>,
    jobs: Option<usize>,
    keep_going: bool,
    verbose: bool,
) -> Result<()> {
    let layout = Layout::default_home();
    let registry = super::load_registry(&layout, registry_override)?;
    let ledger = super::open_ledger(&layout)?;
    let platform = Platform::host();

    let installed = versions_snapshot(&ledger.all().await?);
    let targets: Vec<FormulaName> = formulas.iter().map(|s| FormulaName::new(s)).collect();
    let plan = resolve(&registry, &platform, &installed, &targets)?;

    let reporter: Arc<dyn Reporter> = Arc::new(ConsoleReporter::new());
    let mut options = ExecOptions::default();
    if let Some(jobs) = jobs {
        options.jobs = jobs.max(1);
    }
    options.keep_going = keep_going;
    options.verbose = verbose;

    let orchestrator = Orchestrator::new(layout, ledger, platform, options);

    // Ctrl-C cancels the run: installed entries are kept, in-flight
    // external processes are terminated.
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let report = orchestrator.run(&plan, &reporter).await?;

    if report.success() {
        return Ok(());
    }

    let failures: Vec<String> = report
        .failures()
        .map(|entry| format!("{} ({})", entry.name, describe(&entry.outcome)))
        .collect();
    bail!("install failed for: {}", failures.join(", "));
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Failed { stage, reason } => format!("{stage}: {reason}"),
        Outcome::DependencyFailed { dep } => format!("dependency '{dep}' failed"),
        Outcome::NotRun => "not run".to_string(),
        Outcome::Installed { .. } | Outcome::AlreadyInstalled => "ok".to_string(),
    }
}
