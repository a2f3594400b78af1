//! Plan execution.
//!
//! Walks a resolved plan entry by entry: fetch, verify, patch, build,
//! record. Independent subtrees run in parallel on a bounded worker pool;
//! an entry never starts before all of its plan-predecessors are
//! installed. The ledger actor serializes all record writes, and each
//! staged source directory is owned by exactly one worker.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::executor::{BuildConfig, InstallRequest, run_steps};
use crate::extract;
use crate::fetch::{FetchError, Fetcher, GitTarget, checkout_git};
use crate::ledger::{LedgerError, LedgerHandle};
use crate::patch::apply_patch;
use crate::paths::Layout;
use crate::reporter::Reporter;
use crate::resolver::Plan;
use wort_schema::{Formula, FormulaName, Platform, Source, Version};

/// Execution options for one plan run.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Upper bound on concurrently processed entries.
    pub jobs: usize,
    /// Keep building independent subtrees after a failure instead of
    /// failing fast.
    pub keep_going: bool,
    /// Stream build output to the terminal.
    pub verbose: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get(),
            keep_going: false,
            verbose: false,
        }
    }
}

/// Lifecycle stage of a plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for dependencies or a worker slot.
    Pending,
    /// Downloading or checking out sources.
    Fetching,
    /// Verifying content against the declared digest.
    Verifying,
    /// Applying declared patches.
    Patching,
    /// Running install steps.
    Building,
    /// Terminal success; idempotent to re-enter.
    Installed,
    /// Terminal failure.
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Verifying => "verifying",
            Self::Patching => "patching",
            Self::Building => "building",
            Self::Installed => "installed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Terminal outcome of one plan entry.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Built and recorded in the ledger.
    Installed {
        /// Install prefix.
        prefix: PathBuf,
    },
    /// Ledger already held the formula at the requested version; nothing
    /// ran.
    AlreadyInstalled,
    /// The entry itself failed.
    Failed {
        /// Stage the failure occurred in.
        stage: Stage,
        /// Human-readable cause.
        reason: String,
    },
    /// Skipped because a (transitive) dependency failed.
    DependencyFailed {
        /// The failed dependency.
        dep: FormulaName,
    },
    /// Never started: the run stopped (fail-fast or cancellation) first.
    NotRun,
}

impl Outcome {
    /// Whether this outcome counts as satisfied.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Installed { .. } | Self::AlreadyInstalled)
    }
}

/// Per-entry result of a plan run.
#[derive(Debug)]
pub struct EntryReport {
    /// Formula name.
    pub name: FormulaName,
    /// Formula version.
    pub version: Version,
    /// Terminal outcome.
    pub outcome: Outcome,
}

/// Result of executing a plan.
#[derive(Debug)]
pub struct ExecReport {
    /// One report per plan entry, in plan order.
    pub entries: Vec<EntryReport>,
}

impl ExecReport {
    /// Whether every entry ended satisfied.
    pub fn success(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.is_success())
    }

    /// Number of entries actually built this run.
    pub fn installed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Installed { .. }))
            .count()
    }

    /// Entries that did not end satisfied.
    pub fn failures(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries.iter().filter(|e| !e.outcome.is_success())
    }
}

/// Drives a resolved plan to completion.
#[derive(Debug)]
pub struct Orchestrator {
    layout: Layout,
    fetcher: Fetcher,
    ledger: LedgerHandle,
    platform: Platform,
    options: ExecOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator over the given layout and ledger.
    pub fn new(
        layout: Layout,
        ledger: LedgerHandle,
        platform: Platform,
        options: ExecOptions,
    ) -> Self {
        let fetcher = Fetcher::new(layout.cache_dir());
        Self {
            layout,
            fetcher,
            ledger,
            platform,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels the run when triggered (e.g. from Ctrl-C).
    ///
    /// Installed entries are kept; in-flight external processes are
    /// terminated and their entries fail.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute a plan and report every entry's outcome.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] only for ledger infrastructure failures;
    /// per-formula failures are reported in the [`ExecReport`].
    pub async fn run(
        &self,
        plan: &Plan,
        reporter: &Arc<dyn Reporter>,
    ) -> Result<ExecReport, LedgerError> {
        let start = std::time::Instant::now();
        let n = plan.len();

        let index_of: HashMap<FormulaName, usize> = plan
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.formula.name().clone(), i))
            .collect();

        // Plan-local dependency edges
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indegree: Vec<usize> = vec![0; n];
        for (i, entry) in plan.entries.iter().enumerate() {
            for dep in &entry.deps {
                let d = index_of[dep];
                dependents[d].push(i);
                indegree[i] += 1;
            }
        }

        // Install prefixes of already-satisfied entries come from the ledger
        let mut prefixes: HashMap<FormulaName, PathBuf> = HashMap::new();
        for record in self.ledger.all().await? {
            prefixes.insert(FormulaName::new(&record.name), PathBuf::from(&record.prefix));
        }

        let mut state = RunState {
            outcomes: vec![None; n],
            ready: (0..n).filter(|&i| indegree[i] == 0).collect(),
            dependents,
            indegree,
            prefixes,
        };

        let mut active: tokio::task::JoinSet<(usize, Result<(PathBuf, Option<String>), (Stage, String)>)> =
            tokio::task::JoinSet::new();
        let mut stop = false;
        let mut cancel_seen = false;

        loop {
            // Dispatch ready entries in plan order up to the job bound
            while !stop && active.len() < self.options.jobs {
                let Some(&idx) = state.ready.first() else {
                    break;
                };
                state.ready.remove(&idx);

                let entry = &plan.entries[idx];
                if entry.skip {
                    reporter.skipped(
                        entry.formula.name(),
                        entry.formula.version(),
                        "already installed",
                    );
                    state.complete_success(idx, plan, None);
                    continue;
                }

                let job = EntryJob {
                    formula: Arc::clone(&entry.formula),
                    dep_prefixes: state.dep_prefixes_for(entry),
                    fetcher: self.fetcher.clone(),
                    layout: self.layout.clone(),
                    platform: self.platform.clone(),
                    config: BuildConfig {
                        jobs: self.options.jobs,
                        verbose: self.options.verbose,
                    },
                    cancel: self.cancel.clone(),
                    reporter: Arc::clone(reporter),
                };
                active.spawn(async move { (idx, job.run().await) });
            }

            if active.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    stop = true;
                    reporter.warning("cancellation requested; terminating in-flight builds");
                }
                Some(joined) = active.join_next() => {
                    let (idx, result) = match joined {
                        Ok(pair) => pair,
                        Err(e) => {
                            reporter.error(&format!("internal: worker panicked: {e}"));
                            continue;
                        }
                    };
                    let entry = &plan.entries[idx];
                    match result {
                        Ok((prefix, source_ref)) => {
                            self.ledger
                                .record_install(
                                    entry.formula.name().to_string(),
                                    entry.formula.version().to_string(),
                                    prefix.display().to_string(),
                                    source_ref,
                                )
                                .await?;
                            reporter.installed(
                                entry.formula.name(),
                                entry.formula.version(),
                                &prefix.display().to_string(),
                            );
                            if let Some(caveats) = &entry.formula.caveats {
                                reporter.info(&caveats.text);
                            }
                            state.complete_success(idx, plan, Some(prefix));
                        }
                        Err((stage, reason)) => {
                            reporter.failed(
                                entry.formula.name(),
                                entry.formula.version(),
                                &format!("{stage}: {reason}"),
                            );
                            state.complete_failure(idx, plan, stage, reason, reporter);
                            if !self.options.keep_going {
                                stop = true;
                            }
                        }
                    }
                }
            }
        }

        // Entries never dispatched (fail-fast stop or cancellation)
        let entries = plan
            .entries
            .iter()
            .zip(state.outcomes)
            .map(|(entry, outcome)| EntryReport {
                name: entry.formula.name().clone(),
                version: entry.formula.version().clone(),
                outcome: outcome.unwrap_or(Outcome::NotRun),
            })
            .collect::<Vec<_>>();

        let report = ExecReport { entries };
        reporter.summary(
            report.installed_count(),
            report.failures().count(),
            start.elapsed().as_secs_f64(),
        );
        Ok(report)
    }
}

/// Mutable scheduling state for one run.
struct RunState {
    outcomes: Vec<Option<Outcome>>,
    dependents: Vec<Vec<usize>>,
    indegree: Vec<usize>,
    ready: BTreeSet<usize>,
    prefixes: HashMap<FormulaName, PathBuf>,
}

impl RunState {
    fn dep_prefixes_for(&self, entry: &crate::resolver::PlanEntry) -> BTreeMap<FormulaName, PathBuf> {
        entry
            .deps
            .iter()
            .filter_map(|d| self.prefixes.get(d).map(|p| (d.clone(), p.clone())))
            .collect()
    }

    fn complete_success(&mut self, idx: usize, plan: &Plan, built_prefix: Option<PathBuf>) {
        let name = plan.entries[idx].formula.name().clone();
        self.outcomes[idx] = Some(match built_prefix {
            Some(prefix) => {
                self.prefixes.insert(name, prefix.clone());
                Outcome::Installed { prefix }
            }
            None => Outcome::AlreadyInstalled,
        });

        for &dependent in &self.dependents[idx].clone() {
            self.indegree[dependent] -= 1;
            if self.indegree[dependent] == 0 && self.outcomes[dependent].is_none() {
                self.ready.insert(dependent);
            }
        }
    }

    fn complete_failure(
        &mut self,
        idx: usize,
        plan: &Plan,
        stage: Stage,
        reason: String,
        reporter: &Arc<dyn Reporter>,
    ) {
        let failed_name = plan.entries[idx].formula.name().clone();
        self.outcomes[idx] = Some(Outcome::Failed { stage, reason });

        // Every transitive dependent is skipped, never started
        let mut queue = vec![idx];
        while let Some(current) = queue.pop() {
            for &dependent in &self.dependents[current].clone() {
                if self.outcomes[dependent].is_some() {
                    continue;
                }
                self.outcomes[dependent] = Some(Outcome::DependencyFailed {
                    dep: failed_name.clone(),
                });
                self.ready.remove(&dependent);
                let entry = &plan.entries[dependent];
                reporter.skipped(
                    entry.formula.name(),
                    entry.formula.version(),
                    &format!("dependency '{failed_name}' failed"),
                );
                queue.push(dependent);
            }
        }
    }
}

/// Everything one worker needs to process one entry, owned.
struct EntryJob {
    formula: Arc<Formula>,
    dep_prefixes: BTreeMap<FormulaName, PathBuf>,
    fetcher: Fetcher,
    layout: Layout,
    platform: Platform,
    config: BuildConfig,
    cancel: CancellationToken,
    reporter: Arc<dyn Reporter>,
}

impl EntryJob {
    /// Fetch, verify, patch, and build one formula.
    ///
    /// Returns the install prefix and the source pin recorded in the
    /// ledger, or the stage and cause of the failure.
    async fn run(self) -> Result<(PathBuf, Option<String>), (Stage, String)> {
        if self.cancel.is_cancelled() {
            return Err((Stage::Pending, "cancelled".to_string()));
        }

        let name = self.formula.name().clone();
        let version = self.formula.version().clone();
        let source_dir = self.layout.build_dir(&name, &version);

        // Fresh staging directory; one worker owns it exclusively
        if source_dir.exists() {
            std::fs::remove_dir_all(&source_dir)
                .map_err(|e| (Stage::Fetching, e.to_string()))?;
        }
        std::fs::create_dir_all(&source_dir).map_err(|e| (Stage::Fetching, e.to_string()))?;

        let source_ref = self.stage_source(&source_dir, &name, &version).await?;

        self.apply_patches(&source_dir, &name, &version).await?;

        let prefix = self.layout.cellar_prefix(&name, &version);
        if prefix.exists() {
            std::fs::remove_dir_all(&prefix).map_err(|e| (Stage::Building, e.to_string()))?;
        }

        let log_path = self.layout.build_log_path(&name, &version);
        let formula = Arc::clone(&self.formula);
        let platform = self.platform.clone();
        let config = self.config.clone();
        let dep_prefixes = self.dep_prefixes.clone();
        let cancel = self.cancel.clone();
        let reporter = Arc::clone(&self.reporter);
        let prefix_for_build = prefix.clone();
        let src_for_build = source_dir.clone();

        tokio::task::spawn_blocking(move || {
            let req = InstallRequest {
                formula: &formula,
                platform: &platform,
                config: &config,
                source_dir: &src_for_build,
                prefix: &prefix_for_build,
                dep_prefixes: &dep_prefixes,
                log_path: &log_path,
            };
            run_steps(&req, &cancel, reporter.as_ref())
        })
        .await
        .map_err(|e| (Stage::Building, format!("task panic: {e}")))?
        .map_err(|e| (Stage::Building, e.to_string()))?;

        Ok((prefix, source_ref))
    }

    /// Stage the formula's source tree, returning the recorded pin.
    async fn stage_source(
        &self,
        source_dir: &std::path::Path,
        name: &FormulaName,
        version: &Version,
    ) -> Result<Option<String>, (Stage, String)> {
        match &self.formula.source {
            Source::Archive {
                url,
                mirrors,
                sha256,
                ..
            } => {
                let archive = self
                    .fetcher
                    .fetch_verified(name, version, url, mirrors, sha256, self.reporter.as_ref())
                    .await
                    .map_err(fetch_failure)?;

                let format = self
                    .formula
                    .archive_format()
                    .expect("validated at formula load");
                let dest = source_dir.to_path_buf();
                tokio::task::spawn_blocking(move || {
                    extract::extract_archive(&archive, format, &dest)?;
                    extract::strip_single_root(&dest).map_err(extract::ExtractError::Io)
                })
                .await
                .map_err(|e| (Stage::Fetching, format!("task panic: {e}")))?
                .map_err(|e| (Stage::Fetching, e.to_string()))?;

                Ok(Some(sha256.as_str().to_string()))
            }
            Source::Git { url, revision } => {
                self.reporter.fetching(name, version, url);
                self.checkout(url, GitTarget::Revision(revision.clone()), source_dir)
                    .await?;
                Ok(Some(revision.clone()))
            }
            Source::Head { url, branch } => {
                self.reporter.warning(&format!(
                    "{name}: head checkout of {url} is not reproducible"
                ));
                self.reporter.fetching(name, version, url);
                self.checkout(url, GitTarget::Branch(branch.clone()), source_dir)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn checkout(
        &self,
        url: &str,
        target: GitTarget,
        source_dir: &std::path::Path,
    ) -> Result<(), (Stage, String)> {
        let url = url.to_string();
        let dest = source_dir.to_path_buf();
        tokio::task::spawn_blocking(move || checkout_git(&url, &target, &dest))
            .await
            .map_err(|e| (Stage::Fetching, format!("task panic: {e}")))?
            .map_err(fetch_failure)
    }

    async fn apply_patches(
        &self,
        source_dir: &std::path::Path,
        name: &FormulaName,
        version: &Version,
    ) -> Result<(), (Stage, String)> {
        let patches = self.formula.effective_patches(&self.platform);
        let total = patches.len();

        for (i, patch) in patches.into_iter().enumerate() {
            self.reporter.patching(name, version, i + 1, total);

            let file = self
                .fetcher
                .fetch_verified(
                    name,
                    version,
                    &patch.url,
                    &[],
                    &patch.sha256,
                    self.reporter.as_ref(),
                )
                .await
                .map_err(fetch_failure)?;

            let dir = source_dir.to_path_buf();
            let strip = patch.strip;
            let url = patch.url.clone();
            tokio::task::spawn_blocking(move || apply_patch(&dir, &file, strip, &url))
                .await
                .map_err(|e| (Stage::Patching, format!("task panic: {e}")))?
                .map_err(|e| (Stage::Patching, e.to_string()))?;
        }
        Ok(())
    }
}

/// Map a fetch error to its state-machine stage.
fn fetch_failure(e: FetchError) -> (Stage, String) {
    match &e {
        FetchError::HashMismatch { .. } => (Stage::Verifying, e.to_string()),
        _ => (Stage::Fetching, e.to_string()),
    }
}
