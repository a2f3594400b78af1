//! Build execution.
//!
//! Expands a formula's typed command templates and runs them sequentially
//! in the staged source directory, with an explicit environment assembled
//! from the build configuration and the resolved dependency prefixes. A
//! non-zero exit aborts the sequence; build systems are not generally safe
//! to blindly re-run, so there is no automatic retry.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::reporter::Reporter;
use wort_schema::formula::InreplaceStep;
use wort_schema::{ExpandError, Formula, FormulaName, Link, Platform, Step, Substitutions};

/// Explicit build configuration, passed in rather than read from ambient
/// state.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Parallel job count exposed to steps as `${jobs}`.
    pub jobs: usize,
    /// Stream build output to the terminal instead of the log file.
    pub verbose: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get(),
            verbose: false,
        }
    }
}

/// Errors raised while executing a formula's install procedure.
#[derive(Error, Debug)]
pub enum BuildError {
    /// A command template failed to expand.
    #[error("Template expansion failed: {0}")]
    Expand(#[from] ExpandError),

    /// A step's program is not present on the host.
    #[error("Missing build tool '{0}'")]
    MissingTool(String),

    /// A step could not be launched.
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying launch error.
        source: std::io::Error,
    },

    /// A step exited with a non-zero status.
    #[error("'{program}' exited with status {code}")]
    CommandFailed {
        /// Program that failed.
        program: String,
        /// Its exit code (-1 when killed by a signal).
        code: i32,
    },

    /// The build was cancelled and its process terminated.
    #[error("Build cancelled")]
    Cancelled,

    /// An in-place edit pattern matched nothing.
    #[error("inreplace: no match for '{pattern}' in {file}")]
    InreplaceNoMatch {
        /// File that was searched.
        file: String,
        /// Pattern that failed to match.
        pattern: String,
    },

    /// An in-place edit pattern is not a valid regex.
    #[error("inreplace: invalid pattern '{pattern}': {error}")]
    InreplacePattern {
        /// The offending pattern.
        pattern: String,
        /// Regex compiler error text.
        error: String,
    },

    /// A declared link's destination already exists.
    #[error("Link destination '{0}' already exists")]
    LinkCollision(String),

    /// Filesystem failure around the build.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the executor needs to install one formula.
#[derive(Debug)]
pub struct InstallRequest<'a> {
    /// Formula whose steps run.
    pub formula: &'a Formula,
    /// Platform snapshot for gate evaluation.
    pub platform: &'a Platform,
    /// Build configuration.
    pub config: &'a BuildConfig,
    /// Staged (fetched and patched) source directory.
    pub source_dir: &'a Path,
    /// Install prefix the formula builds into.
    pub prefix: &'a Path,
    /// Install prefixes of the formula's declared dependencies only.
    pub dep_prefixes: &'a BTreeMap<FormulaName, PathBuf>,
    /// Build log destination.
    pub log_path: &'a Path,
}

impl InstallRequest<'_> {
    fn substitutions(&self, jobs: usize) -> Substitutions {
        let mut subs = Substitutions::new()
            .var("prefix", self.prefix.to_string_lossy())
            .var("version", self.formula.version().as_str())
            .var("jobs", jobs.to_string());
        for (name, path) in self.dep_prefixes {
            subs = subs.dep(name.clone(), path.to_string_lossy());
        }
        subs
    }
}

/// Run a formula's install procedure to completion.
///
/// Steps execute in declared order inside the source directory. On
/// success the declared layout links are materialized inside the prefix.
/// The caller is responsible for writing the ledger record afterwards, so
/// a failure here never leaves a partial install recorded.
///
/// Blocking; the orchestrator runs it on a worker thread and cancels it
/// through `cancel`, which terminates the in-flight external process.
///
/// # Errors
///
/// Returns a [`BuildError`] naming the failed step; remaining steps do
/// not run.
pub fn run_steps(
    req: &InstallRequest<'_>,
    cancel: &CancellationToken,
    reporter: &dyn Reporter,
) -> Result<(), BuildError> {
    preflight_tools(req)?;

    std::fs::create_dir_all(req.prefix)?;
    if let Some(parent) = req.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = File::create(req.log_path)?;

    let name = req.formula.name();
    let version = req.formula.version();
    let total = req.formula.step.len();

    for (index, step) in req.formula.step.iter().enumerate() {
        reporter.building(name, version, index + 1, total);

        match step {
            Step::Inreplace(edit) => {
                let subs = req.substitutions(req.config.jobs);
                run_inreplace(req.source_dir, edit, &subs)?;
            }
            Step::Run(run) => {
                let jobs = if run.serial { 1 } else { req.config.jobs };
                let subs = req.substitutions(jobs);
                let command = run.expand(req.platform, &subs)?;

                tracing::debug!(formula = %name, step = index + 1, command = %command, "running step");
                run_command(req, &command.program, &command.args, jobs, &log_file, cancel)
                    .inspect_err(|_| surface_log_tail(req, reporter))?;
            }
        }
    }

    materialize_links(req.prefix, &req.formula.link)?;

    Ok(())
}

/// Verify every step program exists before running anything.
///
/// Programs addressed by path (`./configure`) are resolved by the build
/// itself and skipped here.
fn preflight_tools(req: &InstallRequest<'_>) -> Result<(), BuildError> {
    for step in &req.formula.step {
        if let Step::Run(run) = step {
            if run.program.contains('/') || run.program.contains("${") {
                continue;
            }
            if which::which(&run.program).is_err() {
                return Err(BuildError::MissingTool(run.program.clone()));
            }
        }
    }
    Ok(())
}

fn run_inreplace(
    source_dir: &Path,
    edit: &InreplaceStep,
    subs: &Substitutions,
) -> Result<(), BuildError> {
    let regex = regex::Regex::new(&format!("(?m){}", edit.pattern)).map_err(|e| {
        BuildError::InreplacePattern {
            pattern: edit.pattern.clone(),
            error: e.to_string(),
        }
    })?;

    let path = source_dir.join(&edit.file);
    let content = std::fs::read_to_string(&path)?;
    if !regex.is_match(&content) {
        return Err(BuildError::InreplaceNoMatch {
            file: edit.file.clone(),
            pattern: edit.pattern.clone(),
        });
    }

    let replacement = subs.expand_str(&edit.replace)?;
    let updated = regex.replace_all(&content, replacement.as_str());
    std::fs::write(&path, updated.as_ref())?;
    Ok(())
}

fn run_command(
    req: &InstallRequest<'_>,
    program: &str,
    args: &[String],
    jobs: usize,
    log_file: &File,
    cancel: &CancellationToken,
) -> Result<(), BuildError> {
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(req.source_dir);

    apply_env(&mut cmd, req, jobs);

    if req.config.verbose {
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    } else {
        cmd.stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file.try_clone()?));
    }

    let mut child = cmd.spawn().map_err(|source| BuildError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            child.kill().ok();
            child.wait().ok();
            return Err(BuildError::Cancelled);
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    };

    if !status.success() {
        return Err(BuildError::CommandFailed {
            program: program.to_string(),
            code: status.code().unwrap_or(-1),
        });
    }

    Ok(())
}

/// Environment contract for build steps.
///
/// | Variable | Value |
/// |---|---|
/// | `PREFIX` | Install destination for this formula |
/// | `VERSION` | Declared formula version |
/// | `JOBS` | Effective job count for this step |
/// | `DEP_<NAME>` | Per-dependency prefix (name uppercased, `-`/`.` to `_`) |
/// | `CFLAGS` / `CPPFLAGS` | `-I` flags for each dependency's `include/` |
/// | `LDFLAGS` | `-L` flags for each dependency's `lib/` |
/// | `PKG_CONFIG_PATH` | Colon-separated `lib/pkgconfig` paths |
/// | `CMAKE_PREFIX_PATH` | Colon-separated dependency prefixes |
/// | `PATH` | Dependency `bin/` directories prepended to the host PATH |
fn apply_env(cmd: &mut Command, req: &InstallRequest<'_>, jobs: usize) {
    cmd.env("PREFIX", req.prefix)
        .env("VERSION", req.formula.version().as_str())
        .env("JOBS", jobs.to_string());

    let mut cflags: Vec<String> = Vec::new();
    let mut ldflags: Vec<String> = Vec::new();
    let mut pkg_config_paths: Vec<String> = Vec::new();
    let mut cmake_paths: Vec<String> = Vec::new();
    let mut path_prepends: Vec<String> = Vec::new();

    for (dep_name, dep_prefix) in req.dep_prefixes {
        let env_name = format!(
            "DEP_{}",
            dep_name.as_str().to_uppercase().replace(['-', '.'], "_")
        );
        cmd.env(env_name, dep_prefix);
        cmake_paths.push(dep_prefix.to_string_lossy().to_string());

        if dep_prefix.join("include").exists() {
            cflags.push(format!("-I{}", dep_prefix.join("include").display()));
        }
        if dep_prefix.join("lib").exists() {
            ldflags.push(format!("-L{}", dep_prefix.join("lib").display()));
        }
        if dep_prefix.join("lib/pkgconfig").exists() {
            pkg_config_paths.push(dep_prefix.join("lib/pkgconfig").display().to_string());
        }
        if dep_prefix.join("bin").is_dir() {
            path_prepends.push(dep_prefix.join("bin").display().to_string());
        }
    }

    if !cflags.is_empty() {
        let flags = cflags.join(" ");
        cmd.env("CFLAGS", &flags);
        cmd.env("CPPFLAGS", &flags);
    }
    if !ldflags.is_empty() {
        cmd.env("LDFLAGS", ldflags.join(" "));
    }
    if !pkg_config_paths.is_empty() {
        cmd.env("PKG_CONFIG_PATH", pkg_config_paths.join(":"));
    }
    if !cmake_paths.is_empty() {
        cmd.env("CMAKE_PREFIX_PATH", cmake_paths.join(":"));
    }
    if !path_prepends.is_empty() {
        let host_path = std::env::var("PATH").unwrap_or_default();
        cmd.env("PATH", format!("{}:{host_path}", path_prepends.join(":")));
    }
}

fn surface_log_tail(req: &InstallRequest<'_>, reporter: &dyn Reporter) {
    if req.config.verbose {
        return;
    }
    if let Ok(tail) = read_last_lines(req.log_path, 20) {
        if !tail.is_empty() {
            reporter.error(&format!(
                "Build failed. Last 20 lines:\n{tail}\nFull log: {}",
                req.log_path.display()
            ));
        }
    }
}

/// Materialize declared layout links as relative symlinks in the prefix.
fn materialize_links(prefix: &Path, links: &[Link]) -> Result<(), BuildError> {
    for link in links {
        let pattern = prefix.join(&link.from).to_string_lossy().to_string();
        let into_dir = prefix.join(&link.into);

        let matches = glob::glob(&pattern)
            .map_err(|e| BuildError::Io(std::io::Error::other(e.to_string())))?;
        for entry in matches.filter_map(Result::ok) {
            std::fs::create_dir_all(&into_dir)?;
            let Some(file_name) = entry.file_name() else {
                continue;
            };
            let dest = into_dir.join(file_name);
            if dest.symlink_metadata().is_ok() {
                return Err(BuildError::LinkCollision(dest.display().to_string()));
            }
            let relative = relative_path(&into_dir, &entry);
            #[cfg(unix)]
            std::os::unix::fs::symlink(&relative, &dest)?;
            #[cfg(not(unix))]
            let _ = relative;
        }
    }
    Ok(())
}

/// Compute a relative path from `from_dir` to `to_path`.
///
/// Both arguments must be absolute paths. The function walks up from
/// `from_dir` to the common ancestor and then descends into `to_path`.
fn relative_path(from_dir: &Path, to_path: &Path) -> PathBuf {
    let from_components: Vec<_> = from_dir.components().collect();
    let to_components: Vec<_> = to_path.components().collect();

    let common_len = from_components
        .iter()
        .zip(to_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common_len..from_components.len() {
        result.push("..");
    }
    for part in &to_components[common_len..] {
        result.push(part);
    }
    result
}

/// Read the last N lines from a file efficiently.
///
/// Seeks to near the end and reads a fixed-size tail buffer instead of
/// loading the entire log.
fn read_last_lines(path: &Path, n: usize) -> std::io::Result<String> {
    use std::io::{Read, Seek, SeekFrom};

    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let seek_pos = file_len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(seek_pos))?;

    let mut buffer = String::new();
    file.read_to_string(&mut buffer)?;

    let content = if seek_pos > 0 {
        buffer
            .find('\n')
            .map_or(buffer.as_str(), |idx| &buffer[idx + 1..])
    } else {
        &buffer
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;

    struct TestBuild {
        _tmp: tempfile::TempDir,
        source_dir: PathBuf,
        prefix: PathBuf,
        log_path: PathBuf,
        dep_prefixes: BTreeMap<FormulaName, PathBuf>,
    }

    fn setup() -> TestBuild {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tmp.path().join("src");
        let prefix = tmp.path().join("cellar/pkg/1.0.0");
        let log_path = tmp.path().join("logs/build.log");
        std::fs::create_dir_all(&source_dir).unwrap();
        TestBuild {
            source_dir,
            prefix,
            log_path,
            dep_prefixes: BTreeMap::new(),
            _tmp: tmp,
        }
    }

    fn formula_with_steps(steps_toml: &str) -> Formula {
        let toml = format!(
            r#"
[formula]
name = "pkg"
version = "1.0.0"

[source]
kind = "git"
url = "https://git.example.org/pkg.git"
revision = "c3f3555270024104c51b27c33ecc7a293aae5dff"

[dependencies]
build = ["zlib"]

{steps_toml}
"#
        );
        Formula::parse(&toml).unwrap()
    }

    fn run(build: &TestBuild, formula: &Formula, config: &BuildConfig) -> Result<(), BuildError> {
        let platform = Platform::host();
        let req = InstallRequest {
            formula,
            platform: &platform,
            config,
            source_dir: &build.source_dir,
            prefix: &build.prefix,
            dep_prefixes: &build.dep_prefixes,
            log_path: &build.log_path,
        };
        run_steps(&req, &CancellationToken::new(), &NullReporter)
    }

    #[test]
    fn test_steps_run_in_order_with_expansion() {
        let build = setup();
        std::fs::write(build.source_dir.join("data.txt"), "payload").unwrap();

        let formula = formula_with_steps(
            r#"
[[step]]
kind = "run"
program = "sh"
args = ["-c", "mkdir -p ${prefix}/bin"]

[[step]]
kind = "run"
program = "sh"
args = ["-c", "cp data.txt ${prefix}/bin/tool"]
"#,
        );

        run(&build, &formula, &BuildConfig::default()).unwrap();
        assert_eq!(
            std::fs::read_to_string(build.prefix.join("bin/tool")).unwrap(),
            "payload"
        );
    }

    #[test]
    fn test_failure_aborts_sequence() {
        let build = setup();
        let formula = formula_with_steps(
            r#"
[[step]]
kind = "run"
program = "sh"
args = ["-c", "exit 3"]

[[step]]
kind = "run"
program = "sh"
args = ["-c", "touch ${prefix}/should-not-exist"]
"#,
        );

        let err = run(&build, &formula, &BuildConfig::default()).unwrap_err();
        match err {
            BuildError::CommandFailed { program, code } => {
                assert_eq!(program, "sh");
                assert_eq!(code, 3);
            }
            other => panic!("expected command failure, got {other}"),
        }
        assert!(!build.prefix.join("should-not-exist").exists());
    }

    #[test]
    fn test_missing_tool_fails_before_any_step() {
        let build = setup();
        let formula = formula_with_steps(
            r#"
[[step]]
kind = "run"
program = "sh"
args = ["-c", "touch ${prefix}/ran"]

[[step]]
kind = "run"
program = "definitely-not-a-real-tool-xyz"
"#,
        );

        let err = run(&build, &formula, &BuildConfig::default()).unwrap_err();
        assert!(matches!(err, BuildError::MissingTool(t) if t.contains("definitely-not")));
        // Preflight runs before the first step
        assert!(!build.prefix.join("ran").exists());
    }

    #[test]
    fn test_serial_step_forces_single_job() {
        let build = setup();
        let formula = formula_with_steps(
            r#"
[[step]]
kind = "run"
program = "sh"
args = ["-c", "mkdir -p ${prefix} && echo ${jobs} > ${prefix}/parallel"]

[[step]]
kind = "run"
program = "sh"
args = ["-c", "echo ${jobs} > ${prefix}/serial"]
serial = true
"#,
        );

        let config = BuildConfig {
            jobs: 8,
            verbose: false,
        };
        run(&build, &formula, &config).unwrap();

        assert_eq!(
            std::fs::read_to_string(build.prefix.join("parallel")).unwrap(),
            "8\n"
        );
        assert_eq!(
            std::fs::read_to_string(build.prefix.join("serial")).unwrap(),
            "1\n"
        );
    }

    #[test]
    fn test_dependency_env_contract() {
        let mut build = setup();
        let dep_prefix = build._tmp.path().join("cellar/zlib/1.3");
        std::fs::create_dir_all(dep_prefix.join("include")).unwrap();
        std::fs::create_dir_all(dep_prefix.join("lib/pkgconfig")).unwrap();
        build
            .dep_prefixes
            .insert(FormulaName::new("zlib"), dep_prefix.clone());

        let formula = formula_with_steps(
            r#"
[[step]]
kind = "run"
program = "sh"
args = ["-c", "echo $DEP_ZLIB > ${prefix}/dep && echo $CFLAGS > ${prefix}/cflags"]
"#,
        );

        run(&build, &formula, &BuildConfig::default()).unwrap();

        let dep = std::fs::read_to_string(build.prefix.join("dep")).unwrap();
        assert_eq!(dep.trim(), dep_prefix.to_string_lossy());
        let cflags = std::fs::read_to_string(build.prefix.join("cflags")).unwrap();
        assert!(cflags.contains("-I"));
        assert!(cflags.contains("include"));
    }

    #[test]
    fn test_inreplace_step() {
        let build = setup();
        std::fs::write(
            build.source_dir.join("config.pri"),
            "PKG_CONFIG_EXECUTABLE = /usr/local/shims/pkg-config\nOTHER = 1\n",
        )
        .unwrap();

        let formula = formula_with_steps(
            r#"
[[step]]
kind = "inreplace"
file = "config.pri"
pattern = "^PKG_CONFIG_EXECUTABLE = .*$"
replace = "PKG_CONFIG_EXECUTABLE = ${prefix}/bin/pkg-config"
"#,
        );

        run(&build, &formula, &BuildConfig::default()).unwrap();

        let content = std::fs::read_to_string(build.source_dir.join("config.pri")).unwrap();
        assert!(content.contains(&format!(
            "PKG_CONFIG_EXECUTABLE = {}/bin/pkg-config",
            build.prefix.display()
        )));
        assert!(content.contains("OTHER = 1"));
    }

    #[test]
    fn test_inreplace_requires_a_match() {
        let build = setup();
        std::fs::write(build.source_dir.join("config.pri"), "nothing here\n").unwrap();

        let formula = formula_with_steps(
            r#"
[[step]]
kind = "inreplace"
file = "config.pri"
pattern = "^MISSING = .*$"
replace = "MISSING = x"
"#,
        );

        let err = run(&build, &formula, &BuildConfig::default()).unwrap_err();
        assert!(matches!(err, BuildError::InreplaceNoMatch { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_links_materialized_as_relative_symlinks() {
        let build = setup();
        let formula_toml = format!(
            r#"
[formula]
name = "pkg"
version = "1.0.0"

[source]
kind = "git"
url = "https://git.example.org/pkg.git"
revision = "c3f3555270024104c51b27c33ecc7a293aae5dff"

[[step]]
kind = "run"
program = "sh"
args = ["-c", "mkdir -p ${{prefix}}/lib/QtCore.framework && touch ${{prefix}}/lib/QtCore.framework/QtCore"]

[[link]]
from = "lib/*.framework"
into = "frameworks"
"#
        );
        let formula = Formula::parse(&formula_toml).unwrap();

        run(&build, &formula, &BuildConfig::default()).unwrap();

        let link = build.prefix.join("frameworks/QtCore.framework");
        let target = std::fs::read_link(&link).unwrap();
        assert!(!target.is_absolute());
        assert_eq!(target, PathBuf::from("../lib/QtCore.framework"));
        assert!(link.join("QtCore").exists());
    }

    #[test]
    fn test_cancellation_kills_running_process() {
        let build = setup();
        let formula = formula_with_steps(
            r#"
[[step]]
kind = "run"
program = "sh"
args = ["-c", "sleep 30"]
"#,
        );

        let cancel = CancellationToken::new();
        cancel.cancel();

        let platform = Platform::host();
        let config = BuildConfig::default();
        let req = InstallRequest {
            formula: &formula,
            platform: &platform,
            config: &config,
            source_dir: &build.source_dir,
            prefix: &build.prefix,
            dep_prefixes: &build.dep_prefixes,
            log_path: &build.log_path,
        };

        let start = std::time::Instant::now();
        let err = run_steps(&req, &cancel, &NullReporter).unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
        assert!(start.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn test_relative_path_cross_dir() {
        assert_eq!(
            relative_path(Path::new("/a/b/frameworks"), Path::new("/a/b/lib/x")),
            PathBuf::from("../lib/x")
        );
        assert_eq!(
            relative_path(Path::new("/a/b"), Path::new("/a/b/file")),
            PathBuf::from("file")
        );
    }
}
