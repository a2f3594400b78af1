//! Typed command templates and placeholder substitution.
//!
//! Install procedures are declared as ordered `{program, args}` templates,
//! never as shell strings. Placeholders (`${prefix}`, `${version}`,
//! `${jobs}`, `${dep:<name>}`) are substituted through a [`Substitutions`]
//! lookup map, so there is no quoting or injection surface, and a formula
//! can only reference the install paths of dependencies it declares.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::{Platform, PlatformGate};
use crate::types::FormulaName;

/// Errors raised while expanding a command template.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExpandError {
    /// A `${...}` placeholder has no entry in the substitution map.
    #[error("unknown placeholder '${{{0}}}'")]
    UnknownPlaceholder(String),

    /// A `${dep:...}` placeholder names a formula outside the declared
    /// dependency set.
    #[error("'{0}' is not declared as a dependency of this formula")]
    UndeclaredDependency(FormulaName),

    /// A `${` opener with no matching `}`.
    #[error("unterminated placeholder in '{0}'")]
    Unterminated(String),
}

/// A single external command template.
///
/// `args` may contain placeholders. `extra_args` sets are appended in
/// declared order when their platform gate matches; this models the
/// architecture-conditional configure flags of the source formulas as
/// data. `serial = true` marks a step that must not be parallelized
/// (`${jobs}` expands to 1 for it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    /// Executable to invoke, resolved relative to the source directory
    /// when it starts with `./`.
    pub program: String,
    /// Argument templates, expanded in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Platform-gated argument sets appended after `args`.
    #[serde(default)]
    pub extra_args: Vec<GatedArgs>,
    /// Force `${jobs}` to 1 for this step (e.g. a `make install` that is
    /// not parallel-safe).
    #[serde(default)]
    pub serial: bool,
}

/// A platform-gated set of extra arguments for a [`RunStep`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatedArgs {
    /// Predicate deciding whether the arguments apply.
    #[serde(default)]
    pub when: PlatformGate,
    /// Argument templates to append.
    pub args: Vec<String>,
}

impl RunStep {
    /// Expand this template into a concrete command line.
    ///
    /// # Errors
    ///
    /// Returns an [`ExpandError`] if any placeholder is unknown or names
    /// an undeclared dependency.
    pub fn expand(
        &self,
        platform: &Platform,
        subs: &Substitutions,
    ) -> Result<CommandLine, ExpandError> {
        let program = subs.expand_str(&self.program)?;
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            args.push(subs.expand_str(arg)?);
        }
        for gated in &self.extra_args {
            if gated.when.matches(platform) {
                for arg in &gated.args {
                    args.push(subs.expand_str(arg)?);
                }
            }
        }
        Ok(CommandLine { program, args })
    }
}

/// A fully expanded command line ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Executable to invoke.
    pub program: String,
    /// Concrete arguments, placeholder-free.
    pub args: Vec<String>,
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Lookup map backing placeholder expansion.
///
/// Plain keys (`prefix`, `version`, `jobs`) live beside dependency prefix
/// paths keyed by formula name. Dependency lookups are the enforcement
/// point for the "declared dependencies only" invariant: a `${dep:x}`
/// where `x` was never registered fails expansion.
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    vars: BTreeMap<String, String>,
    deps: BTreeMap<FormulaName, String>,
}

impl Substitutions {
    /// Create an empty substitution map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a plain variable (`prefix`, `version`, `jobs`, ...).
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Register a dependency's install prefix.
    pub fn dep(mut self, name: FormulaName, prefix: impl Into<String>) -> Self {
        self.deps.insert(name, prefix.into());
        self
    }

    /// Expand all placeholders in `input`.
    ///
    /// # Errors
    ///
    /// Returns an [`ExpandError`] on an unknown key, an undeclared
    /// dependency reference, or an unterminated `${`.
    pub fn expand_str(&self, input: &str) -> Result<String, ExpandError> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(ExpandError::Unterminated(input.to_string()));
            };
            let key = &after[..end];
            out.push_str(self.lookup(key)?);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn lookup(&self, key: &str) -> Result<&str, ExpandError> {
        if let Some(dep) = key.strip_prefix("dep:") {
            let name = FormulaName::new(dep);
            return self
                .deps
                .get(&name)
                .map(String::as_str)
                .ok_or(ExpandError::UndeclaredDependency(name));
        }
        self.vars
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ExpandError::UnknownPlaceholder(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Arch;

    fn subs() -> Substitutions {
        Substitutions::new()
            .var("prefix", "/wort/cellar/qt/5.15.2")
            .var("jobs", "8")
            .var("version", "5.15.2")
            .dep(FormulaName::new("zlib"), "/wort/cellar/zlib/1.3")
    }

    #[test]
    fn test_plain_expansion() {
        let out = subs().expand_str("-prefix=${prefix}").unwrap();
        assert_eq!(out, "-prefix=/wort/cellar/qt/5.15.2");
    }

    #[test]
    fn test_dep_expansion() {
        let out = subs().expand_str("${dep:zlib}/lib").unwrap();
        assert_eq!(out, "/wort/cellar/zlib/1.3/lib");
    }

    #[test]
    fn test_undeclared_dependency_rejected() {
        let err = subs().expand_str("${dep:boost}").unwrap_err();
        assert_eq!(
            err,
            ExpandError::UndeclaredDependency(FormulaName::new("boost"))
        );
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let err = subs().expand_str("${cellar}").unwrap_err();
        assert_eq!(err, ExpandError::UnknownPlaceholder("cellar".to_string()));
    }

    #[test]
    fn test_unterminated_placeholder() {
        assert!(matches!(
            subs().expand_str("${prefix"),
            Err(ExpandError::Unterminated(_))
        ));
    }

    #[test]
    fn test_literal_dollar_passes_through() {
        assert_eq!(subs().expand_str("a$b").unwrap(), "a$b");
    }

    #[test]
    fn test_gated_args() {
        let step = RunStep {
            program: "./configure".to_string(),
            args: vec!["-release".to_string()],
            extra_args: vec![
                GatedArgs {
                    when: PlatformGate {
                        arch: Some(Arch::Arm64),
                        min_os: None,
                    },
                    args: vec!["-skip".to_string(), "qtwebengine".to_string()],
                },
                GatedArgs {
                    when: PlatformGate {
                        arch: Some(Arch::X86_64),
                        min_os: None,
                    },
                    args: vec!["-proprietary-codecs".to_string()],
                },
            ],
            serial: false,
        };

        let arm = Platform::new(Arch::Arm64, None);
        let cmd = step.expand(&arm, &subs()).unwrap();
        assert_eq!(cmd.args, vec!["-release", "-skip", "qtwebengine"]);

        let intel = Platform::new(Arch::X86_64, None);
        let cmd = step.expand(&intel, &subs()).unwrap();
        assert_eq!(cmd.args, vec!["-release", "-proprietary-codecs"]);
    }
}
