//! Dependency resolution.
//!
//! Produces a dependency-ordered, acyclic installation plan via a
//! depth-first traversal over build+runtime edges. Ties among independent
//! subtrees follow first-declared-dependency order, so the same registry
//! always yields the same plan.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::registry::{Registry, RegistryError};
use wort_schema::{Formula, FormulaName, Platform, Version};

/// Errors raised during plan resolution. Both abort the entire plan
/// before any build starts.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// A referenced formula is missing from the registry.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The dependency graph contains a cycle.
    #[error("Circular dependency detected: {}", format_cycle(path))]
    Cycle {
        /// The cycle, starting and ending at the same formula.
        path: Vec<FormulaName>,
    },
}

fn format_cycle(path: &[FormulaName]) -> String {
    path.iter()
        .map(FormulaName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// One entry of a resolved plan.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// The formula to process.
    pub formula: Arc<Formula>,
    /// Its platform-effective dependencies, all of which precede it in
    /// the plan.
    pub deps: Vec<FormulaName>,
    /// Set when the ledger already holds this formula at the declared
    /// version; skip-flagged entries run no fetch or build.
    pub skip: bool,
}

/// A dependency-ordered sequence of formulas for one install request.
///
/// No formula precedes any of its dependencies; acyclic by construction.
#[derive(Debug, Default)]
pub struct Plan {
    /// Entries in installation order.
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    /// Number of entries in the plan.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the plan has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether every entry is already satisfied by the ledger.
    pub fn is_fully_installed(&self) -> bool {
        self.entries.iter().all(|e| e.skip)
    }
}

/// Resolve an installation plan for `targets`.
///
/// `installed` is a snapshot of the ledger (name to installed version);
/// entries whose installed version matches the formula's declared version
/// are included skip-flagged, which makes resolution idempotent.
///
/// # Errors
///
/// Returns [`ResolveError::Registry`] if any referenced formula is
/// unknown, or [`ResolveError::Cycle`] naming the cycle if the graph is
/// not acyclic.
pub fn resolve(
    registry: &Registry,
    platform: &Platform,
    installed: &HashMap<FormulaName, Version>,
    targets: &[FormulaName],
) -> Result<Plan, ResolveError> {
    let mut plan = Plan::default();
    let mut visited = std::collections::HashSet::new();
    let mut stack = Vec::new();

    for name in targets {
        resolve_recursive(
            name, registry, platform, installed, &mut plan, &mut visited, &mut stack,
        )?;
    }

    Ok(plan)
}

fn resolve_recursive(
    name: &FormulaName,
    registry: &Registry,
    platform: &Platform,
    installed: &HashMap<FormulaName, Version>,
    plan: &mut Plan,
    visited: &mut std::collections::HashSet<FormulaName>,
    stack: &mut Vec<FormulaName>,
) -> Result<(), ResolveError> {
    if visited.contains(name) {
        return Ok(());
    }

    if let Some(pos) = stack.iter().position(|n| n == name) {
        let mut path = stack[pos..].to_vec();
        path.push(name.clone());
        return Err(ResolveError::Cycle { path });
    }

    let formula = Arc::clone(registry.lookup(name)?);

    stack.push(name.clone());
    let deps = formula.effective_deps(platform);
    for dep in &deps {
        resolve_recursive(dep, registry, platform, installed, plan, visited, stack)?;
    }
    stack.pop();

    visited.insert(name.clone());
    let skip = installed.get(name) == Some(formula.version());
    plan.entries.push(PlanEntry {
        deps,
        skip,
        formula,
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn formula(name: &str, deps: &[&str]) -> Formula {
        let deps_toml = deps
            .iter()
            .map(|d| format!("\"{d}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let toml = format!(
            r#"
[formula]
name = "{name}"
version = "1.0.0"

[source]
kind = "git"
url = "https://git.example.org/{name}.git"
revision = "c3f3555270024104c51b27c33ecc7a293aae5dff"

[dependencies]
build = [{deps_toml}]
"#
        );
        Formula::parse(&toml).unwrap()
    }

    fn registry(entries: &[(&str, &[&str])]) -> Registry {
        let mut registry = Registry::new();
        for (name, deps) in entries {
            registry.register(formula(name, deps)).unwrap();
        }
        registry
    }

    fn names(plan: &Plan) -> Vec<&str> {
        plan.entries
            .iter()
            .map(|e| e.formula.name().as_str())
            .collect()
    }

    fn host() -> Platform {
        Platform::host()
    }

    #[test]
    fn test_simple_resolution() {
        let registry = registry(&[("a", &["b"]), ("b", &[])]);
        let plan = resolve(&registry, &host(), &HashMap::new(), &["a".into()]).unwrap();
        assert_eq!(names(&plan), vec!["b", "a"]);
    }

    #[test]
    fn test_diamond_resolution() {
        let registry = registry(&[
            ("a", &["b", "c"]),
            ("b", &["d"]),
            ("c", &["d"]),
            ("d", &[]),
        ]);

        let plan = resolve(&registry, &host(), &HashMap::new(), &["a".into()]).unwrap();
        let order = names(&plan);
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();

        assert!(pos("d") < pos("b"));
        assert!(pos("d") < pos("c"));
        assert!(pos("b") < pos("a"));
        assert!(pos("c") < pos("a"));
        // Each formula appears exactly once despite the shared dependency
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_declared_order_is_deterministic() {
        let registry = registry(&[("a", &["c", "b"]), ("b", &[]), ("c", &[])]);
        let plan = resolve(&registry, &host(), &HashMap::new(), &["a".into()]).unwrap();
        // c is declared before b, so it resolves first
        assert_eq!(names(&plan), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_cycle_detection_names_the_cycle() {
        let registry = registry(&[("a", &["b"]), ("b", &["a"])]);
        let err = resolve(&registry, &host(), &HashMap::new(), &["a".into()]).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("Circular dependency"));
        assert!(msg.contains("a -> b -> a"));
    }

    #[test]
    fn test_self_cycle() {
        let registry = registry(&[("a", &["a"])]);
        let err = resolve(&registry, &host(), &HashMap::new(), &["a".into()]).unwrap_err();
        assert!(err.to_string().contains("a -> a"));
    }

    #[test]
    fn test_unknown_dependency_aborts() {
        let registry = registry(&[("a", &["ghost"])]);
        let err = resolve(&registry, &host(), &HashMap::new(), &["a".into()]).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Registry(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_installed_entries_are_skip_flagged() {
        let registry = registry(&[("a", &["b"]), ("b", &[])]);
        let installed = HashMap::from([(FormulaName::new("b"), Version::new("1.0.0"))]);

        let plan = resolve(&registry, &host(), &installed, &["a".into()]).unwrap();
        assert_eq!(names(&plan), vec!["b", "a"]);
        assert!(plan.entries[0].skip);
        assert!(!plan.entries[1].skip);
        assert!(!plan.is_fully_installed());
    }

    #[test]
    fn test_fully_installed_plan_is_all_skips() {
        let registry = registry(&[("a", &["b"]), ("b", &[])]);
        let installed = HashMap::from([
            (FormulaName::new("a"), Version::new("1.0.0")),
            (FormulaName::new("b"), Version::new("1.0.0")),
        ]);

        let plan = resolve(&registry, &host(), &installed, &["a".into()]).unwrap();
        assert!(plan.is_fully_installed());
    }

    #[test]
    fn test_version_mismatch_is_not_skipped() {
        let registry = registry(&[("a", &[])]);
        let installed = HashMap::from([(FormulaName::new("a"), Version::new("0.9.0"))]);

        let plan = resolve(&registry, &host(), &installed, &["a".into()]).unwrap();
        assert!(!plan.entries[0].skip);
    }
}
