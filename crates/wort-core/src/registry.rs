//! In-memory formula registry.
//!
//! Loaded once per run from a directory of TOML formula files and
//! immutable afterwards; resolution and execution only read from it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use wort_schema::{Formula, FormulaError, FormulaName};

/// Errors raised by registry loading and lookups.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No formula with the requested name is registered.
    #[error("Formula '{0}' not found in registry")]
    NotFound(FormulaName),

    /// A formula with the same name is already registered.
    #[error("Formula '{0}' is already registered")]
    Duplicate(FormulaName),

    /// A formula file failed to load or validate.
    #[error("Failed to load '{path}': {source}")]
    Load {
        /// Path of the offending file.
        path: String,
        /// Underlying formula error.
        source: FormulaError,
    },

    /// The registry directory could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable store of formula definitions keyed by name.
#[derive(Debug, Default)]
pub struct Registry {
    formulas: BTreeMap<FormulaName, Arc<Formula>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.toml` file in `dir` as a formula.
    ///
    /// Files are visited in sorted name order so duplicate detection is
    /// deterministic.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the directory cannot be read, a file
    /// fails to parse, or two files declare the same formula name.
    pub fn load(dir: &Path) -> Result<Self, RegistryError> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut registry = Self::new();
        for path in paths {
            let formula = Formula::load(&path).map_err(|source| RegistryError::Load {
                path: path.display().to_string(),
                source,
            })?;
            registry.register(formula)?;
        }
        Ok(registry)
    }

    /// Register a formula.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the name is already taken.
    pub fn register(&mut self, formula: Formula) -> Result<(), RegistryError> {
        let name = formula.name().clone();
        if self.formulas.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.formulas.insert(name, Arc::new(formula));
        Ok(())
    }

    /// Look up a formula by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown names.
    pub fn lookup(&self, name: &FormulaName) -> Result<&Arc<Formula>, RegistryError> {
        self.formulas
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.clone()))
    }

    /// Iterate over all formulas in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Formula>> {
        self.formulas.values()
    }

    /// Number of registered formulas.
    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(name: &str) -> Formula {
        let toml = format!(
            r#"
[formula]
name = "{name}"
version = "1.0.0"

[source]
kind = "git"
url = "https://git.example.org/{name}.git"
revision = "c3f3555270024104c51b27c33ecc7a293aae5dff"
"#
        );
        Formula::parse(&toml).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = Registry::new();
        registry.register(formula("zlib")).unwrap();

        let found = registry.lookup(&FormulaName::new("zlib")).unwrap();
        assert_eq!(found.version().as_str(), "1.0.0");
    }

    #[test]
    fn test_lookup_unknown_name() {
        let registry = Registry::new();
        assert!(matches!(
            registry.lookup(&FormulaName::new("missing")),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = Registry::new();
        registry.register(formula("zlib")).unwrap();
        assert!(matches!(
            registry.register(formula("zlib")),
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[test]
    fn test_duplicate_is_case_insensitive() {
        let mut registry = Registry::new();
        registry.register(formula("zlib")).unwrap();
        assert!(matches!(
            registry.register(formula("Zlib")),
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b"] {
            let toml = format!(
                r#"
[formula]
name = "{name}"
version = "1.0.0"

[source]
kind = "git"
url = "https://git.example.org/{name}.git"
revision = "c3f3555270024104c51b27c33ecc7a293aae5dff"
"#
            );
            std::fs::write(dir.path().join(format!("{name}.toml")), toml).unwrap();
        }
        // Non-formula files are ignored
        std::fs::write(dir.path().join("README.md"), "not a formula").unwrap();

        let registry = Registry::load(dir.path()).unwrap();
        assert_eq!(registry.len(), 2);
    }
}
