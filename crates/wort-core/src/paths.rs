//! Filesystem layout.

use dirs::home_dir;
use std::path::PathBuf;

use wort_schema::{FormulaName, Version};

/// Returns the primary wort directory, or None if the user's home cannot
/// be resolved.
pub fn try_wort_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("WORT_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".wort"))
}

/// Returns the canonical wort home directory (`~/.wort`).
///
/// # Panics
///
/// Panics if neither `WORT_HOME` is set nor the user's home directory can
/// be resolved.
pub fn wort_home() -> PathBuf {
    try_wort_home().expect("Could not determine home directory. Set WORT_HOME to override.")
}

/// Filesystem layout rooted at one wort home directory.
///
/// Everything that touches the disk goes through a `Layout` value instead
/// of ambient globals, so tests can point a whole run at a temp dir.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Layout rooted at the default wort home.
    pub fn default_home() -> Self {
        Self { root: wort_home() }
    }

    /// Layout rooted at an explicit directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory of this layout.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Formula registry directory: `<root>/formula`.
    pub fn formula_dir(&self) -> PathBuf {
        self.root.join("formula")
    }

    /// Download cache: `<root>/cache`.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Staged source tree for one formula: `<root>/build/<name>-<version>`.
    pub fn build_dir(&self, name: &FormulaName, version: &Version) -> PathBuf {
        self.root.join("build").join(format!("{name}-{version}"))
    }

    /// Install prefix for one formula: `<root>/cellar/<name>/<version>`.
    pub fn cellar_prefix(&self, name: &FormulaName, version: &Version) -> PathBuf {
        self.root.join("cellar").join(name).join(version.as_str())
    }

    /// Build logs directory: `<root>/logs`.
    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Build log path for one formula.
    pub fn build_log_path(&self, name: &FormulaName, version: &Version) -> PathBuf {
        self.log_dir().join(format!("build-{name}-{version}.log"))
    }

    /// `SQLite` ledger path: `<root>/state.db`.
    pub fn db_path(&self) -> PathBuf {
        self.root.join("state.db")
    }
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}
