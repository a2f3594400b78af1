//! TOML formula definition parsing.
//!
//! One formula file describes how to obtain, verify, and build one
//! package: metadata, a source locator, ordered patches, dependency sets,
//! an ordered install procedure, and declared layout links.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::RunStep;
use crate::hash::Sha256Digest;
use crate::platform::{Platform, PlatformGate};
use crate::types::{FormulaName, Version};

/// Errors that can occur when loading or validating a formula definition.
#[derive(Error, Debug)]
pub enum FormulaError {
    /// An I/O error occurred while reading a formula file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML content could not be deserialized into a valid formula.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The formula parsed but violates a structural constraint.
    #[error("Invalid formula: {0}")]
    Validation(String),
}

/// Metadata describing a formula's identity and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaInfo {
    /// Unique name that identifies this formula in the registry.
    pub name: FormulaName,
    /// Version string for the release this formula builds.
    pub version: Version,
    /// Short human-readable summary.
    #[serde(default)]
    pub description: String,
    /// URL of the project's homepage.
    #[serde(default)]
    pub homepage: String,
    /// SPDX license identifier.
    #[serde(default)]
    pub license: String,
}

/// Archive format of a downloadable source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Gzip-compressed tar archive (`.tar.gz` / `.tgz`).
    #[serde(rename = "tar.gz")]
    TarGz,
    /// Zstandard-compressed tar archive (`.tar.zst`).
    #[serde(rename = "tar.zst")]
    TarZst,
    /// Uncompressed tar archive (`.tar`).
    Tar,
    /// Zip archive (`.zip`).
    Zip,
}

impl ArchiveFormat {
    /// Infer the archive format from a URL or file name.
    pub fn detect(url: &str) -> Option<Self> {
        let lower = url.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar.zst") {
            Some(Self::TarZst)
        } else if lower.ends_with(".tar") {
            Some(Self::Tar)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Location and integrity information for a formula's source.
///
/// Archive sources carry a required content digest; git sources carry a
/// required revision pin. A `head` source tracks a branch tip and is
/// explicitly non-reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Source {
    /// HTTP(S) archive with a required SHA-256 digest.
    Archive {
        /// Primary download URL.
        url: String,
        /// Fallback mirrors, tried in declared order.
        #[serde(default)]
        mirrors: Vec<String>,
        /// Expected SHA-256 digest of the archive.
        sha256: Sha256Digest,
        /// Archive format; inferred from the URL when omitted.
        #[serde(default)]
        format: Option<ArchiveFormat>,
    },
    /// Version-control checkout pinned to an exact revision.
    Git {
        /// Clone URL.
        url: String,
        /// Full commit id to check out.
        revision: String,
    },
    /// Branch-tracking checkout with no pin. Non-reproducible by
    /// definition; fetching one is reported as a warning.
    Head {
        /// Clone URL.
        url: String,
        /// Branch to track; the remote default branch when omitted.
        #[serde(default)]
        branch: Option<String>,
    },
}

impl Source {
    /// Whether this locator can yield the same bytes on every fetch.
    pub fn is_reproducible(&self) -> bool {
        !matches!(self, Self::Head { .. })
    }

    /// The URL the source is fetched from.
    pub fn url(&self) -> &str {
        match self {
            Self::Archive { url, .. } | Self::Git { url, .. } | Self::Head { url, .. } => url,
        }
    }
}

/// One patch to apply to the unpacked source tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    /// Download URL of the patch file.
    pub url: String,
    /// Expected SHA-256 digest of the patch file.
    pub sha256: Sha256Digest,
    /// Path strip level handed to the patch tool (`-p<strip>`).
    #[serde(default = "default_strip")]
    pub strip: u32,
    /// Optional platform gate; ungated patches always apply.
    #[serde(default)]
    pub when: PlatformGate,
}

fn default_strip() -> u32 {
    1
}

/// Dependency lists grouped by when they are required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dependencies {
    /// Formulas required only during the build phase.
    #[serde(default)]
    pub build: Vec<FormulaName>,
    /// Formulas required at runtime.
    #[serde(default)]
    pub runtime: Vec<FormulaName>,
    /// Platform-gated additional dependency sets.
    #[serde(default)]
    pub extra: Vec<ExtraDependencies>,
}

/// A platform-gated set of additional dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraDependencies {
    /// Predicate deciding whether the set applies.
    #[serde(default)]
    pub when: PlatformGate,
    /// Extra build-phase dependencies.
    #[serde(default)]
    pub build: Vec<FormulaName>,
    /// Extra runtime dependencies.
    #[serde(default)]
    pub runtime: Vec<FormulaName>,
}

impl Dependencies {
    /// All dependency names effective on `platform`, in first-declared
    /// order (build, then runtime, then matching gated extras), without
    /// duplicates.
    pub fn effective(&self, platform: &Platform) -> Vec<FormulaName> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut push = |name: &FormulaName, out: &mut Vec<FormulaName>| {
            if seen.insert(name.clone()) {
                out.push(name.clone());
            }
        };

        for name in self.build.iter().chain(self.runtime.iter()) {
            push(name, &mut out);
        }
        for extra in &self.extra {
            if extra.when.matches(platform) {
                for name in extra.build.iter().chain(extra.runtime.iter()) {
                    push(name, &mut out);
                }
            }
        }
        out
    }
}

/// One step of the install procedure.
///
/// Beyond plain commands, the two one-off imperative operations the source
/// recipes need are first-class declarative steps: in-place text
/// replacement and (via [`Link`]) symlink materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Step {
    /// Invoke an external command in the source directory.
    Run(RunStep),
    /// Replace text in a file of the source tree before the next command.
    Inreplace(InreplaceStep),
}

/// Declarative in-place text replacement in the unpacked source tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InreplaceStep {
    /// File to edit, relative to the source directory.
    pub file: String,
    /// Regular expression matched in multi-line mode.
    pub pattern: String,
    /// Replacement text; may contain placeholders.
    pub replace: String,
}

/// A declared layout link, materialized after a successful build.
///
/// `from` is a glob relative to the install prefix; every match gains a
/// relative symlink inside the `into` directory of the same prefix (the
/// header/framework symlink conventions of the source recipes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    /// Glob over paths inside the install prefix.
    pub from: String,
    /// Directory (relative to the prefix) receiving the symlinks.
    pub into: String,
}

/// Post-install message displayed to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caveats {
    /// Free-form text shown once the formula is installed.
    pub text: String,
}

/// Complete formula definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// Identity metadata (`[formula]` table).
    pub formula: FormulaInfo,
    /// Source locator (`[source]` table).
    pub source: Source,
    /// Dependency declarations.
    #[serde(default)]
    pub dependencies: Dependencies,
    /// Ordered patch list (`[[patch]]`).
    #[serde(default)]
    pub patch: Vec<Patch>,
    /// Ordered install procedure (`[[step]]`).
    #[serde(default)]
    pub step: Vec<Step>,
    /// Declared layout links (`[[link]]`).
    #[serde(default)]
    pub link: Vec<Link>,
    /// Post-install message.
    #[serde(default)]
    pub caveats: Option<Caveats>,
}

impl Formula {
    /// Load and validate a formula from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a [`FormulaError`] if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, FormulaError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a formula from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a [`FormulaError`] on parse or validation failure.
    pub fn parse(content: &str) -> Result<Self, FormulaError> {
        let formula: Self = toml::from_str(content)?;
        formula.validate()?;
        Ok(formula)
    }

    fn validate(&self) -> Result<(), FormulaError> {
        if self.formula.name.is_empty() {
            return Err(FormulaError::Validation("empty formula name".to_string()));
        }
        if self.formula.version.as_str().is_empty() {
            return Err(FormulaError::Validation(format!(
                "formula '{}' has an empty version",
                self.formula.name
            )));
        }
        if let Source::Archive { url, format, .. } = &self.source {
            if format.is_none() && ArchiveFormat::detect(url).is_none() {
                return Err(FormulaError::Validation(format!(
                    "formula '{}': cannot infer archive format from '{url}'; set source.format",
                    self.formula.name
                )));
            }
        }
        if let Source::Git { revision, .. } = &self.source {
            if revision.is_empty() {
                return Err(FormulaError::Validation(format!(
                    "formula '{}': git source requires a revision pin",
                    self.formula.name
                )));
            }
        }
        Ok(())
    }

    /// The formula's unique name.
    pub fn name(&self) -> &FormulaName {
        &self.formula.name
    }

    /// The formula's declared version.
    pub fn version(&self) -> &Version {
        &self.formula.version
    }

    /// Dependencies effective on `platform`, in first-declared order.
    pub fn effective_deps(&self, platform: &Platform) -> Vec<FormulaName> {
        self.dependencies.effective(platform)
    }

    /// Patches effective on `platform`, in declared order.
    pub fn effective_patches(&self, platform: &Platform) -> Vec<&Patch> {
        self.patch
            .iter()
            .filter(|p| p.when.matches(platform))
            .collect()
    }

    /// The archive format of an archive source, inferring from the URL
    /// when not declared. `None` for VCS sources.
    pub fn archive_format(&self) -> Option<ArchiveFormat> {
        match &self.source {
            Source::Archive { url, format, .. } => format.or_else(|| ArchiveFormat::detect(url)),
            Source::Git { .. } | Source::Head { .. } => None,
        }
    }
}
