//! Platform capability model and gate predicates.
//!
//! Formulas branch on CPU architecture and OS version (patches only for
//! ARM, configure flags only below a given OS release). Those branches are
//! expressed as [`PlatformGate`] values in the formula file and evaluated
//! once per plan entry against a [`Platform`] snapshot, instead of being
//! scattered through the execution logic.

use serde::{Deserialize, Serialize};

/// CPU architecture of a build host.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// ARM64 architecture (Apple Silicon, aarch64 Linux).
    #[default]
    Arm64,
    /// `x86_64` architecture.
    X86_64,
}

impl Arch {
    /// Get the current architecture.
    pub fn current() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            Self::Arm64
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            Self::X86_64
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arm64" | "aarch64" => Ok(Self::Arm64),
            "x86_64" | "amd64" => Ok(Self::X86_64),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}

/// A dotted numeric OS version (`11.0`, `10.15.7`).
///
/// Ordering and equality compare the numeric components left to right;
/// missing components count as zero, so `11` equals `11.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String")]
#[serde(into = "String")]
pub struct OsVersion {
    raw: String,
    parts: Vec<u64>,
}

impl PartialEq for OsVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for OsVersion {}

impl OsVersion {
    /// Parse a dotted numeric version string.
    ///
    /// # Errors
    ///
    /// Returns an error if any dot-separated component is not an unsigned
    /// integer.
    pub fn parse(s: &str) -> Result<Self, String> {
        let parts = s
            .split('.')
            .map(|p| {
                p.parse::<u64>()
                    .map_err(|_| format!("Invalid OS version component '{p}' in '{s}'"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if parts.is_empty() {
            return Err(format!("Empty OS version: '{s}'"));
        }
        Ok(Self {
            raw: s.to_string(),
            parts,
        })
    }

    /// Return the version as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn component(&self, i: usize) -> u64 {
        self.parts.get(i).copied().unwrap_or(0)
    }
}

impl Ord for OsVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            match self.component(i).cmp(&other.component(i)) {
                std::cmp::Ordering::Equal => {}
                ord => return ord,
            }
        }
        std::cmp::Ordering::Equal
    }
}

impl PartialOrd for OsVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for OsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl TryFrom<String> for OsVersion {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<OsVersion> for String {
    fn from(v: OsVersion) -> Self {
        v.raw
    }
}

/// Snapshot of the build host's capabilities.
///
/// Captured once per run and passed into gate evaluation; nothing below
/// this struct inspects the host directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// CPU architecture of the host.
    pub arch: Arch,
    /// OS version, when it could be determined. `None` on hosts where no
    /// numeric product version is available.
    pub os_version: Option<OsVersion>,
}

impl Platform {
    /// Construct a platform snapshot with an explicit OS version.
    pub fn new(arch: Arch, os_version: Option<OsVersion>) -> Self {
        Self { arch, os_version }
    }

    /// Detect the current host platform.
    ///
    /// The OS version comes from `sw_vers -productVersion` on macOS and is
    /// left unknown elsewhere; gates with a `min_os` bound evaluate to
    /// false against an unknown version.
    pub fn host() -> Self {
        Self {
            arch: Arch::current(),
            os_version: detect_os_version(),
        }
    }
}

#[cfg(target_os = "macos")]
fn detect_os_version() -> Option<OsVersion> {
    let output = std::process::Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
    OsVersion::parse(&raw).ok()
}

#[cfg(not(target_os = "macos"))]
fn detect_os_version() -> Option<OsVersion> {
    None
}

/// A pure predicate over a [`Platform`], declared in formula files.
///
/// All present fields must match; an empty gate matches every platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformGate {
    /// Required CPU architecture.
    #[serde(default)]
    pub arch: Option<Arch>,
    /// Minimum OS version (inclusive).
    #[serde(default)]
    pub min_os: Option<OsVersion>,
}

impl PlatformGate {
    /// Evaluate the gate against a platform snapshot.
    pub fn matches(&self, platform: &Platform) -> bool {
        if let Some(arch) = self.arch {
            if arch != platform.arch {
                return false;
            }
        }
        if let Some(min_os) = &self.min_os {
            match &platform.os_version {
                Some(os) if os >= min_os => {}
                // Unknown host version: fail closed rather than apply an
                // option that may not be supported.
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(arch: Arch, os: &str) -> Platform {
        Platform::new(arch, Some(OsVersion::parse(os).unwrap()))
    }

    #[test]
    fn test_os_version_ordering() {
        let a = OsVersion::parse("10.15.7").unwrap();
        let b = OsVersion::parse("11.0").unwrap();
        assert!(a < b);
        assert_eq!(
            OsVersion::parse("11").unwrap(),
            OsVersion::parse("11.0").unwrap()
        );
    }

    #[test]
    fn test_empty_gate_matches_everything() {
        let gate = PlatformGate::default();
        assert!(gate.matches(&platform(Arch::Arm64, "11.0")));
        assert!(gate.matches(&Platform::new(Arch::X86_64, None)));
    }

    #[test]
    fn test_arch_gate() {
        let gate = PlatformGate {
            arch: Some(Arch::Arm64),
            min_os: None,
        };
        assert!(gate.matches(&platform(Arch::Arm64, "11.0")));
        assert!(!gate.matches(&platform(Arch::X86_64, "11.0")));
    }

    #[test]
    fn test_min_os_gate() {
        let gate = PlatformGate {
            arch: None,
            min_os: Some(OsVersion::parse("11.0").unwrap()),
        };
        assert!(gate.matches(&platform(Arch::Arm64, "12.3")));
        assert!(!gate.matches(&platform(Arch::Arm64, "10.15")));
        // Unknown host version fails closed
        assert!(!gate.matches(&Platform::new(Arch::Arm64, None)));
    }
}
