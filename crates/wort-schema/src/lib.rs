//! Formula schema shared between the wort core and CLI.
//!
//! This crate owns the data model: formula definitions as they appear in
//! registry TOML files, the newtypes used to identify them, the platform
//! capability model, and the typed command templates the build executor
//! expands. It contains no I/O beyond reading a formula file.

pub mod command;
pub mod formula;
pub mod hash;
pub mod platform;
pub mod types;

// Re-exports
pub use command::{CommandLine, ExpandError, Substitutions};
pub use formula::{
    ArchiveFormat, Dependencies, Formula, FormulaError, FormulaInfo, Link, Patch, Source, Step,
};
pub use hash::Sha256Digest;
pub use platform::{Arch, OsVersion, Platform, PlatformGate};
pub use types::{FormulaName, Version};
