//! Patch application.
//!
//! Patches are applied strictly in declared order by driving the external
//! `patch(1)` tool with the formula's strip level. A conflict halts the
//! affected formula only; sibling plan entries are unaffected.

use std::path::Path;
use std::process::Command;

use thiserror::Error;

/// Errors raised while applying a patch.
#[derive(Error, Debug)]
pub enum PatchError {
    /// The patch tool could not be launched at all.
    #[error("Failed to launch the patch tool: {0}")]
    Spawn(std::io::Error),

    /// The patch did not apply cleanly.
    #[error("Patch '{url}' did not apply cleanly (exit {code}): {detail}")]
    Conflict {
        /// URL of the conflicting patch.
        url: String,
        /// Exit code of the patch tool.
        code: i32,
        /// Tail of the tool's output.
        detail: String,
    },

    /// Filesystem failure around the patch invocation.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Apply one patch file to `source_dir` with the given strip level.
///
/// Blocking; callers run it on a worker thread. `url` is only used to
/// identify the patch in errors.
///
/// # Errors
///
/// Returns [`PatchError::Conflict`] when the tool exits non-zero, or
/// [`PatchError::Spawn`] when it cannot be launched.
pub fn apply_patch(
    source_dir: &Path,
    patch_file: &Path,
    strip: u32,
    url: &str,
) -> Result<(), PatchError> {
    let output = Command::new("patch")
        .arg("-f")
        .arg(format!("-p{strip}"))
        .arg("-d")
        .arg(source_dir)
        .arg("-i")
        .arg(patch_file)
        .output()
        .map_err(PatchError::Spawn)?;

    if !output.status.success() {
        let mut detail = String::from_utf8_lossy(&output.stdout).to_string();
        detail.push_str(&String::from_utf8_lossy(&output.stderr));
        let detail = detail
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join(" | ");
        return Err(PatchError::Conflict {
            url: url.to_string(),
            code: output.status.code().unwrap_or(-1),
            detail,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch_tool_available() -> bool {
        which::which("patch").is_ok()
    }

    const DIFF: &str = "--- hello.txt\n+++ hello.txt\n@@ -1 +1 @@\n-old line\n+new line\n";

    #[test]
    fn test_apply_patch() {
        if !patch_tool_available() {
            eprintln!("patch tool not found; skipping");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "old line\n").unwrap();
        let patch_file = dir.path().join("fix.patch");
        std::fs::write(&patch_file, DIFF).unwrap();

        apply_patch(dir.path(), &patch_file, 0, "https://example.org/fix.patch").unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
            "new line\n"
        );
    }

    #[test]
    fn test_conflict_is_reported() {
        if !patch_tool_available() {
            eprintln!("patch tool not found; skipping");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "something else entirely\n").unwrap();
        let patch_file = dir.path().join("fix.patch");
        std::fs::write(&patch_file, DIFF).unwrap();

        let err =
            apply_patch(dir.path(), &patch_file, 0, "https://example.org/fix.patch").unwrap_err();

        match err {
            PatchError::Conflict { url, code, .. } => {
                assert_eq!(url, "https://example.org/fix.patch");
                assert_ne!(code, 0);
            }
            other => panic!("expected conflict, got {other}"),
        }
        // The target file is left as it was
        assert!(
            std::fs::read_to_string(dir.path().join("hello.txt"))
                .unwrap()
                .starts_with("something else")
        );
    }

    #[test]
    fn test_ordered_application() {
        if !patch_tool_available() {
            eprintln!("patch tool not found; skipping");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "one\n").unwrap();

        let first = dir.path().join("first.patch");
        std::fs::write(
            &first,
            "--- hello.txt\n+++ hello.txt\n@@ -1 +1 @@\n-one\n+two\n",
        )
        .unwrap();
        let second = dir.path().join("second.patch");
        std::fs::write(
            &second,
            "--- hello.txt\n+++ hello.txt\n@@ -1 +1 @@\n-two\n+three\n",
        )
        .unwrap();

        // The second patch only applies on top of the first
        apply_patch(dir.path(), &first, 0, "first").unwrap();
        apply_patch(dir.path(), &second, 0, "second").unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
            "three\n"
        );
    }
}
