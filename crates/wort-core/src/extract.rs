//! Archive extraction.
//!
//! Handles tar.gz, tar.zst, plain tar, and zip sources. All functions are
//! blocking; the orchestrator runs them on worker threads.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path};

use thiserror::Error;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

use wort_schema::ArchiveFormat;

/// Errors raised while unpacking an archive.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Filesystem failure during extraction.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The archive is malformed or contains an unsafe path.
    #[error("Archive error: {0}")]
    Archive(String),
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e.to_string())
    }
}

/// Extract `archive_path` into `dest_dir` according to `format`.
///
/// # Errors
///
/// Returns an [`ExtractError`] if the archive cannot be read, contains a
/// path escaping the destination, or fails to unpack.
pub fn extract_archive(
    archive_path: &Path,
    format: ArchiveFormat,
    dest_dir: &Path,
) -> Result<(), ExtractError> {
    fs::create_dir_all(dest_dir)?;

    match format {
        ArchiveFormat::TarGz => {
            let reader = BufReader::new(File::open(archive_path)?);
            extract_tar(flate2::read::GzDecoder::new(reader), dest_dir)
        }
        ArchiveFormat::TarZst => {
            let reader = BufReader::new(File::open(archive_path)?);
            extract_tar(ZstdDecoder::new(reader)?, dest_dir)
        }
        ArchiveFormat::Tar => {
            let reader = BufReader::new(File::open(archive_path)?);
            extract_tar(reader, dest_dir)
        }
        ArchiveFormat::Zip => {
            let file = File::open(archive_path)?;
            let mut archive = ZipArchive::new(file)?;
            archive.extract(dest_dir)?;
            Ok(())
        }
    }
}

/// Extract a tar stream entry by entry with path sanitization.
fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<(), ExtractError> {
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();

        // Reject traversal outside the destination
        if entry_path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                entry_path.display()
            )));
        }

        let absolute_path = dest_dir.join(&entry_path);
        if !absolute_path.starts_with(dest_dir) {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                entry_path.display()
            )));
        }

        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&absolute_path)?;
            continue;
        }

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&absolute_path)?;
    }

    Ok(())
}

/// Collapse a single top-level directory after extraction.
///
/// Upstream tarballs usually wrap everything in `name-version/`; builds
/// expect the configure script at the root of the staged tree.
///
/// # Errors
///
/// Returns an error if directory entries cannot be read or moved.
pub fn strip_single_root(dest_dir: &Path) -> io::Result<()> {
    let entries: Vec<_> = fs::read_dir(dest_dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|e| e.path())
        .collect();

    let [root] = entries.as_slice() else {
        return Ok(());
    };
    if !root.is_dir() {
        return Ok(());
    }

    for child in fs::read_dir(root)?.collect::<Result<Vec<_>, _>>()? {
        let target = dest_dir.join(child.file_name());
        fs::rename(child.path(), target)?;
    }
    fs::remove_dir(root)?;
    Ok(())
}
