//! Source fetching and integrity verification.
//!
//! Archives are downloaded with a streaming SHA-256 digest and cached by
//! digest; a mismatch is fatal and removes the partial file. Mirrors are
//! tried in declared order for transport failures only — an integrity
//! failure is never retried on another mirror. Version-control sources are
//! cloned and pinned to an exact revision.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::reporter::Reporter;
use wort_schema::{FormulaName, Sha256Digest, Version};

/// Errors raised while fetching or verifying sources.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem failure while staging the download.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The downloaded content does not match the declared digest.
    #[error("Integrity check failed for '{url}': expected {expected}, got {actual}")]
    HashMismatch {
        /// URL whose content mismatched.
        url: String,
        /// Digest declared by the formula.
        expected: String,
        /// Digest of the bytes actually received.
        actual: String,
    },

    /// Version-control operation failure.
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
}

impl FetchError {
    /// Whether retrying the fetch from a mirror could help. Integrity
    /// failures are fatal by design.
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_)) || matches!(self, Self::Io(_))
    }
}

/// How to pin a version-control checkout.
#[derive(Debug, Clone)]
pub enum GitTarget {
    /// Exact commit id (reproducible).
    Revision(String),
    /// Branch tip, or the remote default branch when `None`
    /// (non-reproducible head checkout).
    Branch(Option<String>),
}

/// Downloads and verifies formula sources and patches.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    cache_dir: PathBuf,
}

impl Fetcher {
    /// Create a fetcher writing downloads into `cache_dir`.
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            client: Client::new(),
            cache_dir,
        }
    }

    /// Fetch `url` (falling back to `mirrors` on transport failures) and
    /// verify it against `sha256`, returning the cached file path.
    ///
    /// A cached file that still matches the digest is reused without
    /// hitting the network; a stale cached file is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::HashMismatch`] on an integrity failure
    /// (fatal, not retried), or the last transport error if every
    /// candidate URL fails.
    pub async fn fetch_verified(
        &self,
        name: &FormulaName,
        version: &Version,
        url: &str,
        mirrors: &[String],
        sha256: &Sha256Digest,
        reporter: &dyn Reporter,
    ) -> Result<PathBuf, FetchError> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let dest = self.cache_path(url, sha256);

        if tokio::fs::try_exists(&dest).await? {
            reporter.verifying(name, version);
            let cached = dest.clone();
            let actual = tokio::task::spawn_blocking(move || hash_file(&cached))
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))??;
            if sha256.matches(&actual) {
                tracing::debug!(url, "cache hit");
                return Ok(dest);
            }
            tokio::fs::remove_file(&dest).await?;
        }

        let mut last_err = None;
        for candidate in std::iter::once(url).chain(mirrors.iter().map(String::as_str)) {
            reporter.fetching(name, version, candidate);
            match self
                .download_and_verify(candidate, &dest, sha256, name, version, reporter)
                .await
            {
                Ok(()) => return Ok(dest),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(url = candidate, error = %e, "fetch failed, trying next mirror");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.expect("at least the primary URL was attempted"))
    }

    /// Perform a sequential download with streaming verification.
    async fn download_and_verify(
        &self,
        url: &str,
        dest: &Path,
        expected: &Sha256Digest,
        name: &FormulaName,
        version: &Version,
        reporter: &dyn Reporter,
    ) -> Result<(), FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
        }
        file.flush().await?;

        reporter.verifying(name, version);
        let actual = hex::encode(hasher.finalize());
        if !expected.matches(&actual) {
            tokio::fs::remove_file(dest).await.ok();
            return Err(FetchError::HashMismatch {
                url: url.to_string(),
                expected: expected.as_str().to_string(),
                actual,
            });
        }

        Ok(())
    }

    /// Cache file path for a URL/digest pair.
    ///
    /// Keyed by digest so two URLs serving the same bytes share one cache
    /// entry, with the upstream filename kept for readability.
    fn cache_path(&self, url: &str, sha256: &Sha256Digest) -> PathBuf {
        let filename = crate::paths::filename_from_url(url);
        let key = &sha256.as_str()[..16];
        self.cache_dir.join(format!("{key}-{filename}"))
    }
}

/// Clone `url` into `dest` and pin the checkout per `target`.
///
/// Blocking; callers run it on a worker thread. An existing `dest` is
/// removed first so re-fetches start clean.
///
/// # Errors
///
/// Returns [`FetchError::Git`] if the clone or checkout fails.
pub fn checkout_git(url: &str, target: &GitTarget, dest: &Path) -> Result<(), FetchError> {
    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut builder = git2::build::RepoBuilder::new();
    if let GitTarget::Branch(Some(branch)) = target {
        builder.branch(branch);
    }
    let repo = builder.clone(url, dest)?;

    if let GitTarget::Revision(revision) = target {
        let oid = git2::Oid::from_str(revision)?;
        let commit = repo.find_commit(oid)?;
        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force();
        repo.checkout_tree(commit.as_object(), Some(&mut checkout))?;
        repo.set_head_detached(oid)?;
    }

    Ok(())
}

/// Streaming SHA-256 of a file on disk (blocking).
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let count = file.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;

    fn digest_of(data: &[u8]) -> Sha256Digest {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Sha256Digest::new(hex::encode(hasher.finalize())).unwrap()
    }

    fn ids() -> (FormulaName, Version) {
        (FormulaName::new("zlib"), Version::new("1.3"))
    }

    #[tokio::test]
    async fn test_fetch_and_verify() {
        let mut server = mockito::Server::new_async().await;
        let body = b"source archive bytes";
        let mock = server
            .mock("GET", "/zlib-1.3.tar.gz")
            .with_body(body)
            .expect(1)
            .create_async()
            .await;

        let cache = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(cache.path().to_path_buf());
        let (name, version) = ids();
        let url = format!("{}/zlib-1.3.tar.gz", server.url());

        let path = fetcher
            .fetch_verified(&name, &version, &url, &[], &digest_of(body), &NullReporter)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), body);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let mut server = mockito::Server::new_async().await;
        let body = b"cached bytes";
        let mock = server
            .mock("GET", "/pkg.tar.gz")
            .with_body(body)
            .expect(1)
            .create_async()
            .await;

        let cache = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(cache.path().to_path_buf());
        let (name, version) = ids();
        let url = format!("{}/pkg.tar.gz", server.url());
        let digest = digest_of(body);

        let first = fetcher
            .fetch_verified(&name, &version, &url, &[], &digest, &NullReporter)
            .await
            .unwrap();
        let second = fetcher
            .fetch_verified(&name, &version, &url, &[], &digest, &NullReporter)
            .await
            .unwrap();

        assert_eq!(first, second);
        // One network hit for two fetches
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_hash_mismatch_is_fatal_and_removes_file() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/pkg.tar.gz")
            .with_body(b"cafebabe content")
            .create_async()
            .await;

        let cache = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(cache.path().to_path_buf());
        let (name, version) = ids();
        let url = format!("{}/pkg.tar.gz", server.url());
        let declared = digest_of(b"deadbeef content");

        let err = fetcher
            .fetch_verified(&name, &version, &url, &[], &declared, &NullReporter)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::HashMismatch { .. }));
        // Partial/mismatched file must not survive in the cache
        let leftover: Vec<_> = std::fs::read_dir(cache.path()).unwrap().collect();
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn test_mirror_fallback_on_transport_failure() {
        let mut server = mockito::Server::new_async().await;
        let body = b"mirrored bytes";
        server
            .mock("GET", "/primary.tar.gz")
            .with_status(503)
            .create_async()
            .await;
        let mirror_mock = server
            .mock("GET", "/mirror.tar.gz")
            .with_body(body)
            .create_async()
            .await;

        let cache = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(cache.path().to_path_buf());
        let (name, version) = ids();
        let primary = format!("{}/primary.tar.gz", server.url());
        let mirrors = vec![format!("{}/mirror.tar.gz", server.url())];

        let path = fetcher
            .fetch_verified(
                &name,
                &version,
                &primary,
                &mirrors,
                &digest_of(body),
                &NullReporter,
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), body);
        mirror_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_mismatch_not_retried_on_mirror() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/primary.tar.gz")
            .with_body(b"wrong bytes")
            .create_async()
            .await;
        let mirror_mock = server
            .mock("GET", "/mirror.tar.gz")
            .with_body(b"right bytes")
            .expect(0)
            .create_async()
            .await;

        let cache = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(cache.path().to_path_buf());
        let (name, version) = ids();
        let primary = format!("{}/primary.tar.gz", server.url());
        let mirrors = vec![format!("{}/mirror.tar.gz", server.url())];

        let err = fetcher
            .fetch_verified(
                &name,
                &version,
                &primary,
                &mirrors,
                &digest_of(b"right bytes"),
                &NullReporter,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::HashMismatch { .. }));
        mirror_mock.assert_async().await;
    }

    #[test]
    fn test_hash_file_matches_streaming_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"hello wort").unwrap();

        let expected = digest_of(b"hello wort");
        assert_eq!(hash_file(&path).unwrap(), expected.as_str());
    }
}
