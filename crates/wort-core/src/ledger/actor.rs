//! Ledger actor - thread-safe access to SQLite
//!
//! SQLite connections are not `Sync`, so the database handle lives in a
//! dedicated background thread and all access goes through message
//! passing. This also serializes writes: one writer at a time, even when
//! independent subtrees build in parallel.

use std::fmt;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use tokio::sync::oneshot;

use super::db::{InstalledFormula, LedgerDb, LedgerError};

/// Events that can be sent to the ledger actor.
enum LedgerEvent {
    /// Get the record for one formula.
    Get {
        name: String,
        resp: oneshot::Sender<Result<Option<InstalledFormula>, LedgerError>>,
    },
    /// Get all installation records.
    All {
        resp: oneshot::Sender<Result<Vec<InstalledFormula>, LedgerError>>,
    },
    /// Record a successful install.
    RecordInstall {
        name: String,
        version: String,
        prefix: String,
        source_ref: Option<String>,
        resp: oneshot::Sender<Result<(), LedgerError>>,
    },
    /// Shutdown the actor.
    Shutdown,
}

impl fmt::Debug for LedgerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get { name, .. } => f
                .debug_struct("Get")
                .field("name", name)
                .finish_non_exhaustive(),
            Self::All { .. } => f.debug_struct("All").finish_non_exhaustive(),
            Self::RecordInstall { name, version, .. } => f
                .debug_struct("RecordInstall")
                .field("name", name)
                .field("version", version)
                .finish_non_exhaustive(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// A handle to the ledger actor that is Send + Sync and Clone.
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerEvent>,
}

impl fmt::Debug for LedgerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerHandle").finish_non_exhaustive()
    }
}

impl LedgerHandle {
    /// Spawn a new ledger actor thread backed by the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the database cannot be opened.
    pub fn spawn_at(path: &Path) -> Result<Self, LedgerError> {
        let (sender, receiver) = mpsc::channel();
        let db = LedgerDb::open_at(path)?;

        thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                match event {
                    LedgerEvent::Get { name, resp } => {
                        let _ = resp.send(db.get(&name));
                    }
                    LedgerEvent::All { resp } => {
                        let _ = resp.send(db.all());
                    }
                    LedgerEvent::RecordInstall {
                        name,
                        version,
                        prefix,
                        source_ref,
                        resp,
                    } => {
                        let _ = resp.send(db.record_install(
                            &name,
                            &version,
                            &prefix,
                            source_ref.as_deref(),
                        ));
                    }
                    LedgerEvent::Shutdown => break,
                }
            }
        });

        Ok(Self { sender })
    }

    /// Get the record for one formula.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] on database or channel failure.
    pub async fn get(&self, name: String) -> Result<Option<InstalledFormula>, LedgerError> {
        let (resp, rx) = oneshot::channel();
        self.send(LedgerEvent::Get { name, resp })?;
        rx.await
            .map_err(|e| LedgerError::Channel(e.to_string()))?
    }

    /// Get all installation records.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] on database or channel failure.
    pub async fn all(&self) -> Result<Vec<InstalledFormula>, LedgerError> {
        let (resp, rx) = oneshot::channel();
        self.send(LedgerEvent::All { resp })?;
        rx.await
            .map_err(|e| LedgerError::Channel(e.to_string()))?
    }

    /// Record a successful install.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] on database or channel failure.
    pub async fn record_install(
        &self,
        name: String,
        version: String,
        prefix: String,
        source_ref: Option<String>,
    ) -> Result<(), LedgerError> {
        let (resp, rx) = oneshot::channel();
        self.send(LedgerEvent::RecordInstall {
            name,
            version,
            prefix,
            source_ref,
            resp,
        })?;
        rx.await
            .map_err(|e| LedgerError::Channel(e.to_string()))?
    }

    /// Ask the actor to shut down. Pending events are processed first.
    pub fn shutdown(&self) {
        let _ = self.sender.send(LedgerEvent::Shutdown);
    }

    fn send(&self, event: LedgerEvent) -> Result<(), LedgerError> {
        self.sender
            .send(event)
            .map_err(|e| LedgerError::Channel(e.to_string()))
    }
}
