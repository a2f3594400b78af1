//! SQLite state database
//!
//! Tracks installed formulas: one row per name, overwritten on reinstall.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, params};
use thiserror::Error;

use wort_schema::{FormulaName, Version};

/// Errors raised by ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Underlying database failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The ledger actor thread is gone.
    #[error("Ledger actor unavailable: {0}")]
    Channel(String),
}

/// One installation record.
#[derive(Debug, Clone)]
pub struct InstalledFormula {
    /// Formula name (ledger key).
    pub name: String,
    /// Installed version.
    pub version: String,
    /// Install prefix on disk.
    pub prefix: String,
    /// Source pin: archive digest or git revision; `None` for head
    /// checkouts.
    pub source_ref: Option<String>,
    /// Unix timestamp of the install.
    pub installed_at: i64,
}

/// State database for tracking installations.
#[derive(Debug)]
pub struct LedgerDb {
    conn: Connection,
}

impl LedgerDb {
    /// Open or create the ledger at a specific path.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the database cannot be opened or its
    /// schema initialized.
    pub fn open_at(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;

        // WAL keeps readers unblocked while the actor writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), LedgerError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS formulas (
                name TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                prefix TEXT NOT NULL,
                source_ref TEXT,
                installed_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Record a successful install, overwriting any previous record for
    /// the same name.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] on database failure.
    pub fn record_install(
        &self,
        name: &str,
        version: &str,
        prefix: &str,
        source_ref: Option<&str>,
    ) -> Result<(), LedgerError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        self.conn.execute(
            "INSERT OR REPLACE INTO formulas (name, version, prefix, source_ref, installed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, version, prefix, source_ref, now],
        )?;
        Ok(())
    }

    /// Get the record for one formula, if installed.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] on database failure.
    pub fn get(&self, name: &str) -> Result<Option<InstalledFormula>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, version, prefix, source_ref, installed_at
             FROM formulas WHERE name = ?1",
        )?;
        let mut rows = stmt.query(params![name])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_record(row)?))
        } else {
            Ok(None)
        }
    }

    /// All installation records in name order.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] on database failure.
    pub fn all(&self) -> Result<Vec<InstalledFormula>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, version, prefix, source_ref, installed_at
             FROM formulas ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(InstalledFormula {
                name: row.get(0)?,
                version: row.get(1)?,
                prefix: row.get(2)?,
                source_ref: row.get(3)?,
                installed_at: row.get(4)?,
            })
        })?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> Result<InstalledFormula, rusqlite::Error> {
        Ok(InstalledFormula {
            name: row.get(0)?,
            version: row.get(1)?,
            prefix: row.get(2)?,
            source_ref: row.get(3)?,
            installed_at: row.get(4)?,
        })
    }
}

/// Build the resolver's installed-version snapshot from ledger records.
pub fn versions_snapshot(records: &[InstalledFormula]) -> HashMap<FormulaName, Version> {
    records
        .iter()
        .map(|r| (FormulaName::new(&r.name), Version::new(&r.version)))
        .collect()
}
