//! SQLite-based sink implementation.

use async_trait::async_trait;
use harvest_core::{
    CompletionRecord, FetchError, Payload, PayloadFormat, PersistenceSink, Result, WorkUnit,
};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::format;

/// SQLite-based sink for fetched payloads.
///
/// Payloads and completion records live in two tables of one database file.
/// SQLite commits each statement atomically, so a half-written payload row is
/// never visible, and the completion row is only inserted once the payload
/// row with the recorded length exists.
#[derive(Debug)]
pub struct SqliteSink {
    conn: Mutex<Connection>,
    format: PayloadFormat,
}

impl SqliteSink {
    /// Create a new SQLite sink at the given path.
    ///
    /// Rows left by an interrupted run are dropped on open: completion rows
    /// whose payload is missing or has a different length, then payload rows
    /// without a completion row.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened, schema creation
    /// fails, or the cleanup cannot be committed.
    pub fn new(path: impl AsRef<Path>, format: PayloadFormat) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| FetchError::Storage(e.to_string()))?;
        let sink = Self {
            conn: Mutex::new(conn),
            format,
        };
        sink.initialize_schema()?;
        sink.recover()?;
        Ok(sink)
    }

    /// Create an in-memory SQLite sink.
    ///
    /// Useful for testing; data is lost when the sink is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory(format: PayloadFormat) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| FetchError::Storage(e.to_string()))?;
        let sink = Self {
            conn: Mutex::new(conn),
            format,
        };
        sink.initialize_schema()?;
        Ok(sink)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FetchError::Storage(e.to_string()))
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS payloads (
                unit_key TEXT PRIMARY KEY,
                body BLOB NOT NULL,
                format TEXT NOT NULL,
                written_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| FetchError::Storage(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS completions (
                unit_key TEXT PRIMARY KEY,
                records INTEGER NOT NULL,
                bytes INTEGER NOT NULL,
                format TEXT NOT NULL,
                completed_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| FetchError::Storage(e.to_string()))?;

        debug!("SQLite sink schema initialized");
        Ok(())
    }

    /// Remove rows that do not form a complete unit.
    fn recover(&self) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| FetchError::Storage(e.to_string()))?;

        let invalid = tx
            .execute(
                "DELETE FROM completions WHERE NOT EXISTS (
                    SELECT 1 FROM payloads p
                    WHERE p.unit_key = completions.unit_key
                      AND length(p.body) = completions.bytes
                )",
                [],
            )
            .map_err(|e| FetchError::Storage(e.to_string()))?;
        let orphans = tx
            .execute(
                "DELETE FROM payloads WHERE unit_key NOT IN (SELECT unit_key FROM completions)",
                [],
            )
            .map_err(|e| FetchError::Storage(e.to_string()))?;

        tx.commit()
            .map_err(|e| FetchError::Storage(e.to_string()))?;

        if invalid + orphans > 0 {
            info!(
                removed_invalid_completions = invalid,
                removed_orphans = orphans,
                "Recovered SQLite sink"
            );
        }
        Ok(())
    }

    /// Stored payload bytes of a completed unit.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn load(&self, unit: &WorkUnit) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT p.body FROM payloads p
             JOIN completions c ON c.unit_key = p.unit_key
             WHERE p.unit_key = ?1",
            params![unit.key()],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| FetchError::Storage(e.to_string()))
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|e| FetchError::Storage(format!("{value}: {e}")))
}

#[async_trait]
impl PersistenceSink for SqliteSink {
    fn format(&self) -> PayloadFormat {
        self.format
    }

    async fn exists(&self, unit: &WorkUnit) -> Result<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM completions c
                 JOIN payloads p ON p.unit_key = c.unit_key
                 WHERE c.unit_key = ?1 AND length(p.body) = c.bytes",
                params![unit.key()],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| FetchError::Storage(e.to_string()))?;
        Ok(found.is_some())
    }

    #[instrument(skip(self, payload), fields(unit = %unit))]
    async fn write(&self, unit: &WorkUnit, payload: &Payload) -> Result<u64> {
        let body = format::encode(payload, self.format)?;
        let written_at = chrono::Utc::now().to_rfc3339();

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO payloads (unit_key, body, format, written_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![unit.key(), body, self.format.extension(), written_at],
        )
        .map_err(|e| FetchError::Storage(e.to_string()))?;

        debug!(bytes = body.len(), "Stored payload");
        Ok(body.len() as u64)
    }

    #[instrument(skip(self, record), fields(unit = %unit))]
    async fn mark_complete(&self, unit: &WorkUnit, record: &CompletionRecord) -> Result<()> {
        let bytes = to_i64(record.bytes)?;
        let records = to_i64(record.records as u64)?;

        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| FetchError::Storage(e.to_string()))?;

        let stored: Option<i64> = tx
            .query_row(
                "SELECT length(body) FROM payloads WHERE unit_key = ?1",
                params![record.key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| FetchError::Storage(e.to_string()))?;
        if stored != Some(bytes) {
            return Err(FetchError::Storage(format!(
                "{}: expected {} stored bytes, found {stored:?}",
                record.key, record.bytes
            )));
        }

        tx.execute(
            "INSERT OR IGNORE INTO completions (unit_key, records, bytes, format, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.key,
                records,
                bytes,
                record.format.extension(),
                record.completed_at.to_rfc3339()
            ],
        )
        .map_err(|e| FetchError::Storage(e.to_string()))?;

        tx.commit().map_err(|e| FetchError::Storage(e.to_string()))?;
        debug!("Marked complete");
        Ok(())
    }

    async fn completed_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM completions", [], |row| row.get(0))
            .map_err(|e| FetchError::Storage(e.to_string()))?;
        usize::try_from(count).map_err(|e| FetchError::Storage(format!("{count}: {e}")))
    }

    async fn completed_keys(&self) -> Result<HashSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT unit_key FROM completions")
            .map_err(|e| FetchError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| FetchError::Storage(e.to_string()))?;

        let mut keys = HashSet::new();
        for row in rows {
            keys.insert(row.map_err(|e| FetchError::Storage(e.to_string()))?);
        }
        Ok(keys)
    }
}
