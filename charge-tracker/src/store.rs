//! SQLite-backed local buffer of samples with a synced/unsynced partition.
//!
//! The store is a cache of telemetry awaiting upload, not a system of record.
//! When the on-disk schema version differs from [`SCHEMA_VERSION`] the table
//! is dropped and recreated empty.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info, warn};

use crate::error::{TrackerError, TrackerResult};
use crate::sample::{Sample, SampleId};

/// Schema version stored in SQLite's `user_version` pragma.
pub const SCHEMA_VERSION: i64 = 1;

const MAX_IDS_PER_STATEMENT: usize = 500;

/// Append-only sample table shared by the sampler and the sync engine.
///
/// Any number of producers may insert, but draining the unsynced partition is
/// single-consumer: a drainer holds [`SampleStore::claim_consumer`] from
/// `unsynced` through `mark_synced`.
pub struct SampleStore {
    conn: Mutex<Connection>,
    consumer: tokio::sync::Mutex<()>,
}

impl SampleStore {
    /// Create or open a store at the given file path.
    pub fn open(path: &Path) -> TrackerResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TrackerError::storage(format!("Failed to create store directory: {e}"))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| TrackerError::storage(format!("Failed to open store database: {e}")))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "Opened sample store");

        let store = Self {
            conn: Mutex::new(conn),
            consumer: tokio::sync::Mutex::new(()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    pub fn in_memory() -> TrackerResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            TrackerError::storage(format!("Failed to create in-memory store: {e}"))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            consumer: tokio::sync::Mutex::new(()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Wait for exclusive use of the unsynced partition.
    ///
    /// Two drainers that both read `unsynced` before either marks would send
    /// the same rows twice.
    pub async fn claim_consumer(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.consumer.lock().await
    }

    fn conn(&self) -> TrackerResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TrackerError::storage(format!("Failed to acquire lock: {e}")))
    }

    fn init_schema(&self) -> TrackerResult<()> {
        let conn = self.conn()?;

        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version == SCHEMA_VERSION {
            return Ok(());
        }

        if version != 0 {
            warn!(
                found = version,
                expected = SCHEMA_VERSION,
                "Sample store schema version changed, discarding buffered samples"
            );
        }

        conn.execute_batch(&format!(
            "BEGIN;
             DROP TABLE IF EXISTS samples;
             CREATE TABLE samples (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 producer_id TEXT NOT NULL,
                 timestamp INTEGER NOT NULL,
                 value INTEGER NOT NULL,
                 synced INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_samples_synced ON samples (synced, timestamp);
             PRAGMA user_version = {SCHEMA_VERSION};
             COMMIT;"
        ))
        .map_err(|e| TrackerError::storage(format!("Failed to create schema: {e}")))?;

        info!(version = SCHEMA_VERSION, "Sample store schema initialized");
        Ok(())
    }

    /// Append one unsynced sample and return its id.
    pub fn insert(&self, producer_id: &str, timestamp: i64, value: i64) -> TrackerResult<SampleId> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO samples (producer_id, timestamp, value, synced) VALUES (?1, ?2, ?3, 0)",
            params![producer_id, timestamp, value],
        )
        .map_err(|e| TrackerError::storage(format!("Failed to insert sample: {e}")))?;

        Ok(conn.last_insert_rowid())
    }

    /// All unsynced samples, ascending by timestamp, then id.
    ///
    /// Every call re-scans the table and returns a fully materialized list.
    pub fn unsynced(&self) -> TrackerResult<Vec<Sample>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, producer_id, timestamp, value, synced FROM samples
                 WHERE synced = 0 ORDER BY timestamp ASC, id ASC",
            )
            .map_err(|e| TrackerError::storage(format!("Failed to prepare query: {e}")))?;

        let samples = stmt
            .query_map([], |row| {
                Ok(Sample {
                    id: row.get(0)?,
                    producer_id: row.get(1)?,
                    timestamp: row.get(2)?,
                    value: row.get(3)?,
                    synced: row.get(4)?,
                })
            })
            .map_err(|e| TrackerError::storage(format!("Failed to query samples: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TrackerError::storage(format!("Failed to read sample row: {e}")))?;

        Ok(samples)
    }

    /// Flag the given ids as synced.
    ///
    /// Already-synced and unknown ids are ignored. Returns the number of rows
    /// that changed from unsynced to synced.
    pub fn mark_synced(&self, ids: &[SampleId]) -> TrackerResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| TrackerError::storage(format!("Failed to begin transaction: {e}")))?;

        let mut updated = 0;
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "UPDATE samples SET synced = 1 WHERE synced = 0 AND id IN ({placeholders})"
            );
            updated += tx
                .execute(&sql, params_from_iter(chunk.iter()))
                .map_err(|e| TrackerError::storage(format!("Failed to mark samples: {e}")))?;
        }

        tx.commit()
            .map_err(|e| TrackerError::storage(format!("Failed to commit: {e}")))?;
        Ok(updated)
    }

    /// Delete every synced sample. Unsynced rows are never touched.
    pub fn delete_synced(&self) -> TrackerResult<usize> {
        let conn = self.conn()?;

        let deleted = conn
            .execute("DELETE FROM samples WHERE synced = 1", [])
            .map_err(|e| TrackerError::storage(format!("Failed to delete samples: {e}")))?;

        Ok(deleted)
    }

    /// Total number of stored samples.
    pub fn count(&self) -> TrackerResult<usize> {
        self.count_where("1 = 1")
    }

    /// Number of samples awaiting upload.
    pub fn unsynced_count(&self) -> TrackerResult<usize> {
        self.count_where("synced = 0")
    }

    fn count_where(&self, predicate: &str) -> TrackerResult<usize> {
        let conn = self.conn()?;

        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM samples WHERE {predicate}"),
                [],
                |row| row.get(0),
            )
            .map_err(|e| TrackerError::storage(format!("Failed to count samples: {e}")))?;

        Ok(count as usize)
    }
}
