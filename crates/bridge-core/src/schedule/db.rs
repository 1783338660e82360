//! Persistent storage for scheduled auctions using redb.
//!
//! # Table design
//!
//! `RECORDS` maps an auction id to its JSON-encoded record. Two index tables
//! hold the same record under a composite key:
//! ```text
//! [ timestamp_ms: u64 big-endian (8 bytes) | id: utf-8 bytes ]
//! ```
//! `BY_START` is keyed on the scheduled start, `BY_END` on the end time.
//!
//! Because the timestamp occupies the high bytes in big-endian encoding,
//! byte ordering equals timestamp ordering. "Starts at T" is the prefix range
//! `[T, T+1)` and "ends at or after T" is the open range `[T, ..)`, so
//! neither view needs post-filtering on time.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{BridgeError, Result};

use super::index::ScheduleIndex;
use super::record::{time_key, ScheduleRecord};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: auction id. Value: JSON-encoded ScheduleRecord.
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Key: start_ms big-endian ++ id. Value: JSON-encoded ScheduleRecord.
const BY_START: TableDefinition<&[u8], &[u8]> = TableDefinition::new("by_start");

/// Key: end_ms big-endian ++ id. Value: JSON-encoded ScheduleRecord.
const BY_END: TableDefinition<&[u8], &[u8]> = TableDefinition::new("by_end");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn index_key(ms: u64, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + id.len());
    key.extend_from_slice(&ms.to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

fn ms_prefix(ms: u64) -> [u8; 8] {
    ms.to_be_bytes()
}

fn db_err(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::ScheduleDb(e.to_string())
}

// ---------------------------------------------------------------------------
// ScheduleDb
// ---------------------------------------------------------------------------

/// Persistent store for `ScheduleRecord`s.
///
/// Written by the persistence side (workers, `records import`), read by the
/// planner through `ScheduleIndex`. redb read transactions are MVCC snapshots,
/// so readers never block each other.
pub struct ScheduleDb {
    db: Database,
}

impl ScheduleDb {
    /// Open or create the redb database at `path`.
    ///
    /// Creates all tables if they don't already exist.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path).map_err(db_err)?;
        // Ensure the tables exist before any reads
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(RECORDS).map_err(db_err)?;
        wt.open_table(BY_START).map_err(db_err)?;
        wt.open_table(BY_END).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Insert or replace the record for `record.id`.
    ///
    /// Stale index entries of a previous version are removed in the same
    /// write transaction.
    pub fn upsert(&self, record: &ScheduleRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut records = wt.open_table(RECORDS).map_err(db_err)?;
            let mut by_start = wt.open_table(BY_START).map_err(db_err)?;
            let mut by_end = wt.open_table(BY_END).map_err(db_err)?;

            let previous: Option<ScheduleRecord> = match records
                .get(record.id.as_str())
                .map_err(db_err)?
            {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };
            if let Some(prev) = previous {
                if let Some(start) = prev.start_time {
                    by_start
                        .remove(index_key(time_key(&start), &prev.id).as_slice())
                        .map_err(db_err)?;
                }
                if let Some(end) = prev.end_time() {
                    by_end
                        .remove(index_key(time_key(&end), &prev.id).as_slice())
                        .map_err(db_err)?;
                }
            }

            records
                .insert(record.id.as_str(), value.as_slice())
                .map_err(db_err)?;
            if let Some(start) = record.start_time {
                by_start
                    .insert(
                        index_key(time_key(&start), &record.id).as_slice(),
                        value.as_slice(),
                    )
                    .map_err(db_err)?;
            }
            if let Some(end) = record.end_time() {
                by_end
                    .insert(
                        index_key(time_key(&end), &record.id).as_slice(),
                        value.as_slice(),
                    )
                    .map_err(db_err)?;
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Remove the record for `id`. Returns false if there was none.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let Some(record) = self.get(id)? else {
            return Ok(false);
        };
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut records = wt.open_table(RECORDS).map_err(db_err)?;
            records.remove(id).map_err(db_err)?;
            if let Some(start) = record.start_time {
                let mut by_start = wt.open_table(BY_START).map_err(db_err)?;
                by_start
                    .remove(index_key(time_key(&start), id).as_slice())
                    .map_err(db_err)?;
            }
            if let Some(end) = record.end_time() {
                let mut by_end = wt.open_table(BY_END).map_err(db_err)?;
                by_end
                    .remove(index_key(time_key(&end), id).as_slice())
                    .map_err(db_err)?;
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Result<Option<ScheduleRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(RECORDS).map_err(db_err)?;
        let record = match table.get(id).map_err(db_err)? {
            Some(guard) => Some(serde_json::from_slice(guard.value())?),
            None => None,
        };
        Ok(record)
    }

    /// List all records, sorted by id.
    pub fn list_all(&self) -> Result<Vec<ScheduleRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(RECORDS).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    fn scan(
        &self,
        table: TableDefinition<'static, &'static [u8], &'static [u8]>,
        lower: &[u8],
        upper: Option<&[u8]>,
    ) -> Result<Vec<ScheduleRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(table).map_err(db_err)?;

        let range = match upper {
            Some(upper) => table.range(lower..upper),
            None => table.range(lower..),
        }
        .map_err(db_err)?;

        let mut result = Vec::new();
        for entry in range {
            let (_, v) = entry.map_err(db_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }
}

impl ScheduleIndex for ScheduleDb {
    fn planned_at(&self, start: DateTime<Utc>) -> Result<Vec<ScheduleRecord>> {
        let ms = time_key(&start);
        let lower = ms_prefix(ms);
        let upper = ms_prefix(ms.saturating_add(1));
        self.scan(BY_START, lower.as_slice(), Some(upper.as_slice()))
    }

    fn ending_from(&self, bound: DateTime<Utc>) -> Result<Vec<ScheduleRecord>> {
        let lower = ms_prefix(time_key(&bound));
        self.scan(BY_END, lower.as_slice(), None)
    }

    fn pre_announce(&self) -> Result<Vec<ScheduleRecord>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(ScheduleRecord::is_pre_announce)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
