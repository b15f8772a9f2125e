//! SQLite local store.
//!
//! Implements `LocalStorage` using rusqlite (bundled). The connection is
//! protected by a `parking_lot::ReentrantMutex<RefCell<Connection>>` so that
//! multi-statement operations can hold the lock while individual helpers
//! re-acquire it to execute SQL.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use parking_lot::ReentrantMutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::types::{now_millis, DatasetMetadata, Record, PENDING_DELETE_SYNC_COUNT};

use super::traits::LocalStorage;

const RECORD_COLS: &str = "key, value, sync_count, last_modified_date, \
     last_modified_by, device_last_modified_date, modified";

// ============================================================================
// SqliteStorage
// ============================================================================

/// SQLite-backed local store.
///
/// `ReentrantMutex` lets compound operations (read-compare-write in
/// `put_value`, the per-record loop in `conditionally_put_records`) hold the
/// guard across their statements on the single shared connection.
pub struct SqliteStorage {
    conn: ReentrantMutex<RefCell<Connection>>,
}

static SHARED: OnceLock<Arc<SqliteStorage>> = OnceLock::new();

impl SqliteStorage {
    /// Open a file-backed store, creating the schema if needed.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::setup(&conn)?;
        Ok(Self {
            conn: ReentrantMutex::new(RefCell::new(conn)),
        })
    }

    /// Open an in-memory store (useful for tests).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::setup(&conn)?;
        Ok(Self {
            conn: ReentrantMutex::new(RefCell::new(conn)),
        })
    }

    /// Open (or return) the process-wide shared store. The first caller's
    /// path wins; later calls return the existing handle.
    pub fn initialize_shared(path: &str) -> Result<Arc<Self>, StorageError> {
        if let Some(existing) = SHARED.get() {
            return Ok(Arc::clone(existing));
        }
        let storage = Arc::new(Self::open(path)?);
        Ok(Arc::clone(SHARED.get_or_init(|| storage)))
    }

    /// The process-wide shared store, if `initialize_shared` has run.
    pub fn shared() -> Result<Arc<Self>, StorageError> {
        SHARED.get().cloned().ok_or(StorageError::NotInitialized)
    }

    fn setup(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                identity_id               TEXT NOT NULL,
                dataset_name              TEXT NOT NULL,
                key                       TEXT NOT NULL,
                value                     TEXT,
                sync_count                INTEGER NOT NULL DEFAULT 0,
                last_modified_date        INTEGER NOT NULL DEFAULT 0,
                last_modified_by          TEXT,
                device_last_modified_date INTEGER NOT NULL DEFAULT 0,
                modified                  INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (identity_id, dataset_name, key)
            );
            CREATE INDEX IF NOT EXISTS idx_records_modified
                ON records(identity_id, dataset_name, modified);
            CREATE TABLE IF NOT EXISTS datasets (
                identity_id        TEXT NOT NULL,
                dataset_name       TEXT NOT NULL,
                creation_date      INTEGER NOT NULL DEFAULT 0,
                last_modified_date INTEGER NOT NULL DEFAULT 0,
                last_modified_by   TEXT,
                last_sync_count    INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (identity_id, dataset_name)
            );
            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Execute `f` with a shared reference to the underlying connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        f(&conn).map_err(StorageError::from)
    }

    /// Parse a single rusqlite row into a `Record`.
    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let modified: i64 = row.get(6)?;
        Ok(Record {
            key: row.get(0)?,
            value: row.get(1)?,
            sync_count: row.get(2)?,
            last_modified_date: row.get(3)?,
            last_modified_by: row.get(4)?,
            device_last_modified_date: row.get(5)?,
            modified: modified != 0,
        })
    }

    /// Create the metadata row if absent (used by write paths so a dataset
    /// exists as soon as it is written to).
    fn ensure_dataset(
        conn: &Connection,
        identity_id: &str,
        dataset_name: &str,
        now: i64,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO datasets \
             (identity_id, dataset_name, creation_date, last_modified_date) \
             VALUES (?1, ?2, ?3, ?3)",
            params![identity_id, dataset_name, now],
        )?;
        Ok(())
    }

    /// Write one record verbatim (insert or full overwrite).
    fn execute_put_record(
        conn: &Connection,
        identity_id: &str,
        dataset_name: &str,
        record: &Record,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO records \
             (identity_id, dataset_name, key, value, sync_count, \
              last_modified_date, last_modified_by, device_last_modified_date, \
              modified) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                identity_id,
                dataset_name,
                record.key,
                record.value,
                record.sync_count,
                record.last_modified_date,
                record.last_modified_by,
                record.device_last_modified_date,
                record.modified as i64,
            ],
        )?;
        Ok(())
    }

    /// Live-record aggregates for one dataset.
    fn dataset_aggregates(
        conn: &Connection,
        identity_id: &str,
        dataset_name: &str,
    ) -> rusqlite::Result<(usize, u64)> {
        conn.query_row(
            "SELECT COUNT(*), \
             COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) \
             FROM records \
             WHERE identity_id = ?1 AND dataset_name = ?2 AND value IS NOT NULL",
            params![identity_id, dataset_name],
            |row| {
                let count: i64 = row.get(0)?;
                let size: i64 = row.get(1)?;
                Ok((count as usize, size as u64))
            },
        )
    }

    fn read_metadata(
        conn: &Connection,
        identity_id: &str,
        dataset_name: &str,
    ) -> rusqlite::Result<Option<DatasetMetadata>> {
        let head = conn
            .prepare_cached(
                "SELECT creation_date, last_modified_date, last_modified_by \
                 FROM datasets WHERE identity_id = ?1 AND dataset_name = ?2",
            )?
            .query_row(params![identity_id, dataset_name], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .optional()?;

        let Some((creation_date, last_modified_date, last_modified_by)) = head else {
            return Ok(None);
        };
        let (record_count, storage_size_bytes) =
            Self::dataset_aggregates(conn, identity_id, dataset_name)?;
        Ok(Some(DatasetMetadata {
            dataset_name: dataset_name.to_string(),
            creation_date,
            last_modified_date,
            last_modified_by,
            storage_size_bytes,
            record_count,
        }))
    }
}

// ============================================================================
// LocalStorage implementation
// ============================================================================

impl LocalStorage for SqliteStorage {
    fn create_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<(), StorageError> {
        let now = now_millis();
        self.with_conn(|conn| Self::ensure_dataset(conn, identity_id, dataset_name, now))
    }

    fn get_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<String>, StorageError> {
        // Flatten: missing row and tombstone both read as None.
        self.with_conn(|conn| {
            conn.prepare_cached(
                "SELECT value FROM records \
                 WHERE identity_id = ?1 AND dataset_name = ?2 AND key = ?3",
            )?
            .query_row(params![identity_id, dataset_name, key], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()
            .map(Option::flatten)
        })
    }

    fn put_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), StorageError> {
        let now = now_millis();
        let guard = self.conn.lock();
        let conn = guard.borrow();

        let existing: Option<Option<String>> = conn
            .prepare_cached(
                "SELECT value FROM records \
                 WHERE identity_id = ?1 AND dataset_name = ?2 AND key = ?3",
            )?
            .query_row(params![identity_id, dataset_name, key], |row| row.get(0))
            .optional()?;

        match &existing {
            // Unchanged value: leave the record (and its modified flag) alone.
            Some(stored) if stored.as_deref() == value => return Ok(()),
            // Removing a key that was never stored: nothing to tombstone.
            None if value.is_none() => return Ok(()),
            _ => {}
        }

        Self::ensure_dataset(&conn, identity_id, dataset_name, now)?;
        conn.execute(
            "INSERT INTO records \
             (identity_id, dataset_name, key, value, sync_count, \
              last_modified_date, device_last_modified_date, modified) \
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5, 1) \
             ON CONFLICT (identity_id, dataset_name, key) DO UPDATE SET \
                value = excluded.value, \
                last_modified_date = excluded.last_modified_date, \
                device_last_modified_date = excluded.device_last_modified_date, \
                modified = 1",
            params![identity_id, dataset_name, key, value, now],
        )?;
        conn.execute(
            "UPDATE datasets SET last_modified_date = ?1 \
             WHERE identity_id = ?2 AND dataset_name = ?3",
            params![now, identity_id, dataset_name],
        )?;
        Ok(())
    }

    fn get_record(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<Record>, StorageError> {
        self.with_conn(|conn| {
            conn.prepare_cached(&format!(
                "SELECT {RECORD_COLS} FROM records \
                 WHERE identity_id = ?1 AND dataset_name = ?2 AND key = ?3"
            ))?
            .query_row(params![identity_id, dataset_name, key], Self::row_to_record)
            .optional()
        })
    }

    fn get_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Vec<Record>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {RECORD_COLS} FROM records \
                 WHERE identity_id = ?1 AND dataset_name = ?2"
            ))?;
            let rows = stmt.query_map(params![identity_id, dataset_name], Self::row_to_record)?;
            rows.collect()
        })
    }

    fn get_modified_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Vec<Record>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {RECORD_COLS} FROM records \
                 WHERE identity_id = ?1 AND dataset_name = ?2 AND modified = 1"
            ))?;
            let rows = stmt.query_map(params![identity_id, dataset_name], Self::row_to_record)?;
            rows.collect()
        })
    }

    fn put_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
        records: &[Record],
    ) -> Result<(), StorageError> {
        let now = now_millis();
        let guard = self.conn.lock();
        let mut conn = guard.borrow_mut();
        let tx = conn.transaction()?;

        Self::ensure_dataset(&tx, identity_id, dataset_name, now)?;
        for record in records {
            Self::execute_put_record(&tx, identity_id, dataset_name, record)?;
        }
        tx.commit().map_err(StorageError::from)
    }

    fn conditionally_put_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
        records: &[Record],
        local_snapshot: &[Record],
    ) -> Result<(), StorageError> {
        let snapshot: HashMap<&str, &Record> = local_snapshot
            .iter()
            .map(|r| (r.key.as_str(), r))
            .collect();

        let guard = self.conn.lock();
        let mut conn = guard.borrow_mut();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE records SET \
                    sync_count = ?1, \
                    last_modified_date = ?2, \
                    last_modified_by = ?3, \
                    modified = 0 \
                 WHERE identity_id = ?4 AND dataset_name = ?5 AND key = ?6 \
                   AND value IS ?7 AND device_last_modified_date = ?8",
            )?;
            for confirmed in records {
                // Keys the server did not confirm are left modified.
                let Some(pushed) = snapshot.get(confirmed.key.as_str()) else {
                    continue;
                };
                stmt.execute(params![
                    confirmed.sync_count,
                    confirmed.last_modified_date,
                    confirmed.last_modified_by,
                    identity_id,
                    dataset_name,
                    confirmed.key,
                    pushed.value,
                    pushed.device_last_modified_date,
                ])?;
            }
        }
        tx.commit().map_err(StorageError::from)
    }

    fn get_dataset_metadata(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Option<DatasetMetadata>, StorageError> {
        self.with_conn(|conn| Self::read_metadata(conn, identity_id, dataset_name))
    }

    fn get_datasets(&self, identity_id: &str) -> Result<Vec<DatasetMetadata>, StorageError> {
        let guard = self.conn.lock();
        let conn = guard.borrow();

        let names: Vec<String> = {
            let mut stmt = conn.prepare_cached(
                "SELECT dataset_name FROM datasets WHERE identity_id = ?1 ORDER BY dataset_name",
            )?;
            let rows = stmt.query_map(params![identity_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut out = Vec::with_capacity(names.len());
        for name in &names {
            if let Some(metadata) = Self::read_metadata(&conn, identity_id, name)? {
                out.push(metadata);
            }
        }
        Ok(out)
    }

    fn update_dataset_metadata(
        &self,
        identity_id: &str,
        metadata: &[DatasetMetadata],
    ) -> Result<(), StorageError> {
        let guard = self.conn.lock();
        let mut conn = guard.borrow_mut();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO datasets \
                 (identity_id, dataset_name, creation_date, last_modified_date, \
                  last_modified_by, last_sync_count) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 0) \
                 ON CONFLICT (identity_id, dataset_name) DO UPDATE SET \
                    creation_date = excluded.creation_date, \
                    last_modified_date = excluded.last_modified_date, \
                    last_modified_by = excluded.last_modified_by",
            )?;
            for m in metadata {
                stmt.execute(params![
                    identity_id,
                    m.dataset_name,
                    m.creation_date,
                    m.last_modified_date,
                    m.last_modified_by,
                ])?;
            }
        }
        tx.commit().map_err(StorageError::from)
    }

    fn get_last_sync_count(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<i64, StorageError> {
        self.with_conn(|conn| {
            conn.prepare_cached(
                "SELECT last_sync_count FROM datasets \
                 WHERE identity_id = ?1 AND dataset_name = ?2",
            )?
            .query_row(params![identity_id, dataset_name], |row| row.get(0))
            .optional()
            .map(|count| count.unwrap_or(0))
        })
    }

    fn update_last_sync_count(
        &self,
        identity_id: &str,
        dataset_name: &str,
        last_sync_count: i64,
    ) -> Result<(), StorageError> {
        let now = now_millis();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO datasets \
                 (identity_id, dataset_name, creation_date, last_modified_date, last_sync_count) \
                 VALUES (?1, ?2, ?3, ?3, ?4) \
                 ON CONFLICT (identity_id, dataset_name) DO UPDATE SET \
                    last_sync_count = excluded.last_sync_count",
                params![identity_id, dataset_name, now, last_sync_count],
            )
            .map(|_| ())
        })
    }

    fn delete_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<(), StorageError> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let updated = conn.execute(
            "UPDATE datasets SET last_sync_count = ?1 \
             WHERE identity_id = ?2 AND dataset_name = ?3",
            params![PENDING_DELETE_SYNC_COUNT, identity_id, dataset_name],
        )?;
        if updated == 0 {
            return Err(StorageError::DatasetNotFound {
                dataset_name: dataset_name.to_string(),
            });
        }
        Ok(())
    }

    fn purge_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM records WHERE identity_id = ?1 AND dataset_name = ?2",
                params![identity_id, dataset_name],
            )?;
            conn.execute(
                "DELETE FROM datasets WHERE identity_id = ?1 AND dataset_name = ?2",
                params![identity_id, dataset_name],
            )?;
            Ok(())
        })
    }

    fn change_identity_id(
        &self,
        old_identity_id: &str,
        new_identity_id: &str,
    ) -> Result<(), StorageError> {
        let guard = self.conn.lock();
        let mut conn = guard.borrow_mut();
        let tx = conn.transaction()?;

        let old_names: Vec<String> = {
            let mut stmt = tx.prepare_cached(
                "SELECT dataset_name FROM datasets WHERE identity_id = ?1",
            )?;
            let rows = stmt.query_map(params![old_identity_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        let taken: HashSet<String> = {
            let mut stmt = tx.prepare_cached(
                "SELECT dataset_name FROM datasets WHERE identity_id = ?1",
            )?;
            let rows = stmt.query_map(params![new_identity_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        for name in &old_names {
            // Collisions keep both histories: the old identity's dataset is
            // renamed "{name}.{old_id}" for the remote merge flow to pick up.
            let target = if taken.contains(name) {
                format!("{name}.{old_identity_id}")
            } else {
                name.clone()
            };
            tx.execute(
                "UPDATE datasets SET identity_id = ?1, dataset_name = ?2 \
                 WHERE identity_id = ?3 AND dataset_name = ?4",
                params![new_identity_id, target, old_identity_id, name],
            )?;
            tx.execute(
                "UPDATE records SET identity_id = ?1, dataset_name = ?2 \
                 WHERE identity_id = ?3 AND dataset_name = ?4",
                params![new_identity_id, target, old_identity_id, name],
            )?;
        }
        tx.commit().map_err(StorageError::from)
    }

    fn wipe(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "DELETE FROM records;
                 DELETE FROM datasets;
                 DELETE FROM meta;",
            )
        })
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_conn(|conn| {
            conn.prepare_cached("SELECT value FROM meta WHERE key = ?1")?
                .query_row(params![key], |row| row.get(0))
                .optional()
        })
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map(|_| ())
        })
    }
}
