//! Local store contract.
//!
//! `LocalStorage` is the durable per-identity, per-dataset key/value table
//! the synchronizer reads from and writes to. All methods are synchronous;
//! implementations must be cheap relative to the network calls that
//! punctuate a sync round.

use crate::error::StorageError;
use crate::types::{DatasetMetadata, Record};

/// Durable local record store, keyed by (identity id, dataset name, record
/// key) with one metadata row per (identity id, dataset name).
///
/// Implementors must be `Send + Sync`; the store is shared by every dataset
/// handle in the process and is the final arbiter of persisted state.
pub trait LocalStorage: Send + Sync {
    /// Ensure the metadata row for a dataset exists. Idempotent.
    fn create_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<(), StorageError>;

    /// Current live value for a key. `None` for missing keys and tombstones.
    fn get_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<String>, StorageError>;

    /// Write a value locally; `None` marks a tombstone. Sets `modified`,
    /// stamps both modification dates with the local clock, and preserves
    /// the record's `sync_count`. Writing the value a key already holds is
    /// a no-op (the record stays clean if it was clean).
    fn put_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Full record for a key, tombstones included.
    fn get_record(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<Record>, StorageError>;

    /// Every record in the dataset, tombstones included.
    fn get_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Vec<Record>, StorageError>;

    /// Records flagged `modified` (tombstones included): exactly the set a
    /// sync round pushes to the remote store.
    fn get_modified_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Vec<Record>, StorageError>;

    /// Bulk overwrite from a remote pull or conflict resolution. Each
    /// record is stored verbatim, including its `modified` flag: pulled
    /// remote records arrive clean, while records resolved in favor of
    /// local state stay modified so the next round pushes them.
    fn put_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
        records: &[Record],
    ) -> Result<(), StorageError>;

    /// Reconcile a push response. For each server-confirmed record, the
    /// stored row is marked clean and stamped with the confirmed
    /// `sync_count` only if it still matches the pushed snapshot in
    /// `local_snapshot` (same value and `device_last_modified_date`).
    /// Rows mutated while the push was in flight keep their local state
    /// and stay modified.
    fn conditionally_put_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
        records: &[Record],
        local_snapshot: &[Record],
    ) -> Result<(), StorageError>;

    /// Metadata for one dataset, with live-record aggregates computed from
    /// the records table.
    fn get_dataset_metadata(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Option<DatasetMetadata>, StorageError>;

    /// Metadata for every dataset of an identity.
    fn get_datasets(&self, identity_id: &str) -> Result<Vec<DatasetMetadata>, StorageError>;

    /// Overwrite the cached metadata rows from an authoritative remote
    /// list. `last_sync_count` values are preserved; record bodies are
    /// untouched.
    fn update_dataset_metadata(
        &self,
        identity_id: &str,
        metadata: &[DatasetMetadata],
    ) -> Result<(), StorageError>;

    /// High-water mark of the last fully incorporated remote version.
    /// Datasets that were never synced (or don't exist) report `0`.
    fn get_last_sync_count(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<i64, StorageError>;

    /// Set the high-water mark, creating the metadata row if needed.
    /// `PENDING_DELETE_SYNC_COUNT` (-1) marks the dataset locally deleted.
    fn update_last_sync_count(
        &self,
        identity_id: &str,
        dataset_name: &str,
        last_sync_count: i64,
    ) -> Result<(), StorageError>;

    /// Soft delete: marks the dataset deleted (`last_sync_count = -1`)
    /// while records persist so the deletion can propagate on the next
    /// round. Errors if the dataset has no local metadata row.
    fn delete_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<(), StorageError>;

    /// Hard delete: physically removes all records and metadata.
    fn purge_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<(), StorageError>;

    /// Re-namespace all rows of `old_identity_id` under `new_identity_id`
    /// (identity merge). A dataset whose name already exists under the new
    /// identity is renamed `"{name}.{old_identity_id}"` so the remote merge
    /// flow can reconcile both histories.
    fn change_identity_id(
        &self,
        old_identity_id: &str,
        new_identity_id: &str,
    ) -> Result<(), StorageError>;

    /// Remove all local state for all identities. Irreversible.
    fn wipe(&self) -> Result<(), StorageError>;

    /// Read a string metadata entry (device-id registration cache, etc.).
    fn get_meta(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a string metadata entry.
    fn set_meta(&self, key: &str, value: &str) -> Result<(), StorageError>;
}
