use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// `last_sync_count` sentinel marking a dataset as locally deleted and
/// pending remote deletion on the next synchronize round.
pub const PENDING_DELETE_SYNC_COUNT: i64 = -1;

/// Maximum length, in characters, of record keys and dataset names.
pub const MAX_KEY_LEN: usize = 128;

/// A single versioned key/value cell within a dataset.
///
/// `value == None` is a tombstone: the record is logically deleted but is
/// retained locally (still carrying its `sync_count`) until a sync round
/// confirms the deletion propagated. Timestamps are unix milliseconds:
/// `last_modified_date` on the writer's clock (the server's, once synced),
/// `device_last_modified_date` always on the local clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: Option<String>,
    /// Server-assigned monotonic version; optimistic-concurrency token.
    pub sync_count: i64,
    pub last_modified_date: i64,
    pub last_modified_by: Option<String>,
    pub device_last_modified_date: i64,
    /// True if mutated locally since the last successful push.
    pub modified: bool,
}

impl Record {
    /// A record is logically deleted iff it has no value.
    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }

    /// UTF-8 encoded size of key plus value; tombstones count only the key.
    pub fn size_bytes(&self) -> u64 {
        let value_len = self.value.as_ref().map_or(0, |v| v.len());
        (self.key.len() + value_len) as u64
    }
}

/// Per-dataset bookkeeping row. `storage_size_bytes` and `record_count`
/// cover live (non-tombstone) records only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub dataset_name: String,
    pub creation_date: i64,
    pub last_modified_date: i64,
    pub last_modified_by: Option<String>,
    pub storage_size_bytes: u64,
    pub record_count: usize,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Record keys: non-empty, at most `MAX_KEY_LEN` characters.
pub fn validate_record_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "must not be empty",
        });
    }
    if key.chars().count() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "exceeds maximum length",
        });
    }
    Ok(())
}

/// Dataset names: 1–128 characters from `[A-Za-z0-9_.:-]`.
pub fn validate_dataset_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() {
        return Err(StorageError::InvalidDatasetName {
            name: name.to_string(),
            reason: "must not be empty",
        });
    }
    if name.chars().count() > MAX_KEY_LEN {
        return Err(StorageError::InvalidDatasetName {
            name: name.to_string(),
            reason: "exceeds maximum length",
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
    {
        return Err(StorageError::InvalidDatasetName {
            name: name.to_string(),
            reason: "contains characters outside [A-Za-z0-9_.:-]",
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Current unix time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
