//! Conflict detection and resolution.
//!
//! Pure functions over (local, remote) record pairs. Resolutions build a new
//! `Record` with the `modified` flag set for the synchronizer: adopting the
//! remote side yields a clean record, keeping local state yields a record
//! that still needs pushing.

use crate::types::{now_millis, Record};

/// A diverged (remote, local) pair sharing one key.
#[derive(Debug, Clone)]
pub struct SyncConflict {
    pub remote_record: Record,
    pub local_record: Record,
}

/// True-conflict rule: the local copy was mutated since its last push, the
/// versions differ, and the values actually disagree. Identical values with
/// differing versions are not a conflict — either side can be adopted.
pub fn is_conflicting(local: &Record, remote: &Record) -> bool {
    local.modified && local.sync_count != remote.sync_count && local.value != remote.value
}

impl SyncConflict {
    /// Both records must share a key.
    pub fn new(remote_record: Record, local_record: Record) -> Self {
        debug_assert_eq!(remote_record.key, local_record.key);
        Self {
            remote_record,
            local_record,
        }
    }

    pub fn key(&self) -> &str {
        &self.remote_record.key
    }

    /// Adopt the remote value and version. The result is clean: the remote
    /// side is authoritative, nothing remains to push.
    pub fn resolve_with_remote(&self) -> Record {
        Record {
            modified: false,
            ..self.remote_record.clone()
        }
    }

    /// Keep the local value but inherit the remote `sync_count` so the next
    /// push carries a version the server accepts. Still modified.
    pub fn resolve_with_local(&self) -> Record {
        Record {
            sync_count: self.remote_record.sync_count,
            modified: true,
            ..self.local_record.clone()
        }
    }

    /// Caller-supplied merge result (`None` deletes the key). Inherits the
    /// remote `sync_count`, stamps both dates with the local clock, and
    /// stays modified.
    pub fn resolve_with_value(&self, value: Option<String>) -> Record {
        let now = now_millis();
        Record {
            key: self.local_record.key.clone(),
            value,
            sync_count: self.remote_record.sync_count,
            last_modified_date: now,
            last_modified_by: self.local_record.last_modified_by.clone(),
            device_last_modified_date: now,
            modified: true,
        }
    }

    /// Later `last_modified_date` wins; an exact tie resolves to the remote
    /// side, keeping the default deterministic across devices.
    pub fn resolve_with_last_writer(&self) -> Record {
        if self.local_record.last_modified_date > self.remote_record.last_modified_date {
            self.resolve_with_local()
        } else {
            self.resolve_with_remote()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
