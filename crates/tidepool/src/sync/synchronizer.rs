//! The synchronize round state machine.
//!
//! One round: check local delete → pull remote delta → (merge | delete |
//! apply remote records) → push local changes → advance the high-water
//! mark, with bounded retries back through the pull on version races.
//!
//! The round runs on a worker task under the dataset's round lock; every
//! outcome reaches the caller through `SyncCallback`, never as a returned
//! error. Remote-record application (step "apply") is durable even when the
//! subsequent push fails: the two phases are deliberately not atomic, and
//! the high-water mark is only advanced after its data has been applied
//! locally or confirmed by the server.

use std::sync::Arc;

use crate::dataset::Dataset;
use crate::error::{RemoteError, SyncError};
use crate::remote::device::device_id_key;
use crate::sync::callback::SyncCallback;
use crate::sync::conflict::{is_conflicting, SyncConflict};
use crate::types::PENDING_DELETE_SYNC_COUNT;

/// Default retry budget for version-conflict races.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Synchronization tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Retries after the initial attempt; a round makes at most
    /// `max_retries + 1` pull/push passes.
    pub max_retries: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Whether a pass ended the round or requeued it.
enum Pass {
    Done,
    Retry,
}

pub(crate) struct SyncRound {
    dataset: Dataset,
    callback: Arc<dyn SyncCallback>,
}

impl SyncRound {
    pub(crate) fn new(dataset: Dataset, callback: Arc<dyn SyncCallback>) -> Self {
        Self { dataset, callback }
    }

    /// Run the round to a terminal callback. Caller holds the round lock.
    pub(crate) async fn run(self, max_retries: u32) {
        let mut remaining = i64::from(max_retries);
        loop {
            if remaining < 0 {
                tracing::warn!(
                    dataset = %self.dataset.name(),
                    "synchronize retry budget exhausted"
                );
                self.callback.on_failure(SyncError::MaxRetriesExceeded);
                return;
            }
            match self.pass().await {
                Ok(Pass::Done) => return,
                Ok(Pass::Retry) => {
                    tracing::debug!(
                        dataset = %self.dataset.name(),
                        remaining,
                        "retrying synchronize round"
                    );
                    remaining -= 1;
                }
                Err(error) => {
                    self.callback.on_failure(error);
                    return;
                }
            }
        }
    }

    /// One pull/push pass (steps 2–7).
    async fn pass(&self) -> Result<Pass, SyncError> {
        let inner = &self.dataset.inner;
        let identity_id = inner.identity.identity_id().map_err(SyncError::Remote)?;
        let name = inner.dataset_name.as_str();
        let local = &inner.local;
        let remote = &inner.remote;

        // Local delete pending: propagate the deletion and drop local state.
        let last_sync_count = local.get_last_sync_count(&identity_id, name)?;
        if last_sync_count == PENDING_DELETE_SYNC_COUNT {
            match remote.delete_dataset(name).await {
                // A dataset the remote never saw still deletes cleanly.
                Ok(()) | Err(RemoteError::DatasetNotFound { .. }) => {}
                Err(e) => return Err(SyncError::Remote(e)),
            }
            local.purge_dataset(&identity_id, name)?;
            tracing::debug!(dataset = %name, "local deletion propagated");
            self.callback.on_success(&self.dataset, Vec::new());
            return Ok(Pass::Done);
        }

        // Pull the remote delta.
        let updates = remote
            .list_updates(name, last_sync_count)
            .await
            .map_err(SyncError::Remote)?;

        // Server-side dataset merges must be reconciled before anything else.
        if !updates.merged_dataset_names.is_empty() {
            tracing::debug!(
                dataset = %name,
                merged = updates.merged_dataset_names.len(),
                "remote reports merged datasets"
            );
            if !self
                .callback
                .on_datasets_merged(&self.dataset, &updates.merged_dataset_names)
            {
                return Err(SyncError::ManualCancel("datasets merged".to_string()));
            }
            return Ok(Pass::Retry);
        }

        // Deleted remotely, or vanished after we had synced it.
        if (!updates.exists && last_sync_count != 0) || updates.deleted {
            if !self.callback.on_dataset_deleted(&self.dataset, name) {
                return Err(SyncError::ManualCancel("dataset deleted".to_string()));
            }
            local.purge_dataset(&identity_id, name)?;
            self.callback.on_success(&self.dataset, Vec::new());
            return Ok(Pass::Done);
        }

        // Apply the remote delta, separating out true conflicts.
        if !updates.records.is_empty() {
            let mut conflicts = Vec::new();
            let mut to_apply = Vec::new();
            for remote_record in &updates.records {
                let local_record = local.get_record(&identity_id, name, &remote_record.key)?;
                match local_record {
                    Some(l) if is_conflicting(&l, remote_record) => {
                        conflicts.push(SyncConflict::new(remote_record.clone(), l));
                    }
                    _ => to_apply.push(remote_record.clone()),
                }
            }

            if !conflicts.is_empty() {
                tracing::debug!(
                    dataset = %name,
                    conflicts = conflicts.len(),
                    "sync conflicts detected"
                );
                if !self.callback.on_conflict(&self.dataset, &conflicts) {
                    // Nothing applied: conflicts block the whole delta.
                    return Err(SyncError::ManualCancel("unresolved conflicts".to_string()));
                }
                // The callback resolved and saved records via Dataset::resolve.
            }

            if !to_apply.is_empty() {
                local.put_records(&identity_id, name, &to_apply)?;
            }
            local.update_last_sync_count(&identity_id, name, updates.sync_count)?;
        }

        // Push local modifications, tombstones included.
        let pending = local.get_modified_records(&identity_id, name)?;
        if pending.is_empty() {
            self.callback.on_success(&self.dataset, updates.records);
            return Ok(Pass::Done);
        }

        let device_id = local.get_meta(&device_id_key(&identity_id))?;
        let confirmed = match remote
            .put_records(
                name,
                &pending,
                updates.sync_session_token.as_deref(),
                device_id.as_deref(),
            )
            .await
        {
            Ok(records) => records,
            Err(RemoteError::VersionConflict { .. }) => {
                // A mark ahead of what we pushed would starve the next pull
                // of the records that beat us; roll it back to the pushed
                // maximum before retrying.
                let max_pushed = pending.iter().map(|r| r.sync_count).max().unwrap_or(0);
                let current = local.get_last_sync_count(&identity_id, name)?;
                if current > max_pushed {
                    tracing::debug!(
                        dataset = %name,
                        from = current,
                        to = max_pushed,
                        "push race: rolling back high-water mark"
                    );
                    local.update_last_sync_count(&identity_id, name, max_pushed)?;
                }
                return Ok(Pass::Retry);
            }
            Err(e) => return Err(SyncError::Remote(e)),
        };

        // Only keys the server confirmed, and that no concurrent local
        // write touched meanwhile, become clean.
        local.conditionally_put_records(&identity_id, name, &confirmed, &pending)?;

        // Advance only on an exact +1; anything else means another writer
        // got in between and the next pull will correct the mark.
        let new_sync_count = confirmed.iter().map(|r| r.sync_count).max().unwrap_or(0);
        let current = local.get_last_sync_count(&identity_id, name)?;
        if new_sync_count == current + 1 {
            local.update_last_sync_count(&identity_id, name, new_sync_count)?;
        }

        tracing::debug!(
            dataset = %name,
            pushed = pending.len(),
            pulled = updates.records.len(),
            "synchronize round complete"
        );
        self.callback.on_success(&self.dataset, updates.records);
        Ok(Pass::Done)
    }
}
