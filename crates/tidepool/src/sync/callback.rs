//! Synchronization callback bundle.

use crate::dataset::Dataset;
use crate::error::SyncError;
use crate::sync::conflict::SyncConflict;
use crate::types::Record;

/// Continuations for one synchronize round. Exactly one terminal callback
/// (`on_success` or `on_failure`) fires per round; the three interrogative
/// callbacks may fire before it and steer the round with their return value.
///
/// Callbacks run on the round's worker task, never on the caller's thread.
pub trait SyncCallback: Send + Sync {
    /// The round completed. `updated_records` is the remote delta that was
    /// pulled (empty when the round only pushed or only deleted).
    fn on_success(&self, dataset: &Dataset, updated_records: Vec<Record>);

    /// Diverged records need resolution. Resolve and save them through
    /// `Dataset::resolve` before returning `true` to continue the round;
    /// return `false` to cancel it (nothing is applied).
    fn on_conflict(&self, dataset: &Dataset, conflicts: &[SyncConflict]) -> bool;

    /// The dataset was deleted remotely (or no longer exists). Return
    /// `true` to drop local state and finish, `false` to cancel.
    fn on_dataset_deleted(&self, dataset: &Dataset, dataset_name: &str) -> bool;

    /// Other datasets were merged into this one after identity linking.
    /// Return `true` to re-pull and continue, `false` to cancel.
    fn on_datasets_merged(&self, dataset: &Dataset, dataset_names: &[String]) -> bool;

    /// The round failed; see `SyncError` for the taxonomy.
    fn on_failure(&self, error: SyncError);
}
