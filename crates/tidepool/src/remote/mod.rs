//! Remote store collaborator interface.
//!
//! The engine never talks to a wire protocol directly; it consumes a
//! versioned key/value service through `RemoteStorage`. Implementations
//! handle transport, auth, and marshalling.

pub mod device;
pub mod push;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::types::{DatasetMetadata, Record};

pub use device::DeviceRegistry;
pub use push::PushSyncUpdate;

/// One pull's worth of remote state for a dataset.
#[derive(Debug, Clone)]
pub struct DatasetUpdates {
    pub dataset_name: String,
    /// Records changed since the requested version.
    pub records: Vec<Record>,
    /// The dataset's current version on the server.
    pub sync_count: i64,
    /// Opaque token the server may hand out for the follow-up push.
    pub sync_session_token: Option<String>,
    /// False when the dataset has never existed remotely.
    pub exists: bool,
    /// True when the dataset was deleted remotely.
    pub deleted: bool,
    /// Datasets the server merged into this one (identity linking); the
    /// names are obsolete locally once reconciled.
    pub merged_dataset_names: Vec<String>,
}

/// Remote versioned key/value sync service.
///
/// Push is conditional: the server rejects a batch whose versions are stale
/// with `RemoteError::VersionConflict`, which the synchronizer turns into a
/// bounded full-round retry.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// List records changed since `since_sync_count`, plus the dataset's
    /// current version and existence/deletion/merge flags.
    async fn list_updates(
        &self,
        dataset_name: &str,
        since_sync_count: i64,
    ) -> Result<DatasetUpdates, RemoteError>;

    /// Conditionally write a batch of records. Returns the stored records
    /// with their server-assigned `sync_count`s.
    async fn put_records(
        &self,
        dataset_name: &str,
        records: &[Record],
        sync_session_token: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<Vec<Record>, RemoteError>;

    /// Delete a dataset remotely. `RemoteError::DatasetNotFound` must be
    /// treated as tolerable by callers propagating a local deletion.
    async fn delete_dataset(&self, dataset_name: &str) -> Result<(), RemoteError>;

    /// Authoritative list of the identity's datasets (metadata only).
    async fn get_datasets(&self) -> Result<Vec<DatasetMetadata>, RemoteError>;

    /// Register a device for push notifications on a dataset.
    async fn subscribe_to_dataset(
        &self,
        dataset_name: &str,
        device_id: &str,
    ) -> Result<(), RemoteError>;

    /// Deregister a device. Servers report `RemoteError::NotSubscribed`
    /// when no subscription exists; callers tolerate that silently.
    async fn unsubscribe_from_dataset(
        &self,
        dataset_name: &str,
        device_id: &str,
    ) -> Result<(), RemoteError>;
}
