use thiserror::Error;

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid record key \"{key}\": {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("Invalid dataset name \"{name}\": {reason}")]
    InvalidDatasetName { name: String, reason: &'static str },

    #[error("Dataset not found locally: {dataset_name}")]
    DatasetNotFound { dataset_name: String },

    #[error("Shared storage not initialized. Call SqliteStorage::initialize_shared() first.")]
    NotInitialized,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// RemoteError — failures surfaced by the remote store collaborator
// ---------------------------------------------------------------------------

/// Errors a `RemoteStorage` implementation reports. The synchronizer branches
/// on the variant: `VersionConflict` triggers a bounded retry,
/// `DatasetNotFound` is tolerated during delete, `NotSubscribed` is tolerated
/// during unsubscribe.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Version conflict pushing to dataset \"{dataset_name}\"")]
    VersionConflict { dataset_name: String },

    #[error("Dataset not found remotely: {dataset_name}")]
    DatasetNotFound { dataset_name: String },

    #[error("No subscription exists for dataset \"{dataset_name}\"")]
    NotSubscribed { dataset_name: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote service error: {0}")]
    Service(String),
}

// ---------------------------------------------------------------------------
// SyncError — terminal failures of one synchronization round
// ---------------------------------------------------------------------------

/// Delivered exclusively through `SyncCallback::on_failure`; a synchronize
/// round never propagates an error across the worker boundary.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Network unavailable; synchronization not started")]
    NetworkUnavailable,

    #[error("Synchronization retry budget exhausted")]
    MaxRetriesExceeded,

    #[error("Synchronization cancelled by caller: {0}")]
    ManualCancel(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Unknown synchronization error: {0}")]
    Unknown(String),
}

// ---------------------------------------------------------------------------
// TidepoolError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TidepoolError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("No device registered for identity \"{0}\"")]
    DeviceNotRegistered(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias — the default error type is `TidepoolError`.
pub type Result<T, E = TidepoolError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
