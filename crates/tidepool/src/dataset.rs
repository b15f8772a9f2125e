//! Dataset handle — local mutation plus synchronization entry points.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::connectivity::ConnectivityMonitor;
use crate::error::{Result, SyncError, TidepoolError};
use crate::identity::IdentityProvider;
use crate::remote::RemoteStorage;
use crate::storage::LocalStorage;
use crate::sync::callback::SyncCallback;
use crate::sync::scheduler::ConnectivityGate;
use crate::sync::synchronizer::SyncRound;
use crate::types::{validate_record_key, DatasetMetadata, Record};

pub(crate) struct DatasetInner {
    pub(crate) dataset_name: String,
    pub(crate) local: Arc<dyn LocalStorage>,
    pub(crate) remote: Arc<dyn RemoteStorage>,
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) connectivity: Arc<dyn ConnectivityMonitor>,
    pub(crate) max_retries: u32,
    /// Serializes synchronize rounds for this dataset instance.
    pub(crate) round_lock: tokio::sync::Mutex<()>,
    pub(crate) gate: ConnectivityGate,
}

/// A named key/value dataset scoped to the current identity.
///
/// Handles are cheap to clone; clones share the same round lock and
/// deferred-sync slot. Local mutations (`put`, `remove`) are immediate and
/// only flag records for the next push; nothing touches the network until
/// `synchronize`.
#[derive(Clone)]
pub struct Dataset {
    pub(crate) inner: Arc<DatasetInner>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("dataset_name", &self.inner.dataset_name)
            .finish_non_exhaustive()
    }
}

impl Dataset {
    pub(crate) fn new(
        dataset_name: String,
        local: Arc<dyn LocalStorage>,
        remote: Arc<dyn RemoteStorage>,
        identity: Arc<dyn IdentityProvider>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        max_retries: u32,
    ) -> Self {
        Self {
            inner: Arc::new(DatasetInner {
                dataset_name,
                local,
                remote,
                identity,
                connectivity,
                max_retries,
                round_lock: tokio::sync::Mutex::new(()),
                gate: ConnectivityGate::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<DatasetInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.dataset_name
    }

    fn identity_id(&self) -> Result<String> {
        self.inner
            .identity
            .identity_id()
            .map_err(TidepoolError::Remote)
    }

    // -----------------------------------------------------------------------
    // Local reads
    // -----------------------------------------------------------------------

    /// Live value for a key; `None` for missing keys and tombstones.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        validate_record_key(key)?;
        let identity_id = self.identity_id()?;
        Ok(self
            .inner
            .local
            .get_value(&identity_id, self.name(), key)?)
    }

    /// Full record for a key, tombstones included.
    pub fn get_record(&self, key: &str) -> Result<Option<Record>> {
        validate_record_key(key)?;
        let identity_id = self.identity_id()?;
        Ok(self
            .inner
            .local
            .get_record(&identity_id, self.name(), key)?)
    }

    /// Every record in the dataset, tombstones included.
    pub fn get_all_records(&self) -> Result<Vec<Record>> {
        let identity_id = self.identity_id()?;
        Ok(self.inner.local.get_records(&identity_id, self.name())?)
    }

    /// All live key/value pairs.
    pub fn get_all(&self) -> Result<HashMap<String, String>> {
        let records = self.get_all_records()?;
        Ok(records
            .into_iter()
            .filter_map(|r| r.value.map(|v| (r.key, v)))
            .collect())
    }

    /// Cached metadata with live-record aggregates.
    pub fn metadata(&self) -> Result<Option<DatasetMetadata>> {
        let identity_id = self.identity_id()?;
        Ok(self
            .inner
            .local
            .get_dataset_metadata(&identity_id, self.name())?)
    }

    /// The high-water mark of the last completed pull (`-1` when the
    /// dataset is locally deleted pending remote propagation).
    pub fn last_sync_count(&self) -> Result<i64> {
        let identity_id = self.identity_id()?;
        Ok(self
            .inner
            .local
            .get_last_sync_count(&identity_id, self.name())?)
    }

    // -----------------------------------------------------------------------
    // Local writes
    // -----------------------------------------------------------------------

    /// Set a value, flagging the record for the next push.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_record_key(key)?;
        let identity_id = self.identity_id()?;
        Ok(self
            .inner
            .local
            .put_value(&identity_id, self.name(), key, Some(value))?)
    }

    /// Tombstone a key; the deletion propagates on the next push.
    pub fn remove(&self, key: &str) -> Result<()> {
        validate_record_key(key)?;
        let identity_id = self.identity_id()?;
        Ok(self
            .inner
            .local
            .put_value(&identity_id, self.name(), key, None)?)
    }

    /// Mark the whole dataset deleted locally. Records persist until the
    /// next synchronize round propagates the deletion remotely.
    pub fn delete(&self) -> Result<()> {
        let identity_id = self.identity_id()?;
        Ok(self
            .inner
            .local
            .delete_dataset(&identity_id, self.name())?)
    }

    /// Save conflict resolutions produced by the `on_conflict` callback.
    /// Records are stored verbatim: resolutions favoring the remote side
    /// arrive clean, those keeping local state stay modified.
    pub fn resolve(&self, resolved: &[Record]) -> Result<()> {
        let identity_id = self.identity_id()?;
        Ok(self
            .inner
            .local
            .put_records(&identity_id, self.name(), resolved)?)
    }

    // -----------------------------------------------------------------------
    // Synchronization
    // -----------------------------------------------------------------------

    /// Run one synchronize round on a worker task and return immediately.
    ///
    /// All outcomes reach `callback`; the task never propagates an error.
    /// Concurrent calls on the same dataset serialize on the round lock.
    /// Must be called within a tokio runtime.
    pub fn synchronize(&self, callback: Arc<dyn SyncCallback>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let dataset = Dataset::from_inner(Arc::clone(&inner));
            if !inner.connectivity.is_connected() {
                tracing::debug!(
                    dataset = %inner.dataset_name,
                    "synchronize refused: network unavailable"
                );
                callback.on_failure(SyncError::NetworkUnavailable);
                return;
            }
            let _round = inner.round_lock.lock().await;
            SyncRound::new(dataset, callback).run(inner.max_retries).await;
        })
    }

    /// Synchronize now if connected, otherwise defer until connectivity
    /// returns. The deferred request holds only weak references, so
    /// dropping the dataset or callback silently cancels it; a newer
    /// request for this dataset supersedes a pending one.
    pub fn synchronize_on_connectivity(&self, callback: Arc<dyn SyncCallback>) {
        if self.inner.connectivity.is_connected() {
            let _ = self.synchronize(callback);
            return;
        }
        tracing::debug!(
            dataset = %self.inner.dataset_name,
            "offline: deferring synchronize until connectivity returns"
        );
        ConnectivityGate::defer(&self.inner, callback);
    }
}
