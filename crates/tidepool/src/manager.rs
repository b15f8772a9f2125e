//! Dataset registry and lifecycle orchestration.

use std::sync::Arc;

use crate::connectivity::ConnectivityMonitor;
use crate::dataset::Dataset;
use crate::error::{RemoteError, Result, TidepoolError};
use crate::identity::IdentityProvider;
use crate::remote::device::{device_id_key, device_platform_key, DeviceRegistry};
use crate::remote::{PushSyncUpdate, RemoteStorage};
use crate::storage::LocalStorage;
use crate::sync::synchronizer::SyncOptions;
use crate::types::{validate_dataset_name, DatasetMetadata};

/// Collaborators and tuning for a `DatasetManager`.
pub struct DatasetManagerOptions {
    pub local: Arc<dyn LocalStorage>,
    pub remote: Arc<dyn RemoteStorage>,
    pub identity: Arc<dyn IdentityProvider>,
    pub connectivity: Arc<dyn ConnectivityMonitor>,
    pub device_registry: Arc<dyn DeviceRegistry>,
    pub sync: SyncOptions,
}

/// Maps the current identity to its datasets and orchestrates metadata
/// refresh, device registration, push subscriptions, and identity merges.
pub struct DatasetManager {
    local: Arc<dyn LocalStorage>,
    remote: Arc<dyn RemoteStorage>,
    identity: Arc<dyn IdentityProvider>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    device_registry: Arc<dyn DeviceRegistry>,
    sync: SyncOptions,
}

impl DatasetManager {
    /// Build the manager and hook it to the credential layer's
    /// identity-change notifications. The hook holds the manager weakly,
    /// so dropping the manager detaches it.
    pub fn new(options: DatasetManagerOptions) -> Arc<Self> {
        let manager = Arc::new(Self {
            local: options.local,
            remote: options.remote,
            identity: options.identity,
            connectivity: options.connectivity,
            device_registry: options.device_registry,
            sync: options.sync,
        });

        let weak = Arc::downgrade(&manager);
        manager
            .identity
            .on_identity_change(Arc::new(move |old_id, new_id| {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_identity_change(old_id, new_id);
                }
            }));
        manager
    }

    fn identity_id(&self) -> Result<String> {
        self.identity.identity_id().map_err(TidepoolError::Remote)
    }

    /// Open a dataset handle, creating the local metadata row if absent.
    pub fn open_or_create_dataset(&self, dataset_name: &str) -> Result<Dataset> {
        validate_dataset_name(dataset_name)?;
        let identity_id = self.identity_id()?;
        self.local.create_dataset(&identity_id, dataset_name)?;
        Ok(Dataset::new(
            dataset_name.to_string(),
            Arc::clone(&self.local),
            Arc::clone(&self.remote),
            Arc::clone(&self.identity),
            Arc::clone(&self.connectivity),
            self.sync.max_retries,
        ))
    }

    /// Cached local metadata; never contacts the remote store.
    pub fn list_datasets(&self) -> Result<Vec<DatasetMetadata>> {
        let identity_id = self.identity_id()?;
        Ok(self.local.get_datasets(&identity_id)?)
    }

    /// Pull the authoritative dataset list and overwrite the local metadata
    /// cache (record bodies and sync marks are untouched).
    pub async fn refresh_dataset_metadata(&self) -> Result<Vec<DatasetMetadata>> {
        let identity_id = self.identity_id()?;
        let metadata = self
            .remote
            .get_datasets()
            .await
            .map_err(TidepoolError::Remote)?;
        self.local.update_dataset_metadata(&identity_id, &metadata)?;
        Ok(metadata)
    }

    /// Register this device for push notifications, caching the assigned id
    /// per identity + platform. Subsequent calls for the same pair return
    /// the cached id; the latest registration becomes the identity's
    /// current device.
    pub async fn register_device(&self, platform: &str, push_token: &str) -> Result<String> {
        let identity_id = self.identity_id()?;
        let cache_key = device_platform_key(&identity_id, platform);
        if let Some(cached) = self.local.get_meta(&cache_key)? {
            self.local.set_meta(&device_id_key(&identity_id), &cached)?;
            return Ok(cached);
        }
        let device_id = self
            .device_registry
            .register_device(platform, push_token)
            .await
            .map_err(TidepoolError::Remote)?;
        self.local.set_meta(&cache_key, &device_id)?;
        self.local.set_meta(&device_id_key(&identity_id), &device_id)?;
        tracing::debug!(%platform, "registered device for push notifications");
        Ok(device_id)
    }

    fn registered_device_id(&self, identity_id: &str) -> Result<String> {
        self.local
            .get_meta(&device_id_key(identity_id))?
            .ok_or_else(|| TidepoolError::DeviceNotRegistered(identity_id.to_string()))
    }

    /// Subscribe the registered device to push notifications for each
    /// named dataset.
    pub async fn subscribe(&self, dataset_names: &[&str]) -> Result<()> {
        let identity_id = self.identity_id()?;
        let device_id = self.registered_device_id(&identity_id)?;
        for name in dataset_names {
            self.remote
                .subscribe_to_dataset(name, &device_id)
                .await
                .map_err(TidepoolError::Remote)?;
        }
        Ok(())
    }

    /// Unsubscribe the registered device from each named dataset. Missing
    /// subscriptions are tolerated silently; other errors re-raise.
    pub async fn unsubscribe(&self, dataset_names: &[&str]) -> Result<()> {
        let identity_id = self.identity_id()?;
        let device_id = self.registered_device_id(&identity_id)?;
        for name in dataset_names {
            match self.remote.unsubscribe_from_dataset(name, &device_id).await {
                Ok(()) => {}
                Err(RemoteError::NotSubscribed { .. }) => {
                    tracing::debug!(dataset = %name, "unsubscribe: no subscription, ignoring");
                }
                Err(e) => return Err(TidepoolError::Remote(e)),
            }
        }
        Ok(())
    }

    /// Open a dataset handle for an inbound push payload, if it targets the
    /// current identity.
    pub fn open_dataset_for_update(&self, update: &PushSyncUpdate) -> Result<Option<Dataset>> {
        let identity_id = self.identity_id()?;
        if update.identity_id != identity_id {
            return Ok(None);
        }
        self.open_or_create_dataset(&update.dataset_name).map(Some)
    }

    /// Clear cached credentials and all local storage for all identities.
    /// Irreversible.
    pub fn wipe_data(&self) -> Result<()> {
        self.identity.clear_credentials();
        self.local.wipe()?;
        tracing::warn!("wiped all local sync data");
        Ok(())
    }

    /// Re-namespace local state after an identity change (identity merge).
    pub fn handle_identity_change(&self, old_identity_id: &str, new_identity_id: &str) {
        tracing::debug!(
            old = %old_identity_id,
            new = %new_identity_id,
            "identity changed, re-namespacing local datasets"
        );
        if let Err(e) = self
            .local
            .change_identity_id(old_identity_id, new_identity_id)
        {
            tracing::warn!(error = %e, "failed to re-namespace datasets after identity change");
        }
    }
}
