//! Connectivity-gated synchronize tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tidepool::connectivity::ManualConnectivityMonitor;
use tidepool::dataset::Dataset;
use tidepool::error::{RemoteError, SyncError};
use tidepool::identity::StaticIdentityProvider;
use tidepool::manager::{DatasetManager, DatasetManagerOptions};
use tidepool::remote::{DatasetUpdates, DeviceRegistry, RemoteStorage};
use tidepool::storage::SqliteStorage;
use tidepool::sync::{SyncCallback, SyncConflict, SyncOptions};
use tidepool::types::{DatasetMetadata, Record};

// ============================================================================
// Minimal mocks (same shape as the synchronizer tests)
// ============================================================================

struct CountingRemote {
    list_calls: Mutex<usize>,
}

impl CountingRemote {
    fn new() -> Self {
        Self {
            list_calls: Mutex::new(0),
        }
    }

    fn list_count(&self) -> usize {
        *self.list_calls.lock()
    }
}

#[async_trait]
impl RemoteStorage for CountingRemote {
    async fn list_updates(
        &self,
        dataset_name: &str,
        since_sync_count: i64,
    ) -> Result<DatasetUpdates, RemoteError> {
        *self.list_calls.lock() += 1;
        Ok(DatasetUpdates {
            dataset_name: dataset_name.to_string(),
            records: Vec::new(),
            sync_count: since_sync_count,
            sync_session_token: None,
            exists: true,
            deleted: false,
            merged_dataset_names: Vec::new(),
        })
    }

    async fn put_records(
        &self,
        _: &str,
        records: &[Record],
        _: Option<&str>,
        _: Option<&str>,
    ) -> Result<Vec<Record>, RemoteError> {
        Ok(records
            .iter()
            .map(|r| Record {
                sync_count: r.sync_count + 1,
                modified: false,
                ..r.clone()
            })
            .collect())
    }

    async fn delete_dataset(&self, _: &str) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn get_datasets(&self) -> Result<Vec<DatasetMetadata>, RemoteError> {
        Ok(Vec::new())
    }

    async fn subscribe_to_dataset(&self, _: &str, _: &str) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn unsubscribe_from_dataset(&self, _: &str, _: &str) -> Result<(), RemoteError> {
        Ok(())
    }
}

struct MockRegistry;

#[async_trait]
impl DeviceRegistry for MockRegistry {
    async fn register_device(&self, _: &str, _: &str) -> Result<String, RemoteError> {
        Ok("device-1".to_string())
    }
}

#[derive(Default)]
struct CallbackState {
    successes: usize,
    failures: usize,
}

struct CountingCallback {
    state: Arc<Mutex<CallbackState>>,
}

impl CountingCallback {
    fn new() -> (Arc<Self>, Arc<Mutex<CallbackState>>) {
        let state = Arc::new(Mutex::new(CallbackState::default()));
        (
            Arc::new(Self {
                state: state.clone(),
            }),
            state,
        )
    }
}

impl SyncCallback for CountingCallback {
    fn on_success(&self, _: &Dataset, _: Vec<Record>) {
        self.state.lock().successes += 1;
    }

    fn on_conflict(&self, _: &Dataset, _: &[SyncConflict]) -> bool {
        true
    }

    fn on_dataset_deleted(&self, _: &Dataset, _: &str) -> bool {
        true
    }

    fn on_datasets_merged(&self, _: &Dataset, _: &[String]) -> bool {
        true
    }

    fn on_failure(&self, _: SyncError) {
        self.state.lock().failures += 1;
    }
}

struct TestEnv {
    manager: Arc<DatasetManager>,
    remote: Arc<CountingRemote>,
    connectivity: Arc<ManualConnectivityMonitor>,
}

fn env(connected: bool) -> TestEnv {
    let remote = Arc::new(CountingRemote::new());
    let connectivity = Arc::new(ManualConnectivityMonitor::new(connected));
    let manager = DatasetManager::new(DatasetManagerOptions {
        local: Arc::new(SqliteStorage::open_in_memory().unwrap()),
        remote: remote.clone(),
        identity: Arc::new(StaticIdentityProvider::new("id-a")),
        connectivity: connectivity.clone(),
        device_registry: Arc::new(MockRegistry),
        sync: SyncOptions::default(),
    });
    TestEnv {
        manager,
        remote,
        connectivity,
    }
}

/// Poll until `predicate` holds or a short deadline expires.
async fn wait_for(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn connected_request_runs_immediately() {
    let env = env(true);
    let dataset = env.manager.open_or_create_dataset("d1").unwrap();
    let (callback, state) = CountingCallback::new();

    dataset.synchronize_on_connectivity(callback);
    wait_for(|| state.lock().successes == 1).await;
    assert_eq!(env.remote.list_count(), 1);
}

#[tokio::test]
async fn offline_request_waits_for_connectivity() {
    let env = env(false);
    let dataset = env.manager.open_or_create_dataset("d1").unwrap();
    let (callback, state) = CountingCallback::new();

    dataset.synchronize_on_connectivity(callback.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(env.remote.list_count(), 0, "nothing runs while offline");
    assert_eq!(state.lock().failures, 0, "deferred, not failed");

    env.connectivity.set_connected(true);
    wait_for(|| state.lock().successes == 1).await;
    assert_eq!(env.remote.list_count(), 1);
}

#[tokio::test]
async fn newer_request_supersedes_the_pending_one() {
    let env = env(false);
    let dataset = env.manager.open_or_create_dataset("d1").unwrap();
    let (first, first_state) = CountingCallback::new();
    let (second, second_state) = CountingCallback::new();

    dataset.synchronize_on_connectivity(first.clone());
    dataset.synchronize_on_connectivity(second.clone());

    env.connectivity.set_connected(true);
    wait_for(|| second_state.lock().successes == 1).await;

    let first_state = first_state.lock();
    assert_eq!(first_state.successes, 0, "superseded request must not fire");
    assert_eq!(first_state.failures, 0);
    assert_eq!(env.remote.list_count(), 1);
}

#[tokio::test]
async fn dropped_callback_cancels_the_deferred_request() {
    let env = env(false);
    let dataset = env.manager.open_or_create_dataset("d1").unwrap();
    let (callback, state) = CountingCallback::new();

    // Passing our only strong reference: the gate downgrades it, so the
    // callback is gone by the time connectivity returns.
    dataset.synchronize_on_connectivity(callback);

    env.connectivity.set_connected(true);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(state.lock().successes, 0);
    assert_eq!(env.remote.list_count(), 0);
}

#[tokio::test]
async fn dropped_dataset_cancels_the_deferred_request() {
    let env = env(false);
    let dataset = env.manager.open_or_create_dataset("d1").unwrap();
    let (callback, state) = CountingCallback::new();

    dataset.synchronize_on_connectivity(callback.clone());
    drop(dataset);

    env.connectivity.set_connected(true);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(state.lock().successes, 0);
    assert_eq!(env.remote.list_count(), 0);
}

#[tokio::test]
async fn deferred_request_fires_once_per_transition() {
    let env = env(false);
    let dataset = env.manager.open_or_create_dataset("d1").unwrap();
    let (callback, state) = CountingCallback::new();

    dataset.synchronize_on_connectivity(callback.clone());
    env.connectivity.set_connected(true);
    wait_for(|| state.lock().successes == 1).await;

    // Bouncing connectivity must not replay the consumed request.
    env.connectivity.set_connected(false);
    env.connectivity.set_connected(true);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(state.lock().successes, 1);
    assert_eq!(env.remote.list_count(), 1);
}
