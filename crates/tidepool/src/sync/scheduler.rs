//! Connectivity-gated synchronization deferral.
//!
//! When a synchronize is requested offline, the gate parks a one-shot
//! listener on the connectivity monitor instead. The listener holds only
//! `Weak` references to the dataset and callback: if either is gone by the
//! time connectivity returns, the deferred sync silently no-ops. A dataset
//! has at most one pending deferred request; superseding it drops the
//! earlier one without firing its callback.

use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::dataset::{Dataset, DatasetInner};
use crate::sync::callback::SyncCallback;

/// Per-dataset slot tracking the currently registered connectivity
/// listener, if any.
pub(crate) struct ConnectivityGate {
    pending: Mutex<Option<u64>>,
}

impl ConnectivityGate {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// Park a synchronize request until connectivity returns.
    pub(crate) fn defer(inner: &Arc<DatasetInner>, callback: Arc<dyn SyncCallback>) {
        let monitor = Arc::clone(&inner.connectivity);
        let weak_inner: Weak<DatasetInner> = Arc::downgrade(inner);
        let weak_callback: Weak<dyn SyncCallback> = Arc::downgrade(&callback);

        // The listener needs its own token to unregister itself; the token
        // only exists after registration, so it travels through a cell.
        let token_cell: Arc<OnceLock<u64>> = Arc::new(OnceLock::new());

        let fire = {
            let token_cell = Arc::clone(&token_cell);
            let monitor = Arc::clone(&monitor);
            Arc::new(move || {
                let Some(&token) = token_cell.get() else {
                    return;
                };
                monitor.unregister(token);
                let Some(inner) = weak_inner.upgrade() else {
                    return;
                };
                {
                    let mut pending = inner.gate.pending.lock();
                    if *pending != Some(token) {
                        // Superseded while firing: a newer request owns the slot.
                        return;
                    }
                    *pending = None;
                }
                let Some(callback) = weak_callback.upgrade() else {
                    tracing::debug!(
                        dataset = %inner.dataset_name,
                        "deferred synchronize dropped: callback no longer alive"
                    );
                    return;
                };
                tracing::debug!(
                    dataset = %inner.dataset_name,
                    "connectivity restored, running deferred synchronize"
                );
                let _ = Dataset::from_inner(inner).synchronize(callback);
            })
        };

        // Hold the slot across registration so a concurrent fire observes a
        // consistent token.
        let mut pending = inner.gate.pending.lock();
        if let Some(previous) = pending.take() {
            monitor.unregister(previous);
        }
        let token = monitor.register(fire);
        let _ = token_cell.set(token);
        *pending = Some(token);
    }
}
