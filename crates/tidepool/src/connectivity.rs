//! Connectivity collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Fired once when connectivity is restored.
pub type ConnectivityCallback = dyn Fn() + Send + Sync;

/// Platform connectivity signal. `register` returns a token; listeners stay
/// registered until `unregister`ed. One-shot semantics are the caller's
/// responsibility; the connectivity gate unregisters itself when fired.
pub trait ConnectivityMonitor: Send + Sync {
    fn is_connected(&self) -> bool;

    fn register(&self, callback: Arc<ConnectivityCallback>) -> u64;

    /// Remove a listener. Unknown tokens are ignored.
    fn unregister(&self, token: u64);
}

// ============================================================================
// ManualConnectivityMonitor
// ============================================================================

/// In-process monitor driven by `set_connected`; used by tests and by hosts
/// that bridge their own platform connectivity events.
pub struct ManualConnectivityMonitor {
    connected: AtomicBool,
    next_token: AtomicU64,
    listeners: Mutex<HashMap<u64, Arc<ConnectivityCallback>>>,
}

impl ManualConnectivityMonitor {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            next_token: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Flip the connectivity state. A transition to connected fires every
    /// registered listener (outside the registry lock, so listeners may
    /// re-register or unregister freely).
    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if connected && !was {
            let callbacks: Vec<Arc<ConnectivityCallback>> =
                self.listeners.lock().values().cloned().collect();
            for callback in callbacks {
                callback();
            }
        }
    }

}

impl ConnectivityMonitor for ManualConnectivityMonitor {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn register(&self, callback: Arc<ConnectivityCallback>) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().insert(token, callback);
        token
    }

    fn unregister(&self, token: u64) {
        self.listeners.lock().remove(&token);
    }
}
