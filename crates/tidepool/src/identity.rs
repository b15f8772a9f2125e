//! Credentials/identity collaborator.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RemoteError;

/// Fired with `(old_identity_id, new_identity_id)` when the credentials
/// layer detects an identity change (e.g. after account linking).
pub type IdentityChangeCallback = dyn Fn(&str, &str) + Send + Sync;

/// Supplies the current identity id and an identity-change notification
/// channel. Resolving the id may require a network round-trip the first
/// time, hence the `RemoteError`.
pub trait IdentityProvider: Send + Sync {
    fn identity_id(&self) -> Result<String, RemoteError>;

    /// Register an identity-change listener. Listeners are retained for the
    /// provider's lifetime.
    fn on_identity_change(&self, callback: Arc<IdentityChangeCallback>);

    /// Drop any cached credentials. Part of a full local wipe.
    fn clear_credentials(&self) {}
}

// ============================================================================
// StaticIdentityProvider
// ============================================================================

/// Fixed-identity provider for tests and single-identity hosts. The identity
/// can still be swapped with `set_identity_id`, which fires change listeners.
pub struct StaticIdentityProvider {
    inner: Mutex<StaticIdentityInner>,
}

struct StaticIdentityInner {
    identity_id: String,
    listeners: Vec<Arc<IdentityChangeCallback>>,
}

impl StaticIdentityProvider {
    pub fn new(identity_id: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(StaticIdentityInner {
                identity_id: identity_id.into(),
                listeners: Vec::new(),
            }),
        }
    }

    /// Replace the identity and notify listeners with (old, new).
    pub fn set_identity_id(&self, identity_id: impl Into<String>) {
        let new_id = identity_id.into();
        let (old_id, listeners) = {
            let mut inner = self.inner.lock();
            if inner.identity_id == new_id {
                return;
            }
            let old = std::mem::replace(&mut inner.identity_id, new_id.clone());
            (old, inner.listeners.clone())
        };
        for listener in listeners {
            listener(&old_id, &new_id);
        }
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn identity_id(&self) -> Result<String, RemoteError> {
        Ok(self.inner.lock().identity_id.clone())
    }

    fn on_identity_change(&self, callback: Arc<IdentityChangeCallback>) {
        self.inner.lock().listeners.push(callback);
    }
}
