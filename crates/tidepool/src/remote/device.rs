//! Device push-registration collaborator.

use async_trait::async_trait;

use crate::error::RemoteError;

/// Push-notification device registration service.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Register this device for the current identity and platform,
    /// returning the service-assigned device id. Idempotent per
    /// identity + platform.
    async fn register_device(
        &self,
        platform: &str,
        push_token: &str,
    ) -> Result<String, RemoteError>;
}

/// Local-store meta key for an identity's current device id, the one the
/// synchronizer and subscription calls use.
pub(crate) fn device_id_key(identity_id: &str) -> String {
    format!("device_id:{identity_id}")
}

/// Local-store meta key caching a registration per identity + platform.
pub(crate) fn device_platform_key(identity_id: &str, platform: &str) -> String {
    format!("device_id:{identity_id}:{platform}")
}
