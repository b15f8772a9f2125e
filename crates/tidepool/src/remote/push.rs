//! Inbound push-notification payload.

use serde::Deserialize;

use crate::error::TidepoolError;

/// Payload of a push message announcing a remote dataset change; used to
/// trigger a targeted synchronize for the named dataset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSyncUpdate {
    pub source: String,
    pub identity_pool_id: String,
    pub identity_id: String,
    pub dataset_name: String,
    pub sync_count: i64,
}

impl PushSyncUpdate {
    /// Parse a raw JSON push payload.
    pub fn from_json(payload: &str) -> Result<Self, TidepoolError> {
        serde_json::from_str(payload)
            .map_err(|e| TidepoolError::Internal(format!("invalid push payload: {e}")))
    }
}
