//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for OrgSync
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum OrgSyncError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// The stored grant can no longer be refreshed; the user must re-run OAuth.
    #[error("Reconnect required: {0}")]
    ReconnectRequired(String),

    /// The provider rejected a sync token or delta link as too old.
    #[error("Sync token expired: {0}")]
    SyncTokenExpired(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrgSyncError {
    /// Failures worth retrying later without operator involvement.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited(_) | Self::Database(_) | Self::Conflict(_))
    }

    /// Failures that mean the access token was rejected by the provider.
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Data errors that will never succeed on retry.
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::Security(_))
    }
}

/// Result type alias for OrgSync operations
pub type Result<T> = std::result::Result<T, OrgSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let err = OrgSyncError::ReconnectRequired("linear tokens never refresh".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "ReconnectRequired");
        assert_eq!(json["message"], "linear tokens never refresh");
    }

    #[test]
    fn classifies_retryable_errors() {
        assert!(OrgSyncError::Network("timeout".into()).is_transient());
        assert!(OrgSyncError::Conflict("lease busy".into()).is_transient());
        assert!(!OrgSyncError::InvalidInput("bad json".into()).is_transient());
        assert!(OrgSyncError::InvalidInput("bad json".into()).is_permanent());
        assert!(OrgSyncError::Auth("401".into()).is_auth());
    }
}
