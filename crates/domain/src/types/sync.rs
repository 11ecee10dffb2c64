//! Per-integration sync bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub integration_id: Uuid,
    /// Opaque continuation for pull-style providers.
    pub sync_token: Option<String>,
    /// Full delta URL for delta-query providers.
    pub delta_link: Option<String>,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub last_incremental_sync_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    pub webhook_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    pub fn new(integration_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            integration_id,
            sync_token: None,
            delta_link: None,
            last_full_sync_at: None,
            last_incremental_sync_at: None,
            last_sync_error: None,
            webhook_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub const fn has_continuation(&self) -> bool {
        self.sync_token.is_some() || self.delta_link.is_some()
    }

    pub fn clear_continuation(&mut self) {
        self.sync_token = None;
        self.delta_link = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

crate::impl_domain_status_conversions!(SyncMode {
    Full => "full",
    Incremental => "incremental",
});

/// Outcome of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub integration_id: Uuid,
    pub mode: SyncMode,
    pub upserted: u64,
    pub deleted: u64,
    pub pages: u32,
    /// Set when an expired continuation forced a wipe and full resync.
    pub recovered_from_expired_token: bool,
}

impl SyncReport {
    pub const fn new(integration_id: Uuid, mode: SyncMode) -> Self {
        Self { integration_id, mode, upserted: 0, deleted: 0, pages: 0, recovered_from_expired_token: false }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBatchReport {
    pub synced: u64,
    pub failed: u64,
    pub skipped: u64,
}
