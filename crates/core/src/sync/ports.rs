//! Port interfaces for sync bookkeeping and the local mirror

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_domain::{MirrorKind, MirrorRecord, RemoteChange, Result, SyncState};
use uuid::Uuid;

#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    async fn get(&self, integration_id: Uuid) -> Result<Option<SyncState>>;

    /// Writes sync progress. An existing row keeps its `webhook_expires_at`,
    /// which only [`SyncStateRepository::set_webhook_expiry`] changes.
    async fn upsert(&self, state: &SyncState) -> Result<()>;

    /// Records the push channel expiry, creating the row when absent.
    async fn set_webhook_expiry(
        &self,
        integration_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// States whose push channel expires at or before `before`.
    async fn list_webhook_expiring(&self, before: DateTime<Utc>) -> Result<Vec<SyncState>>;
}

/// Mirrored remote records keyed by (integration id, external id).
#[async_trait]
pub trait MirrorRepository: Send + Sync {
    /// Applies one page of changes atomically. Returns (upserted, deleted).
    async fn apply_changes(
        &self,
        integration_id: Uuid,
        changes: &[RemoteChange],
        synced_at: DateTime<Utc>,
    ) -> Result<(u64, u64)>;

    /// Removes every mirrored record of the integration.
    async fn delete_all(&self, integration_id: Uuid) -> Result<u64>;

    async fn get(
        &self,
        integration_id: Uuid,
        kind: MirrorKind,
        external_id: &str,
    ) -> Result<Option<MirrorRecord>>;

    async fn count(&self, integration_id: Uuid, kind: MirrorKind) -> Result<u64>;
}
