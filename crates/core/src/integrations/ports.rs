//! Port interfaces for integration persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_domain::{
    Integration, IntegrationStats, IntegrationStatus, Provider, Result, WebhookChannel,
    WebhookTarget,
};
use uuid::Uuid;

/// Storage for [`Integration`] records.
///
/// Implementations must reject a second record for the same
/// (organization, provider, account email) with `OrgSyncError::Conflict`.
#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    async fn insert(&self, integration: &Integration) -> Result<()>;

    /// Replaces every mutable column of an existing record.
    async fn update(&self, integration: &Integration) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Integration>>;

    async fn find_by_account(
        &self,
        organization_id: &str,
        provider: Provider,
        account_email: &str,
    ) -> Result<Option<Integration>>;

    async fn list_by_organization(&self, organization_id: &str) -> Result<Vec<Integration>>;

    async fn list_by_organization_and_provider(
        &self,
        organization_id: &str,
        provider: Provider,
    ) -> Result<Vec<Integration>>;

    /// Integrations in `connected` or `refreshing` whose token expires at or
    /// before `before`.
    async fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Integration>>;

    async fn list_by_status(&self, status: IntegrationStatus) -> Result<Vec<Integration>>;

    /// Integrations whose credentials were sealed under another key version.
    async fn list_with_stale_key(&self, current_version: u32) -> Result<Vec<Integration>>;

    /// Integrations of `provider` matching a webhook routing target.
    async fn find_by_webhook_target(
        &self,
        provider: Provider,
        target: &WebhookTarget,
    ) -> Result<Vec<Integration>>;

    async fn set_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        last_error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn update_webhook_channel(
        &self,
        id: Uuid,
        channel: &WebhookChannel,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Counts per status, optionally scoped to one organization.
    async fn stats(&self, organization_id: Option<&str>) -> Result<IntegrationStats>;

    /// Hard delete; dependent sync state, mirror rows and leases go with it.
    /// Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}
