//! Port interface for advisory per-integration leases

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_domain::{LeaseScope, Result};
use uuid::Uuid;

#[async_trait]
pub trait LeaseRepository: Send + Sync {
    /// Takes the lease when it is free, expired, or already held by `holder`.
    async fn try_acquire(
        &self,
        integration_id: Uuid,
        scope: LeaseScope,
        holder: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Releases the lease if `holder` still owns it.
    async fn release(&self, integration_id: Uuid, scope: LeaseScope, holder: &str) -> Result<()>;
}
