//! Advisory leases that keep sync and refresh single-flight per integration.

pub mod ports;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use orgsync_domain::{LeaseScope, Result};
use tracing::warn;
use uuid::Uuid;

use self::ports::LeaseRepository;

/// A held lease. Call [`LeaseGuard::release`] when done; a guard that is
/// dropped without release simply expires at `until`.
pub struct LeaseGuard {
    leases: Arc<dyn LeaseRepository>,
    integration_id: Uuid,
    scope: LeaseScope,
    holder: String,
}

impl LeaseGuard {
    /// Attempts to take the lease. `Ok(None)` means another holder has it.
    pub async fn acquire(
        leases: &Arc<dyn LeaseRepository>,
        integration_id: Uuid,
        scope: LeaseScope,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>> {
        let acquired = leases.try_acquire(integration_id, scope, holder, now + ttl, now).await?;
        Ok(acquired.then(|| Self {
            leases: Arc::clone(leases),
            integration_id,
            scope,
            holder: holder.to_string(),
        }))
    }

    pub async fn release(self) {
        if let Err(err) = self.leases.release(self.integration_id, self.scope, &self.holder).await {
            warn!(
                integration_id = %self.integration_id,
                scope = %self.scope,
                error = %err,
                "failed to release lease; it will expire on its own"
            );
        }
    }
}
