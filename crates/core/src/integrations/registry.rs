use std::sync::Arc;

use chrono::Duration;
use orgsync_common::time::Clock;
use orgsync_domain::{
    ConnectIntegration, Integration, IntegrationStats, IntegrationStatus, OrgSyncError, Provider,
    RefreshClass, Result, WebhookChannel,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::ports::IntegrationRepository;
use crate::vault::CredentialVault;

/// Registry of connected accounts.
///
/// Owns the connect/disconnect lifecycle. Credentials are sealed with the
/// [`CredentialVault`] before they reach the repository.
pub struct IntegrationRegistry {
    repository: Arc<dyn IntegrationRepository>,
    vault: Arc<CredentialVault>,
    clock: Arc<dyn Clock>,
}

impl IntegrationRegistry {
    pub fn new(
        repository: Arc<dyn IntegrationRepository>,
        vault: Arc<CredentialVault>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { repository, vault, clock }
    }

    /// Connects an account, or reactivates its disconnected record in place.
    ///
    /// A second connect for an account that is already connected fails with
    /// `OrgSyncError::Conflict`.
    #[instrument(skip(self, request), fields(org = %request.organization_id, provider = %request.provider))]
    pub async fn connect(&self, request: ConnectIntegration) -> Result<Integration> {
        let email = Integration::normalize_email(&request.account_email);
        if email.is_empty() {
            return Err(OrgSyncError::InvalidInput("account email is required".into()));
        }
        if request.organization_id.trim().is_empty() {
            return Err(OrgSyncError::InvalidInput("organization id is required".into()));
        }
        if request.provider.refresh_class() == RefreshClass::ExpiringRequiresRefreshToken
            && request.credentials.refresh_token.as_deref().filter(|t| !t.is_empty()).is_none()
        {
            return Err(OrgSyncError::Auth(format!(
                "{} did not return a refresh token; re-consent with offline access",
                request.provider
            )));
        }

        let now = self.clock.now();
        let sealed = self.vault.seal(&request.credentials)?;

        if let Some(mut existing) = self
            .repository
            .find_by_account(&request.organization_id, request.provider, &email)
            .await?
        {
            if existing.is_connected() {
                return Err(OrgSyncError::Conflict(format!(
                    "{} account {email} is already connected",
                    request.provider
                )));
            }
            existing.account_id = request.account_id;
            existing.scopes = request.scopes;
            existing.credentials = sealed;
            existing.expires_at = request.credentials.expires_at;
            existing.status = IntegrationStatus::Connected;
            existing.last_error = None;
            existing.updated_at = now;
            self.repository.update(&existing).await?;
            info!(integration_id = %existing.id, "reactivated integration");
            return Ok(existing);
        }

        let integration = Integration {
            id: Uuid::now_v7(),
            organization_id: request.organization_id,
            provider: request.provider,
            account_email: email,
            account_id: request.account_id,
            status: IntegrationStatus::Connected,
            scopes: request.scopes,
            credentials: sealed,
            webhook: WebhookChannel::default(),
            expires_at: request.credentials.expires_at,
            last_used_at: None,
            last_refreshed_at: None,
            refresh_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.repository.insert(&integration).await?;
        info!(integration_id = %integration.id, "connected integration");
        Ok(integration)
    }

    /// Soft delete: flips status to disconnected and keeps the record.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, id: Uuid) -> Result<Integration> {
        let integration = self.require(id).await?;
        self.repository
            .set_status(id, IntegrationStatus::Disconnected, None, self.clock.now())
            .await?;
        info!(integration_id = %id, provider = %integration.provider, "disconnected integration");
        self.require(id).await
    }

    /// Permanently removes an integration together with its sync state and
    /// mirrored records.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if self.repository.delete(id).await? {
            info!(integration_id = %id, "deleted integration");
            Ok(())
        } else {
            Err(OrgSyncError::NotFound(format!("integration {id}")))
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Integration>> {
        self.repository.get(id).await
    }

    /// Like [`Self::get`] but a missing record is `OrgSyncError::NotFound`.
    pub async fn require(&self, id: Uuid) -> Result<Integration> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| OrgSyncError::NotFound(format!("integration {id}")))
    }

    pub async fn list_by_organization(&self, organization_id: &str) -> Result<Vec<Integration>> {
        self.repository.list_by_organization(organization_id).await
    }

    pub async fn list_by_organization_and_provider(
        &self,
        organization_id: &str,
        provider: Provider,
    ) -> Result<Vec<Integration>> {
        self.repository.list_by_organization_and_provider(organization_id, provider).await
    }

    /// Integrations whose token expires within `within` from now.
    pub async fn list_expiring(&self, within: Duration) -> Result<Vec<Integration>> {
        self.repository.list_expiring(self.clock.now() + within).await
    }

    pub async fn stats(&self, organization_id: Option<&str>) -> Result<IntegrationStats> {
        self.repository.stats(organization_id).await
    }

    pub async fn update_webhook_channel(&self, id: Uuid, channel: &WebhookChannel) -> Result<()> {
        self.repository.update_webhook_channel(id, channel, self.clock.now()).await
    }

    /// Re-encrypts credentials sealed under a retired master key with the
    /// current key. Returns how many records were rewritten.
    #[instrument(skip(self))]
    pub async fn reseal_stale_credentials(&self) -> Result<u64> {
        let current = self.vault.current_version();
        let stale = self.repository.list_with_stale_key(current).await?;
        let mut resealed = 0;
        for mut integration in stale {
            let plaintext = match self.vault.open(&integration.credentials) {
                Ok(plaintext) => plaintext,
                Err(err) => {
                    warn!(integration_id = %integration.id, error = %err, "cannot reseal credentials");
                    continue;
                }
            };
            integration.credentials = self.vault.seal(&plaintext)?;
            integration.updated_at = self.clock.now();
            self.repository.update(&integration).await?;
            resealed += 1;
        }
        if resealed > 0 {
            info!(resealed, key_version = current, "resealed credentials under current key");
        }
        Ok(resealed)
    }
}
