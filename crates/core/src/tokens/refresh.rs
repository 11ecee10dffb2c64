use std::sync::Arc;

use chrono::Duration;
use futures::stream::{self, StreamExt};
use orgsync_common::security::fingerprint;
use orgsync_common::time::Clock;
use orgsync_domain::{
    Integration, IntegrationStatus, LeaseScope, OAuthCredentials, OrgSyncError, RefreshClass,
    Result, TokenConfig,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::RefreshBatchReport;
use crate::integrations::ports::IntegrationRepository;
use crate::leases::ports::LeaseRepository;
use crate::leases::LeaseGuard;
use crate::providers::ProviderLookup;
use crate::vault::CredentialVault;

const LEASE_WAIT_INTERVAL: std::time::Duration = std::time::Duration::from_millis(250);
const LEASE_WAIT_ATTEMPTS: u32 = 20;
const BATCH_CONCURRENCY: usize = 4;

enum RefreshAttempt {
    Done(OAuthCredentials),
    Busy,
}

/// Keeps access tokens valid, on demand and in proactive sweeps.
///
/// Refreshes run under the integration's `refresh` lease so at most one is
/// in flight per integration across workers.
pub struct TokenRefreshOrchestrator {
    integrations: Arc<dyn IntegrationRepository>,
    leases: Arc<dyn LeaseRepository>,
    vault: Arc<CredentialVault>,
    providers: Arc<ProviderLookup>,
    clock: Arc<dyn Clock>,
    config: TokenConfig,
    holder: String,
}

impl TokenRefreshOrchestrator {
    pub fn new(
        integrations: Arc<dyn IntegrationRepository>,
        leases: Arc<dyn LeaseRepository>,
        vault: Arc<CredentialVault>,
        providers: Arc<ProviderLookup>,
        clock: Arc<dyn Clock>,
        config: TokenConfig,
    ) -> Self {
        Self {
            integrations,
            leases,
            vault,
            providers,
            clock,
            config,
            holder: format!("refresh-{}", Uuid::new_v4()),
        }
    }

    fn buffer(&self) -> Duration {
        Duration::seconds(self.config.refresh_buffer_secs)
    }

    /// Returns a usable access token, refreshing first when the token expires
    /// inside the buffer window. Fails closed for disconnected and errored
    /// integrations.
    #[instrument(skip(self))]
    pub async fn get_valid_token(&self, integration_id: Uuid) -> Result<String> {
        let integration = self.load(integration_id).await?;
        ensure_usable(&integration)?;

        let credentials = if integration.needs_refresh(self.clock.now(), self.buffer()) {
            debug!(provider = %integration.provider, "token inside refresh window");
            self.refresh_or_wait(integration_id, false).await?
        } else {
            self.vault.open(&integration.credentials)?
        };

        self.integrations.touch_last_used(integration_id, self.clock.now()).await?;
        Ok(credentials.access_token)
    }

    /// Refreshes regardless of expiry, e.g. after the provider answered 401.
    #[instrument(skip(self))]
    pub async fn force_refresh(&self, integration_id: Uuid) -> Result<String> {
        let integration = self.load(integration_id).await?;
        ensure_usable(&integration)?;
        let credentials = self.refresh_or_wait(integration_id, true).await?;
        Ok(credentials.access_token)
    }

    /// Proactive sweep over `connected|refreshing` integrations expiring
    /// inside the buffer window. Each integration succeeds or fails on its
    /// own; busy leases are skipped.
    #[instrument(skip(self))]
    pub async fn refresh_expiring_tokens(&self) -> Result<RefreshBatchReport> {
        let cutoff = self.clock.now() + self.buffer();
        let candidates = self.integrations.list_expiring(cutoff).await?;
        let mut report = RefreshBatchReport { scanned: candidates.len() as u64, ..Default::default() };

        let outcomes: Vec<_> = stream::iter(candidates)
            .map(|integration| async move {
                let outcome = self.try_refresh(integration.id, false).await;
                (integration, outcome)
            })
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect()
            .await;

        for (integration, outcome) in outcomes {
            match outcome {
                Ok(RefreshAttempt::Done(_)) => report.refreshed += 1,
                Ok(RefreshAttempt::Busy) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        integration_id = %integration.id,
                        provider = %integration.provider,
                        account = %fingerprint(&integration.account_email),
                        error = %err,
                        "proactive token refresh failed"
                    );
                }
            }
        }

        info!(
            scanned = report.scanned,
            refreshed = report.refreshed,
            failed = report.failed,
            skipped = report.skipped,
            "token refresh sweep finished"
        );
        Ok(report)
    }

    async fn load(&self, integration_id: Uuid) -> Result<Integration> {
        self.integrations
            .get(integration_id)
            .await?
            .ok_or_else(|| OrgSyncError::NotFound(format!("integration {integration_id}")))
    }

    /// On-demand path: take the lease, or wait for the competing refresh and
    /// use its result.
    async fn refresh_or_wait(&self, integration_id: Uuid, force: bool) -> Result<OAuthCredentials> {
        for _ in 0..LEASE_WAIT_ATTEMPTS {
            if let RefreshAttempt::Done(credentials) = self.try_refresh(integration_id, force).await? {
                return Ok(credentials);
            }
            tokio::time::sleep(LEASE_WAIT_INTERVAL).await;

            let current = self.load(integration_id).await?;
            ensure_usable(&current)?;
            if current.status == IntegrationStatus::Connected
                && !current.needs_refresh(self.clock.now(), self.buffer())
            {
                return self.vault.open(&current.credentials);
            }
        }
        Err(OrgSyncError::Conflict(format!(
            "token refresh for integration {integration_id} is held by another worker"
        )))
    }

    async fn try_refresh(&self, integration_id: Uuid, force: bool) -> Result<RefreshAttempt> {
        let ttl = Duration::seconds(self.config.refresh_lease_secs);
        let Some(lease) = LeaseGuard::acquire(
            &self.leases,
            integration_id,
            LeaseScope::Refresh,
            &self.holder,
            ttl,
            self.clock.now(),
        )
        .await?
        else {
            return Ok(RefreshAttempt::Busy);
        };

        let result = async {
            // Re-read under the lease: a competing worker may have refreshed.
            let integration = self.load(integration_id).await?;
            ensure_usable(&integration)?;
            if !force && !integration.needs_refresh(self.clock.now(), self.buffer()) {
                return self.vault.open(&integration.credentials);
            }
            self.refresh_locked(integration).await
        }
        .await;

        lease.release().await;
        result.map(RefreshAttempt::Done)
    }

    async fn refresh_locked(&self, mut integration: Integration) -> Result<OAuthCredentials> {
        self.integrations
            .set_status(
                integration.id,
                IntegrationStatus::Refreshing,
                integration.last_error.as_deref(),
                self.clock.now(),
            )
            .await?;

        let refreshed = match self.exchange(&integration).await {
            Ok(credentials) => self.vault.seal(&credentials).map(|sealed| (credentials, sealed)),
            Err(err) => Err(err),
        };

        match refreshed {
            Ok((credentials, sealed)) => {
                let now = self.clock.now();
                integration.credentials = sealed;
                integration.expires_at = credentials.expires_at;
                integration.last_refreshed_at = Some(now);
                integration.refresh_count += 1;
                integration.status = IntegrationStatus::Connected;
                integration.last_error = None;
                integration.updated_at = now;
                self.integrations.update(&integration).await?;
                info!(
                    integration_id = %integration.id,
                    provider = %integration.provider,
                    refresh_count = integration.refresh_count,
                    "refreshed access token"
                );
                Ok(credentials)
            }
            Err(err) => {
                let message = err.to_string();
                self.integrations
                    .set_status(integration.id, IntegrationStatus::Error, Some(&message), self.clock.now())
                    .await?;
                warn!(
                    integration_id = %integration.id,
                    provider = %integration.provider,
                    error = %message,
                    "token refresh failed; integration marked as error"
                );
                Err(err)
            }
        }
    }

    /// Applies the provider's refresh class to produce the next credential
    /// set. Credentials are not persisted here.
    async fn exchange(&self, integration: &Integration) -> Result<OAuthCredentials> {
        let current = self.vault.open(&integration.credentials)?;
        let adapter = self.providers.get(integration.provider)?;

        match integration.provider.refresh_class() {
            RefreshClass::Permanent => {
                if self.config.validate_permanent_tokens
                    && adapter.validate_token(&current.access_token).await?
                {
                    debug!(integration_id = %integration.id, "permanent token still valid");
                    return Ok(current);
                }
                Err(OrgSyncError::ReconnectRequired(format!(
                    "{} tokens cannot be refreshed; reconnect the account",
                    integration.provider
                )))
            }
            RefreshClass::Refreshable | RefreshClass::ExpiringRequiresRefreshToken => {
                let Some(refresh_token) = current.refresh_token.clone().filter(|t| !t.is_empty())
                else {
                    return Err(OrgSyncError::ReconnectRequired(format!(
                        "no {} refresh token stored; reconnect the account",
                        integration.provider
                    )));
                };
                let refreshed = adapter.refresh_token(&refresh_token).await?;
                Ok(OAuthCredentials {
                    access_token: refreshed.access_token,
                    refresh_token: refreshed.refresh_token.or(Some(refresh_token)),
                    expires_at: refreshed.expires_at,
                    token_type: current.token_type,
                })
            }
        }
    }
}

fn ensure_usable(integration: &Integration) -> Result<()> {
    match integration.status {
        IntegrationStatus::Disconnected => {
            Err(OrgSyncError::Auth(format!("integration {} is disconnected", integration.id)))
        }
        IntegrationStatus::Error => Err(OrgSyncError::ReconnectRequired(
            integration
                .last_error
                .clone()
                .unwrap_or_else(|| format!("integration {} needs to be reconnected", integration.id)),
        )),
        IntegrationStatus::Connected | IntegrationStatus::Refreshing => Ok(()),
    }
}
