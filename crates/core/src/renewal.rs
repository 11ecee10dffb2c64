//! Push-channel registration and renewal.
//!
//! Google watch channels and Microsoft Graph subscriptions expire on the
//! provider side; this service re-registers them before they lapse.

use std::sync::Arc;

use chrono::Duration;
use orgsync_common::crypto::random_token;
use orgsync_common::time::Clock;
use orgsync_domain::{OrgSyncError, Result, WebhookChannel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::integrations::ports::IntegrationRepository;
use crate::providers::ports::SubscriptionRequest;
use crate::providers::ProviderLookup;
use crate::sync::ports::SyncStateRepository;
use crate::tokens::TokenRefreshOrchestrator;

const CHANNEL_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalReport {
    pub renewed: u64,
    pub failed: u64,
    pub skipped: u64,
}

pub struct WebhookRenewalService {
    integrations: Arc<dyn IntegrationRepository>,
    states: Arc<dyn SyncStateRepository>,
    tokens: Arc<TokenRefreshOrchestrator>,
    providers: Arc<ProviderLookup>,
    clock: Arc<dyn Clock>,
    public_base_url: String,
}

impl WebhookRenewalService {
    pub fn new(
        integrations: Arc<dyn IntegrationRepository>,
        states: Arc<dyn SyncStateRepository>,
        tokens: Arc<TokenRefreshOrchestrator>,
        providers: Arc<ProviderLookup>,
        clock: Arc<dyn Clock>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self { integrations, states, tokens, providers, clock, public_base_url: public_base_url.into() }
    }

    /// Registers a fresh push channel and stores its identifiers. Returns
    /// `None` for providers whose webhooks are configured outside the API.
    /// A previously registered channel is stopped on a best-effort basis.
    #[instrument(skip(self))]
    pub async fn register(&self, integration_id: Uuid) -> Result<Option<WebhookChannel>> {
        let integration = self
            .integrations
            .get(integration_id)
            .await?
            .ok_or_else(|| OrgSyncError::NotFound(format!("integration {integration_id}")))?;
        if !integration.is_connected() {
            return Err(OrgSyncError::InvalidInput(format!(
                "integration {integration_id} is {}; channels are only registered for connected integrations",
                integration.status
            )));
        }

        let adapter = self.providers.get(integration.provider)?;
        let access_token = self.tokens.get_valid_token(integration_id).await?;
        let request = SubscriptionRequest {
            callback_url: format!(
                "{}/webhooks/{}",
                self.public_base_url.trim_end_matches('/'),
                integration.provider
            ),
            channel_id: Uuid::new_v4().to_string(),
            secret: random_token(CHANNEL_SECRET_BYTES),
            account_id: integration.account_id.clone(),
        };

        let Some(subscription) = adapter.subscribe(&access_token, &request).await? else {
            debug!(provider = %integration.provider, "provider has no push channel API");
            return Ok(None);
        };

        let mut channel = subscription.channel;
        if channel.secret.is_none() {
            channel.secret = Some(request.secret);
        }
        let now = self.clock.now();
        self.integrations.update_webhook_channel(integration_id, &channel, now).await?;

        self.states.set_webhook_expiry(integration_id, subscription.expires_at, now).await?;

        if !integration.webhook.is_empty() && integration.webhook != channel {
            if let Err(err) = adapter.unsubscribe(&access_token, &integration.webhook).await {
                warn!(%integration_id, error = %err, "failed to stop previous webhook channel");
            }
        }

        info!(
            %integration_id,
            provider = %integration.provider,
            expires_at = ?subscription.expires_at,
            "registered webhook channel"
        );
        Ok(Some(channel))
    }

    /// Re-registers channels expiring within `within`. Failures are isolated
    /// per integration.
    #[instrument(skip(self))]
    pub async fn renew_expiring(&self, within: Duration) -> Result<RenewalReport> {
        let expiring = self.states.list_webhook_expiring(self.clock.now() + within).await?;
        let mut report = RenewalReport::default();

        for state in expiring {
            let connected = self
                .integrations
                .get(state.integration_id)
                .await?
                .is_some_and(|integration| integration.is_connected());
            if !connected {
                report.skipped += 1;
                continue;
            }
            match self.register(state.integration_id).await {
                Ok(Some(_)) => report.renewed += 1,
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(integration_id = %state.integration_id, error = %err, "webhook renewal failed");
                }
            }
        }

        info!(renewed = report.renewed, failed = report.failed, skipped = report.skipped, "webhook renewal finished");
        Ok(report)
    }
}
