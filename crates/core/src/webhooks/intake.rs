use std::collections::BTreeMap;
use std::sync::Arc;

use orgsync_common::time::Clock;
use orgsync_domain::{Integration, OrgSyncError, Provider, ProvidersConfig, Result};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::queue::WebhookQueue;
use super::verification::verify_sender;
use crate::integrations::ports::IntegrationRepository;
use crate::providers::ports::{HandshakeResponse, WebhookRequest};
use crate::providers::ProviderLookup;

/// Result of accepting one webhook request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Validation handshake answered directly; nothing enqueued.
    Handshake(HandshakeResponse),
    Accepted { enqueued: usize },
}

/// Front door for provider push notifications: handshake, sender
/// verification, enqueue.
///
/// Errors map onto HTTP statuses at the edge: `Security` is 401,
/// `InvalidInput` is 400 and `NotFound` is 404.
pub struct WebhookIntake {
    providers: Arc<ProviderLookup>,
    integrations: Arc<dyn IntegrationRepository>,
    queue: Arc<WebhookQueue>,
    provider_secrets: BTreeMap<Provider, String>,
    replay_window_secs: i64,
    clock: Arc<dyn Clock>,
}

impl WebhookIntake {
    pub fn new(
        providers: Arc<ProviderLookup>,
        integrations: Arc<dyn IntegrationRepository>,
        queue: Arc<WebhookQueue>,
        provider_config: &ProvidersConfig,
        replay_window_secs: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let provider_secrets = provider_config
            .0
            .iter()
            .filter_map(|(provider, cfg)| {
                cfg.webhook_secret
                    .as_ref()
                    .filter(|secret| !secret.is_empty())
                    .map(|secret| (*provider, secret.clone()))
            })
            .collect();
        Self { providers, integrations, queue, provider_secrets, replay_window_secs, clock }
    }

    /// Verifies every notification in the request before enqueueing any of
    /// them.
    #[instrument(skip(self, request), fields(body_len = request.body.len()))]
    pub async fn handle(&self, provider: Provider, request: WebhookRequest) -> Result<IntakeOutcome> {
        let adapter = self
            .providers
            .get(provider)
            .map_err(|_| OrgSyncError::NotFound(format!("no webhook endpoint for {provider}")))?;

        if let Some(response) = adapter.handshake(&request) {
            debug!("answered webhook handshake");
            return Ok(IntakeOutcome::Handshake(response));
        }

        let now = self.clock.now();
        let notifications = adapter.split_notifications(&request, now)?;
        let scheme = adapter.webhook_scheme();

        let mut verified = Vec::with_capacity(notifications.len());
        for notification in notifications {
            let value = parse_notification(&notification.payload)?;
            let integration = match adapter.webhook_target(&request.headers, &value) {
                Some(target) => {
                    self.integrations.find_by_webhook_target(provider, &target).await?.into_iter().next()
                }
                None => None,
            };

            let secret = self.secret_for(provider, integration.as_ref()).ok_or_else(|| {
                warn!(event_id = %notification.event_id, "no webhook secret available for sender verification");
                OrgSyncError::Security("no webhook secret available".into())
            })?;
            if let Err(err) =
                verify_sender(&scheme, &request, &value, &secret, self.replay_window_secs, now)
            {
                warn!(event_id = %notification.event_id, error = %err, "rejected webhook");
                return Err(err);
            }

            verified.push((notification, integration.map(|i| i.organization_id)));
        }

        let enqueued = verified.len();
        for (notification, organization_id) in verified {
            self.queue
                .enqueue(
                    provider,
                    &notification.event_id,
                    notification.payload,
                    request.headers.clone(),
                    organization_id,
                )
                .await?;
        }

        info!(enqueued, "accepted webhook");
        Ok(IntakeOutcome::Accepted { enqueued })
    }

    /// Channel secret registered for the integration, else the provider-wide
    /// webhook secret.
    fn secret_for(&self, provider: Provider, integration: Option<&Integration>) -> Option<String> {
        integration
            .and_then(|i| i.webhook.secret.clone())
            .filter(|secret| !secret.is_empty())
            .or_else(|| self.provider_secrets.get(&provider).cloned())
    }
}

fn parse_notification(payload: &str) -> Result<Value> {
    if payload.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(payload)
        .map_err(|e| OrgSyncError::InvalidInput(format!("webhook notification is not JSON: {e}")))
}
