use std::sync::Arc;

use orgsync_common::time::Clock;
use orgsync_domain::{
    DispatchReport, Integration, OrgSyncError, ProcessedEvent, Result, WebhookQueueItem,
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::ports::WebhookQueueRepository;
use super::retry::RetryPolicy;
use crate::integrations::ports::IntegrationRepository;
use crate::providers::ProviderLookup;
use crate::sync::SyncTrigger;

enum Outcome {
    Completed,
    Duplicate,
    Dropped,
}

/// Drains the webhook inbox and routes each notification to a sync pass.
pub struct WebhookDispatcher {
    queue: Arc<dyn WebhookQueueRepository>,
    integrations: Arc<dyn IntegrationRepository>,
    providers: Arc<ProviderLookup>,
    sync: Arc<dyn SyncTrigger>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl WebhookDispatcher {
    pub fn new(
        queue: Arc<dyn WebhookQueueRepository>,
        integrations: Arc<dyn IntegrationRepository>,
        providers: Arc<ProviderLookup>,
        sync: Arc<dyn SyncTrigger>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { queue, integrations, providers, sync, retry, clock }
    }

    /// Processes up to `limit` ready items in `created_at` order.
    ///
    /// Each claimed item ends the pass completed, scheduled for retry, or
    /// dead-lettered. Per-item failures never abort the batch.
    #[instrument(skip(self))]
    pub async fn dispatch_batch(&self, limit: usize) -> Result<DispatchReport> {
        let ready = self.queue.fetch_ready(self.clock.now(), limit).await?;
        let mut report = DispatchReport::default();

        for item in ready {
            if !self.queue.try_claim(item.id, self.clock.now()).await? {
                debug!(item_id = %item.id, "lost claim to another dispatcher");
                continue;
            }
            report.claimed += 1;

            match self.process(&item).await {
                Ok(Outcome::Completed) => report.completed += 1,
                Ok(Outcome::Duplicate) => report.duplicates += 1,
                Ok(Outcome::Dropped) => report.dropped += 1,
                Err(err) => match self.record_failure(&item, &err).await {
                    Ok(true) => report.dead_lettered += 1,
                    Ok(false) => report.retried += 1,
                    Err(store_err) => {
                        warn!(item_id = %item.id, error = %store_err, "failed to record webhook failure");
                    }
                },
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                completed = report.completed,
                duplicates = report.duplicates,
                dropped = report.dropped,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                "webhook batch dispatched"
            );
        }
        Ok(report)
    }

    async fn process(&self, item: &WebhookQueueItem) -> Result<Outcome> {
        if self.queue.is_processed(&item.ledger_key()).await? {
            debug!(item_id = %item.id, key = %item.ledger_key(), "duplicate delivery");
            self.queue.complete(item.id, None, self.clock.now()).await?;
            return Ok(Outcome::Duplicate);
        }

        let targets = self.resolve(item).await?;
        let Some(first) = targets.first().copied() else {
            self.queue.complete(item.id, None, self.clock.now()).await?;
            return Ok(Outcome::Dropped);
        };

        for integration_id in &targets {
            self.sync.sync(*integration_id).await?;
        }

        let ledger = ProcessedEvent::for_item(item, Some(first), self.clock.now());
        self.queue.complete(item.id, Some(&ledger), self.clock.now()).await?;
        Ok(Outcome::Completed)
    }

    /// Connected integrations a stored notification refers to.
    async fn resolve(&self, item: &WebhookQueueItem) -> Result<Vec<Uuid>> {
        let adapter = self.providers.get(item.provider)?;
        let payload: Value = if item.payload.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&item.payload).map_err(|e| {
                OrgSyncError::InvalidInput(format!("stored webhook payload is not JSON: {e}"))
            })?
        };

        let Some(target) = adapter.webhook_target(&item.headers, &payload) else {
            warn!(item_id = %item.id, provider = %item.provider, "webhook carries no routing target; dropping");
            return Ok(Vec::new());
        };

        let matches: Vec<Uuid> = self
            .integrations
            .find_by_webhook_target(item.provider, &target)
            .await?
            .into_iter()
            .filter(Integration::is_connected)
            .filter(|integration| {
                item.organization_id.as_ref().map_or(true, |org| *org == integration.organization_id)
            })
            .map(|integration| integration.id)
            .collect();

        if matches.is_empty() {
            info!(item_id = %item.id, provider = %item.provider, ?target, "no connected integration for webhook; dropping");
        }
        Ok(matches)
    }

    /// Returns whether the item was dead-lettered.
    async fn record_failure(&self, item: &WebhookQueueItem, err: &OrgSyncError) -> Result<bool> {
        let retry_count = item.retry_count + 1;
        let next_retry_at = if err.is_permanent() || retry_count >= item.max_retries {
            None
        } else {
            Some(self.retry.next_retry_at(retry_count, self.clock.now()))
        };

        self.queue.mark_failed(item.id, retry_count, next_retry_at, &err.to_string()).await?;

        match next_retry_at {
            Some(at) => {
                warn!(item_id = %item.id, retry_count, next_retry_at = %at, error = %err, "webhook processing failed; will retry");
                Ok(false)
            }
            None => {
                warn!(item_id = %item.id, retry_count, error = %err, "webhook dead-lettered");
                Ok(true)
            }
        }
    }
}
