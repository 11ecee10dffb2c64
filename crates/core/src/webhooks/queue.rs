use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use orgsync_common::time::Clock;
use orgsync_domain::{Provider, QueueStats, Result, WebhookConfig, WebhookQueueItem};
use tracing::{debug, info, instrument};

use super::ports::WebhookQueueRepository;

/// Durable webhook inbox.
pub struct WebhookQueue {
    repository: Arc<dyn WebhookQueueRepository>,
    clock: Arc<dyn Clock>,
    config: WebhookConfig,
}

impl WebhookQueue {
    pub fn new(
        repository: Arc<dyn WebhookQueueRepository>,
        clock: Arc<dyn Clock>,
        config: WebhookConfig,
    ) -> Self {
        Self { repository, clock, config }
    }

    /// Appends a `pending` item. Duplicates are accepted here; the ledger
    /// deduplicates at dispatch time.
    #[instrument(skip(self, payload, headers))]
    pub async fn enqueue(
        &self,
        provider: Provider,
        event_id: &str,
        payload: String,
        headers: BTreeMap<String, String>,
        organization_id: Option<String>,
    ) -> Result<WebhookQueueItem> {
        let item = WebhookQueueItem::new(
            provider,
            event_id,
            payload,
            headers,
            organization_id,
            self.config.max_retries,
            self.clock.now(),
        );
        self.repository.enqueue(&item).await?;
        debug!(item_id = %item.id, "webhook enqueued");
        Ok(item)
    }

    /// Deletes completed items past the retention period. Failed items are
    /// kept for inspection.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<u64> {
        let cutoff = self.clock.now() - Duration::days(self.config.completed_retention_days);
        let deleted = self.repository.delete_completed_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "removed completed webhook items");
        }
        Ok(deleted)
    }

    /// Returns items stuck in `processing` for longer than `older_than` to the
    /// retry path.
    #[instrument(skip(self))]
    pub async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let now = self.clock.now();
        let requeued = self.repository.requeue_stale(now - older_than, now).await?;
        if requeued > 0 {
            info!(requeued, "requeued abandoned webhook items");
        }
        Ok(requeued)
    }

    /// Uses the configured staleness threshold.
    pub async fn requeue_stale_default(&self) -> Result<u64> {
        self.requeue_stale(Duration::seconds(self.config.stale_processing_secs)).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.repository.stats().await
    }
}
