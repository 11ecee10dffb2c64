//! Port interface for the webhook inbox and idempotency ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_domain::{ProcessedEvent, QueueStats, Result, WebhookQueueItem};
use uuid::Uuid;

#[async_trait]
pub trait WebhookQueueRepository: Send + Sync {
    async fn enqueue(&self, item: &WebhookQueueItem) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<WebhookQueueItem>>;

    /// Pending items plus failed items due for retry, oldest first.
    async fn fetch_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WebhookQueueItem>>;

    /// Conditional `pending|failed -> processing` transition. `false` when
    /// another worker claimed the item first.
    async fn try_claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn is_processed(&self, key: &str) -> Result<bool>;

    /// Marks the item completed, writing the ledger entry in the same
    /// transaction when one is given. Ledger writes are insert-or-ignore.
    async fn complete(
        &self,
        id: Uuid,
        ledger: Option<&ProcessedEvent>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Records a failed attempt. `next_retry_at = None` dead-letters the item.
    async fn mark_failed(
        &self,
        id: Uuid,
        retry_count: u32,
        next_retry_at: Option<DateTime<Utc>>,
        error: &str,
    ) -> Result<()>;

    /// Deletes completed items processed before `cutoff`.
    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Returns items stuck in `processing` since before `cutoff` to the retry
    /// path with an immediate retry. The abandoned attempt counts toward
    /// `max_retries`, and an item that exhausts them is dead-lettered.
    async fn requeue_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64>;

    async fn stats(&self) -> Result<QueueStats>;
}
