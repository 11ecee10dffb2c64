//! Background jobs driven by the cron scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use orgsync_core::{SyncEngine, TokenRefreshOrchestrator, WebhookDispatcher, WebhookQueue, WebhookRenewalService};
use orgsync_domain::Result;
use tracing::{debug, info};

/// A unit of periodic work.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Stable name used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

/// Refreshes access tokens that expire within the refresh horizon.
pub struct TokenRefreshJob {
    tokens: Arc<TokenRefreshOrchestrator>,
}

impl TokenRefreshJob {
    pub fn new(tokens: Arc<TokenRefreshOrchestrator>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl ScheduledJob for TokenRefreshJob {
    fn name(&self) -> &'static str {
        "token_refresh"
    }

    async fn run(&self) -> Result<()> {
        let report = self.tokens.refresh_expiring_tokens().await?;
        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                refreshed = report.refreshed,
                failed = report.failed,
                skipped = report.skipped,
                "token refresh pass finished"
            );
        }
        Ok(())
    }
}

/// Releases stalled deliveries, then drains one batch of due webhooks.
pub struct WebhookDispatchJob {
    queue: Arc<WebhookQueue>,
    dispatcher: Arc<WebhookDispatcher>,
    batch_size: usize,
}

impl WebhookDispatchJob {
    pub fn new(queue: Arc<WebhookQueue>, dispatcher: Arc<WebhookDispatcher>, batch_size: usize) -> Self {
        Self { queue, dispatcher, batch_size }
    }
}

#[async_trait]
impl ScheduledJob for WebhookDispatchJob {
    fn name(&self) -> &'static str {
        "webhook_dispatch"
    }

    async fn run(&self) -> Result<()> {
        let requeued = self.queue.requeue_stale_default().await?;
        if requeued > 0 {
            info!(requeued, "released stalled webhook deliveries");
        }
        let report = self.dispatcher.dispatch_batch(self.batch_size).await?;
        debug!(?report, "webhook dispatch pass finished");
        Ok(())
    }
}

/// Purges completed webhooks past the retention window.
pub struct WebhookCleanupJob {
    queue: Arc<WebhookQueue>,
}

impl WebhookCleanupJob {
    pub fn new(queue: Arc<WebhookQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ScheduledJob for WebhookCleanupJob {
    fn name(&self) -> &'static str {
        "webhook_cleanup"
    }

    async fn run(&self) -> Result<()> {
        let removed = self.queue.cleanup().await?;
        info!(removed, "webhook cleanup finished");
        Ok(())
    }
}

/// Renews webhook channels that expire within `window`.
pub struct WebhookRenewalJob {
    renewal: Arc<WebhookRenewalService>,
    window: chrono::Duration,
}

impl WebhookRenewalJob {
    pub fn new(renewal: Arc<WebhookRenewalService>, window: chrono::Duration) -> Self {
        Self { renewal, window }
    }
}

#[async_trait]
impl ScheduledJob for WebhookRenewalJob {
    fn name(&self) -> &'static str {
        "webhook_renewal"
    }

    async fn run(&self) -> Result<()> {
        let report = self.renewal.renew_expiring(self.window).await?;
        if report.renewed + report.failed > 0 {
            info!(renewed = report.renewed, failed = report.failed, skipped = report.skipped, "webhook renewal finished");
        }
        Ok(())
    }
}

/// Incremental sync of every connected integration.
pub struct SyncSweepJob {
    engine: Arc<SyncEngine>,
}

impl SyncSweepJob {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ScheduledJob for SyncSweepJob {
    fn name(&self) -> &'static str {
        "sync_sweep"
    }

    async fn run(&self) -> Result<()> {
        let report = self.engine.sync_all().await?;
        info!(?report, "sync sweep finished");
        Ok(())
    }
}
