use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use orgsync_common::time::Clock;
use orgsync_domain::{
    DataKind, Integration, IntegrationStatus, LeaseScope, OrgSyncError, Result, SyncBatchReport,
    SyncConfig, SyncMode, SyncReport, SyncState,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::ports::{MirrorRepository, SyncStateRepository};
use super::SyncTrigger;
use crate::integrations::ports::IntegrationRepository;
use crate::leases::ports::LeaseRepository;
use crate::leases::LeaseGuard;
use crate::providers::ports::{ChangeQuery, Continuation, ProviderAdapter};
use crate::providers::ProviderLookup;
use crate::tokens::TokenRefreshOrchestrator;

/// Guard against providers that never stop handing out page tokens.
const MAX_PAGES_PER_PASS: u32 = 1_000;
const SWEEP_CONCURRENCY: usize = 4;

/// Reconciles remote records against the local mirror using provider
/// continuation tokens, falling back to a full resync when they expire.
pub struct SyncEngine {
    integrations: Arc<dyn IntegrationRepository>,
    states: Arc<dyn SyncStateRepository>,
    mirror: Arc<dyn MirrorRepository>,
    leases: Arc<dyn LeaseRepository>,
    tokens: Arc<TokenRefreshOrchestrator>,
    providers: Arc<ProviderLookup>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    holder: String,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        integrations: Arc<dyn IntegrationRepository>,
        states: Arc<dyn SyncStateRepository>,
        mirror: Arc<dyn MirrorRepository>,
        leases: Arc<dyn LeaseRepository>,
        tokens: Arc<TokenRefreshOrchestrator>,
        providers: Arc<ProviderLookup>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            integrations,
            states,
            mirror,
            leases,
            tokens,
            providers,
            clock,
            config,
            holder: format!("sync-{}", Uuid::new_v4()),
        }
    }

    /// Runs one sync pass: incremental when a continuation is stored, full
    /// otherwise. Failures are recorded in `last_sync_error` and returned.
    #[instrument(skip(self))]
    pub async fn sync(&self, integration_id: Uuid) -> Result<SyncReport> {
        let integration = self
            .integrations
            .get(integration_id)
            .await?
            .ok_or_else(|| OrgSyncError::NotFound(format!("integration {integration_id}")))?;
        if matches!(integration.status, IntegrationStatus::Disconnected | IntegrationStatus::Error) {
            return Err(OrgSyncError::InvalidInput(format!(
                "integration {integration_id} is {} and cannot sync",
                integration.status
            )));
        }

        let Some(lease) = LeaseGuard::acquire(
            &self.leases,
            integration_id,
            LeaseScope::Sync,
            &self.holder,
            Duration::seconds(self.config.lease_secs),
            self.clock.now(),
        )
        .await?
        else {
            return Err(OrgSyncError::Conflict(format!(
                "sync already running for integration {integration_id}"
            )));
        };

        let result = self.run(&integration).await;
        if let Err(err) = &result {
            self.record_error(integration_id, err).await;
        }
        lease.release().await;

        if let Ok(report) = &result {
            info!(
                provider = %integration.provider,
                mode = %report.mode,
                upserted = report.upserted,
                deleted = report.deleted,
                pages = report.pages,
                recovered = report.recovered_from_expired_token,
                "sync pass finished"
            );
        }
        result
    }

    /// Scheduler sweep over every connected integration. Each integration
    /// succeeds or fails on its own; busy ones are skipped.
    #[instrument(skip(self))]
    pub async fn sync_all(&self) -> Result<SyncBatchReport> {
        let connected = self.integrations.list_by_status(IntegrationStatus::Connected).await?;

        let outcomes: Vec<_> = stream::iter(connected)
            .map(|integration| async move { (integration.id, self.sync(integration.id).await) })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        let mut report = SyncBatchReport::default();
        for (integration_id, outcome) in outcomes {
            match outcome {
                Ok(_) => report.synced += 1,
                Err(OrgSyncError::Conflict(_)) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(%integration_id, error = %err, "scheduled sync failed");
                }
            }
        }
        info!(synced = report.synced, failed = report.failed, skipped = report.skipped, "sync sweep finished");
        Ok(report)
    }

    async fn run(&self, integration: &Integration) -> Result<SyncReport> {
        let adapter = self.providers.get(integration.provider)?;
        match self.run_pass(integration, adapter.as_ref()).await {
            Err(err) if err.is_auth() => {
                info!(integration_id = %integration.id, "provider rejected access token; refreshing once");
                self.tokens.force_refresh(integration.id).await?;
                self.run_pass(integration, adapter.as_ref()).await
            }
            other => other,
        }
    }

    async fn run_pass(&self, integration: &Integration, adapter: &dyn ProviderAdapter) -> Result<SyncReport> {
        let access_token = self.tokens.get_valid_token(integration.id).await?;
        let mut state = self
            .states
            .get(integration.id)
            .await?
            .unwrap_or_else(|| SyncState::new(integration.id, self.clock.now()));

        let Some(continuation) = stored_continuation(&state) else {
            return self.full_sync(integration, adapter, &access_token, &mut state).await;
        };

        match self.incremental_sync(integration, adapter, &access_token, &mut state, continuation).await {
            Err(OrgSyncError::SyncTokenExpired(reason)) => {
                warn!(integration_id = %integration.id, %reason, "continuation expired; wiping mirror for full resync");
                state.clear_continuation();
                state.updated_at = self.clock.now();
                self.states.upsert(&state).await?;
                let wiped = self.mirror.delete_all(integration.id).await?;
                debug!(integration_id = %integration.id, wiped, "mirror cleared");

                let mut report = self.full_sync(integration, adapter, &access_token, &mut state).await?;
                report.recovered_from_expired_token = true;
                Ok(report)
            }
            other => other,
        }
    }

    async fn full_sync(
        &self,
        integration: &Integration,
        adapter: &dyn ProviderAdapter,
        access_token: &str,
        state: &mut SyncState,
    ) -> Result<SyncReport> {
        let now = self.clock.now();
        let window_start = match integration.provider.data_kind() {
            DataKind::CalendarEvents => Some(now - Duration::days(self.config.calendar_lookback_days)),
            DataKind::Tasks | DataKind::Employees => None,
        };

        let (report, continuation) = self
            .page_through(integration, adapter, access_token, SyncMode::Full, None, window_start)
            .await?;

        let finished = self.clock.now();
        if let Some(continuation) = continuation {
            store_continuation(state, continuation);
        }
        state.last_full_sync_at = Some(finished);
        state.last_sync_error = None;
        state.updated_at = finished;
        self.states.upsert(state).await?;
        Ok(report)
    }

    async fn incremental_sync(
        &self,
        integration: &Integration,
        adapter: &dyn ProviderAdapter,
        access_token: &str,
        state: &mut SyncState,
        continuation: Continuation,
    ) -> Result<SyncReport> {
        let (report, next) = self
            .page_through(integration, adapter, access_token, SyncMode::Incremental, Some(continuation), None)
            .await?;

        let finished = self.clock.now();
        if let Some(next) = next {
            store_continuation(state, next);
        }
        state.last_incremental_sync_at = Some(finished);
        state.last_sync_error = None;
        state.updated_at = finished;
        self.states.upsert(state).await?;
        Ok(report)
    }

    /// Pages until the provider stops returning page tokens, applying each
    /// page to the mirror as it arrives. Returns the continuation from the
    /// final page.
    async fn page_through(
        &self,
        integration: &Integration,
        adapter: &dyn ProviderAdapter,
        access_token: &str,
        mode: SyncMode,
        continuation: Option<Continuation>,
        window_start: Option<DateTime<Utc>>,
    ) -> Result<(SyncReport, Option<Continuation>)> {
        let mut query = ChangeQuery {
            account_id: integration.account_id.clone(),
            continuation,
            page_token: None,
            window_start,
            page_size: self.config.page_size,
        };
        let mut report = SyncReport::new(integration.id, mode);
        let mut next_continuation = None;

        loop {
            if report.pages >= MAX_PAGES_PER_PASS {
                return Err(OrgSyncError::Internal(format!(
                    "{} pagination did not terminate after {MAX_PAGES_PER_PASS} pages",
                    integration.provider
                )));
            }
            let page = adapter.list_changes(access_token, &query).await?;
            report.pages += 1;

            let mut changes = Vec::with_capacity(page.records.len());
            for raw in &page.records {
                match adapter.normalize_record(raw) {
                    Ok(change) => changes.push(change),
                    Err(err) => warn!(integration_id = %integration.id, error = %err, "skipping unreadable record"),
                }
            }
            if !changes.is_empty() {
                let (upserted, deleted) =
                    self.mirror.apply_changes(integration.id, &changes, self.clock.now()).await?;
                report.upserted += upserted;
                report.deleted += deleted;
            }

            if page.continuation.is_some() {
                next_continuation = page.continuation;
            }
            match page.next_page_token {
                Some(token) => query.page_token = Some(token),
                None => break,
            }
        }

        Ok((report, next_continuation))
    }

    async fn record_error(&self, integration_id: Uuid, err: &OrgSyncError) {
        let now = self.clock.now();
        let outcome = async {
            let mut state = self
                .states
                .get(integration_id)
                .await?
                .unwrap_or_else(|| SyncState::new(integration_id, now));
            state.last_sync_error = Some(err.to_string());
            state.updated_at = now;
            self.states.upsert(&state).await
        }
        .await;
        if let Err(store_err) = outcome {
            warn!(%integration_id, error = %store_err, "failed to record sync error");
        }
    }
}

#[async_trait]
impl SyncTrigger for SyncEngine {
    async fn sync(&self, integration_id: Uuid) -> Result<SyncReport> {
        SyncEngine::sync(self, integration_id).await
    }
}

fn stored_continuation(state: &SyncState) -> Option<Continuation> {
    state
        .delta_link
        .clone()
        .map(Continuation::DeltaLink)
        .or_else(|| state.sync_token.clone().map(Continuation::SyncToken))
}

fn store_continuation(state: &mut SyncState, continuation: Continuation) {
    match continuation {
        Continuation::SyncToken(token) => {
            state.sync_token = Some(token);
            state.delta_link = None;
        }
        Continuation::DeltaLink(link) => {
            state.delta_link = Some(link);
            state.sync_token = None;
        }
    }
}
