//! In-memory implementations of the core storage ports.
//!
//! Semantics mirror the SQLCipher repositories closely enough for service
//! tests: unique (org, provider, email), conditional queue claims,
//! insert-or-ignore ledger writes and expiring leases.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_core::{
    IntegrationRepository, LeaseRepository, MirrorRepository, SyncStateRepository,
    WebhookQueueRepository,
};
use orgsync_domain::{
    Integration, IntegrationStats, IntegrationStatus, LeaseScope, MirrorKind, MirrorRecord,
    OrgSyncError, ProcessedEvent, Provider, QueueStats, RemoteChange, Result, SyncState,
    WebhookChannel, WebhookQueueItem, WebhookStatus, WebhookTarget,
};
use uuid::Uuid;

#[derive(Default, Clone)]
pub struct MemoryIntegrations {
    rows: Arc<Mutex<HashMap<Uuid, Integration>>>,
}

impl MemoryIntegrations {
    pub fn snapshot(&self, id: Uuid) -> Integration {
        self.rows.lock().unwrap().get(&id).cloned().expect("integration exists")
    }

    /// Test hook for arranging state the services would not produce directly.
    pub fn modify(&self, id: Uuid, f: impl FnOnce(&mut Integration)) {
        let mut rows = self.rows.lock().unwrap();
        f(rows.get_mut(&id).expect("integration exists"));
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl IntegrationRepository for MemoryIntegrations {
    async fn insert(&self, integration: &Integration) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let duplicate = rows.values().any(|row| {
            row.organization_id == integration.organization_id
                && row.provider == integration.provider
                && row.account_email == integration.account_email
        });
        if duplicate {
            return Err(OrgSyncError::Conflict("duplicate account".into()));
        }
        rows.insert(integration.id, integration.clone());
        Ok(())
    }

    async fn update(&self, integration: &Integration) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&integration.id) {
            Some(row) => {
                *row = integration.clone();
                Ok(())
            }
            None => Err(OrgSyncError::NotFound(integration.id.to_string())),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Integration>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_account(
        &self,
        organization_id: &str,
        provider: Provider,
        account_email: &str,
    ) -> Result<Option<Integration>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|row| {
                row.organization_id == organization_id
                    && row.provider == provider
                    && row.account_email == account_email
            })
            .cloned())
    }

    async fn list_by_organization(&self, organization_id: &str) -> Result<Vec<Integration>> {
        Ok(self.filter(|row| row.organization_id == organization_id))
    }

    async fn list_by_organization_and_provider(
        &self,
        organization_id: &str,
        provider: Provider,
    ) -> Result<Vec<Integration>> {
        Ok(self.filter(|row| row.organization_id == organization_id && row.provider == provider))
    }

    async fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Integration>> {
        Ok(self.filter(|row| {
            matches!(row.status, IntegrationStatus::Connected | IntegrationStatus::Refreshing)
                && row.expires_at.is_some_and(|at| at <= before)
        }))
    }

    async fn list_by_status(&self, status: IntegrationStatus) -> Result<Vec<Integration>> {
        Ok(self.filter(|row| row.status == status))
    }

    async fn list_with_stale_key(&self, current_version: u32) -> Result<Vec<Integration>> {
        Ok(self.filter(|row| row.credentials.key_version != current_version))
    }

    async fn find_by_webhook_target(
        &self,
        provider: Provider,
        target: &WebhookTarget,
    ) -> Result<Vec<Integration>> {
        Ok(self.filter(|row| {
            row.provider == provider
                && match target {
                    WebhookTarget::Channel(id) => row.webhook.channel_id.as_deref() == Some(id),
                    WebhookTarget::Subscription(id) => {
                        row.webhook.subscription_id.as_deref() == Some(id)
                    }
                    WebhookTarget::Account(id) => row.account_id == *id,
                }
        }))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        last_error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(id, |row| {
            row.status = status;
            row.last_error = last_error.map(str::to_string);
            row.updated_at = at;
        })
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.mutate(id, |row| row.last_used_at = Some(at))
    }

    async fn update_webhook_channel(
        &self,
        id: Uuid,
        channel: &WebhookChannel,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(id, |row| {
            row.webhook = channel.clone();
            row.updated_at = at;
        })
    }

    async fn stats(&self, organization_id: Option<&str>) -> Result<IntegrationStats> {
        let mut stats = IntegrationStats::default();
        for row in self.rows.lock().unwrap().values() {
            if organization_id.map_or(true, |org| org == row.organization_id) {
                stats.record(row.status, 1);
            }
        }
        Ok(stats)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.rows.lock().unwrap().remove(&id).is_some())
    }
}

impl MemoryIntegrations {
    fn filter(&self, pred: impl Fn(&Integration) -> bool) -> Vec<Integration> {
        let mut rows: Vec<_> = self.rows.lock().unwrap().values().filter(|r| pred(r)).cloned().collect();
        rows.sort_by_key(|row| row.created_at);
        rows
    }

    fn mutate(&self, id: Uuid, f: impl FnOnce(&mut Integration)) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or_else(|| OrgSyncError::NotFound(id.to_string()))?;
        f(row);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MemoryLeases {
    held: Arc<Mutex<HashMap<(Uuid, LeaseScope), (String, DateTime<Utc>)>>>,
}

impl MemoryLeases {
    /// Simulates another worker holding a lease.
    pub fn hold(&self, integration_id: Uuid, scope: LeaseScope, until: DateTime<Utc>) {
        self.held.lock().unwrap().insert((integration_id, scope), ("other-worker".into(), until));
    }

    pub fn is_held(&self, integration_id: Uuid, scope: LeaseScope) -> bool {
        self.held.lock().unwrap().contains_key(&(integration_id, scope))
    }
}

#[async_trait]
impl LeaseRepository for MemoryLeases {
    async fn try_acquire(
        &self,
        integration_id: Uuid,
        scope: LeaseScope,
        holder: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut held = self.held.lock().unwrap();
        if let Some((current, locked_until)) = held.get(&(integration_id, scope)) {
            if current != holder && *locked_until > now {
                return Ok(false);
            }
        }
        held.insert((integration_id, scope), (holder.to_string(), until));
        Ok(true)
    }

    async fn release(&self, integration_id: Uuid, scope: LeaseScope, holder: &str) -> Result<()> {
        let mut held = self.held.lock().unwrap();
        if held.get(&(integration_id, scope)).is_some_and(|(current, _)| current == holder) {
            held.remove(&(integration_id, scope));
        }
        Ok(())
    }
}

#[derive(Default)]
struct QueueInner {
    items: HashMap<Uuid, WebhookQueueItem>,
    claimed_at: HashMap<Uuid, DateTime<Utc>>,
    ledger: HashMap<String, ProcessedEvent>,
}

#[derive(Default, Clone)]
pub struct MemoryQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl MemoryQueue {
    pub fn item(&self, id: Uuid) -> WebhookQueueItem {
        self.inner.lock().unwrap().items.get(&id).cloned().expect("queue item exists")
    }

    pub fn items(&self) -> Vec<WebhookQueueItem> {
        let mut items: Vec<_> = self.inner.lock().unwrap().items.values().cloned().collect();
        items.sort_by_key(|item| (item.created_at, item.id));
        items
    }

    pub fn ledger_len(&self) -> usize {
        self.inner.lock().unwrap().ledger.len()
    }

    pub fn ledger_entry(&self, key: &str) -> Option<ProcessedEvent> {
        self.inner.lock().unwrap().ledger.get(key).cloned()
    }
}

#[async_trait]
impl WebhookQueueRepository for MemoryQueue {
    async fn enqueue(&self, item: &WebhookQueueItem) -> Result<()> {
        self.inner.lock().unwrap().items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookQueueItem>> {
        Ok(self.inner.lock().unwrap().items.get(&id).cloned())
    }

    async fn fetch_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WebhookQueueItem>> {
        let inner = self.inner.lock().unwrap();
        let mut ready: Vec<_> = inner
            .items
            .values()
            .filter(|item| is_ready(item, now))
            .cloned()
            .collect();
        ready.sort_by_key(|item| (item.created_at, item.id));
        ready.truncate(limit);
        Ok(ready)
    }

    async fn try_claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(item) = inner.items.get_mut(&id) else {
            return Ok(false);
        };
        let claimable = item.status == WebhookStatus::Pending
            || (item.status == WebhookStatus::Failed && item.next_retry_at.is_some());
        if !claimable {
            return Ok(false);
        }
        item.status = WebhookStatus::Processing;
        inner.claimed_at.insert(id, now);
        Ok(true)
    }

    async fn is_processed(&self, key: &str) -> Result<bool> {
        Ok(self.inner.lock().unwrap().ledger.contains_key(key))
    }

    async fn complete(
        &self,
        id: Uuid,
        ledger: Option<&ProcessedEvent>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = ledger {
            inner.ledger.entry(entry.key.clone()).or_insert_with(|| entry.clone());
        }
        inner.claimed_at.remove(&id);
        let item = inner.items.get_mut(&id).ok_or_else(|| OrgSyncError::NotFound(id.to_string()))?;
        item.status = WebhookStatus::Completed;
        item.processed_at = Some(now);
        item.next_retry_at = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        retry_count: u32,
        next_retry_at: Option<DateTime<Utc>>,
        error: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.claimed_at.remove(&id);
        let item = inner.items.get_mut(&id).ok_or_else(|| OrgSyncError::NotFound(id.to_string()))?;
        item.status = WebhookStatus::Failed;
        item.retry_count = retry_count;
        item.next_retry_at = next_retry_at;
        item.last_error = Some(error.to_string());
        Ok(())
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.items.len();
        inner.items.retain(|_, item| {
            !(item.status == WebhookStatus::Completed && item.processed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - inner.items.len()) as u64)
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<Uuid> =
            inner.claimed_at.iter().filter(|(_, at)| **at < cutoff).map(|(id, _)| *id).collect();
        for id in &stale {
            inner.claimed_at.remove(id);
            if let Some(item) = inner.items.get_mut(id) {
                item.status = WebhookStatus::Failed;
                item.retry_count += 1;
                item.next_retry_at = (item.retry_count < item.max_retries).then_some(now);
                item.last_error = Some("processing abandoned".into());
            }
        }
        Ok(stale.len() as u64)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for item in self.inner.lock().unwrap().items.values() {
            match item.status {
                WebhookStatus::Pending => stats.pending += 1,
                WebhookStatus::Processing => stats.processing += 1,
                WebhookStatus::Completed => stats.completed += 1,
                WebhookStatus::Failed if item.next_retry_at.is_some() => stats.retrying += 1,
                WebhookStatus::Failed => stats.dead_lettered += 1,
            }
        }
        Ok(stats)
    }
}

fn is_ready(item: &WebhookQueueItem, now: DateTime<Utc>) -> bool {
    match item.status {
        WebhookStatus::Pending => true,
        WebhookStatus::Failed => {
            item.retry_count < item.max_retries && item.next_retry_at.is_some_and(|at| at <= now)
        }
        WebhookStatus::Processing | WebhookStatus::Completed => false,
    }
}

#[derive(Default, Clone)]
pub struct MemorySyncStates {
    rows: Arc<Mutex<HashMap<Uuid, SyncState>>>,
}

impl MemorySyncStates {
    pub fn snapshot(&self, id: Uuid) -> Option<SyncState> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn put(&self, state: SyncState) {
        self.rows.lock().unwrap().insert(state.integration_id, state);
    }
}

#[async_trait]
impl SyncStateRepository for MemorySyncStates {
    async fn get(&self, integration_id: Uuid) -> Result<Option<SyncState>> {
        Ok(self.snapshot(integration_id))
    }

    async fn upsert(&self, state: &SyncState) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let mut next = state.clone();
        if let Some(existing) = rows.get(&state.integration_id) {
            next.webhook_expires_at = existing.webhook_expires_at;
            next.created_at = existing.created_at;
        }
        rows.insert(state.integration_id, next);
        Ok(())
    }

    async fn set_webhook_expiry(
        &self,
        integration_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let state = rows.entry(integration_id).or_insert_with(|| SyncState::new(integration_id, now));
        state.webhook_expires_at = expires_at;
        state.updated_at = now;
        Ok(())
    }

    async fn list_webhook_expiring(&self, before: DateTime<Utc>) -> Result<Vec<SyncState>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|state| state.webhook_expires_at.is_some_and(|at| at <= before))
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct MemoryMirror {
    rows: Arc<Mutex<HashMap<(Uuid, MirrorKind, String), MirrorRecord>>>,
}

impl MemoryMirror {
    pub fn ids(&self, integration_id: Uuid) -> Vec<String> {
        let mut ids: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _, _)| *id == integration_id)
            .map(|(_, _, external)| external.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl MirrorRepository for MemoryMirror {
    async fn apply_changes(
        &self,
        integration_id: Uuid,
        changes: &[RemoteChange],
        _synced_at: DateTime<Utc>,
    ) -> Result<(u64, u64)> {
        let mut rows = self.rows.lock().unwrap();
        let (mut upserted, mut deleted) = (0, 0);
        for change in changes {
            match change {
                RemoteChange::Upsert(record) => {
                    rows.insert((integration_id, record.kind(), record.external_id().to_string()), record.clone());
                    upserted += 1;
                }
                RemoteChange::Removed { kind, external_id } => {
                    if rows.remove(&(integration_id, *kind, external_id.clone())).is_some() {
                        deleted += 1;
                    }
                }
            }
        }
        Ok((upserted, deleted))
    }

    async fn delete_all(&self, integration_id: Uuid) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|(id, _, _), _| *id != integration_id);
        Ok((before - rows.len()) as u64)
    }

    async fn get(
        &self,
        integration_id: Uuid,
        kind: MirrorKind,
        external_id: &str,
    ) -> Result<Option<MirrorRecord>> {
        Ok(self.rows.lock().unwrap().get(&(integration_id, kind, external_id.to_string())).cloned())
    }

    async fn count(&self, integration_id: Uuid, kind: MirrorKind) -> Result<u64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, k, _)| *id == integration_id && *k == kind)
            .count() as u64)
    }
}
