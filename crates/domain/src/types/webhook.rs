//! Webhook inbox items, the idempotency ledger and routing targets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::provider::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

crate::impl_domain_status_conversions!(WebhookStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

/// Durable inbox row for one provider notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookQueueItem {
    pub id: Uuid,
    pub provider: Provider,
    pub event_id: String,
    /// Raw notification body as received.
    pub payload: String,
    /// Lower-cased request headers.
    pub headers: BTreeMap<String, String>,
    pub organization_id: Option<String>,
    pub status: WebhookStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookQueueItem {
    pub fn new(
        provider: Provider,
        event_id: impl Into<String>,
        payload: impl Into<String>,
        headers: BTreeMap<String, String>,
        organization_id: Option<String>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            provider,
            event_id: event_id.into(),
            payload: payload.into(),
            headers,
            organization_id,
            status: WebhookStatus::Pending,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            last_error: None,
            created_at: now,
            processed_at: None,
        }
    }

    /// Ledger key shared by every delivery of the same provider event.
    pub fn ledger_key(&self) -> String {
        ProcessedEvent::key(self.provider, &self.event_id)
    }

    /// Permanently failed: no further attempts will be scheduled.
    pub const fn is_dead_lettered(&self) -> bool {
        matches!(self.status, WebhookStatus::Failed) && self.next_retry_at.is_none()
    }
}

/// Idempotency ledger entry. Write-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub key: String,
    pub provider: Provider,
    pub event_id: String,
    pub integration_id: Option<Uuid>,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedEvent {
    pub fn key(provider: Provider, event_id: &str) -> String {
        format!("{provider}:{event_id}")
    }

    pub fn for_item(item: &WebhookQueueItem, integration_id: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            key: item.ledger_key(),
            provider: item.provider,
            event_id: item.event_id.clone(),
            integration_id,
            processed_at: now,
        }
    }
}

/// How a notification identifies the integration it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum WebhookTarget {
    /// Push channel id registered by us (Google watch channels).
    Channel(String),
    /// Provider-side subscription id.
    Subscription(String),
    /// Remote account or workspace id captured at connect time.
    Account(String),
}

/// One logical notification extracted from a webhook request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotification {
    pub event_id: String,
    pub payload: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub claimed: u64,
    pub completed: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    /// Failed items still scheduled for another attempt.
    pub retrying: u64,
    pub dead_lettered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_key_joins_provider_and_event() {
        let item = WebhookQueueItem::new(
            Provider::Microsoft,
            "sub1-updated-1700000000000",
            "{}",
            BTreeMap::new(),
            None,
            5,
            Utc::now(),
        );
        assert_eq!(item.ledger_key(), "microsoft:sub1-updated-1700000000000");
        assert_eq!(item.status, WebhookStatus::Pending);
        assert!(!item.is_dead_lettered());
    }

    #[test]
    fn target_serializes_with_kind() {
        let json = serde_json::to_value(WebhookTarget::Channel("chan-1".into())).unwrap();
        assert_eq!(json["kind"], "channel");
        assert_eq!(json["id"], "chan-1");
    }
}
