//! Integration records: one external account linked to one organization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::credentials::{EncryptedCredentials, OAuthCredentials};
use super::provider::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Connected,
    Disconnected,
    Error,
    Refreshing,
}

crate::impl_domain_status_conversions!(IntegrationStatus {
    Connected => "connected",
    Disconnected => "disconnected",
    Error => "error",
    Refreshing => "refreshing",
});

/// Push-notification identifiers registered with the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookChannel {
    pub channel_id: Option<String>,
    pub subscription_id: Option<String>,
    /// Provider-side resource handle needed to stop a channel.
    pub resource_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
}

impl WebhookChannel {
    pub const fn is_empty(&self) -> bool {
        self.channel_id.is_none() && self.subscription_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub id: Uuid,
    pub organization_id: String,
    pub provider: Provider,
    /// Normalized with [`Integration::normalize_email`].
    pub account_email: String,
    pub account_id: String,
    pub status: IntegrationStatus,
    pub scopes: Vec<String>,
    pub credentials: EncryptedCredentials,
    pub webhook: WebhookChannel,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub refresh_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    pub fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    pub fn is_connected(&self) -> bool {
        self.status == IntegrationStatus::Connected
    }

    /// True when the access token expires within `buffer` of `now`.
    /// Integrations without an expiry (permanent tokens) never need refresh.
    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: chrono::Duration) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at - buffer)
    }
}

/// Input to `IntegrationRegistry::connect`.
#[derive(Debug, Clone)]
pub struct ConnectIntegration {
    pub organization_id: String,
    pub provider: Provider,
    pub account_email: String,
    pub account_id: String,
    pub scopes: Vec<String>,
    pub credentials: OAuthCredentials,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationStats {
    pub total: u64,
    pub connected: u64,
    pub disconnected: u64,
    pub error: u64,
    pub refreshing: u64,
}

impl IntegrationStats {
    pub fn record(&mut self, status: IntegrationStatus, count: u64) {
        self.total += count;
        match status {
            IntegrationStatus::Connected => self.connected += count,
            IntegrationStatus::Disconnected => self.disconnected += count,
            IntegrationStatus::Error => self.error += count,
            IntegrationStatus::Refreshing => self.refreshing += count,
        }
    }
}

/// Advisory per-integration lease scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseScope {
    Sync,
    Refresh,
}

crate::impl_domain_status_conversions!(LeaseScope {
    Sync => "sync",
    Refresh => "refresh",
});
