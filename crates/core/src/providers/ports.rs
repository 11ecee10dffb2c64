//! Provider adapter port
//!
//! One adapter per SaaS provider hides its OAuth endpoints, listing API,
//! record shapes and webhook conventions behind [`ProviderAdapter`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_common::crypto::SignatureEncoding;
use orgsync_domain::{
    Provider, RefreshedTokens, RemoteChange, Result, TokenGrant, WebhookChannel,
    WebhookNotification, WebhookTarget,
};
use serde_json::Value;

/// Continuation persisted between sync passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Opaque token or cursor stored in `sync_states.sync_token`.
    SyncToken(String),
    /// Absolute URL stored in `sync_states.delta_link`.
    DeltaLink(String),
}

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeQuery {
    /// Remote account (workspace, company) the listing is scoped to.
    pub account_id: String,
    /// `None` requests a full listing.
    pub continuation: Option<Continuation>,
    /// Page token (or next-page URL) from the previous page of this pass.
    pub page_token: Option<String>,
    /// Lower bound for full listings of time-bounded data.
    pub window_start: Option<DateTime<Utc>>,
    pub page_size: u32,
}

/// One page of raw provider records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePage {
    pub records: Vec<Value>,
    pub next_page_token: Option<String>,
    /// Present on the last page of a pass.
    pub continuation: Option<Continuation>,
}

/// Where a shared-secret scheme carries the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretLocation {
    Header(&'static str),
    /// Field inside each individual notification.
    NotificationField(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampUnit {
    Seconds,
    Millis,
}

/// Replay protection for signed webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampCheck {
    pub location: SecretLocation,
    pub unit: TimestampUnit,
    /// Whether the timestamp is appended to the body before signing.
    pub salted: bool,
    /// Provider-mandated window; `None` uses the configured default.
    pub window_secs: Option<i64>,
}

/// How a provider proves it sent a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookScheme {
    SharedSecret(SecretLocation),
    Hmac { header: &'static str, encoding: SignatureEncoding, timestamp: Option<TimestampCheck> },
}

/// Inbound webhook request, transport-neutral.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json_body(&self) -> Result<Value> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body).map_err(|e| {
            orgsync_domain::OrgSyncError::InvalidInput(format!("webhook body is not JSON: {e}"))
        })
    }
}

/// Immediate response for validation handshakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

/// Push-channel registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub callback_url: String,
    /// Locally generated channel id.
    pub channel_id: String,
    /// Shared secret the provider will echo back.
    pub secret: String,
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub channel: WebhookChannel,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Provider consent URL carrying `state` and returning to `redirect_uri`.
    fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String>;

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant>;

    /// Exchanges a refresh token. Providers whose tokens never refresh return
    /// `OrgSyncError::ReconnectRequired`.
    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedTokens>;

    /// Identity probe used to confirm a non-refreshable token still works.
    async fn validate_token(&self, _access_token: &str) -> Result<bool> {
        Ok(false)
    }

    /// Lists one page of changes. An expired continuation must surface as
    /// `OrgSyncError::SyncTokenExpired`; a rejected token as
    /// `OrgSyncError::Auth`.
    async fn list_changes(&self, access_token: &str, query: &ChangeQuery) -> Result<ChangePage>;

    /// Maps one raw record onto the mirror, folding every removal marker into
    /// [`RemoteChange::Removed`].
    fn normalize_record(&self, raw: &Value) -> Result<RemoteChange>;

    fn webhook_scheme(&self) -> WebhookScheme;

    /// Validation handshakes answered without enqueueing anything.
    fn handshake(&self, _request: &WebhookRequest) -> Option<HandshakeResponse> {
        None
    }

    /// Splits a request body into individual notifications with stable
    /// event ids.
    fn split_notifications(
        &self,
        request: &WebhookRequest,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<WebhookNotification>>;

    /// Routing target for a stored notification.
    fn webhook_target(&self, headers: &BTreeMap<String, String>, payload: &Value) -> Option<WebhookTarget>;

    /// Registers a push channel. `Ok(None)` when the provider has no API for it.
    async fn subscribe(
        &self,
        _access_token: &str,
        _request: &SubscriptionRequest,
    ) -> Result<Option<Subscription>> {
        Ok(None)
    }

    async fn unsubscribe(&self, _access_token: &str, _channel: &WebhookChannel) -> Result<()> {
        Ok(())
    }
}
