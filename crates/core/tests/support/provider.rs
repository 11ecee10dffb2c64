//! Scriptable provider adapter and sync trigger.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_core::{
    ChangePage, ChangeQuery, HandshakeResponse, ProviderAdapter, SecretLocation, Subscription,
    SubscriptionRequest, SyncTrigger, WebhookRequest, WebhookScheme,
};
use orgsync_domain::{
    MirrorKind, MirrorRecord, OrgSyncError, Provider, RefreshedTokens, RemoteChange, Result,
    SyncMode, SyncReport, TaskRecord, TokenGrant, WebhookChannel, WebhookNotification,
    WebhookTarget,
};
use serde_json::{json, Value};
use uuid::Uuid;

/// Provider double. Pages, refresh and exchange results are queued up front
/// and consumed in order; every call is recorded.
pub struct FakeProvider {
    provider: Provider,
    pages: Mutex<VecDeque<Result<ChangePage>>>,
    refreshes: Mutex<VecDeque<Result<RefreshedTokens>>>,
    exchanges: Mutex<VecDeque<Result<TokenGrant>>>,
    pub queries: Mutex<Vec<(String, ChangeQuery)>>,
    pub refresh_calls: Mutex<Vec<String>>,
    pub unsubscribed: Mutex<Vec<WebhookChannel>>,
    pub validate_result: Mutex<bool>,
    pub push_channels: bool,
    pub scheme: WebhookScheme,
}

impl FakeProvider {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            pages: Mutex::default(),
            refreshes: Mutex::default(),
            exchanges: Mutex::default(),
            queries: Mutex::default(),
            refresh_calls: Mutex::default(),
            unsubscribed: Mutex::default(),
            validate_result: Mutex::new(false),
            push_channels: false,
            scheme: WebhookScheme::SharedSecret(SecretLocation::Header("x-test-token")),
        }
    }

    pub fn with_push_channels(mut self) -> Self {
        self.push_channels = true;
        self
    }

    pub fn push_page(&self, page: Result<ChangePage>) {
        self.pages.lock().unwrap().push_back(page);
    }

    pub fn push_refresh(&self, result: Result<RefreshedTokens>) {
        self.refreshes.lock().unwrap().push_back(result);
    }

    pub fn push_exchange(&self, result: Result<TokenGrant>) {
        self.exchanges.lock().unwrap().push_back(result);
    }

    pub fn list_calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

/// Raw record in the fake provider's wire shape.
pub fn task(id: &str, title: &str) -> Value {
    json!({ "id": id, "title": title })
}

pub fn removed_task(id: &str) -> Value {
    json!({ "id": id, "deleted": true })
}

pub fn page(records: Vec<Value>, next_page_token: Option<&str>, sync_token: Option<&str>) -> ChangePage {
    ChangePage {
        records,
        next_page_token: next_page_token.map(str::to_string),
        continuation: sync_token.map(|t| orgsync_core::Continuation::SyncToken(t.to_string())),
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String> {
        Ok(format!("https://auth.example.com/authorize?state={state}&redirect_uri={redirect_uri}"))
    }

    async fn exchange_code(&self, _code: &str, _redirect_uri: &str) -> Result<TokenGrant> {
        self.exchanges
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OrgSyncError::Auth("no exchange scripted".into())))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        self.refresh_calls.lock().unwrap().push(refresh_token.to_string());
        self.refreshes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OrgSyncError::Auth("no refresh scripted".into())))
    }

    async fn validate_token(&self, _access_token: &str) -> Result<bool> {
        Ok(*self.validate_result.lock().unwrap())
    }

    async fn list_changes(&self, access_token: &str, query: &ChangeQuery) -> Result<ChangePage> {
        self.queries.lock().unwrap().push((access_token.to_string(), query.clone()));
        self.pages.lock().unwrap().pop_front().unwrap_or_else(|| Ok(ChangePage::default()))
    }

    fn normalize_record(&self, raw: &Value) -> Result<RemoteChange> {
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| OrgSyncError::InvalidInput("record without id".into()))?;
        if raw.get("deleted").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(RemoteChange::Removed { kind: MirrorKind::Task, external_id: id.to_string() });
        }
        Ok(RemoteChange::Upsert(MirrorRecord::Task(TaskRecord {
            external_id: id.to_string(),
            title: raw.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
            description: None,
            status: None,
            assignee: None,
            project: None,
            due_at: None,
            completed: false,
            remote_updated_at: None,
            raw: raw.clone(),
        })))
    }

    fn webhook_scheme(&self) -> WebhookScheme {
        self.scheme
    }

    fn handshake(&self, request: &WebhookRequest) -> Option<HandshakeResponse> {
        request.query.get("validationToken").map(|token| HandshakeResponse {
            status: 200,
            content_type: "text/plain",
            body: token.clone(),
        })
    }

    fn split_notifications(
        &self,
        request: &WebhookRequest,
        _received_at: DateTime<Utc>,
    ) -> Result<Vec<WebhookNotification>> {
        let payload = String::from_utf8(request.body.clone())
            .map_err(|_| OrgSyncError::InvalidInput("body is not UTF-8".into()))?;
        let event_id = request
            .header("x-event-id")
            .ok_or_else(|| OrgSyncError::InvalidInput("missing event id".into()))?
            .to_string();
        Ok(vec![WebhookNotification { event_id, payload }])
    }

    fn webhook_target(&self, _headers: &BTreeMap<String, String>, payload: &Value) -> Option<WebhookTarget> {
        payload.get("account").and_then(Value::as_str).map(|id| WebhookTarget::Account(id.to_string()))
    }

    async fn subscribe(&self, _access_token: &str, request: &SubscriptionRequest) -> Result<Option<Subscription>> {
        if !self.push_channels {
            return Ok(None);
        }
        Ok(Some(Subscription {
            channel: WebhookChannel {
                channel_id: Some(request.channel_id.clone()),
                subscription_id: None,
                resource_id: Some(format!("res-{}", request.channel_id)),
                secret: Some(request.secret.clone()),
            },
            expires_at: Some(Utc::now() + chrono::Duration::days(7)),
        }))
    }

    async fn unsubscribe(&self, _access_token: &str, channel: &WebhookChannel) -> Result<()> {
        self.unsubscribed.lock().unwrap().push(channel.clone());
        Ok(())
    }
}

/// Sync trigger that records calls and fails on demand.
#[derive(Default)]
pub struct RecordingSync {
    pub calls: Mutex<Vec<Uuid>>,
    failures: Mutex<VecDeque<OrgSyncError>>,
}

impl RecordingSync {
    pub fn fail_next(&self, err: OrgSyncError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn fail_always(&self, err: OrgSyncError, times: usize) {
        for _ in 0..times {
            self.fail_next(err.clone());
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SyncTrigger for RecordingSync {
    async fn sync(&self, integration_id: Uuid) -> Result<SyncReport> {
        self.calls.lock().unwrap().push(integration_id);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(SyncReport::new(integration_id, SyncMode::Incremental))
    }
}
