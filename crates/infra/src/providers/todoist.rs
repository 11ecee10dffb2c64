//! Todoist adapter (Sync API).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_common::crypto::SignatureEncoding;
use orgsync_core::{ChangePage, ChangeQuery, Continuation, ProviderAdapter, WebhookRequest, WebhookScheme};
use orgsync_domain::{
    MirrorKind, MirrorRecord, OrgSyncError, Provider, ProviderConfig, RefreshedTokens, RemoteChange,
    Result, TaskRecord, TokenGrant, WebhookNotification, WebhookTarget,
};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::oauth::OAuthApp;
use super::{api_base, bool_field, endpoint, id_field, str_field, time_field};
use crate::http::HttpClient;

const TODOIST_API_BASE: &str = "https://api.todoist.com";
const TODOIST_AUTH_URL: &str = "https://todoist.com/oauth/authorize";
const TODOIST_TOKEN_URL: &str = "https://todoist.com/oauth/access_token";
/// Sync token requesting a full snapshot.
const FULL_SYNC_TOKEN: &str = "*";

pub struct TodoistAdapter {
    http: HttpClient,
    oauth: OAuthApp,
    api_base: String,
}

impl TodoistAdapter {
    pub fn new(config: &ProviderConfig, http: HttpClient) -> Self {
        let auth_base = config.auth_base_url.as_deref();
        Self {
            http,
            oauth: OAuthApp {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                authorize_url: endpoint(TODOIST_AUTH_URL, auth_base),
                token_url: endpoint(TODOIST_TOKEN_URL, auth_base),
                scopes: vec!["data:read".into()],
                extra_params: Vec::new(),
            },
            api_base: api_base(TODOIST_API_BASE, config),
        }
    }

    async fn sync(&self, access_token: &str, sync_token: &str, resource_types: &str) -> Result<SyncResponse> {
        self.http
            .send_json(
                self.http
                    .request(Method::POST, format!("{}/sync/v9/sync", self.api_base))
                    .bearer_auth(access_token)
                    .form(&[("sync_token", sync_token), ("resource_types", resource_types)]),
            )
            .await
    }
}

#[async_trait]
impl ProviderAdapter for TodoistAdapter {
    fn provider(&self) -> Provider {
        Provider::Todoist
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String> {
        self.oauth.authorization_url(state, redirect_uri)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        let token = self.oauth.exchange_code(&self.http, code, redirect_uri).await?;
        let snapshot = self.sync(&token.access_token, FULL_SYNC_TOKEN, r#"["user"]"#).await?;
        let user = snapshot.user.ok_or_else(|| OrgSyncError::InvalidInput("todoist sync without user".into()))?;
        let account_id =
            id_field(&user, "id").ok_or_else(|| OrgSyncError::InvalidInput("todoist user without id".into()))?;
        let account_email = str_field(&user, "email")
            .ok_or_else(|| OrgSyncError::InvalidInput("todoist user without email".into()))?
            .to_string();
        let scopes = token.scopes(&self.oauth.scopes);
        Ok(TokenGrant { credentials: token.into_credentials(Utc::now()), account_id, account_email, scopes })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<RefreshedTokens> {
        Err(OrgSyncError::ReconnectRequired("todoist tokens do not refresh".into()))
    }

    async fn validate_token(&self, access_token: &str) -> Result<bool> {
        match self.sync(access_token, FULL_SYNC_TOKEN, r#"["user"]"#).await {
            Ok(snapshot) => Ok(snapshot.user.is_some()),
            Err(OrgSyncError::Auth(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// The Sync API answers in one page; an expired token comes back as 410.
    async fn list_changes(&self, access_token: &str, query: &ChangeQuery) -> Result<ChangePage> {
        let token = match &query.continuation {
            Some(Continuation::SyncToken(token)) => token.as_str(),
            Some(Continuation::DeltaLink(_)) | None => FULL_SYNC_TOKEN,
        };
        let snapshot = self.sync(access_token, token, r#"["items"]"#).await?;
        debug!(items = snapshot.items.len(), full_sync = snapshot.full_sync, "fetched todoist items");
        Ok(ChangePage {
            records: snapshot.items,
            next_page_token: None,
            continuation: snapshot.sync_token.map(Continuation::SyncToken),
        })
    }

    fn normalize_record(&self, raw: &Value) -> Result<RemoteChange> {
        let external_id = id_field(raw, "id")
            .ok_or_else(|| OrgSyncError::InvalidInput("todoist item without id".into()))?;
        if bool_field(raw, "is_deleted") {
            return Ok(RemoteChange::Removed { kind: MirrorKind::Task, external_id });
        }
        let completed = bool_field(raw, "checked");
        Ok(RemoteChange::Upsert(MirrorRecord::Task(TaskRecord {
            external_id,
            title: str_field(raw, "content").unwrap_or_default().to_string(),
            description: str_field(raw, "description").map(str::to_string),
            status: Some(if completed { "completed" } else { "open" }.to_string()),
            assignee: id_field(raw, "responsible_uid"),
            project: id_field(raw, "project_id"),
            due_at: raw.get("due").and_then(|due| time_field(due, "date")),
            completed,
            remote_updated_at: time_field(raw, "updated_at"),
            raw: raw.clone(),
        })))
    }

    fn webhook_scheme(&self) -> WebhookScheme {
        WebhookScheme::Hmac { header: "x-todoist-hmac-sha256", encoding: SignatureEncoding::Base64, timestamp: None }
    }

    fn split_notifications(
        &self,
        request: &WebhookRequest,
        _received_at: DateTime<Utc>,
    ) -> Result<Vec<WebhookNotification>> {
        let body = request.json_body()?;
        let event_id = match request.header("x-todoist-delivery-id") {
            Some(delivery) if !delivery.is_empty() => delivery.to_string(),
            _ => {
                let name = str_field(&body, "event_name")
                    .ok_or_else(|| OrgSyncError::InvalidInput("todoist webhook without event_name".into()))?;
                let id = body.get("event_data").and_then(|data| id_field(data, "id")).unwrap_or_default();
                let at = str_field(&body, "triggered_at").unwrap_or_default();
                format!("{name}-{id}-{at}")
            }
        };
        Ok(vec![WebhookNotification { event_id, payload: String::from_utf8_lossy(&request.body).into_owned() }])
    }

    fn webhook_target(&self, _headers: &BTreeMap<String, String>, payload: &Value) -> Option<WebhookTarget> {
        id_field(payload, "user_id").map(WebhookTarget::Account)
    }
}

#[derive(Debug, Deserialize)]
struct SyncResponse {
    sync_token: Option<String>,
    #[serde(default)]
    full_sync: bool,
    #[serde(default)]
    items: Vec<Value>,
    user: Option<Value>,
}
