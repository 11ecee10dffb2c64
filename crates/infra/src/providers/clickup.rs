//! ClickUp adapter (API v2, workspace-scoped task listing).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_common::crypto::SignatureEncoding;
use orgsync_core::{
    ChangePage, ChangeQuery, Continuation, ProviderAdapter, Subscription, SubscriptionRequest,
    WebhookRequest, WebhookScheme,
};
use orgsync_domain::{
    MirrorKind, MirrorRecord, OrgSyncError, Provider, ProviderConfig, RefreshedTokens, RemoteChange,
    Result, TaskRecord, TokenGrant, WebhookChannel, WebhookNotification, WebhookTarget,
};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::oauth::OAuthApp;
use super::{api_base, bool_field, endpoint, id_field, str_field, time_field, CursorPage};
use crate::http::HttpClient;

const CLICKUP_API_BASE: &str = "https://api.clickup.com/api/v2";
const CLICKUP_AUTH_URL: &str = "https://app.clickup.com/api";
const CLICKUP_TOKEN_URL: &str = "https://api.clickup.com/api/v2/oauth/token";
const WEBHOOK_EVENTS: [&str; 3] = ["taskCreated", "taskUpdated", "taskDeleted"];

pub struct ClickUpAdapter {
    http: HttpClient,
    oauth: OAuthApp,
    api_base: String,
}

impl ClickUpAdapter {
    pub fn new(config: &ProviderConfig, http: HttpClient) -> Self {
        let auth_base = config.auth_base_url.as_deref();
        Self {
            http,
            oauth: OAuthApp {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                authorize_url: endpoint(CLICKUP_AUTH_URL, auth_base),
                token_url: endpoint(CLICKUP_TOKEN_URL, auth_base),
                scopes: Vec::new(),
                extra_params: Vec::new(),
            },
            api_base: api_base(CLICKUP_API_BASE, config),
        }
    }

    /// ClickUp takes the bare token in `Authorization`, without a scheme.
    fn get(&self, access_token: &str, path: &str) -> RequestBuilder {
        self.http
            .request(Method::GET, format!("{}{path}", self.api_base))
            .header(AUTHORIZATION, access_token)
    }
}

#[async_trait]
impl ProviderAdapter for ClickUpAdapter {
    fn provider(&self) -> Provider {
        Provider::ClickUp
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String> {
        self.oauth.authorization_url(state, redirect_uri)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        let token = self.oauth.exchange_code(&self.http, code, redirect_uri).await?;
        let user: UserResponse = self.http.send_json(self.get(&token.access_token, "/user")).await?;
        let teams: TeamsResponse = self.http.send_json(self.get(&token.access_token, "/team")).await?;
        let team = teams
            .teams
            .first()
            .and_then(|team| id_field(team, "id"))
            .ok_or_else(|| OrgSyncError::InvalidInput("clickup user has no workspace".into()))?;
        let account_email = str_field(&user.user, "email")
            .ok_or_else(|| OrgSyncError::InvalidInput("clickup user without email".into()))?
            .to_string();
        Ok(TokenGrant {
            credentials: token.into_credentials(Utc::now()),
            account_id: team,
            account_email,
            scopes: Vec::new(),
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<RefreshedTokens> {
        Err(OrgSyncError::ReconnectRequired("clickup tokens do not refresh".into()))
    }

    async fn validate_token(&self, access_token: &str) -> Result<bool> {
        match self.http.send_empty(self.get(access_token, "/user")).await {
            Ok(()) => Ok(true),
            Err(OrgSyncError::Auth(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn list_changes(&self, access_token: &str, query: &ChangeQuery) -> Result<ChangePage> {
        let mut cursor = CursorPage::decode(query.page_token.as_deref());
        let since = match &query.continuation {
            Some(Continuation::SyncToken(since)) => Some(since.clone()),
            Some(Continuation::DeltaLink(_)) | None => None,
        };
        if cursor.high_water.is_none() {
            cursor.high_water.clone_from(&since);
        }
        let page: u32 = cursor.page.as_deref().and_then(|p| p.parse().ok()).unwrap_or(0);

        let mut params: Vec<(&str, String)> = vec![
            ("page", page.to_string()),
            ("order_by", "updated".into()),
            ("subtasks", "true".into()),
            ("include_closed", "true".into()),
        ];
        if let Some(since) = &since {
            params.push(("date_updated_gt", since.clone()));
        }
        let response: TasksResponse = self
            .http
            .send_json(self.get(access_token, &format!("/team/{}/task", query.account_id)).query(&params))
            .await?;
        for task in &response.tasks {
            cursor.observe(str_field(task, "date_updated"));
        }
        debug!(page, tasks = response.tasks.len(), "fetched clickup tasks page");

        let last_page = response.last_page.unwrap_or(response.tasks.is_empty());
        Ok(if last_page {
            ChangePage {
                records: response.tasks,
                next_page_token: None,
                continuation: Some(Continuation::SyncToken(
                    cursor.high_water.unwrap_or_else(|| Utc::now().timestamp_millis().to_string()),
                )),
            }
        } else {
            ChangePage {
                records: response.tasks,
                next_page_token: Some(CursorPage::encode(&(page + 1).to_string(), cursor.high_water.as_deref())),
                continuation: None,
            }
        })
    }

    fn normalize_record(&self, raw: &Value) -> Result<RemoteChange> {
        let external_id = id_field(raw, "id")
            .ok_or_else(|| OrgSyncError::InvalidInput("clickup task without id".into()))?;
        if bool_field(raw, "deleted") {
            return Ok(RemoteChange::Removed { kind: MirrorKind::Task, external_id });
        }
        let status = raw.pointer("/status/status").and_then(Value::as_str).map(str::to_string);
        let status_type = raw.pointer("/status/type").and_then(Value::as_str);
        Ok(RemoteChange::Upsert(MirrorRecord::Task(TaskRecord {
            external_id,
            title: str_field(raw, "name").unwrap_or_default().to_string(),
            description: str_field(raw, "text_content").or_else(|| str_field(raw, "description")).map(str::to_string),
            status,
            assignee: raw
                .get("assignees")
                .and_then(Value::as_array)
                .and_then(|assignees| assignees.first())
                .and_then(|a| str_field(a, "email"))
                .map(str::to_string),
            project: raw.pointer("/list/name").and_then(Value::as_str).map(str::to_string),
            due_at: time_field(raw, "due_date"),
            completed: matches!(status_type, Some("closed" | "done")) || str_field(raw, "date_closed").is_some(),
            remote_updated_at: time_field(raw, "date_updated"),
            raw: raw.clone(),
        })))
    }

    fn webhook_scheme(&self) -> WebhookScheme {
        WebhookScheme::Hmac { header: "x-signature", encoding: SignatureEncoding::Hex, timestamp: None }
    }

    fn split_notifications(
        &self,
        request: &WebhookRequest,
        _received_at: DateTime<Utc>,
    ) -> Result<Vec<WebhookNotification>> {
        let body = request.json_body()?;
        let webhook = str_field(&body, "webhook_id")
            .ok_or_else(|| OrgSyncError::InvalidInput("clickup webhook without webhook_id".into()))?;
        let event = str_field(&body, "event").unwrap_or("event");
        let history = body
            .get("history_items")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(|item| id_field(item, "id"));
        let event_id = match history {
            Some(history) => format!("{webhook}-{event}-{history}"),
            None => format!("{webhook}-{event}-{}", id_field(&body, "task_id").unwrap_or_default()),
        };
        Ok(vec![WebhookNotification { event_id, payload: String::from_utf8_lossy(&request.body).into_owned() }])
    }

    fn webhook_target(&self, _headers: &BTreeMap<String, String>, payload: &Value) -> Option<WebhookTarget> {
        str_field(payload, "webhook_id").map(|id| WebhookTarget::Subscription(id.to_string()))
    }

    /// ClickUp generates the signing secret itself and never expires hooks.
    async fn subscribe(&self, access_token: &str, request: &SubscriptionRequest) -> Result<Option<Subscription>> {
        let created: CreatedWebhook = self
            .http
            .send_json(
                self.http
                    .request(Method::POST, format!("{}/team/{}/webhook", self.api_base, request.account_id))
                    .header(AUTHORIZATION, access_token)
                    .json(&json!({ "endpoint": request.callback_url, "events": WEBHOOK_EVENTS })),
            )
            .await?;
        Ok(Some(Subscription {
            channel: WebhookChannel {
                channel_id: None,
                subscription_id: Some(created.id),
                resource_id: Some(request.account_id.clone()),
                secret: created.webhook.and_then(|w| w.secret).or_else(|| Some(request.secret.clone())),
            },
            expires_at: None,
        }))
    }

    async fn unsubscribe(&self, access_token: &str, channel: &WebhookChannel) -> Result<()> {
        let Some(id) = &channel.subscription_id else {
            return Ok(());
        };
        match self
            .http
            .send_empty(
                self.http
                    .request(Method::DELETE, format!("{}/webhook/{id}", self.api_base))
                    .header(AUTHORIZATION, access_token),
            )
            .await
        {
            Err(OrgSyncError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: Value,
}

#[derive(Debug, Deserialize)]
struct TeamsResponse {
    #[serde(default)]
    teams: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    #[serde(default)]
    tasks: Vec<Value>,
    last_page: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CreatedWebhook {
    id: String,
    webhook: Option<WebhookDetails>,
}

#[derive(Debug, Deserialize)]
struct WebhookDetails {
    secret: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> ClickUpAdapter {
        let config = ProviderConfig { client_id: "id".into(), client_secret: "secret".into(), ..Default::default() };
        ClickUpAdapter::new(&config, HttpClient::new().unwrap())
    }

    #[test]
    fn closed_status_marks_completion() {
        let raw = json!({
            "id": "86a1",
            "name": "Write docs",
            "status": {"status": "complete", "type": "closed"},
            "assignees": [{"email": "a@example.com"}],
            "date_updated": "1700000000000"
        });
        let RemoteChange::Upsert(MirrorRecord::Task(task)) = adapter().normalize_record(&raw).unwrap() else {
            panic!("expected task upsert");
        };
        assert!(task.completed);
        assert_eq!(task.assignee.as_deref(), Some("a@example.com"));
        assert_eq!(task.remote_updated_at.map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn deleted_flag_becomes_removal() {
        assert_eq!(
            adapter().normalize_record(&json!({"id": "86a2", "deleted": true})).unwrap(),
            RemoteChange::Removed { kind: MirrorKind::Task, external_id: "86a2".into() }
        );
    }

    #[test]
    fn history_item_keys_the_event() {
        let body = json!({"event": "taskUpdated", "webhook_id": "wh-1", "task_id": "86a3",
                          "history_items": [{"id": "2800763136717140857"}]});
        let request = WebhookRequest { body: body.to_string().into_bytes(), ..Default::default() };
        let notes = adapter().split_notifications(&request, Utc::now()).unwrap();
        assert_eq!(notes[0].event_id, "wh-1-taskUpdated-2800763136717140857");
        assert_eq!(
            adapter().webhook_target(&BTreeMap::new(), &body),
            Some(WebhookTarget::Subscription("wh-1".into()))
        );
    }
}
