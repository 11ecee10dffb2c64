//! Linear adapter (GraphQL issues API).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_common::crypto::SignatureEncoding;
use orgsync_core::{
    ChangePage, ChangeQuery, Continuation, ProviderAdapter, SecretLocation, TimestampCheck,
    TimestampUnit, WebhookRequest, WebhookScheme,
};
use orgsync_domain::{
    MirrorKind, MirrorRecord, OrgSyncError, Provider, ProviderConfig, RefreshedTokens, RemoteChange,
    Result, TaskRecord, TokenGrant, WebhookNotification, WebhookTarget,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::oauth::OAuthApp;
use super::{api_base, endpoint, str_field, time_field, CursorPage};
use crate::http::HttpClient;

const LINEAR_API_BASE: &str = "https://api.linear.app";
const LINEAR_AUTH_URL: &str = "https://linear.app/oauth/authorize";
const LINEAR_TOKEN_URL: &str = "https://api.linear.app/oauth/token";
const REPLAY_WINDOW_SECS: i64 = 60;

const ISSUES_QUERY: &str = "query Issues($first: Int!, $after: String, $filter: IssueFilter) {
  issues(first: $first, after: $after, filter: $filter, includeArchived: true, orderBy: updatedAt) {
    nodes {
      id title description dueDate completedAt archivedAt updatedAt
      state { name }
      assignee { email }
      project { name }
    }
    pageInfo { hasNextPage endCursor }
  }
}";

const VIEWER_QUERY: &str = "query { viewer { id email } organization { id } }";

pub struct LinearAdapter {
    http: HttpClient,
    oauth: OAuthApp,
    api_base: String,
}

impl LinearAdapter {
    pub fn new(config: &ProviderConfig, http: HttpClient) -> Self {
        let auth_base = config.auth_base_url.as_deref();
        Self {
            http,
            oauth: OAuthApp {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                authorize_url: endpoint(LINEAR_AUTH_URL, auth_base),
                token_url: endpoint(LINEAR_TOKEN_URL, auth_base),
                scopes: vec!["read".into()],
                extra_params: vec![("prompt", "consent")],
            },
            api_base: api_base(LINEAR_API_BASE, config),
        }
    }

    async fn graphql<T: DeserializeOwned>(&self, access_token: &str, query: &str, variables: Value) -> Result<T> {
        let response: GraphQlResponse<T> = self
            .http
            .send_json(
                self.http
                    .request(Method::POST, format!("{}/graphql", self.api_base))
                    .bearer_auth(access_token)
                    .json(&json!({ "query": query, "variables": variables })),
            )
            .await?;
        if let Some(error) = response.errors.as_ref().and_then(|errors| errors.first()) {
            let message = error.message.clone().unwrap_or_else(|| "unknown GraphQL error".into());
            return Err(if error.is_authentication() {
                OrgSyncError::Auth(format!("linear: {message}"))
            } else {
                OrgSyncError::InvalidInput(format!("linear: {message}"))
            });
        }
        response.data.ok_or_else(|| OrgSyncError::InvalidInput("linear response without data".into()))
    }
}

#[async_trait]
impl ProviderAdapter for LinearAdapter {
    fn provider(&self) -> Provider {
        Provider::Linear
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String> {
        self.oauth.authorization_url(state, redirect_uri)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        let token = self.oauth.exchange_code(&self.http, code, redirect_uri).await?;
        let viewer: ViewerData = self.graphql(&token.access_token, VIEWER_QUERY, json!({})).await?;
        let scopes = token.scopes(&self.oauth.scopes);
        Ok(TokenGrant {
            credentials: token.into_credentials(Utc::now()),
            // Webhooks identify the workspace, not the user.
            account_id: viewer.organization.id,
            account_email: viewer.viewer.email,
            scopes,
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<RefreshedTokens> {
        Err(OrgSyncError::ReconnectRequired("linear tokens do not refresh".into()))
    }

    async fn validate_token(&self, access_token: &str) -> Result<bool> {
        match self.graphql::<ViewerData>(access_token, VIEWER_QUERY, json!({})).await {
            Ok(_) => Ok(true),
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

        let filter = since.map(|since| json!({ "updatedAt": { "gt": since } }));
        let variables = json!({ "first": query.page_size.min(250), "after": cursor.page, "filter": filter });
        let data: IssuesData = self.graphql(access_token, ISSUES_QUERY, variables).await?;

        for node in &data.issues.nodes {
            cursor.observe(str_field(node, "updatedAt"));
        }
        let next_page = data
            .issues
            .page_info
            .has_next_page
            .then_some(data.issues.page_info.end_cursor)
            .flatten();

        Ok(match next_page {
            Some(after) => ChangePage {
                records: data.issues.nodes,
                next_page_token: Some(CursorPage::encode(&after, cursor.high_water.as_deref())),
                continuation: None,
            },
            None => ChangePage {
                records: data.issues.nodes,
                next_page_token: None,
                continuation: Some(Continuation::SyncToken(
                    cursor.high_water.unwrap_or_else(|| Utc::now().to_rfc3339()),
                )),
            },
        })
    }

    fn normalize_record(&self, raw: &Value) -> Result<RemoteChange> {
        let external_id = str_field(raw, "id")
            .ok_or_else(|| OrgSyncError::InvalidInput("linear issue without id".into()))?
            .to_string();
        if str_field(raw, "archivedAt").is_some() {
            return Ok(RemoteChange::Removed { kind: MirrorKind::Task, external_id });
        }
        Ok(RemoteChange::Upsert(MirrorRecord::Task(TaskRecord {
            external_id,
            title: str_field(raw, "title").unwrap_or_default().to_string(),
            description: str_field(raw, "description").map(str::to_string),
            status: raw.pointer("/state/name").and_then(Value::as_str).map(str::to_string),
            assignee: raw.pointer("/assignee/email").and_then(Value::as_str).map(str::to_string),
            project: raw.pointer("/project/name").and_then(Value::as_str).map(str::to_string),
            due_at: time_field(raw, "dueDate"),
            completed: str_field(raw, "completedAt").is_some(),
            remote_updated_at: time_field(raw, "updatedAt"),
            raw: raw.clone(),
        })))
    }

    fn webhook_scheme(&self) -> WebhookScheme {
        WebhookScheme::Hmac {
            header: "linear-signature",
            encoding: SignatureEncoding::Hex,
            timestamp: Some(TimestampCheck {
                location: SecretLocation::NotificationField("webhookTimestamp"),
                unit: TimestampUnit::Millis,
                salted: false,
                window_secs: Some(REPLAY_WINDOW_SECS),
            }),
        }
    }

    fn split_notifications(
        &self,
        request: &WebhookRequest,
        _received_at: DateTime<Utc>,
    ) -> Result<Vec<WebhookNotification>> {
        let body = request.json_body()?;
        let event_id = match request.header("linear-delivery") {
            Some(delivery) if !delivery.is_empty() => delivery.to_string(),
            _ => {
                let kind = str_field(&body, "type").unwrap_or("event");
                let action = str_field(&body, "action").unwrap_or("change");
                let id = body.pointer("/data/id").and_then(Value::as_str).ok_or_else(|| {
                    OrgSyncError::InvalidInput("linear webhook without data.id".into())
                })?;
                let sent = super::id_field(&body, "webhookTimestamp").unwrap_or_default();
                format!("{kind}-{action}-{id}-{sent}")
            }
        };
        Ok(vec![WebhookNotification {
            event_id,
            payload: String::from_utf8_lossy(&request.body).into_owned(),
        }])
    }

    fn webhook_target(&self, _headers: &BTreeMap<String, String>, payload: &Value) -> Option<WebhookTarget> {
        str_field(payload, "organizationId").map(|id| WebhookTarget::Account(id.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: Option<String>,
    #[serde(default)]
    extensions: Value,
}

impl GraphQlError {
    fn is_authentication(&self) -> bool {
        matches!(
            self.extensions.get("code").and_then(Value::as_str),
            Some("AUTHENTICATION_ERROR" | "FORBIDDEN")
        )
    }
}

#[derive(Debug, Deserialize)]
struct ViewerData {
    viewer: Viewer,
    organization: Organization,
}

#[derive(Debug, Deserialize)]
struct Viewer {
    email: String,
}

#[derive(Debug, Deserialize)]
struct Organization {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IssuesData {
    issues: IssueConnection,
}

#[derive(Debug, Deserialize)]
struct IssueConnection {
    #[serde(default)]
    nodes: Vec<Value>,
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}
