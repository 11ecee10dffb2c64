//! Gusto adapter (company employees).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_common::crypto::SignatureEncoding;
use orgsync_core::{ChangePage, ChangeQuery, Continuation, ProviderAdapter, WebhookRequest, WebhookScheme};
use orgsync_domain::{
    EmployeeRecord, MirrorKind, MirrorRecord, OrgSyncError, Provider, ProviderConfig, RefreshedTokens,
    RemoteChange, Result, TokenGrant, WebhookNotification, WebhookTarget,
};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::oauth::OAuthApp;
use super::{api_base, bool_field, endpoint, first_non_empty, str_field, time_field, CursorPage};
use crate::http::HttpClient;

const GUSTO_API_BASE: &str = "https://api.gusto.com";
const GUSTO_AUTH_URL: &str = "https://api.gusto.com/oauth/authorize";
const GUSTO_TOKEN_URL: &str = "https://api.gusto.com/oauth/token";
const MAX_PAGE_SIZE: u32 = 100;

pub struct GustoAdapter {
    http: HttpClient,
    oauth: OAuthApp,
    api_base: String,
}

impl GustoAdapter {
    pub fn new(config: &ProviderConfig, http: HttpClient) -> Self {
        let auth_base = config.auth_base_url.as_deref();
        Self {
            http,
            oauth: OAuthApp {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                authorize_url: endpoint(GUSTO_AUTH_URL, auth_base),
                token_url: endpoint(GUSTO_TOKEN_URL, auth_base),
                scopes: Vec::new(),
                extra_params: Vec::new(),
            },
            api_base: api_base(GUSTO_API_BASE, config),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, access_token: &str, path: &str) -> Result<T> {
        self.http
            .send_json(self.http.request(Method::GET, format!("{}{path}", self.api_base)).bearer_auth(access_token))
            .await
    }
}

#[async_trait]
impl ProviderAdapter for GustoAdapter {
    fn provider(&self) -> Provider {
        Provider::Gusto
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String> {
        self.oauth.authorization_url(state, redirect_uri)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        let token = self.oauth.exchange_code(&self.http, code, redirect_uri).await?;
        let info: TokenInfo = self.get(&token.access_token, "/v1/token_info").await?;
        let me: Value = self.get(&token.access_token, "/v1/me").await?;
        let account_email = first_non_empty(&[str_field(&me, "email")])
            .ok_or_else(|| OrgSyncError::InvalidInput("gusto user without email".into()))?;
        let scopes = token.scopes(&self.oauth.scopes);
        Ok(TokenGrant {
            credentials: token.into_credentials(Utc::now()),
            // Webhooks name the company as `resource_uuid`.
            account_id: info.resource.uuid,
            account_email,
            scopes,
        })
    }

    /// Gusto rotates the refresh token on every use.
    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let token = self.oauth.refresh(&self.http, refresh_token).await?;
        if token.refresh_token.is_none() {
            return Err(OrgSyncError::InvalidInput("gusto refresh did not rotate the refresh token".into()));
        }
        Ok(token.into_refreshed(Utc::now()))
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
        let page: u32 = cursor.page.as_deref().and_then(|p| p.parse().ok()).unwrap_or(1);
        let per = query.page_size.clamp(1, MAX_PAGE_SIZE);

        let mut path = format!(
            "/v1/companies/{}/employees?page={page}&per={per}&terminated=true",
            urlencoding::encode(&query.account_id)
        );
        if let Some(since) = &since {
            path.push_str("&updated_since=");
            path.push_str(&urlencoding::encode(since));
        }
        let employees: Vec<Value> = self.get(access_token, &path).await?;
        for employee in &employees {
            cursor.observe(str_field(employee, "updated_at"));
        }
        debug!(page, employees = employees.len(), "fetched gusto employees page");

        let full_page = u32::try_from(employees.len()).is_ok_and(|len| len >= per);
        Ok(if full_page {
            ChangePage {
                records: employees,
                next_page_token: Some(CursorPage::encode(&(page + 1).to_string(), cursor.high_water.as_deref())),
                continuation: None,
            }
        } else {
            ChangePage {
                records: employees,
                next_page_token: None,
                continuation: Some(Continuation::SyncToken(
                    cursor.high_water.unwrap_or_else(|| Utc::now().to_rfc3339()),
                )),
            }
        })
    }

    fn normalize_record(&self, raw: &Value) -> Result<RemoteChange> {
        let external_id = str_field(raw, "uuid")
            .or_else(|| str_field(raw, "id"))
            .ok_or_else(|| OrgSyncError::InvalidInput("gusto employee without uuid".into()))?
            .to_string();
        let employment_status = str_field(raw, "current_employment_status")
            .or_else(|| str_field(raw, "employment_status"))
            .map(str::to_string);
        if bool_field(raw, "deleted") || employment_status.as_deref() == Some("terminated_and_removed") {
            return Ok(RemoteChange::Removed { kind: MirrorKind::Employee, external_id });
        }

        let first_name = str_field(raw, "preferred_first_name").or_else(|| str_field(raw, "first_name"));
        let display_name = [first_name, str_field(raw, "last_name")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let primary_job = raw.get("jobs").and_then(Value::as_array).and_then(|jobs| jobs.first());
        Ok(RemoteChange::Upsert(MirrorRecord::Employee(EmployeeRecord {
            external_id,
            display_name,
            work_email: str_field(raw, "work_email").or_else(|| str_field(raw, "email")).map(str::to_string),
            job_title: primary_job.and_then(|job| str_field(job, "title")).map(str::to_string),
            department: str_field(raw, "department").map(str::to_string),
            employment_status: employment_status
                .or_else(|| Some(if bool_field(raw, "terminated") { "terminated" } else { "active" }.to_string())),
            remote_updated_at: time_field(raw, "updated_at"),
            raw: raw.clone(),
        })))
    }

    fn webhook_scheme(&self) -> WebhookScheme {
        WebhookScheme::Hmac { header: "x-gusto-signature", encoding: SignatureEncoding::Hex, timestamp: None }
    }

    fn split_notifications(
        &self,
        request: &WebhookRequest,
        _received_at: DateTime<Utc>,
    ) -> Result<Vec<WebhookNotification>> {
        let body = request.json_body()?;
        let event_id = str_field(&body, "uuid")
            .ok_or_else(|| OrgSyncError::InvalidInput("gusto event without uuid".into()))?
            .to_string();
        Ok(vec![WebhookNotification { event_id, payload: String::from_utf8_lossy(&request.body).into_owned() }])
    }

    fn webhook_target(&self, _headers: &BTreeMap<String, String>, payload: &Value) -> Option<WebhookTarget> {
        str_field(payload, "resource_uuid").map(|id| WebhookTarget::Account(id.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    resource: TokenResource,
}

#[derive(Debug, Deserialize)]
struct TokenResource {
    uuid: String,
}
