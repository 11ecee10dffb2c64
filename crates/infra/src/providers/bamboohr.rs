//! BambooHR adapter.
//!
//! Every URL is company-scoped, so the adapter refuses to build without a
//! configured company subdomain.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use orgsync_common::crypto::SignatureEncoding;
use orgsync_core::{
    ChangePage, ChangeQuery, Continuation, ProviderAdapter, SecretLocation, Subscription,
    SubscriptionRequest, TimestampCheck, TimestampUnit, WebhookRequest, WebhookScheme,
};
use orgsync_domain::{
    EmployeeRecord, MirrorKind, MirrorRecord, OrgSyncError, Provider, ProviderConfig, RefreshedTokens,
    RemoteChange, Result, TokenGrant, WebhookChannel, WebhookNotification, WebhookTarget,
};
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::oauth::OAuthApp;
use super::{endpoint, id_field, str_field, time_field};
use crate::http::HttpClient;

const REPLAY_WINDOW_SECS: i64 = 300;
const EMPLOYEE_FIELDS: &str =
    "firstName,lastName,displayName,workEmail,jobTitle,department,status,lastChanged";
const WEBHOOK_FIELDS: [&str; 6] = ["firstName", "lastName", "workEmail", "jobTitle", "department", "status"];

pub struct BambooHrAdapter {
    http: HttpClient,
    oauth: OAuthApp,
    api_base: String,
    company: String,
}

impl BambooHrAdapter {
    pub fn new(config: &ProviderConfig, http: HttpClient) -> Result<Self> {
        let company = config
            .company_domain
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| OrgSyncError::Config("bamboohr requires a company domain".into()))?
            .to_string();
        let auth_base = config.auth_base_url.as_deref();
        let default_api = format!("https://api.bamboohr.com/api/gateway.php/{company}/v1");
        let api_base = match config.api_base_url.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            Some(base) => format!("{}/api/gateway.php/{company}/v1", base.trim_end_matches('/')),
            None => default_api,
        };
        Ok(Self {
            http,
            oauth: OAuthApp {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                authorize_url: endpoint(
                    &format!("https://{company}.bamboohr.com/authorize.php?request=authorize"),
                    auth_base,
                ),
                token_url: endpoint(&format!("https://{company}.bamboohr.com/token.php?request=token"), auth_base),
                scopes: vec!["openid".into(), "email".into(), "employee".into(), "offline_access".into()],
                extra_params: Vec::new(),
            },
            api_base,
            company,
        })
    }

    fn get(&self, access_token: &str, path: &str) -> RequestBuilder {
        self.http
            .request(Method::GET, format!("{}{path}", self.api_base))
            .bearer_auth(access_token)
            .header("Accept", "application/json")
    }

    async fn employee(&self, access_token: &str, id: &str) -> Result<Value> {
        self.http
            .send_json(self.get(access_token, &format!("/employees/{id}")).query(&[("fields", EMPLOYEE_FIELDS)]))
            .await
    }

    async fn list_directory(&self, access_token: &str) -> Result<ChangePage> {
        let started = Utc::now();
        let directory: Directory = self.http.send_json(self.get(access_token, "/employees/directory")).await?;
        debug!(employees = directory.employees.len(), "fetched bamboohr directory");
        Ok(ChangePage {
            records: directory.employees,
            next_page_token: None,
            continuation: Some(Continuation::SyncToken(started.to_rfc3339_opts(SecondsFormat::Secs, true))),
        })
    }

    /// `employees/changed` names ids and actions only; updated employees are
    /// fetched one by one.
    async fn list_changed(&self, access_token: &str, since: &str) -> Result<ChangePage> {
        let changed: Changed = self
            .http
            .send_json(self.get(access_token, "/employees/changed").query(&[("since", since)]))
            .await?;
        let mut records = Vec::with_capacity(changed.employees.len());
        for (id, entry) in changed.employees {
            let action = str_field(&entry, "action").unwrap_or("Updated").to_string();
            if action.eq_ignore_ascii_case("deleted") {
                records.push(json!({ "id": id, "action": action }));
                continue;
            }
            let mut detail = self.employee(access_token, &id).await?;
            if let Some(object) = detail.as_object_mut() {
                object.insert("id".into(), Value::String(id));
                object.insert("action".into(), Value::String(action));
            }
            records.push(detail);
        }
        debug!(changed = records.len(), "fetched bamboohr changes");
        let next = changed.latest.unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        Ok(ChangePage { records, next_page_token: None, continuation: Some(Continuation::SyncToken(next)) })
    }
}

#[async_trait]
impl ProviderAdapter for BambooHrAdapter {
    fn provider(&self) -> Provider {
        Provider::BambooHr
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String> {
        self.oauth.authorization_url(state, redirect_uri)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        let token = self.oauth.exchange_code(&self.http, code, redirect_uri).await?;
        // Employee 0 is the user the token belongs to.
        let me = self.employee(&token.access_token, "0").await?;
        let account_email = str_field(&me, "workEmail")
            .ok_or_else(|| OrgSyncError::InvalidInput("bamboohr user without work email".into()))?
            .to_string();
        let scopes = token.scopes(&self.oauth.scopes);
        Ok(TokenGrant {
            credentials: token.into_credentials(Utc::now()),
            account_id: self.company.clone(),
            account_email,
            scopes,
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let token = self.oauth.refresh(&self.http, refresh_token).await?;
        Ok(token.into_refreshed(Utc::now()))
    }

    async fn list_changes(&self, access_token: &str, query: &ChangeQuery) -> Result<ChangePage> {
        match &query.continuation {
            Some(Continuation::SyncToken(since)) => self.list_changed(access_token, since).await,
            Some(Continuation::DeltaLink(_)) | None => self.list_directory(access_token).await,
        }
    }

    fn normalize_record(&self, raw: &Value) -> Result<RemoteChange> {
        let external_id = id_field(raw, "id")
            .ok_or_else(|| OrgSyncError::InvalidInput("bamboohr employee without id".into()))?;
        if str_field(raw, "action").is_some_and(|a| a.eq_ignore_ascii_case("deleted")) {
            return Ok(RemoteChange::Removed { kind: MirrorKind::Employee, external_id });
        }
        // Webhook-shaped records nest the values under `fields`.
        let fields = raw.get("fields").filter(|f| f.is_object()).unwrap_or(raw);
        let display_name = str_field(fields, "displayName").map(str::to_string).unwrap_or_else(|| {
            [str_field(fields, "firstName"), str_field(fields, "lastName")]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
        });
        Ok(RemoteChange::Upsert(MirrorRecord::Employee(EmployeeRecord {
            external_id,
            display_name,
            work_email: str_field(fields, "workEmail").map(str::to_string),
            job_title: str_field(fields, "jobTitle").map(str::to_string),
            department: str_field(fields, "department").map(str::to_string),
            employment_status: str_field(fields, "status").map(str::to_string),
            remote_updated_at: time_field(raw, "lastChanged").or_else(|| time_field(raw, "timestamp")),
            raw: raw.clone(),
        })))
    }

    fn webhook_scheme(&self) -> WebhookScheme {
        WebhookScheme::Hmac {
            header: "x-bamboohr-signature",
            encoding: SignatureEncoding::Hex,
            timestamp: Some(TimestampCheck {
                location: SecretLocation::Header("x-bamboohr-timestamp"),
                unit: TimestampUnit::Seconds,
                salted: true,
                window_secs: Some(REPLAY_WINDOW_SECS),
            }),
        }
    }

    /// One notification per employee entry; the signature covers the whole
    /// body so it is checked against the request, not the entry.
    fn split_notifications(
        &self,
        request: &WebhookRequest,
        _received_at: DateTime<Utc>,
    ) -> Result<Vec<WebhookNotification>> {
        let body = request.json_body()?;
        let hook = request.header("x-bamboohr-webhook-id").unwrap_or("hook");
        let sent = request.header("x-bamboohr-timestamp").unwrap_or_default();
        let employees = body
            .get("employees")
            .and_then(Value::as_array)
            .ok_or_else(|| OrgSyncError::InvalidInput("bamboohr webhook without employees".into()))?;

        employees
            .iter()
            .map(|entry| {
                let id = id_field(entry, "id")
                    .ok_or_else(|| OrgSyncError::InvalidInput("bamboohr webhook entry without id".into()))?;
                let action = str_field(entry, "action").unwrap_or("Updated");
                let at = str_field(entry, "timestamp").unwrap_or(sent);
                let payload = serde_json::to_string(entry)
                    .map_err(|e| OrgSyncError::Internal(format!("failed to encode notification: {e}")))?;
                Ok(WebhookNotification { event_id: format!("{hook}-{id}-{action}-{at}"), payload })
            })
            .collect()
    }

    fn webhook_target(&self, headers: &BTreeMap<String, String>, _payload: &Value) -> Option<WebhookTarget> {
        headers
            .get("x-bamboohr-webhook-id")
            .filter(|id| !id.is_empty())
            .cloned()
            .map(WebhookTarget::Subscription)
    }

    /// BambooHR issues its own signing key for each webhook.
    async fn subscribe(&self, access_token: &str, request: &SubscriptionRequest) -> Result<Option<Subscription>> {
        let post_fields: Map<String, Value> =
            WEBHOOK_FIELDS.iter().map(|f| ((*f).to_string(), Value::String((*f).to_string()))).collect();
        let body = json!({
            "name": format!("orgsync-{}", request.channel_id),
            "monitorFields": WEBHOOK_FIELDS,
            "postFields": post_fields,
            "url": request.callback_url,
            "format": "json",
            "includeCompanyDomain": true,
        });
        let created: CreatedWebhook = self
            .http
            .send_json(
                self.http
                    .request(Method::POST, format!("{}/webhooks", self.api_base))
                    .bearer_auth(access_token)
                    .header("Accept", "application/json")
                    .json(&body),
            )
            .await?;
        Ok(Some(Subscription {
            channel: WebhookChannel {
                channel_id: None,
                subscription_id: Some(created.id),
                resource_id: Some(self.company.clone()),
                secret: created.private_key.or_else(|| Some(request.secret.clone())),
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
                    .request(Method::DELETE, format!("{}/webhooks/{id}", self.api_base))
                    .bearer_auth(access_token),
            )
            .await
        {
            Err(OrgSyncError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Directory {
    #[serde(default)]
    employees: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Changed {
    latest: Option<String>,
    #[serde(default)]
    employees: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CreatedWebhook {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
    #[serde(rename = "privateKey")]
    private_key: Option<String>,
}

fn id_as_string<'de, D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected webhook id {other}"))),
    }
}
