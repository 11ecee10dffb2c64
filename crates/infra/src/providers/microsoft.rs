//! Microsoft Graph calendar adapter.
//!
//! Changes come from `calendarView/delta`; the delta link returned on the
//! last page is the continuation. Push notifications are Graph
//! subscriptions verified by the `clientState` echoed in every notification.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use orgsync_core::{
    ChangePage, ChangeQuery, Continuation, HandshakeResponse, ProviderAdapter, SecretLocation,
    Subscription, SubscriptionRequest, WebhookRequest, WebhookScheme,
};
use orgsync_domain::constants::CALENDAR_LOOKBACK_DAYS;
use orgsync_domain::{
    CalendarEventRecord, MirrorKind, MirrorRecord, OrgSyncError, Provider, ProviderConfig,
    RefreshedTokens, RemoteChange, Result, TokenGrant, WebhookChannel, WebhookNotification,
    WebhookTarget,
};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::oauth::OAuthApp;
use super::{api_base, bool_field, endpoint, first_non_empty, str_field, time_field};
use crate::http::HttpClient;

const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const MS_AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const MS_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const SCOPES: [&str; 4] = ["offline_access", "openid", "email", "Calendars.Read"];

/// Graph caps event subscriptions just under three days.
const SUBSCRIPTION_LIFETIME_MINUTES: i64 = 4230;
/// Upper bound of the delta window.
const VIEW_AHEAD_DAYS: i64 = 365;

pub struct MicrosoftAdapter {
    http: HttpClient,
    oauth: OAuthApp,
    api_base: String,
}

impl MicrosoftAdapter {
    pub fn new(config: &ProviderConfig, http: HttpClient) -> Self {
        let auth_base = config.auth_base_url.as_deref();
        Self {
            http,
            oauth: OAuthApp {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                authorize_url: endpoint(MS_AUTH_URL, auth_base),
                token_url: endpoint(MS_TOKEN_URL, auth_base),
                scopes: SCOPES.iter().map(ToString::to_string).collect(),
                extra_params: vec![("response_mode", "query")],
            },
            api_base: api_base(GRAPH_API_BASE, config),
        }
    }

    fn initial_delta_url(&self, window_start: Option<DateTime<Utc>>) -> String {
        let now = Utc::now();
        let start = window_start.unwrap_or_else(|| now - Duration::days(CALENDAR_LOOKBACK_DAYS));
        let end = now + Duration::days(VIEW_AHEAD_DAYS);
        format!(
            "{}/me/calendarView/delta?startDateTime={}&endDateTime={}",
            self.api_base,
            urlencoding::encode(&start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            urlencoding::encode(&end.to_rfc3339_opts(SecondsFormat::Secs, true)),
        )
    }
}

#[async_trait]
impl ProviderAdapter for MicrosoftAdapter {
    fn provider(&self) -> Provider {
        Provider::Microsoft
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String> {
        self.oauth.authorization_url(state, redirect_uri)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        let token = self.oauth.exchange_code(&self.http, code, redirect_uri).await?;
        let me: GraphUser = self
            .http
            .send_json(
                self.http
                    .request(Method::GET, format!("{}/me", self.api_base))
                    .bearer_auth(&token.access_token),
            )
            .await?;
        let account_email = first_non_empty(&[me.mail.as_deref(), me.user_principal_name.as_deref()])
            .ok_or_else(|| OrgSyncError::InvalidInput("microsoft profile has no email".into()))?;
        let scopes = token.scopes(&self.oauth.scopes);
        Ok(TokenGrant {
            credentials: token.into_credentials(Utc::now()),
            account_id: me.id,
            account_email,
            scopes,
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let token = self.oauth.refresh(&self.http, refresh_token).await?;
        Ok(token.into_refreshed(Utc::now()))
    }

    async fn list_changes(&self, access_token: &str, query: &ChangeQuery) -> Result<ChangePage> {
        let url = match (&query.page_token, &query.continuation) {
            (Some(next_link), _) => next_link.clone(),
            (None, Some(Continuation::DeltaLink(link))) => link.clone(),
            (None, Some(Continuation::SyncToken(_))) => {
                return Err(OrgSyncError::SyncTokenExpired("microsoft continuation is not a delta link".into()))
            }
            (None, None) => self.initial_delta_url(query.window_start),
        };

        let request = self
            .http
            .request(Method::GET, url)
            .bearer_auth(access_token)
            .header("Prefer", format!("odata.maxpagesize={}, outlook.timezone=\"UTC\"", query.page_size));
        let response: GraphDeltaResponse = self.http.send_json(request).await.map_err(expired_delta)?;
        debug!(items = response.value.len(), has_next = response.next_link.is_some(), "fetched graph delta page");

        Ok(ChangePage {
            records: response.value,
            next_page_token: response.next_link,
            continuation: response.delta_link.map(Continuation::DeltaLink),
        })
    }

    fn normalize_record(&self, raw: &Value) -> Result<RemoteChange> {
        let external_id = str_field(raw, "id")
            .ok_or_else(|| OrgSyncError::InvalidInput("graph event without id".into()))?
            .to_string();
        if raw.get("@removed").is_some() || bool_field(raw, "isCancelled") {
            return Ok(RemoteChange::Removed { kind: MirrorKind::Event, external_id });
        }

        Ok(RemoteChange::Upsert(MirrorRecord::Event(CalendarEventRecord {
            external_id,
            title: str_field(raw, "subject").map(str::to_string),
            description: str_field(raw, "bodyPreview").map(str::to_string),
            starts_at: raw.get("start").and_then(graph_time),
            ends_at: raw.get("end").and_then(graph_time),
            all_day: bool_field(raw, "isAllDay"),
            organizer_email: raw
                .pointer("/organizer/emailAddress/address")
                .and_then(Value::as_str)
                .map(str::to_string),
            status: str_field(raw, "showAs").map(str::to_string),
            remote_updated_at: time_field(raw, "lastModifiedDateTime"),
            raw: raw.clone(),
        })))
    }

    fn webhook_scheme(&self) -> WebhookScheme {
        WebhookScheme::SharedSecret(SecretLocation::NotificationField("clientState"))
    }

    /// Subscription validation: echo `validationToken` as plain text.
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
        received_at: DateTime<Utc>,
    ) -> Result<Vec<WebhookNotification>> {
        let body = request.json_body()?;
        let notifications = body
            .get("value")
            .and_then(Value::as_array)
            .ok_or_else(|| OrgSyncError::InvalidInput("graph notification without `value`".into()))?;

        // Graph notifications carry no delivery id. The changed item's id and
        // the millisecond receipt stamp keep distinct changes apart.
        let stamp = received_at.timestamp_millis();
        notifications
            .iter()
            .map(|notification| {
                let subscription = str_field(notification, "subscriptionId").ok_or_else(|| {
                    OrgSyncError::InvalidInput("graph notification without subscriptionId".into())
                })?;
                let change = str_field(notification, "changeType").unwrap_or("changed");
                let payload = serde_json::to_string(notification)
                    .map_err(|e| OrgSyncError::Internal(format!("failed to encode notification: {e}")))?;
                let event_id = match notification.pointer("/resourceData/id").and_then(Value::as_str) {
                    Some(item) => format!("{subscription}-{change}-{item}-{stamp}"),
                    None => format!("{subscription}-{change}-{stamp}"),
                };
                Ok(WebhookNotification { event_id, payload })
            })
            .collect()
    }

    fn webhook_target(&self, _headers: &BTreeMap<String, String>, payload: &Value) -> Option<WebhookTarget> {
        str_field(payload, "subscriptionId").map(|id| WebhookTarget::Subscription(id.to_string()))
    }

    async fn subscribe(&self, access_token: &str, request: &SubscriptionRequest) -> Result<Option<Subscription>> {
        let expires = Utc::now() + Duration::minutes(SUBSCRIPTION_LIFETIME_MINUTES);
        let body = json!({
            "changeType": "created,updated,deleted",
            "notificationUrl": request.callback_url,
            "resource": "me/events",
            "expirationDateTime": expires.to_rfc3339_opts(SecondsFormat::Secs, true),
            "clientState": request.secret,
        });
        let created: GraphSubscription = self
            .http
            .send_json(
                self.http
                    .request(Method::POST, format!("{}/subscriptions", self.api_base))
                    .bearer_auth(access_token)
                    .json(&body),
            )
            .await?;
        Ok(Some(Subscription {
            channel: WebhookChannel {
                channel_id: None,
                subscription_id: Some(created.id),
                resource_id: created.resource,
                secret: Some(request.secret.clone()),
            },
            expires_at: created
                .expiration_date_time
                .as_deref()
                .and_then(super::parse_time)
                .or(Some(expires)),
        }))
    }

    async fn unsubscribe(&self, access_token: &str, channel: &WebhookChannel) -> Result<()> {
        let Some(id) = &channel.subscription_id else {
            return Ok(());
        };
        let result = self
            .http
            .send_empty(
                self.http
                    .request(Method::DELETE, format!("{}/subscriptions/{id}", self.api_base))
                    .bearer_auth(access_token),
            )
            .await;
        match result {
            Err(OrgSyncError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}

/// Graph reports an expired delta token as `410 Gone` or as a
/// `syncStateNotFound` error body.
fn expired_delta(err: OrgSyncError) -> OrgSyncError {
    match err {
        OrgSyncError::InvalidInput(msg) | OrgSyncError::NotFound(msg)
            if msg.contains("syncStateNotFound") || msg.contains("resyncRequired") =>
        {
            OrgSyncError::SyncTokenExpired(msg)
        }
        other => other,
    }
}

/// `{ "dateTime": "2024-05-01T09:00:00.0000000", "timeZone": "UTC" }`
fn graph_time(value: &Value) -> Option<DateTime<Utc>> {
    time_field(value, "dateTime")
}

#[derive(Debug, Deserialize)]
struct GraphDeltaResponse {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    id: String,
    mail: Option<String>,
    user_principal_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphSubscription {
    id: String,
    resource: Option<String>,
    expiration_date_time: Option<String>,
}
