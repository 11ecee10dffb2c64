//! Google Calendar adapter.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use orgsync_core::{
    ChangePage, ChangeQuery, Continuation, HandshakeResponse, ProviderAdapter, SecretLocation,
    Subscription, SubscriptionRequest, WebhookRequest, WebhookScheme,
};
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
use super::{api_base, endpoint, parse_time, str_field, time_field};
use crate::http::HttpClient;

const GOOGLE_API_BASE: &str = "https://www.googleapis.com";
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/calendar.readonly",
    "openid",
    "email",
];

pub struct GoogleAdapter {
    http: HttpClient,
    oauth: OAuthApp,
    api_base: String,
}

impl GoogleAdapter {
    pub fn new(config: &ProviderConfig, http: HttpClient) -> Self {
        let auth_base = config.auth_base_url.as_deref();
        Self {
            http,
            oauth: OAuthApp {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                authorize_url: endpoint(GOOGLE_AUTH_URL, auth_base),
                token_url: endpoint(GOOGLE_TOKEN_URL, auth_base),
                scopes: SCOPES.iter().map(ToString::to_string).collect(),
                // Google only issues a refresh token on forced consent.
                extra_params: vec![("access_type", "offline"), ("prompt", "consent")],
            },
            api_base: api_base(GOOGLE_API_BASE, config),
        }
    }

    fn events_url(&self) -> String {
        format!("{}/calendar/v3/calendars/primary/events", self.api_base)
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String> {
        self.oauth.authorization_url(state, redirect_uri)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        let token = self.oauth.exchange_code(&self.http, code, redirect_uri).await?;
        let profile: GoogleUserInfo = self
            .http
            .send_json(
                self.http
                    .request(Method::GET, format!("{}/oauth2/v2/userinfo", self.api_base))
                    .bearer_auth(&token.access_token),
            )
            .await?;
        let scopes = token.scopes(&self.oauth.scopes);
        Ok(TokenGrant {
            credentials: token.into_credentials(Utc::now()),
            account_id: profile.id,
            account_email: profile.email,
            scopes,
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let token = self.oauth.refresh(&self.http, refresh_token).await?;
        Ok(token.into_refreshed(Utc::now()))
    }

    async fn list_changes(&self, access_token: &str, query: &ChangeQuery) -> Result<ChangePage> {
        let mut params: Vec<(&str, String)> = vec![
            ("maxResults", query.page_size.to_string()),
            ("singleEvents", "true".into()),
            ("showDeleted", "true".into()),
        ];
        match &query.continuation {
            Some(Continuation::SyncToken(token)) => params.push(("syncToken", token.clone())),
            Some(Continuation::DeltaLink(_)) => {
                return Err(OrgSyncError::SyncTokenExpired("google continuation is not a sync token".into()))
            }
            None => {
                if let Some(start) = query.window_start {
                    params.push(("timeMin", start.to_rfc3339_opts(SecondsFormat::Secs, true)));
                }
            }
        }
        if let Some(page_token) = &query.page_token {
            params.push(("pageToken", page_token.clone()));
        }

        let response: GoogleEventsResponse = self
            .http
            .send_json(self.http.request(Method::GET, self.events_url()).bearer_auth(access_token).query(&params))
            .await?;
        debug!(items = response.items.len(), has_next = response.next_page_token.is_some(), "fetched google events page");

        Ok(ChangePage {
            records: response.items,
            next_page_token: response.next_page_token,
            continuation: response.next_sync_token.map(Continuation::SyncToken),
        })
    }

    fn normalize_record(&self, raw: &Value) -> Result<RemoteChange> {
        let external_id = str_field(raw, "id")
            .ok_or_else(|| OrgSyncError::InvalidInput("google event without id".into()))?
            .to_string();
        let status = str_field(raw, "status").map(str::to_string);
        if status.as_deref() == Some("cancelled") {
            return Ok(RemoteChange::Removed { kind: MirrorKind::Event, external_id });
        }

        let (starts_at, all_day) = event_time(raw.get("start"));
        let (ends_at, _) = event_time(raw.get("end"));
        Ok(RemoteChange::Upsert(MirrorRecord::Event(CalendarEventRecord {
            external_id,
            title: str_field(raw, "summary").map(str::to_string),
            description: str_field(raw, "description").map(str::to_string),
            starts_at,
            ends_at,
            all_day,
            organizer_email: raw.get("organizer").and_then(|o| str_field(o, "email")).map(str::to_string),
            status,
            remote_updated_at: time_field(raw, "updated"),
            raw: raw.clone(),
        })))
    }

    fn webhook_scheme(&self) -> WebhookScheme {
        WebhookScheme::SharedSecret(SecretLocation::Header("x-goog-channel-token"))
    }

    /// The `sync` message sent when a channel is created carries no change.
    fn handshake(&self, request: &WebhookRequest) -> Option<HandshakeResponse> {
        (request.header("x-goog-resource-state") == Some("sync")).then(|| HandshakeResponse {
            status: 200,
            content_type: "text/plain",
            body: String::new(),
        })
    }

    fn split_notifications(
        &self,
        request: &WebhookRequest,
        _received_at: DateTime<Utc>,
    ) -> Result<Vec<WebhookNotification>> {
        let channel = request
            .header("x-goog-channel-id")
            .ok_or_else(|| OrgSyncError::InvalidInput("missing X-Goog-Channel-ID".into()))?;
        let message = request
            .header("x-goog-message-number")
            .ok_or_else(|| OrgSyncError::InvalidInput("missing X-Goog-Message-Number".into()))?;
        Ok(vec![WebhookNotification {
            event_id: format!("{channel}-{message}"),
            payload: String::from_utf8_lossy(&request.body).into_owned(),
        }])
    }

    fn webhook_target(&self, headers: &BTreeMap<String, String>, _payload: &Value) -> Option<WebhookTarget> {
        headers.get("x-goog-channel-id").filter(|id| !id.is_empty()).cloned().map(WebhookTarget::Channel)
    }

    async fn subscribe(&self, access_token: &str, request: &SubscriptionRequest) -> Result<Option<Subscription>> {
        let body = json!({
            "id": request.channel_id,
            "type": "web_hook",
            "address": request.callback_url,
            "token": request.secret,
        });
        let channel: GoogleChannel = self
            .http
            .send_json(
                self.http
                    .request(Method::POST, format!("{}/watch", self.events_url()))
                    .bearer_auth(access_token)
                    .json(&body),
            )
            .await?;
        Ok(Some(Subscription {
            channel: WebhookChannel {
                channel_id: Some(channel.id),
                subscription_id: None,
                resource_id: channel.resource_id,
                secret: Some(request.secret.clone()),
            },
            expires_at: channel.expiration.as_deref().and_then(parse_time),
        }))
    }

    async fn unsubscribe(&self, access_token: &str, channel: &WebhookChannel) -> Result<()> {
        let (Some(id), Some(resource_id)) = (&channel.channel_id, &channel.resource_id) else {
            return Ok(());
        };
        self.http
            .send_empty(
                self.http
                    .request(Method::POST, format!("{}/calendar/v3/channels/stop", self.api_base))
                    .bearer_auth(access_token)
                    .json(&json!({ "id": id, "resourceId": resource_id })),
            )
            .await
    }
}

/// `dateTime` for timed events, `date` for all-day ones.
fn event_time(value: Option<&Value>) -> (Option<DateTime<Utc>>, bool) {
    let Some(value) = value else {
        return (None, false);
    };
    if let Some(ts) = time_field(value, "dateTime") {
        return (Some(ts), false);
    }
    (time_field(value, "date"), value.get("date").is_some())
}

#[derive(Debug, Deserialize)]
struct GoogleEventsResponse {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(rename = "nextSyncToken")]
    next_sync_token: Option<String>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct GoogleChannel {
    id: String,
    #[serde(rename = "resourceId")]
    resource_id: Option<String>,
    /// Epoch milliseconds as a string.
    expiration: Option<String>,
}
