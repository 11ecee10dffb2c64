//! OAuth 2.0 authorization-code plumbing shared by every adapter.
//!
//! Consent URLs are built with the `oauth2` crate. Code exchange and refresh
//! are plain form posts through [`HttpClient`] so they share its retry and
//! status mapping.

use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, CsrfToken, RedirectUrl, Scope};
use orgsync_domain::{OAuthCredentials, OrgSyncError, RefreshedTokens, Result};
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use crate::http::HttpClient;

/// Registered OAuth application for one provider.
#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    /// Extra consent parameters (`access_type=offline` and friends).
    pub extra_params: Vec<(&'static str, &'static str)>,
}

/// Token endpoint response. Providers disagree on almost everything beyond
/// `access_token`, so the rest is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry. Lifetimes too large to represent are treated as unknown.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let secs = self.expires_in.filter(|secs| *secs > 0)?;
        now.checked_add_signed(Duration::try_seconds(secs)?)
    }

    /// Granted scopes, falling back to the requested ones when the provider
    /// does not echo them.
    pub fn scopes(&self, requested: &[String]) -> Vec<String> {
        match self.scope.as_deref() {
            Some(raw) if !raw.trim().is_empty() => raw
                .split(|c: char| c == ' ' || c == ',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => requested.to_vec(),
        }
    }

    pub fn into_credentials(self, now: DateTime<Utc>) -> OAuthCredentials {
        let expires_at = self.expires_at(now);
        OAuthCredentials {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
            token_type: self.token_type.or_else(|| Some("Bearer".into())),
        }
    }

    pub fn into_refreshed(self, now: DateTime<Utc>) -> RefreshedTokens {
        let expires_at = self.expires_at(now);
        RefreshedTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
        }
    }
}

impl OAuthApp {
    pub fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String> {
        let auth_url = AuthUrl::new(self.authorize_url.clone())
            .map_err(|e| OrgSyncError::Config(format!("invalid authorize URL: {e}")))?;
        let redirect = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| OrgSyncError::InvalidInput(format!("invalid redirect URI: {e}")))?;

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_auth_uri(auth_url)
            .set_redirect_uri(redirect);

        let state = state.to_string();
        let mut request = client
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(self.scopes.iter().cloned().map(Scope::new));
        for (key, value) in &self.extra_params {
            request = request.add_extra_param(*key, *value);
        }
        let (url, _) = request.url();
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, http: &HttpClient, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        if code.trim().is_empty() {
            return Err(OrgSyncError::InvalidInput("authorization code is empty".into()));
        }
        self.post_token(
            http,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }

    pub async fn refresh(&self, http: &HttpClient, refresh_token: &str) -> Result<TokenResponse> {
        if refresh_token.is_empty() {
            return Err(OrgSyncError::ReconnectRequired("no refresh token stored".into()));
        }
        self.post_token(http, &[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await
            .map_err(revoked_grant)
    }

    async fn post_token(&self, http: &HttpClient, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> =
            vec![("client_id", self.client_id.as_str()), ("client_secret", self.client_secret.as_str())];
        form.extend_from_slice(params);
        debug!(token_url = %self.token_url, "posting to token endpoint");
        http.send_json(
            http.request(Method::POST, &self.token_url).header("Accept", "application/json").form(&form),
        )
        .await
    }
}

/// A refresh rejected with `invalid_grant` can only be fixed by reconnecting.
fn revoked_grant(err: OrgSyncError) -> OrgSyncError {
    match err {
        OrgSyncError::InvalidInput(msg) | OrgSyncError::Auth(msg) if msg.contains("invalid_grant") => {
            OrgSyncError::ReconnectRequired(msg)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> OAuthApp {
        OAuthApp {
            client_id: "client-1".into(),
            client_secret: "secret-1".into(),
            authorize_url: "https://accounts.example.com/o/oauth2/auth".into(),
            token_url: "https://accounts.example.com/token".into(),
            scopes: vec!["calendar.readonly".into(), "email".into()],
            extra_params: vec![("access_type", "offline")],
        }
    }

    #[test]
    fn authorization_url_carries_state_and_redirect() {
        let url = app().authorization_url("signed.state", "https://app.example.com/cb").unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(pairs["client_id"], "client-1");
        assert_eq!(pairs["state"], "signed.state");
        assert_eq!(pairs["redirect_uri"], "https://app.example.com/cb");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "calendar.readonly email");
        assert_eq!(pairs["access_type"], "offline");
    }

    #[test]
    fn scopes_fall_back_to_requested() {
        let requested = vec!["read".to_string()];
        let echoed = TokenResponse {
            access_token: "a".into(),
            refresh_token: None,
            expires_in: Some(3600),
            scope: Some("data:read,task:add".into()),
            token_type: None,
        };
        assert_eq!(echoed.scopes(&requested), vec!["data:read", "task:add"]);
        let silent = TokenResponse { scope: None, ..echoed };
        assert_eq!(silent.scopes(&requested), requested);
    }

    #[test]
    fn invalid_grant_requires_reconnect() {
        let err = revoked_grant(OrgSyncError::InvalidInput("HTTP 400 Bad Request: {\"error\":\"invalid_grant\"}".into()));
        assert!(matches!(err, OrgSyncError::ReconnectRequired(_)));
        let err = revoked_grant(OrgSyncError::Network("HTTP 503".into()));
        assert!(matches!(err, OrgSyncError::Network(_)));
    }

    #[test]
    fn absurd_lifetimes_do_not_overflow() {
        let now = Utc::now();
        let mut response = TokenResponse {
            access_token: "a".into(),
            refresh_token: None,
            expires_in: Some(3600),
            scope: None,
            token_type: None,
        };
        assert_eq!(response.expires_at(now), Some(now + Duration::seconds(3600)));

        response.expires_in = Some(i64::MAX);
        assert_eq!(response.expires_at(now), None);
        response.expires_in = Some(-5);
        assert_eq!(response.expires_at(now), None);
    }
}
