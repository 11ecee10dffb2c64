use std::sync::Arc;

use async_trait::async_trait;
use orgsync_common::time::Clock;
use orgsync_domain::{ConnectIntegration, Integration, OrgSyncError, Provider, Result};
use tracing::{info, instrument, warn};
use url::Url;

use super::state::{OAuthState, OAuthStateCodec};
use crate::integrations::IntegrationRegistry;
use crate::providers::ProviderLookup;

/// Notified after a successful connect, e.g. to start the first sync.
#[async_trait]
pub trait ConnectListener: Send + Sync {
    async fn on_connected(&self, integration: &Integration);
}

/// Where the browser goes after the callback, plus the integration when the
/// connect succeeded.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub redirect_url: String,
    pub integration: Option<Integration>,
}

/// Parameters of the provider's redirect back to us.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set when the user declined consent.
    pub error: Option<String>,
}

/// Authorization-code flow for all providers.
pub struct OAuthFlow {
    providers: Arc<ProviderLookup>,
    registry: Arc<IntegrationRegistry>,
    codec: OAuthStateCodec,
    clock: Arc<dyn Clock>,
    public_base_url: String,
    default_redirect_url: String,
    listener: Option<Arc<dyn ConnectListener>>,
}

impl OAuthFlow {
    pub fn new(
        providers: Arc<ProviderLookup>,
        registry: Arc<IntegrationRegistry>,
        codec: OAuthStateCodec,
        clock: Arc<dyn Clock>,
        public_base_url: impl Into<String>,
        default_redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            providers,
            registry,
            codec,
            clock,
            public_base_url: public_base_url.into(),
            default_redirect_url: default_redirect_url.into(),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ConnectListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Our callback URL registered with the provider.
    pub fn redirect_uri(&self, provider: Provider) -> String {
        format!("{}/oauth/{provider}/callback", self.public_base_url.trim_end_matches('/'))
    }

    /// Builds the provider consent URL with a signed state.
    ///
    /// `redirect_url` must share its origin with the default redirect URL.
    #[instrument(skip(self))]
    pub fn authorize(
        &self,
        provider: Provider,
        organization_id: &str,
        redirect_url: Option<&str>,
    ) -> Result<String> {
        if organization_id.trim().is_empty() {
            return Err(OrgSyncError::InvalidInput("organization_id is required".into()));
        }
        let redirect_url = match redirect_url {
            Some(url) => self.check_redirect(url)?,
            None => self.default_redirect_url.clone(),
        };

        let adapter = self.providers.get(provider)?;
        let state = OAuthState::new(provider, organization_id, redirect_url, self.clock.now());
        let token = self.codec.encode(&state)?;
        adapter.authorization_url(&token, &self.redirect_uri(provider))
    }

    /// Completes the flow. Never fails: every error becomes a redirect with
    /// an `error` query parameter.
    #[instrument(skip(self, params))]
    pub async fn callback(&self, provider: Provider, params: CallbackParams) -> CallbackOutcome {
        let state = params
            .state
            .as_deref()
            .ok_or_else(|| OrgSyncError::Security("missing OAuth state".into()))
            .and_then(|token| self.codec.decode(token, self.clock.now()))
            .and_then(|state| {
                if state.provider == provider {
                    Ok(state)
                } else {
                    Err(OrgSyncError::Security("OAuth state issued for another provider".into()))
                }
            });
        let state = match state {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "rejected OAuth callback state");
                return self.failure(&self.default_redirect_url, "invalid_state");
            }
        };

        if let Some(error) = params.error.as_deref() {
            info!(org = %state.organization_id, %error, "user declined consent");
            return self.failure(&state.redirect_url, "access_denied");
        }
        let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
            return self.failure(&state.redirect_url, "missing_code");
        };

        match self.complete(provider, &state, code).await {
            Ok(integration) => {
                if let Some(listener) = &self.listener {
                    listener.on_connected(&integration).await;
                }
                let redirect_url = with_query(
                    &state.redirect_url,
                    &[("connected", provider.as_str()), ("integration_id", &integration.id.to_string())],
                );
                CallbackOutcome { redirect_url, integration: Some(integration) }
            }
            Err((code, err)) => {
                warn!(org = %state.organization_id, error = %err, code, "OAuth callback failed");
                self.failure(&state.redirect_url, code)
            }
        }
    }

    async fn complete(
        &self,
        provider: Provider,
        state: &OAuthState,
        code: &str,
    ) -> std::result::Result<Integration, (&'static str, OrgSyncError)> {
        let adapter = self.providers.get(provider).map_err(|e| ("exchange_failed", e))?;
        let grant = adapter
            .exchange_code(code, &self.redirect_uri(provider))
            .await
            .map_err(|e| ("exchange_failed", e))?;

        let request = ConnectIntegration {
            organization_id: state.organization_id.clone(),
            provider,
            account_email: grant.account_email,
            account_id: grant.account_id,
            scopes: grant.scopes,
            credentials: grant.credentials,
        };
        self.registry.connect(request).await.map_err(|err| {
            let code = match err {
                OrgSyncError::Conflict(_) => "already_connected",
                OrgSyncError::Auth(_) => "missing_refresh_token",
                _ => "connect_failed",
            };
            (code, err)
        })
    }

    fn check_redirect(&self, candidate: &str) -> Result<String> {
        let url = Url::parse(candidate)
            .map_err(|e| OrgSyncError::InvalidInput(format!("invalid redirect_url: {e}")))?;
        let allowed = Url::parse(&self.default_redirect_url)
            .map_err(|e| OrgSyncError::Config(format!("invalid default redirect URL: {e}")))?;
        if url.origin() != allowed.origin() {
            return Err(OrgSyncError::InvalidInput("redirect_url must stay on the application origin".into()));
        }
        Ok(url.into())
    }

    fn failure(&self, base: &str, code: &str) -> CallbackOutcome {
        CallbackOutcome { redirect_url: with_query(base, &[("error", code)]), integration: None }
    }
}

fn with_query(base: &str, pairs: &[(&str, &str)]) -> String {
    match Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut().extend_pairs(pairs);
            url.into()
        }
        Err(_) => {
            let query: Vec<String> =
                pairs.iter().map(|(k, v)| format!("{k}={}", url::form_urlencoded::byte_serialize(v.as_bytes()).collect::<String>())).collect();
            let separator = if base.contains('?') { '&' } else { '?' };
            format!("{base}{separator}{}", query.join("&"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_query_to_existing_parameters() {
        assert_eq!(
            with_query("https://app.example.com/settings?tab=integrations", &[("error", "invalid_state")]),
            "https://app.example.com/settings?tab=integrations&error=invalid_state"
        );
        assert_eq!(with_query("/settings", &[("connected", "google")]), "/settings?connected=google");
    }
}
