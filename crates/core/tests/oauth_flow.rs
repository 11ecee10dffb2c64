//! OAuth authorization-code flow and push-channel registration.

mod support;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use orgsync_core::{
    CallbackParams, ConnectListener, OAuthFlow, OAuthState, OAuthStateCodec, SyncStateRepository,
    WebhookRenewalService,
};
use orgsync_domain::{
    Integration, IntegrationStatus, OAuthCredentials, OrgSyncError, Provider, SyncState, TokenGrant,
};
use support::provider::FakeProvider;
use support::{Harness, ORG, TEST_MASTER_KEY};
use url::Url;

const BASE: &str = "https://api.example.com";
const APP: &str = "https://app.example.com/settings/integrations";

#[derive(Default)]
struct RecordingListener {
    connected: Mutex<Vec<Integration>>,
}

#[async_trait]
impl ConnectListener for RecordingListener {
    async fn on_connected(&self, integration: &Integration) {
        self.connected.lock().unwrap().push(integration.clone());
    }
}

fn codec() -> OAuthStateCodec {
    OAuthStateCodec::new(TEST_MASTER_KEY, Duration::minutes(10)).unwrap()
}

fn flow(h: &Harness) -> OAuthFlow {
    OAuthFlow::new(h.providers.clone(), h.registry.clone(), codec(), h.dyn_clock(), BASE, APP)
}

fn grant(email: &str, refresh_token: Option<&str>) -> TokenGrant {
    TokenGrant {
        credentials: OAuthCredentials {
            access_token: format!("access-{email}"),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: None,
            token_type: Some("Bearer".into()),
        },
        account_id: format!("acct-{email}"),
        account_email: email.into(),
        scopes: vec!["read".into()],
    }
}

fn state_from(authorize_url: &str) -> String {
    Url::parse(authorize_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

fn query_of(url: &str) -> Vec<(String, String)> {
    Url::parse(url).unwrap().query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
}

fn params(code: Option<&str>, state: Option<String>) -> CallbackParams {
    CallbackParams { code: code.map(str::to_string), state, error: None }
}

/// Validates `OAuthFlow::callback` behavior for the successful consent
/// scenario.
///
/// Assertions:
/// - The state round-trips through the provider consent URL
/// - A connected integration is created for the state's organization
/// - The browser is sent to the requested redirect with the new id
/// - The connect listener is notified once
#[tokio::test(flavor = "multi_thread")]
async fn successful_callback_connects_and_redirects() {
    let h = Harness::new(FakeProvider::new(Provider::Todoist));
    let listener = Arc::new(RecordingListener::default());
    let flow = flow(&h).with_listener(listener.clone());
    h.provider.push_exchange(Ok(grant("Ada@Example.com", None)));

    let url = flow.authorize(Provider::Todoist, ORG, Some("https://app.example.com/done")).unwrap();
    assert!(url.contains("redirect_uri=https://api.example.com/oauth/todoist/callback"));
    let outcome = flow.callback(Provider::Todoist, params(Some("code-1"), Some(state_from(&url)))).await;

    let integration = outcome.integration.expect("integration created");
    assert_eq!(integration.organization_id, ORG);
    assert_eq!(integration.account_email, "ada@example.com");
    assert_eq!(integration.status, IntegrationStatus::Connected);
    assert!(outcome.redirect_url.starts_with("https://app.example.com/done?"));
    assert_eq!(
        query_of(&outcome.redirect_url),
        vec![
            ("connected".to_string(), "todoist".to_string()),
            ("integration_id".to_string(), integration.id.to_string()),
        ]
    );
    assert_eq!(listener.connected.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn tampered_or_foreign_state_is_rejected() {
    let h = Harness::new(FakeProvider::new(Provider::Todoist));
    let flow = flow(&h);

    let outcome = flow.callback(Provider::Todoist, params(Some("code"), Some("garbage.deadbeef".into()))).await;
    assert_eq!(outcome.redirect_url, format!("{APP}?error=invalid_state"));
    assert!(outcome.integration.is_none());

    let outcome = flow.callback(Provider::Todoist, params(Some("code"), None)).await;
    assert_eq!(outcome.redirect_url, format!("{APP}?error=invalid_state"));

    // Signed by the right key but issued for another provider.
    let foreign = codec().encode(&OAuthState::new(Provider::Linear, ORG, APP, h.now())).unwrap();
    let outcome = flow.callback(Provider::Todoist, params(Some("code"), Some(foreign))).await;
    assert_eq!(outcome.redirect_url, format!("{APP}?error=invalid_state"));
    assert_eq!(h.integrations.len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_state_is_rejected() {
    let h = Harness::new(FakeProvider::new(Provider::Todoist));
    let flow = flow(&h);
    let url = flow.authorize(Provider::Todoist, ORG, None).unwrap();

    h.clock.advance(Duration::minutes(11));
    let outcome = flow.callback(Provider::Todoist, params(Some("code"), Some(state_from(&url)))).await;

    assert_eq!(outcome.redirect_url, format!("{APP}?error=invalid_state"));
}

#[tokio::test(flavor = "multi_thread")]
async fn provider_errors_map_to_redirect_codes() {
    let h = Harness::new(FakeProvider::new(Provider::Google));
    let flow = flow(&h);
    let state = || state_from(&flow.authorize(Provider::Google, ORG, None).unwrap());

    let declined = CallbackParams { code: None, state: Some(state()), error: Some("access_denied".into()) };
    assert!(flow.callback(Provider::Google, declined).await.redirect_url.ends_with("error=access_denied"));

    let outcome = flow.callback(Provider::Google, params(None, Some(state()))).await;
    assert!(outcome.redirect_url.ends_with("error=missing_code"));

    h.provider.push_exchange(Err(OrgSyncError::Auth("invalid_grant".into())));
    let outcome = flow.callback(Provider::Google, params(Some("code"), Some(state()))).await;
    assert!(outcome.redirect_url.ends_with("error=exchange_failed"));

    // Google without offline access returns no refresh token.
    h.provider.push_exchange(Ok(grant("ada@example.com", None)));
    let outcome = flow.callback(Provider::Google, params(Some("code"), Some(state()))).await;
    assert!(outcome.redirect_url.ends_with("error=missing_refresh_token"));

    h.provider.push_exchange(Ok(grant("ada@example.com", Some("r1"))));
    assert!(flow.callback(Provider::Google, params(Some("code"), Some(state()))).await.integration.is_some());
    h.provider.push_exchange(Ok(grant("ada@example.com", Some("r2"))));
    let outcome = flow.callback(Provider::Google, params(Some("code"), Some(state()))).await;
    assert!(outcome.redirect_url.ends_with("error=already_connected"));
    assert_eq!(h.integrations.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn authorize_rejects_foreign_redirects() {
    let h = Harness::new(FakeProvider::new(Provider::Todoist));
    let flow = flow(&h);

    let err = flow.authorize(Provider::Todoist, ORG, Some("https://evil.example.net/")).unwrap_err();
    assert!(matches!(err, OrgSyncError::InvalidInput(_)));
    assert!(matches!(flow.authorize(Provider::Todoist, " ", None), Err(OrgSyncError::InvalidInput(_))));
    assert!(matches!(flow.authorize(Provider::Gusto, ORG, None), Err(OrgSyncError::Config(_))));
}

/// Validates `WebhookRenewalService` behavior for the push channel
/// provider scenario.
///
/// Assertions:
/// - Registration stores the channel with a generated secret
/// - Renewal replaces channels close to expiry and stops the old one
/// - Providers without a channel API are skipped
#[tokio::test(flavor = "multi_thread")]
async fn channels_are_registered_and_renewed() {
    let h = Harness::new(FakeProvider::new(Provider::Google).with_push_channels());
    let integration = h.connect("a@example.com", Some(Duration::hours(1))).await;
    let renewal = WebhookRenewalService::new(
        h.integrations.clone(),
        h.states.clone(),
        h.tokens.clone(),
        h.providers.clone(),
        h.dyn_clock(),
        BASE,
    );

    let first = renewal.register(integration.id).await.unwrap().expect("channel registered");
    assert!(first.secret.as_deref().is_some_and(|s| !s.is_empty()));
    assert_eq!(h.integrations.snapshot(integration.id).webhook, first);

    let mut state = h.states.get(integration.id).await.unwrap().unwrap_or_else(|| SyncState::new(integration.id, h.now()));
    state.webhook_expires_at = Some(h.now() + Duration::hours(2));
    h.states.put(state);

    let report = renewal.renew_expiring(Duration::hours(24)).await.unwrap();

    assert_eq!(report.renewed, 1);
    let current = h.integrations.snapshot(integration.id).webhook;
    assert_ne!(current, first);
    assert_eq!(*h.provider.unsubscribed.lock().unwrap(), vec![first]);

    let plain = Harness::new(FakeProvider::new(Provider::Linear));
    let linear = plain.connect("b@example.com", None).await;
    let renewal = WebhookRenewalService::new(
        plain.integrations.clone(),
        plain.states.clone(),
        plain.tokens.clone(),
        plain.providers.clone(),
        plain.dyn_clock(),
        BASE,
    );
    assert_eq!(renewal.register(linear.id).await.unwrap(), None);
}

/// A sync pass that read its state before a renewal finished must not undo
/// the new channel expiry, and a renewal must not roll back sync progress.
#[tokio::test(flavor = "multi_thread")]
async fn renewal_and_sync_progress_do_not_overwrite_each_other() {
    let h = Harness::new(FakeProvider::new(Provider::Google).with_push_channels());
    let integration = h.connect("c@example.com", Some(Duration::hours(1))).await;
    let renewal = WebhookRenewalService::new(
        h.integrations.clone(),
        h.states.clone(),
        h.tokens.clone(),
        h.providers.clone(),
        h.dyn_clock(),
        BASE,
    );

    let mut initial = SyncState::new(integration.id, h.now());
    initial.sync_token = Some("token-1".into());
    initial.webhook_expires_at = Some(h.now() + Duration::hours(2));
    h.states.put(initial);

    // sync pass loads its state, then the renewal lands before it stores progress
    let mut in_flight = h.states.get(integration.id).await.unwrap().expect("state");
    renewal.register(integration.id).await.unwrap().expect("channel registered");
    let renewed_expiry = h.states.snapshot(integration.id).unwrap().webhook_expires_at;
    assert!(renewed_expiry > Some(h.now() + Duration::days(6)));

    in_flight.sync_token = Some("token-2".into());
    h.states.upsert(&in_flight).await.unwrap();

    let stored = h.states.snapshot(integration.id).unwrap();
    assert_eq!(stored.sync_token.as_deref(), Some("token-2"));
    assert_eq!(stored.webhook_expires_at, renewed_expiry);
    assert!(h.states.list_webhook_expiring(h.now() + Duration::hours(24)).await.unwrap().is_empty());

    // a later renewal keeps the newer continuation
    renewal.register(integration.id).await.unwrap().expect("channel registered");
    assert_eq!(h.states.snapshot(integration.id).unwrap().sync_token.as_deref(), Some("token-2"));
}
