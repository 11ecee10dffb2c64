//! Integration registry lifecycle: connect, reactivate, disconnect, delete.

mod support;

use chrono::Duration;
use orgsync_core::{MirrorRepository, SyncStateRepository};
use orgsync_domain::{
    ConnectIntegration, IntegrationStatus, MirrorKind, OAuthCredentials, OrgSyncError, Provider,
    SyncMode, SyncState,
};
use support::provider::{page, task, FakeProvider};
use support::{Harness, ORG};

fn request(provider: Provider, email: &str, refresh_token: Option<&str>) -> ConnectIntegration {
    ConnectIntegration {
        organization_id: ORG.into(),
        provider,
        account_email: email.into(),
        account_id: "acct-1".into(),
        scopes: vec!["calendar.readonly".into()],
        credentials: OAuthCredentials {
            access_token: "access-1".into(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: None,
            token_type: Some("Bearer".into()),
        },
    }
}

/// Validates `IntegrationRegistry::connect` behavior for the new account
/// scenario.
///
/// Assertions:
/// - Email is stored trimmed and lowercased
/// - Credentials are sealed and open back to the original tokens
#[tokio::test(flavor = "multi_thread")]
async fn connect_creates_connected_integration_with_sealed_credentials() {
    let h = Harness::new(FakeProvider::new(Provider::Gusto));
    let integration =
        h.registry.connect(request(Provider::Gusto, "  Ada@Example.COM ", Some("r1"))).await.unwrap();

    assert_eq!(integration.account_email, "ada@example.com");
    assert_eq!(integration.status, IntegrationStatus::Connected);
    assert_eq!(integration.refresh_count, 0);
    assert_ne!(integration.credentials.ciphertext, "access-1");
    assert_eq!(h.open(&integration).access_token, "access-1");
    assert_eq!(h.integrations.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn second_connect_for_connected_account_conflicts() {
    let h = Harness::new(FakeProvider::new(Provider::Gusto));
    h.registry.connect(request(Provider::Gusto, "ada@example.com", Some("r1"))).await.unwrap();

    let err = h
        .registry
        .connect(request(Provider::Gusto, "ADA@example.com", Some("r2")))
        .await
        .unwrap_err();
    assert!(matches!(err, OrgSyncError::Conflict(_)));
    assert_eq!(h.integrations.len(), 1);
}

/// Validates `IntegrationRegistry::connect` behavior for the reconnect after
/// disconnect scenario.
///
/// Assertions:
/// - The original id is preserved
/// - Status returns to connected with the new credentials and no error
/// - Mirrored records and sync state from before the disconnect survive
#[tokio::test(flavor = "multi_thread")]
async fn reconnect_reactivates_disconnected_record_and_keeps_history() {
    let h = Harness::new(FakeProvider::new(Provider::Linear));
    let original = h.connect("ada@example.com", None).await;

    h.provider.push_page(Ok(page(vec![task("t1", "One"), task("t2", "Two")], None, Some("cursor-1"))));
    h.engine.sync(original.id).await.unwrap();

    let disconnected = h.registry.disconnect(original.id).await.unwrap();
    assert_eq!(disconnected.status, IntegrationStatus::Disconnected);
    assert_eq!(h.mirror.count(original.id, MirrorKind::Task).await.unwrap(), 2);

    let mut again = request(Provider::Linear, "ada@example.com", None);
    again.credentials.access_token = "access-2".into();
    let reactivated = h.registry.connect(again).await.unwrap();

    assert_eq!(reactivated.id, original.id);
    assert_eq!(reactivated.status, IntegrationStatus::Connected);
    assert_eq!(reactivated.last_error, None);
    assert_eq!(h.open(&reactivated).access_token, "access-2");
    assert_eq!(h.integrations.len(), 1);
    assert_eq!(h.mirror.count(original.id, MirrorKind::Task).await.unwrap(), 2);
    assert!(h.states.get(original.id).await.unwrap().is_some_and(|s| s.sync_token.is_some()));

    // the next full sync re-delivers the same records without duplicating them
    let mut state = h.states.snapshot(original.id).expect("state");
    state.clear_continuation();
    h.states.put(state);
    h.provider.push_page(Ok(page(vec![task("t1", "One"), task("t2", "Two")], None, Some("cursor-2"))));
    let report = h.engine.sync(original.id).await.unwrap();

    assert_eq!(report.mode, SyncMode::Full);
    assert_eq!(h.mirror.count(original.id, MirrorKind::Task).await.unwrap(), 2);
    assert_eq!(h.mirror.ids(original.id), vec!["t1".to_string(), "t2".to_string()]);
    assert_eq!(h.states.snapshot(original.id).unwrap().sync_token.as_deref(), Some("cursor-2"));
}

#[tokio::test(flavor = "multi_thread")]
async fn errored_record_is_reactivated_too() {
    let h = Harness::new(FakeProvider::new(Provider::Gusto));
    let original = h.connect("ada@example.com", Some(Duration::hours(1))).await;
    h.integrations.modify(original.id, |row| {
        row.status = IntegrationStatus::Error;
        row.last_error = Some("invalid_grant".into());
    });

    let reactivated =
        h.registry.connect(request(Provider::Gusto, "ada@example.com", Some("r2"))).await.unwrap();
    assert_eq!(reactivated.id, original.id);
    assert_eq!(reactivated.status, IntegrationStatus::Connected);
    assert_eq!(reactivated.last_error, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn expiring_provider_without_refresh_token_is_rejected() {
    let h = Harness::new(FakeProvider::new(Provider::Google));
    let err = h.registry.connect(request(Provider::Google, "ada@example.com", None)).await.unwrap_err();
    assert!(matches!(err, OrgSyncError::Auth(_)));
    assert_eq!(h.integrations.len(), 0);

    // Permanent-token providers never return one and connect fine.
    let h = Harness::new(FakeProvider::new(Provider::Todoist));
    assert!(h.registry.connect(request(Provider::Todoist, "ada@example.com", None)).await.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn lookups_and_stats_are_scoped() {
    let h = Harness::new(FakeProvider::new(Provider::Gusto));
    let a = h.connect("a@example.com", Some(Duration::minutes(3))).await;
    let b = h.connect("b@example.com", Some(Duration::hours(2))).await;
    h.registry.disconnect(b.id).await.unwrap();

    let listed = h.registry.list_by_organization(ORG).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(h.registry.list_by_organization_and_provider(ORG, Provider::Gusto).await.unwrap().len(), 2);
    assert!(h.registry.list_by_organization_and_provider(ORG, Provider::Linear).await.unwrap().is_empty());

    let expiring = h.registry.list_expiring(Duration::minutes(5)).await.unwrap();
    assert_eq!(expiring.iter().map(|i| i.id).collect::<Vec<_>>(), vec![a.id]);

    let stats = h.registry.stats(Some(ORG)).await.unwrap();
    assert_eq!((stats.total, stats.connected, stats.disconnected), (2, 1, 1));
    assert_eq!(h.registry.stats(Some("other-org")).await.unwrap().total, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_is_hard_and_reports_missing_ids() {
    let h = Harness::new(FakeProvider::new(Provider::Gusto));
    let integration = h.connect("a@example.com", None).await;
    h.states.upsert(&SyncState::new(integration.id, h.now())).await.unwrap();

    h.registry.delete(integration.id).await.unwrap();
    assert!(h.registry.get(integration.id).await.unwrap().is_none());
    assert!(matches!(h.registry.delete(integration.id).await, Err(OrgSyncError::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn reseal_moves_records_to_current_key_version() {
    use std::sync::Arc;

    use orgsync_common::crypto::{KdfParams, KeyRing};
    use orgsync_core::{CredentialVault, IntegrationRegistry};

    let h = Harness::new(FakeProvider::new(Provider::Gusto));
    let integration = h.connect("a@example.com", None).await;
    assert_eq!(integration.credentials.key_version, 1);

    let rotated = KeyRing::new(2, "rotated-master-key-abcdefghijklmnopqrstuvwxyz", KdfParams::testing())
        .and_then(|ring| ring.with_previous(1, support::TEST_MASTER_KEY))
        .unwrap();
    let vault = Arc::new(CredentialVault::new(rotated));
    let registry = IntegrationRegistry::new(h.integrations.clone(), vault.clone(), h.dyn_clock());

    assert_eq!(registry.reseal_stale_credentials().await.unwrap(), 1);
    let resealed = h.integrations.snapshot(integration.id);
    assert_eq!(resealed.credentials.key_version, 2);
    assert_eq!(vault.open(&resealed.credentials).unwrap().access_token, "access-a@example.com");
    assert_eq!(registry.reseal_stale_credentials().await.unwrap(), 0);
}
