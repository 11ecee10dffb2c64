//! End-to-end database integration coverage for the SQLCipher repositories.
//!
//! Each test operates on an isolated SQLCipher database with migrations
//! applied and uses UUIDv7 identifiers to match production ID semantics.

mod support;

use std::collections::BTreeMap;

use chrono::{Duration, TimeZone, Utc};
use orgsync_core::{
    IntegrationRepository, LeaseRepository, MirrorRepository, SyncStateRepository, WebhookQueueRepository,
};
use orgsync_domain::{
    CalendarEventRecord, EmployeeRecord, IntegrationStatus, LeaseScope, MirrorKind, MirrorRecord, OrgSyncError,
    ProcessedEvent, Provider, RemoteChange, SyncState, WebhookChannel, WebhookQueueItem, WebhookStatus,
    WebhookTarget,
};
use orgsync_infra::database::{
    SqlCipherIntegrationRepository, SqlCipherLeaseRepository, SqlCipherMirrorRepository,
    SqlCipherSyncStateRepository, SqlCipherWebhookQueueRepository,
};
use serde_json::json;
use support::{make_integration, TestDatabase};
use uuid::Uuid;

fn base_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).single().expect("base timestamp should be valid")
}

#[tokio::test(flavor = "multi_thread")]
async fn integration_repository_round_trip_and_lookups() {
    let db = TestDatabase::new();
    let repo = SqlCipherIntegrationRepository::new(db.manager.clone());
    let now = base_time();

    let mut google = make_integration("org-1", Provider::Google, "Ada@Example.com", now);
    google.expires_at = Some(now + Duration::minutes(3));
    repo.insert(&google).await.expect("insert google");

    let linear = make_integration("org-1", Provider::Linear, "ada@example.com", now);
    repo.insert(&linear).await.expect("insert linear");

    let fetched = repo.get(google.id).await.expect("get").expect("google present");
    assert_eq!(fetched, google);

    let by_account = repo
        .find_by_account("org-1", Provider::Google, "ada@example.com")
        .await
        .expect("find by account")
        .expect("account present");
    assert_eq!(by_account.id, google.id);

    assert_eq!(repo.list_by_organization("org-1").await.expect("list").len(), 2);
    assert_eq!(
        repo.list_by_organization_and_provider("org-1", Provider::Linear).await.expect("list").len(),
        1
    );

    let expiring = repo.list_expiring(now + Duration::minutes(5)).await.expect("expiring");
    assert_eq!(expiring.iter().map(|i| i.id).collect::<Vec<_>>(), vec![google.id]);

    let duplicate = make_integration("org-1", Provider::Google, "ada@example.com", now);
    let err = repo.insert(&duplicate).await.expect_err("unique account per org and provider");
    assert!(matches!(err, OrgSyncError::Conflict(_)), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn integration_status_channels_and_stats() {
    let db = TestDatabase::new();
    let repo = SqlCipherIntegrationRepository::new(db.manager.clone());
    let now = base_time();

    let microsoft = make_integration("org-2", Provider::Microsoft, "grace@example.com", now);
    let todoist = make_integration("org-2", Provider::Todoist, "grace@example.com", now);
    repo.insert(&microsoft).await.expect("insert microsoft");
    repo.insert(&todoist).await.expect("insert todoist");

    let channel = WebhookChannel {
        channel_id: None,
        subscription_id: Some("sub-42".into()),
        resource_id: None,
        secret: Some("client-state".into()),
    };
    repo.update_webhook_channel(microsoft.id, &channel, now).await.expect("store channel");
    let routed = repo
        .find_by_webhook_target(Provider::Microsoft, &WebhookTarget::Subscription("sub-42".into()))
        .await
        .expect("route by subscription");
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].webhook, channel);

    let by_account = repo
        .find_by_webhook_target(Provider::Todoist, &WebhookTarget::Account(todoist.account_id.clone()))
        .await
        .expect("route by account");
    assert_eq!(by_account[0].id, todoist.id);

    repo.set_status(todoist.id, IntegrationStatus::Error, Some("refresh failed"), now)
        .await
        .expect("set status");
    let errored = repo.list_by_status(IntegrationStatus::Error).await.expect("list by status");
    assert_eq!(errored.len(), 1);
    assert_eq!(errored[0].last_error.as_deref(), Some("refresh failed"));

    let stats = repo.stats(Some("org-2")).await.expect("stats");
    assert_eq!((stats.total, stats.connected, stats.error), (2, 1, 1));
    assert_eq!(repo.stats(Some("someone-else")).await.expect("stats").total, 0);

    let later = now + Duration::hours(1);
    repo.touch_last_used(microsoft.id, later).await.expect("touch");
    assert_eq!(repo.get(microsoft.id).await.expect("get").expect("present").last_used_at, Some(later));

    assert_eq!(repo.list_with_stale_key(2).await.expect("stale keys").len(), 2);
    assert!(repo.list_with_stale_key(1).await.expect("stale keys").is_empty());

    assert!(repo.delete(todoist.id).await.expect("delete"));
    assert!(!repo.delete(todoist.id).await.expect("second delete is a no-op"));
}

#[tokio::test(flavor = "multi_thread")]
async fn leases_exclude_other_holders_until_expiry() {
    let db = TestDatabase::new();
    let integrations = SqlCipherIntegrationRepository::new(db.manager.clone());
    let leases = SqlCipherLeaseRepository::new(db.manager.clone());
    let now = base_time();

    let integration = make_integration("org-3", Provider::ClickUp, "lin@example.com", now);
    integrations.insert(&integration).await.expect("insert");
    let until = now + Duration::minutes(10);

    assert!(leases.try_acquire(integration.id, LeaseScope::Sync, "worker-a", until, now).await.expect("acquire"));
    assert!(!leases.try_acquire(integration.id, LeaseScope::Sync, "worker-b", until, now).await.expect("contend"));
    // Scopes are independent.
    assert!(leases
        .try_acquire(integration.id, LeaseScope::Refresh, "worker-b", until, now)
        .await
        .expect("other scope"));
    // The holder may extend its own lease.
    assert!(leases
        .try_acquire(integration.id, LeaseScope::Sync, "worker-a", until + Duration::minutes(5), now)
        .await
        .expect("extend"));

    let after_expiry = until + Duration::minutes(6);
    assert!(leases
        .try_acquire(integration.id, LeaseScope::Sync, "worker-b", after_expiry + Duration::minutes(10), after_expiry)
        .await
        .expect("take over expired lease"));

    leases.release(integration.id, LeaseScope::Sync, "worker-b").await.expect("release");
    assert!(leases.try_acquire(integration.id, LeaseScope::Sync, "worker-c", until, now).await.expect("free again"));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_state_upsert_and_expiring_channels() {
    let db = TestDatabase::new();
    let integrations = SqlCipherIntegrationRepository::new(db.manager.clone());
    let states = SqlCipherSyncStateRepository::new(db.manager.clone());
    let now = base_time();

    let integration = make_integration("org-4", Provider::Google, "mary@example.com", now);
    integrations.insert(&integration).await.expect("insert");
    assert!(states.get(integration.id).await.expect("get").is_none());

    let mut state = SyncState::new(integration.id, now);
    state.sync_token = Some("token-1".into());
    state.last_full_sync_at = Some(now);
    state.webhook_expires_at = Some(now + Duration::hours(2));
    states.upsert(&state).await.expect("insert state");

    // sync progress writes leave the channel expiry alone
    state.sync_token = Some("token-2".into());
    state.webhook_expires_at = None;
    state.updated_at = now + Duration::minutes(1);
    states.upsert(&state).await.expect("update state");

    let stored = states.get(integration.id).await.expect("get").expect("present");
    assert_eq!(stored.sync_token.as_deref(), Some("token-2"));
    assert_eq!(stored.last_full_sync_at, Some(now));
    assert_eq!(stored.webhook_expires_at, Some(now + Duration::hours(2)));

    assert!(states.list_webhook_expiring(now + Duration::hours(1)).await.expect("expiring").is_empty());
    assert_eq!(states.list_webhook_expiring(now + Duration::hours(3)).await.expect("expiring").len(), 1);

    states
        .set_webhook_expiry(integration.id, Some(now + Duration::days(6)), now + Duration::minutes(2))
        .await
        .expect("set expiry");
    let stored = states.get(integration.id).await.expect("get").expect("present");
    assert_eq!(stored.webhook_expires_at, Some(now + Duration::days(6)));
    assert_eq!(stored.sync_token.as_deref(), Some("token-2"), "expiry writes leave sync progress alone");
    assert!(states.list_webhook_expiring(now + Duration::hours(3)).await.expect("expiring").is_empty());

    let fresh = make_integration("org-4", Provider::Microsoft, "mary@example.com", now);
    integrations.insert(&fresh).await.expect("insert");
    states.set_webhook_expiry(fresh.id, Some(now + Duration::hours(1)), now).await.expect("expiry on new row");
    let created = states.get(fresh.id).await.expect("get").expect("row created");
    assert!(created.sync_token.is_none());
    assert_eq!(created.webhook_expires_at, Some(now + Duration::hours(1)));

    integrations.delete(integration.id).await.expect("delete integration");
    assert!(states.get(integration.id).await.expect("get").is_none(), "state cascades with its integration");
}

#[tokio::test(flavor = "multi_thread")]
async fn mirror_applies_upserts_and_removals() {
    let db = TestDatabase::new();
    let integrations = SqlCipherIntegrationRepository::new(db.manager.clone());
    let mirror = SqlCipherMirrorRepository::new(db.manager.clone());
    let now = base_time();

    let integration = make_integration("org-5", Provider::Google, "ken@example.com", now);
    integrations.insert(&integration).await.expect("insert");

    let event = |id: &str, title: &str| {
        RemoteChange::Upsert(MirrorRecord::Event(CalendarEventRecord {
            external_id: id.to_string(),
            title: Some(title.to_string()),
            description: None,
            starts_at: Some(now),
            ends_at: Some(now + Duration::hours(1)),
            all_day: false,
            organizer_email: Some("ken@example.com".into()),
            status: Some("confirmed".into()),
            remote_updated_at: Some(now),
            raw: json!({"id": id, "summary": title}),
        }))
    };

    let (upserted, deleted) = mirror
        .apply_changes(integration.id, &[event("e1", "Standup"), event("e2", "Review")], now)
        .await
        .expect("first page");
    assert_eq!((upserted, deleted), (2, 0));

    let (upserted, deleted) = mirror
        .apply_changes(
            integration.id,
            &[
                event("e1", "Standup (moved)"),
                RemoteChange::Removed { kind: MirrorKind::Event, external_id: "e2".into() },
                RemoteChange::Removed { kind: MirrorKind::Event, external_id: "never-seen".into() },
            ],
            now + Duration::minutes(5),
        )
        .await
        .expect("incremental page");
    assert_eq!((upserted, deleted), (1, 1));
    assert_eq!(mirror.count(integration.id, MirrorKind::Event).await.expect("count"), 1);

    let Some(MirrorRecord::Event(stored)) =
        mirror.get(integration.id, MirrorKind::Event, "e1").await.expect("get")
    else {
        panic!("expected stored event");
    };
    assert_eq!(stored.title.as_deref(), Some("Standup (moved)"));
    assert!(mirror.get(integration.id, MirrorKind::Event, "e2").await.expect("get").is_none());

    let employee = RemoteChange::Upsert(MirrorRecord::Employee(EmployeeRecord {
        external_id: "emp-1".into(),
        display_name: "Ken Thompson".into(),
        work_email: None,
        job_title: None,
        department: None,
        employment_status: Some("active".into()),
        remote_updated_at: None,
        raw: json!({}),
    }));
    mirror.apply_changes(integration.id, &[employee], now).await.expect("employee");

    assert_eq!(mirror.delete_all(integration.id).await.expect("wipe"), 2);
    assert_eq!(mirror.count(integration.id, MirrorKind::Employee).await.expect("count"), 0);
}

fn queue_item(event_id: &str, now: chrono::DateTime<Utc>) -> WebhookQueueItem {
    let headers = BTreeMap::from([("content-type".to_string(), "application/json".to_string())]);
    WebhookQueueItem::new(Provider::Linear, event_id, r#"{"type":"Issue"}"#, headers, Some("org-6".into()), 5, now)
}

#[tokio::test(flavor = "multi_thread")]
async fn webhook_queue_claims_completes_and_records_ledger() {
    let db = TestDatabase::new();
    let queue = SqlCipherWebhookQueueRepository::new(db.manager.clone());
    let now = base_time();

    let first = queue_item("evt-1", now);
    let second = queue_item("evt-2", now + Duration::seconds(1));
    queue.enqueue(&first).await.expect("enqueue first");
    queue.enqueue(&second).await.expect("enqueue second");

    let ready = queue.fetch_ready(now, 10).await.expect("fetch ready");
    assert_eq!(ready.iter().map(|i| i.event_id.as_str()).collect::<Vec<_>>(), vec!["evt-1", "evt-2"]);
    assert_eq!(ready[0].headers, first.headers);
    assert!(queue.fetch_ready(now, 0).await.expect("zero limit").is_empty());

    assert!(queue.try_claim(first.id, now).await.expect("claim"));
    assert!(!queue.try_claim(first.id, now).await.expect("double claim"), "a claimed item cannot be claimed twice");

    assert!(!queue.is_processed(&first.ledger_key()).await.expect("ledger lookup"));
    let integration_id = Uuid::now_v7();
    let ledger = ProcessedEvent::for_item(&first, Some(integration_id), now);
    queue.complete(first.id, Some(&ledger), now).await.expect("complete");
    assert!(queue.is_processed(&first.ledger_key()).await.expect("ledger lookup"));

    let stored = queue.get(first.id).await.expect("get").expect("present");
    assert_eq!(stored.status, WebhookStatus::Completed);
    assert_eq!(stored.processed_at, Some(now));

    let err = queue.complete(Uuid::now_v7(), None, now).await.expect_err("unknown item");
    assert!(matches!(err, OrgSyncError::NotFound(_)));

    let stats = queue.stats().await.expect("stats");
    assert_eq!((stats.pending, stats.completed), (1, 1));
}

#[tokio::test(flavor = "multi_thread")]
async fn webhook_queue_retries_dead_letters_and_cleanup() {
    let db = TestDatabase::new();
    let queue = SqlCipherWebhookQueueRepository::new(db.manager.clone());
    let now = base_time();

    let retried = queue_item("evt-retry", now);
    let dead = queue_item("evt-dead", now);
    let stale = queue_item("evt-stale", now);
    for item in [&retried, &dead, &stale] {
        queue.enqueue(item).await.expect("enqueue");
        assert!(queue.try_claim(item.id, now).await.expect("claim"));
    }

    let retry_at = now + Duration::seconds(30);
    queue.mark_failed(retried.id, 1, Some(retry_at), "provider timeout").await.expect("mark retry");
    queue.mark_failed(dead.id, 5, None, "gave up").await.expect("dead letter");

    assert!(queue.fetch_ready(now, 10).await.expect("fetch").is_empty(), "retry not due yet");
    let due = queue.fetch_ready(retry_at, 10).await.expect("fetch");
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, retried.id);
    assert_eq!(due[0].retry_count, 1);
    assert_eq!(due[0].last_error.as_deref(), Some("provider timeout"));

    let dead_row = queue.get(dead.id).await.expect("get").expect("present");
    assert!(dead_row.is_dead_lettered());

    let stats = queue.stats().await.expect("stats");
    assert_eq!((stats.processing, stats.retrying, stats.dead_lettered), (1, 1, 1));

    // Items stuck in processing are released for another attempt.
    let later = now + Duration::minutes(20);
    assert_eq!(queue.requeue_stale(now + Duration::minutes(10), later).await.expect("requeue"), 1);
    let released = queue.get(stale.id).await.expect("get").expect("present");
    assert_eq!(released.status, WebhookStatus::Failed);
    assert_eq!(released.retry_count, 1);
    assert_eq!(released.next_retry_at, Some(later));

    assert!(queue.try_claim(retried.id, retry_at).await.expect("claim retry"));
    queue.complete(retried.id, None, retry_at).await.expect("complete retry");
    assert_eq!(queue.delete_completed_before(retry_at).await.expect("cleanup"), 0);
    assert_eq!(queue.delete_completed_before(retry_at + Duration::days(7)).await.expect("cleanup"), 1);
    assert!(queue.get(retried.id).await.expect("get").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn webhook_queue_dead_letters_repeatedly_abandoned_items() {
    let db = TestDatabase::new();
    let queue = SqlCipherWebhookQueueRepository::new(db.manager.clone());
    let mut now = base_time();

    let crashing = queue_item("evt-crash", now);
    queue.enqueue(&crashing).await.expect("enqueue");

    for attempt in 1..=crashing.max_retries {
        assert!(queue.try_claim(crashing.id, now).await.expect("claim"), "attempt {attempt} claims");
        now += Duration::minutes(11);
        assert_eq!(queue.requeue_stale(now - Duration::minutes(10), now).await.expect("requeue"), 1);
    }

    let stored = queue.get(crashing.id).await.expect("get").expect("present");
    assert_eq!(stored.retry_count, crashing.max_retries);
    assert!(stored.is_dead_lettered());
    assert!(queue.fetch_ready(now, 10).await.expect("fetch").is_empty());
    assert_eq!(queue.stats().await.expect("stats").dead_lettered, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn webhook_queue_dead_letters_items_with_unreadable_headers() {
    let db = TestDatabase::new();
    let queue = SqlCipherWebhookQueueRepository::new(db.manager.clone());
    let now = base_time();

    let corrupt = queue_item("evt-corrupt", now);
    let healthy = queue_item("evt-healthy", now + Duration::seconds(1));
    queue.enqueue(&corrupt).await.expect("enqueue corrupt");
    queue.enqueue(&healthy).await.expect("enqueue healthy");
    db.manager
        .get_connection()
        .expect("connection")
        .execute("UPDATE webhook_queue SET headers = 'not json' WHERE id = ?1", &[&corrupt.id.to_string()])
        .expect("corrupt headers");

    let ready = queue.fetch_ready(now + Duration::seconds(5), 10).await.expect("fetch ready");
    assert_eq!(ready.iter().map(|i| i.id).collect::<Vec<_>>(), vec![healthy.id], "the readable item still flows");

    let err = queue.get(corrupt.id).await.expect_err("unreadable row");
    assert!(matches!(err, OrgSyncError::InvalidInput(_)), "got {err:?}");

    let stats = queue.stats().await.expect("stats");
    assert_eq!((stats.pending, stats.dead_lettered), (1, 1));
}
