//! Integration tests for AppContext lifecycle
//!
//! Tests verify that AppContext can be created against a fresh encrypted
//! database, start its background jobs, and shut down gracefully.

use std::sync::Arc;
use std::time::Duration;

use orgsync_app::AppContext;
use orgsync_domain::{Config, DatabaseConfig, KdfConfig, OrgSyncError, Provider};
use tempfile::TempDir;

const TEST_MASTER_KEY: &str = "test-master-key-for-context-lifecycle";

fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config {
        database: DatabaseConfig {
            path: temp_dir.path().join("orgsync.db").to_string_lossy().to_string(),
            pool_size: 4,
            encryption_key: None, // falls back to the vault master key
        },
        ..Config::default()
    };
    config.vault.master_key = Some(TEST_MASTER_KEY.to_string());
    config.vault.kdf = KdfConfig { memory_kib: 1024, iterations: 1, parallelism: 1 };
    config
}

/// Returns both the context and temp directory to keep the database alive.
async fn create_test_context() -> orgsync_domain::Result<(AppContext, TempDir)> {
    let temp_dir = TempDir::new().expect("failed to create temporary test directory");
    let ctx = AppContext::new(test_config(&temp_dir)).await?;
    Ok((ctx, temp_dir))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_context_creation_succeeds() {
    let (context, _temp_dir) = create_test_context().await.expect("AppContext creation should succeed");

    assert!(context.db.health_check().healthy, "database should be reachable after migrations");
    let stats = context.queue.stats().await.expect("queue stats should load");
    assert_eq!(stats.pending, 0);
    assert!(!context.scheduler_running().await, "scheduler only starts on request");

    context.shutdown().await.expect("shutdown should succeed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_master_key_is_rejected() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut config = test_config(&temp_dir);
    config.vault.master_key = None;

    let err = AppContext::new(config).await.err().expect("context should not build without a master key");
    assert!(matches!(err, OrgSyncError::Config(_)), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unconfigured_provider_is_unavailable() {
    let (context, _temp_dir) = create_test_context().await.expect("AppContext creation should succeed");

    let err = context.oauth.authorize(Provider::Google, "org-1", None).expect_err("google is not configured");
    assert!(matches!(err, OrgSyncError::Config(_)), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scheduler_starts_and_stops() {
    let (context, _temp_dir) = create_test_context().await.expect("AppContext creation should succeed");

    context.start_scheduler().await.expect("scheduler should start");
    assert!(context.scheduler_running().await);

    // Starting twice is a no-op.
    context.start_scheduler().await.expect("second start should be ignored");

    let result = tokio::time::timeout(Duration::from_secs(10), context.shutdown()).await;
    assert!(result.is_ok(), "shutdown() should complete within 10 seconds");
    result.expect("timeout").expect("shutdown should succeed");
    assert!(!context.scheduler_running().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disabled_scheduler_is_not_started() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut config = test_config(&temp_dir);
    config.scheduler.enabled = false;
    let context = AppContext::new(config).await.expect("AppContext creation should succeed");

    context.start_scheduler().await.expect("disabled scheduler is not an error");
    assert!(!context.scheduler_running().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_is_idempotent() {
    let (context, _temp_dir) = create_test_context().await.expect("AppContext creation should succeed");
    context.start_scheduler().await.expect("scheduler should start");

    for i in 1..=3 {
        let result = context.shutdown().await;
        assert!(result.is_ok(), "shutdown() call #{i} should succeed, got: {:?}", result.err());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_shutdown_calls() {
    let (context, _temp_dir) = create_test_context().await.expect("AppContext creation should succeed");
    context.start_scheduler().await.expect("scheduler should start");
    let context = Arc::new(context);

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let ctx = Arc::clone(&context);
            tokio::spawn(async move { ctx.shutdown().await })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.expect("task should not panic");
        assert!(result.is_ok(), "shutdown() call in task {i} should succeed");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cleanup_via_drop_without_shutdown() {
    {
        let (context, _temp_dir) = create_test_context().await.expect("AppContext creation should succeed");
        context.start_scheduler().await.expect("scheduler should start");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
}
