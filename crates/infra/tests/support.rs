#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use orgsync_core::CredentialVault;
use orgsync_domain::{
    EncryptedCredentials, Integration, IntegrationStatus, KdfConfig, OAuthCredentials, Provider,
    VaultConfig, WebhookChannel,
};
use orgsync_infra::database::DbManager;
use tempfile::TempDir;
use uuid::Uuid;

pub const TEST_DB_KEY: &str = "test_key_64_chars_long_aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const TEST_MASTER_KEY: &str = "test-master-key-for-integration-tests";

/// Temporary database wrapper that keeps the underlying file alive for the
/// duration of a test run.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    /// Create a new temporary database with migrations applied.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let db_path = temp_dir.path().join("orgsync-test.db");

        let manager = DbManager::new(&db_path, 4, Some(TEST_DB_KEY)).expect("db manager should be created");
        manager.run_migrations().expect("schema migrations should apply");

        Self { manager: Arc::new(manager), _temp_dir: temp_dir }
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Vault with cheap KDF parameters so tests stay fast.
pub fn test_vault() -> Arc<CredentialVault> {
    let config = VaultConfig {
        master_key: Some(TEST_MASTER_KEY.to_string()),
        kdf: KdfConfig { memory_kib: 1024, iterations: 1, parallelism: 1 },
        ..Default::default()
    };
    Arc::new(CredentialVault::from_config(&config).expect("vault should build"))
}

pub fn sealed(vault: &CredentialVault, access_token: &str, refresh_token: Option<&str>) -> EncryptedCredentials {
    let credentials = OAuthCredentials {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.map(str::to_string),
        expires_at: None,
        token_type: Some("Bearer".into()),
    };
    vault.seal(&credentials).expect("credentials should seal")
}

/// Placeholder ciphertext for tests that never open credentials.
pub fn opaque_credentials() -> EncryptedCredentials {
    EncryptedCredentials {
        ciphertext: "Y2lwaGVy".into(),
        iv: "aXY=".into(),
        auth_tag: "dGFn".into(),
        salt: "c2FsdA==".into(),
        key_version: 1,
    }
}

pub fn make_integration(organization_id: &str, provider: Provider, email: &str, now: DateTime<Utc>) -> Integration {
    Integration {
        id: Uuid::now_v7(),
        organization_id: organization_id.to_string(),
        provider,
        account_email: Integration::normalize_email(email),
        account_id: format!("acct-{email}"),
        status: IntegrationStatus::Connected,
        scopes: vec!["read".into()],
        credentials: opaque_credentials(),
        webhook: WebhookChannel::default(),
        expires_at: None,
        last_used_at: None,
        last_refreshed_at: None,
        refresh_count: 0,
        last_error: None,
        created_at: now,
        updated_at: now,
    }
}
