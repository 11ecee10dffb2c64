//! Configuration management
//!
//! [`Config`] is built once at startup by the infra loader and injected into
//! every service. Secret fields are never serialized.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CALENDAR_LOOKBACK_DAYS, OAUTH_STATE_TTL_SECS, REFRESH_LEASE_TTL_SECS, SYNC_LEASE_TTL_SECS,
    SYNC_PAGE_SIZE, TOKEN_REFRESH_BUFFER_SECS, WEBHOOK_COMPLETED_RETENTION_DAYS,
    WEBHOOK_DISPATCH_BATCH_SIZE, WEBHOOK_MAX_REPLAY_WINDOW_SECS, WEBHOOK_MAX_RETRIES,
    WEBHOOK_MAX_RETRY_DELAY_SECS, WEBHOOK_MIN_REPLAY_WINDOW_SECS, WEBHOOK_RENEWAL_WINDOW_SECS,
    WEBHOOK_RETRY_DELAY_SECS, WEBHOOK_STALE_PROCESSING_SECS,
};
use crate::errors::{OrgSyncError, Result};
use crate::types::Provider;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub vault: VaultConfig,
    pub providers: ProvidersConfig,
    pub tokens: TokenConfig,
    pub webhooks: WebhookConfig,
    pub sync: SyncConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "orgsync.db".to_string(), pool_size: 8, encryption_key: None }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Externally reachable base URL, used to build OAuth redirect URIs and
    /// webhook callback addresses.
    pub public_base_url: String,
    /// Where the OAuth callback sends the user when the state blob is unusable.
    pub default_redirect_url: String,
    pub oauth_state_ttl_secs: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            default_redirect_url: "http://localhost:3000/integrations".to_string(),
            oauth_state_ttl_secs: OAUTH_STATE_TTL_SECS,
        }
    }
}

/// Argon2id cost parameters for per-record key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self { memory_kib: 19 * 1024, iterations: 2, parallelism: 1 }
    }
}

/// Credential vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    #[serde(skip_serializing)]
    pub master_key: Option<String>,
    pub key_version: u32,
    /// Retired master keys still needed to open older records.
    #[serde(skip_serializing)]
    pub previous_keys: BTreeMap<u32, String>,
    pub kdf: KdfConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self { master_key: None, key_version: 1, previous_keys: BTreeMap::new(), kdf: KdfConfig::default() }
    }
}

/// OAuth client registration for one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// Shared secret or HMAC key used to verify webhook senders.
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    /// Override for the provider's API base URL (tests, sandboxes).
    pub api_base_url: Option<String>,
    /// Override for the provider's OAuth authorization/token host.
    pub auth_base_url: Option<String>,
    /// BambooHR company subdomain.
    pub company_domain: Option<String>,
}

/// Per-provider client registrations; absent providers are unconfigured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvidersConfig(pub BTreeMap<Provider, ProviderConfig>);

impl ProvidersConfig {
    /// Looks up a provider registration, failing with a config error when the
    /// client id or secret is missing.
    pub fn require(&self, provider: Provider) -> Result<&ProviderConfig> {
        let cfg = self.0.get(&provider).ok_or_else(|| {
            OrgSyncError::Config(format!("provider {provider} is not configured"))
        })?;
        if cfg.client_id.trim().is_empty() || cfg.client_secret.trim().is_empty() {
            return Err(OrgSyncError::Config(format!(
                "provider {provider} is missing client id or client secret"
            )));
        }
        Ok(cfg)
    }

    pub fn get(&self, provider: Provider) -> Option<&ProviderConfig> {
        self.0.get(&provider)
    }

    pub fn insert(&mut self, provider: Provider, config: ProviderConfig) {
        self.0.insert(provider, config);
    }

    pub fn configured(&self) -> impl Iterator<Item = Provider> + '_ {
        self.0.keys().copied()
    }
}

/// Token refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub refresh_buffer_secs: i64,
    pub refresh_lease_secs: i64,
    /// Call the provider's identity endpoint before declaring a permanent
    /// token unrecoverable.
    pub validate_permanent_tokens: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_secs: TOKEN_REFRESH_BUFFER_SECS,
            refresh_lease_secs: REFRESH_LEASE_TTL_SECS,
            validate_permanent_tokens: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    #[default]
    Fixed,
    Exponential,
}

/// Webhook queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub retry_backoff: RetryBackoff,
    pub max_retry_delay_secs: u64,
    pub completed_retention_days: i64,
    pub dispatch_batch_size: usize,
    pub stale_processing_secs: i64,
    pub replay_window_secs: i64,
    pub renewal_window_secs: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_retries: WEBHOOK_MAX_RETRIES,
            retry_delay_secs: WEBHOOK_RETRY_DELAY_SECS,
            retry_backoff: RetryBackoff::Fixed,
            max_retry_delay_secs: WEBHOOK_MAX_RETRY_DELAY_SECS,
            completed_retention_days: WEBHOOK_COMPLETED_RETENTION_DAYS,
            dispatch_batch_size: WEBHOOK_DISPATCH_BATCH_SIZE,
            stale_processing_secs: WEBHOOK_STALE_PROCESSING_SECS,
            replay_window_secs: WEBHOOK_MAX_REPLAY_WINDOW_SECS,
            renewal_window_secs: WEBHOOK_RENEWAL_WINDOW_SECS,
        }
    }
}

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub calendar_lookback_days: i64,
    pub page_size: u32,
    pub lease_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            calendar_lookback_days: CALENDAR_LOOKBACK_DAYS,
            page_size: SYNC_PAGE_SIZE,
            lease_secs: SYNC_LEASE_TTL_SECS,
        }
    }
}

/// Cron expressions (six fields, seconds first) for background jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub token_refresh_cron: String,
    pub webhook_dispatch_cron: String,
    pub webhook_cleanup_cron: String,
    pub webhook_renewal_cron: String,
    /// Periodic safety-net sync of every connected integration.
    pub sync_sweep_cron: Option<String>,
    pub job_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_refresh_cron: "0 * * * * *".to_string(),
            webhook_dispatch_cron: "*/10 * * * * *".to_string(),
            webhook_cleanup_cron: "0 0 3 * * *".to_string(),
            webhook_renewal_cron: "0 0 * * * *".to_string(),
            sync_sweep_cron: Some("0 */30 * * * *".to_string()),
            job_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: LogFormat::Pretty, filter: "info,orgsync=debug".to_string() }
    }
}

impl Config {
    /// Rejects configurations the process cannot start with.
    pub fn validate(&self) -> Result<()> {
        match self.vault.master_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(OrgSyncError::Config("vault master key is required".into())),
        }
        if self.vault.key_version == 0 {
            return Err(OrgSyncError::Config("vault key version must be at least 1".into()));
        }
        if self.vault.previous_keys.contains_key(&self.vault.key_version) {
            return Err(OrgSyncError::Config(format!(
                "key version {} is listed as both current and previous",
                self.vault.key_version
            )));
        }
        if self.webhooks.max_retries == 0 {
            return Err(OrgSyncError::Config("webhooks.max_retries must be positive".into()));
        }
        if !(WEBHOOK_MIN_REPLAY_WINDOW_SECS..=WEBHOOK_MAX_REPLAY_WINDOW_SECS)
            .contains(&self.webhooks.replay_window_secs)
        {
            return Err(OrgSyncError::Config(format!(
                "webhooks.replay_window_secs must be between {WEBHOOK_MIN_REPLAY_WINDOW_SECS} and {WEBHOOK_MAX_REPLAY_WINDOW_SECS}"
            )));
        }
        if self.tokens.refresh_buffer_secs < 0 {
            return Err(OrgSyncError::Config("tokens.refresh_buffer_secs must not be negative".into()));
        }
        if self.database.pool_size == 0 {
            return Err(OrgSyncError::Config("database.pool_size must be positive".into()));
        }
        Ok(())
    }
}
