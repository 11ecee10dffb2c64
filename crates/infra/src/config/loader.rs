//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. If `ORGSYNC_MASTER_KEY` is set, the configuration is built from
//!    defaults plus environment variables
//! 2. Otherwise falls back to a config file (probed paths, JSON or TOML)
//! 3. Environment variables always override values read from a file, so
//!    secrets never need to live on disk
//!
//! ## Environment Variables
//! - `ORGSYNC_DB_PATH`, `ORGSYNC_DB_POOL_SIZE`, `ORGSYNC_DB_ENCRYPTION_KEY`
//! - `ORGSYNC_BIND_ADDRESS`, `ORGSYNC_PUBLIC_BASE_URL`,
//!   `ORGSYNC_DEFAULT_REDIRECT_URL`, `ORGSYNC_OAUTH_STATE_TTL_SECS`
//! - `ORGSYNC_MASTER_KEY`, `ORGSYNC_MASTER_KEY_VERSION`,
//!   `ORGSYNC_PREVIOUS_MASTER_KEYS` (`version:key` pairs, comma separated)
//! - `ORGSYNC_<PROVIDER>_CLIENT_ID`, `_CLIENT_SECRET`, `_WEBHOOK_SECRET`,
//!   `_API_BASE_URL`, `_AUTH_BASE_URL`, `_COMPANY_DOMAIN`
//! - `ORGSYNC_TOKEN_REFRESH_BUFFER_SECS`, `ORGSYNC_VALIDATE_PERMANENT_TOKENS`
//! - `ORGSYNC_WEBHOOK_MAX_RETRIES`, `ORGSYNC_WEBHOOK_RETRY_DELAY_SECS`,
//!   `ORGSYNC_WEBHOOK_RETRY_BACKOFF` (`fixed`/`exponential`),
//!   `ORGSYNC_WEBHOOK_RETENTION_DAYS`, `ORGSYNC_WEBHOOK_REPLAY_WINDOW_SECS`
//! - `ORGSYNC_SYNC_LOOKBACK_DAYS`, `ORGSYNC_SYNC_PAGE_SIZE`
//! - `ORGSYNC_SCHEDULER_ENABLED`, `ORGSYNC_JOB_TIMEOUT_SECS`
//! - `ORGSYNC_LOG_FORMAT` (`pretty`/`json`), `ORGSYNC_LOG_FILTER`
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./config.{json,toml}` and `./orgsync.{json,toml}`
//! 2. The same names in the parent and grandparent directories
//! 3. The same names relative to the executable

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use orgsync_domain::{
    Config, LogFormat, OrgSyncError, Provider, ProviderConfig, Result, RetryBackoff,
};

const ENV_PREFIX: &str = "ORGSYNC";

/// Load configuration with automatic fallback strategy.
///
/// # Errors
/// Returns `OrgSyncError::Config` if neither source yields a configuration
/// or a value cannot be parsed.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables on top of defaults.
///
/// # Errors
/// Returns `OrgSyncError::Config` if `ORGSYNC_MASTER_KEY` is missing or a
/// variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    env_var("ORGSYNC_MASTER_KEY")?;
    let mut config = Config::default();
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Load configuration from a file, then apply environment overrides.
///
/// If `path` is `None`, probes the standard locations via
/// [`probe_config_paths`].
///
/// # Errors
/// Returns `OrgSyncError::Config` if the file is missing, unreadable or
/// malformed.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(OrgSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            OrgSyncError::Config(
                "No config file found in any of the standard locations and ORGSYNC_MASTER_KEY is not set"
                    .to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| OrgSyncError::Config(format!("Failed to read config file: {e}")))?;

    let mut config = parse_config(&contents, &config_path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Parse configuration from string content. Format is detected by file
/// extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| OrgSyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| OrgSyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(OrgSyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    const NAMES: [&str; 4] = ["config.json", "config.toml", "orgsync.json", "orgsync.toml"];
    let mut candidates = Vec::new();

    let mut push_dir = |dir: &Path| {
        for prefix in ["", "..", "../.."] {
            let base = if prefix.is_empty() { dir.to_path_buf() } else { dir.join(prefix) };
            candidates.extend(NAMES.iter().map(|name| base.join(name)));
        }
    };

    if let Ok(cwd) = std::env::current_dir() {
        push_dir(&cwd);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            push_dir(exe_dir);
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Overlays every recognised `ORGSYNC_*` variable onto `config`.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(path) = env_opt("ORGSYNC_DB_PATH") {
        config.database.path = path;
    }
    set_parsed("ORGSYNC_DB_POOL_SIZE", &mut config.database.pool_size)?;
    if let Some(key) = env_opt("ORGSYNC_DB_ENCRYPTION_KEY") {
        config.database.encryption_key = Some(key);
    }

    if let Some(addr) = env_opt("ORGSYNC_BIND_ADDRESS") {
        config.server.bind_address = addr;
    }
    if let Some(url) = env_opt("ORGSYNC_PUBLIC_BASE_URL") {
        config.server.public_base_url = url;
    }
    if let Some(url) = env_opt("ORGSYNC_DEFAULT_REDIRECT_URL") {
        config.server.default_redirect_url = url;
    }
    set_parsed("ORGSYNC_OAUTH_STATE_TTL_SECS", &mut config.server.oauth_state_ttl_secs)?;

    if let Some(key) = env_opt("ORGSYNC_MASTER_KEY") {
        config.vault.master_key = Some(key);
    }
    set_parsed("ORGSYNC_MASTER_KEY_VERSION", &mut config.vault.key_version)?;
    if let Some(raw) = env_opt("ORGSYNC_PREVIOUS_MASTER_KEYS") {
        config.vault.previous_keys = parse_previous_keys(&raw)?;
    }

    for provider in Provider::ALL {
        apply_provider_env(config, provider);
    }

    set_parsed("ORGSYNC_TOKEN_REFRESH_BUFFER_SECS", &mut config.tokens.refresh_buffer_secs)?;
    if let Some(flag) = env_bool_opt("ORGSYNC_VALIDATE_PERMANENT_TOKENS") {
        config.tokens.validate_permanent_tokens = flag;
    }

    set_parsed("ORGSYNC_WEBHOOK_MAX_RETRIES", &mut config.webhooks.max_retries)?;
    set_parsed("ORGSYNC_WEBHOOK_RETRY_DELAY_SECS", &mut config.webhooks.retry_delay_secs)?;
    if let Some(raw) = env_opt("ORGSYNC_WEBHOOK_RETRY_BACKOFF") {
        config.webhooks.retry_backoff = match raw.to_ascii_lowercase().as_str() {
            "fixed" => RetryBackoff::Fixed,
            "exponential" => RetryBackoff::Exponential,
            other => {
                return Err(OrgSyncError::Config(format!("Invalid ORGSYNC_WEBHOOK_RETRY_BACKOFF: {other}")))
            }
        };
    }
    set_parsed("ORGSYNC_WEBHOOK_RETENTION_DAYS", &mut config.webhooks.completed_retention_days)?;
    set_parsed("ORGSYNC_WEBHOOK_REPLAY_WINDOW_SECS", &mut config.webhooks.replay_window_secs)?;

    set_parsed("ORGSYNC_SYNC_LOOKBACK_DAYS", &mut config.sync.calendar_lookback_days)?;
    set_parsed("ORGSYNC_SYNC_PAGE_SIZE", &mut config.sync.page_size)?;

    if let Some(flag) = env_bool_opt("ORGSYNC_SCHEDULER_ENABLED") {
        config.scheduler.enabled = flag;
    }
    set_parsed("ORGSYNC_JOB_TIMEOUT_SECS", &mut config.scheduler.job_timeout_secs)?;

    if let Some(raw) = env_opt("ORGSYNC_LOG_FORMAT") {
        config.logging.format = match raw.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "text" => LogFormat::Pretty,
            other => return Err(OrgSyncError::Config(format!("Invalid ORGSYNC_LOG_FORMAT: {other}"))),
        };
    }
    if let Some(filter) = env_opt("ORGSYNC_LOG_FILTER") {
        config.logging.filter = filter;
    }

    Ok(())
}

fn apply_provider_env(config: &mut Config, provider: Provider) {
    let var = |suffix: &str| env_opt(&format!("{ENV_PREFIX}_{}_{suffix}", provider.env_key()));
    let overrides = [
        var("CLIENT_ID"),
        var("CLIENT_SECRET"),
        var("WEBHOOK_SECRET"),
        var("API_BASE_URL"),
        var("AUTH_BASE_URL"),
        var("COMPANY_DOMAIN"),
    ];
    if overrides.iter().all(Option::is_none) {
        return;
    }

    let [client_id, client_secret, webhook_secret, api_base_url, auth_base_url, company_domain] = overrides;
    let mut entry = config.providers.get(provider).cloned().unwrap_or_else(ProviderConfig::default);
    if let Some(value) = client_id {
        entry.client_id = value;
    }
    if let Some(value) = client_secret {
        entry.client_secret = value;
    }
    entry.webhook_secret = webhook_secret.or(entry.webhook_secret);
    entry.api_base_url = api_base_url.or(entry.api_base_url);
    entry.auth_base_url = auth_base_url.or(entry.auth_base_url);
    entry.company_domain = company_domain.or(entry.company_domain);
    config.providers.insert(provider, entry);
}

/// Parses `1:old-key,2:older-key`.
fn parse_previous_keys(raw: &str) -> Result<BTreeMap<u32, String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (version, key) = pair.split_once(':').ok_or_else(|| {
                OrgSyncError::Config("ORGSYNC_PREVIOUS_MASTER_KEYS entries must be version:key".into())
            })?;
            let version = version.trim().parse::<u32>().map_err(|e| {
                OrgSyncError::Config(format!("Invalid previous key version '{version}': {e}"))
            })?;
            Ok((version, key.trim().to_string()))
        })
        .collect()
}

/// Get required environment variable
///
/// # Errors
/// Returns `OrgSyncError::Config` if the variable is not set.
fn env_var(key: &str) -> Result<String> {
    env_opt(key).ok_or_else(|| {
        OrgSyncError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Non-empty environment variable, if set.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn set_parsed<T>(key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = env_opt(key) {
        *slot = raw
            .trim()
            .parse::<T>()
            .map_err(|e| OrgSyncError::Config(format!("Invalid {key}: {e}")))?;
    }
    Ok(())
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool_opt(key: &str) -> Option<bool> {
    env_opt(key).map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
