//! HTTP adapters for the supported SaaS providers.
//!
//! Each adapter implements [`ProviderAdapter`] for one provider: OAuth
//! endpoints, change listing, record normalisation and webhook conventions.
//! [`build_lookup`] wires one adapter per configured provider.

pub mod bamboohr;
pub mod clickup;
pub mod google;
pub mod gusto;
pub mod linear;
pub mod microsoft;
pub mod oauth;
pub mod todoist;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use orgsync_core::{ProviderAdapter, ProviderLookup};
use orgsync_domain::{OrgSyncError, Provider, ProviderConfig, ProvidersConfig, Result};
use serde_json::Value;
use tracing::{info, warn};

pub use bamboohr::BambooHrAdapter;
pub use clickup::ClickUpAdapter;
pub use google::GoogleAdapter;
pub use gusto::GustoAdapter;
pub use linear::LinearAdapter;
pub use microsoft::MicrosoftAdapter;
pub use oauth::{OAuthApp, TokenResponse};
pub use todoist::TodoistAdapter;

use crate::http::HttpClient;

/// Builds the adapter table for every provider with credentials configured.
///
/// Incomplete registrations are skipped with a warning; using such a
/// provider later fails with `OrgSyncError::Config`.
pub fn build_lookup(config: &ProvidersConfig, http: &HttpClient) -> ProviderLookup {
    let mut lookup = ProviderLookup::new();
    for provider in config.configured() {
        match config.require(provider).and_then(|cfg| build_adapter(provider, cfg, http.clone())) {
            Ok(adapter) => {
                lookup.register(adapter);
                info!(%provider, "provider adapter ready");
            }
            Err(err) => warn!(%provider, error = %err, "skipping provider"),
        }
    }
    lookup
}

pub fn build_adapter(
    provider: Provider,
    config: &ProviderConfig,
    http: HttpClient,
) -> Result<Arc<dyn ProviderAdapter>> {
    Ok(match provider {
        Provider::Google => Arc::new(GoogleAdapter::new(config, http)),
        Provider::Microsoft => Arc::new(MicrosoftAdapter::new(config, http)),
        Provider::Linear => Arc::new(LinearAdapter::new(config, http)),
        Provider::Todoist => Arc::new(TodoistAdapter::new(config, http)),
        Provider::ClickUp => Arc::new(ClickUpAdapter::new(config, http)),
        Provider::Gusto => Arc::new(GustoAdapter::new(config, http)),
        Provider::BambooHr => Arc::new(BambooHrAdapter::new(config, http)?),
    })
}

/// Moves `default_url`'s path and query onto `base` when a base override is
/// configured (tests point every provider at a local mock server).
pub(crate) fn endpoint(default_url: &str, base: Option<&str>) -> String {
    let Some(base) = base.map(str::trim).filter(|b| !b.is_empty()) else {
        return default_url.to_string();
    };
    match url::Url::parse(default_url) {
        Ok(parsed) => {
            let mut rebased = format!("{}{}", base.trim_end_matches('/'), parsed.path());
            if let Some(query) = parsed.query() {
                rebased.push('?');
                rebased.push_str(query);
            }
            rebased
        }
        Err(_) => default_url.to_string(),
    }
}

pub(crate) fn api_base(default_base: &str, config: &ProviderConfig) -> String {
    config
        .api_base_url
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(default_base)
        .trim_end_matches('/')
        .to_string()
}

/// Page token for cursor-based providers. Carries the provider's own page
/// marker plus the highest `updated` value seen so far in the pass, so the
/// last page can emit the next cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CursorPage {
    pub page: Option<String>,
    pub high_water: Option<String>,
}

impl CursorPage {
    const SEPARATOR: char = '|';

    pub fn decode(token: Option<&str>) -> Self {
        match token {
            None => Self::default(),
            Some(raw) => match raw.split_once(Self::SEPARATOR) {
                Some((page, high_water)) => Self {
                    page: Some(page.to_string()).filter(|p| !p.is_empty()),
                    high_water: Some(high_water.to_string()).filter(|h| !h.is_empty()),
                },
                None => Self { page: Some(raw.to_string()), high_water: None },
            },
        }
    }

    pub fn encode(page: &str, high_water: Option<&str>) -> String {
        format!("{page}{}{}", Self::SEPARATOR, high_water.unwrap_or_default())
    }

    /// Keeps the newer of the stored and observed values.
    pub fn observe(&mut self, value: Option<&str>) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            let newer = self.high_water.as_deref().map_or(true, |current| newer_than(value, current));
            if newer {
                self.high_water = Some(value.to_string());
            }
        }
    }
}

fn newer_than(candidate: &str, current: &str) -> bool {
    match (candidate.parse::<i64>(), current.parse::<i64>()) {
        (Ok(a), Ok(b)) => a > b,
        _ => match (parse_time(candidate), parse_time(current)) {
            (Some(a), Some(b)) => a > b,
            _ => candidate > current,
        },
    }
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// String or number rendered as text (providers mix both for ids).
pub(crate) fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn bool_field(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// RFC 3339 timestamp, bare date (midnight UTC) or epoch milliseconds.
pub(crate) fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    if let Ok(ts) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts.and_utc());
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis);
    }
    None
}

pub(crate) fn time_field(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    match value.get(key)? {
        Value::String(s) => parse_time(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

pub(crate) fn require_id(value: &Value, key: &str, provider: Provider) -> Result<String> {
    id_field(value, key)
        .ok_or_else(|| OrgSyncError::InvalidInput(format!("{provider} record without `{key}`")))
}

pub(crate) fn first_non_empty(values: &[Option<&str>]) -> Option<String> {
    values.iter().flatten().find(|v| !v.trim().is_empty()).map(|v| v.trim().to_string())
}
