//! Sender verification for inbound webhooks.

use chrono::{DateTime, Utc};
use orgsync_common::crypto::verify;
use orgsync_common::security::constant_time_eq;
use orgsync_domain::constants::{WEBHOOK_MAX_REPLAY_WINDOW_SECS, WEBHOOK_MIN_REPLAY_WINDOW_SECS};
use orgsync_domain::{OrgSyncError, Result};
use serde_json::Value;

use crate::providers::ports::{
    SecretLocation, TimestampCheck, TimestampUnit, WebhookRequest, WebhookScheme,
};

/// Verifies one notification against `secret`.
///
/// `notification` is the parsed notification the check applies to; for
/// providers that batch notifications it carries the per-notification
/// fields. Every failure is `OrgSyncError::Security`.
pub fn verify_sender(
    scheme: &WebhookScheme,
    request: &WebhookRequest,
    notification: &Value,
    secret: &str,
    default_window_secs: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    match scheme {
        WebhookScheme::SharedSecret(location) => {
            let presented = read_location(*location, request, notification)
                .ok_or_else(|| reject("missing webhook secret"))?;
            if constant_time_eq(presented.as_bytes(), secret.as_bytes()) {
                Ok(())
            } else {
                Err(reject("webhook secret mismatch"))
            }
        }
        WebhookScheme::Hmac { header, encoding, timestamp } => {
            let signature = request.header(header).ok_or_else(|| reject("missing webhook signature"))?;
            let salt = match timestamp {
                Some(check) => {
                    let raw = check_timestamp(check, request, notification, default_window_secs, now)?;
                    check.salted.then_some(raw)
                }
                None => None,
            };

            let mut parts: Vec<&[u8]> = vec![&request.body];
            if let Some(salt) = salt.as_deref() {
                parts.push(salt.as_bytes());
            }
            if verify(secret.as_bytes(), &parts, signature, *encoding) {
                Ok(())
            } else {
                Err(reject("webhook signature mismatch"))
            }
        }
    }
}

/// Enforces the replay window and returns the raw timestamp text.
fn check_timestamp(
    check: &TimestampCheck,
    request: &WebhookRequest,
    notification: &Value,
    default_window_secs: i64,
    now: DateTime<Utc>,
) -> Result<String> {
    let raw = read_location(check.location, request, notification)
        .ok_or_else(|| reject("missing webhook timestamp"))?;
    let value: i64 = raw.trim().parse().map_err(|_| reject("unparseable webhook timestamp"))?;
    let sent_at_ms = match check.unit {
        TimestampUnit::Seconds => value.saturating_mul(1000),
        TimestampUnit::Millis => value,
    };

    let window_secs = check
        .window_secs
        .unwrap_or(default_window_secs)
        .clamp(WEBHOOK_MIN_REPLAY_WINDOW_SECS, WEBHOOK_MAX_REPLAY_WINDOW_SECS);
    let skew_ms = now.timestamp_millis().checked_sub(sent_at_ms).and_then(i64::checked_abs);
    match skew_ms {
        Some(skew) if skew <= window_secs * 1000 => {}
        _ => return Err(reject("webhook timestamp outside replay window")),
    }
    Ok(raw)
}

fn read_location(location: SecretLocation, request: &WebhookRequest, notification: &Value) -> Option<String> {
    match location {
        SecretLocation::Header(name) => request.header(name).map(str::to_string),
        SecretLocation::NotificationField(field) => match notification.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        },
    }
}

fn reject(reason: &str) -> OrgSyncError {
    OrgSyncError::Security(reason.to_string())
}
