//! Signed OAuth `state` parameter.
//!
//! Format: `base64url(json) "." hex(hmac_sha256(key, base64url(json)))`.
//! The key is derived from the vault master key so no extra secret is
//! needed.

use chrono::{DateTime, Duration, Utc};
use orgsync_common::crypto::signature::{decode_url_safe, encode_url_safe};
use orgsync_common::crypto::{derive_subkey, random_token, sign_hex, verify, SignatureEncoding};
use orgsync_domain::constants::OAUTH_STATE_NONCE_BYTES;
use orgsync_domain::{OrgSyncError, Provider, Result};
use serde::{Deserialize, Serialize};

const STATE_KEY_PURPOSE: &str = "oauth-state";

/// Round-tripped through the provider's consent screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    pub provider: Provider,
    pub organization_id: String,
    pub redirect_url: String,
    pub nonce: String,
    /// Unix seconds.
    pub issued_at: i64,
}

impl OAuthState {
    pub fn new(
        provider: Provider,
        organization_id: impl Into<String>,
        redirect_url: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            provider,
            organization_id: organization_id.into(),
            redirect_url: redirect_url.into(),
            nonce: random_token(OAUTH_STATE_NONCE_BYTES),
            issued_at: now.timestamp(),
        }
    }
}

pub struct OAuthStateCodec {
    key: [u8; 32],
    ttl: Duration,
}

impl OAuthStateCodec {
    pub fn new(master_key: &str, ttl: Duration) -> Result<Self> {
        let key = derive_subkey(master_key.as_bytes(), STATE_KEY_PURPOSE)
            .map_err(|e| OrgSyncError::Config(format!("cannot derive OAuth state key: {e}")))?;
        Ok(Self { key, ttl })
    }

    pub fn encode(&self, state: &OAuthState) -> Result<String> {
        let json = serde_json::to_vec(state)
            .map_err(|e| OrgSyncError::Internal(format!("failed to serialize OAuth state: {e}")))?;
        let body = encode_url_safe(&json);
        let signature = sign_hex(&self.key, &[body.as_bytes()])
            .map_err(|e| OrgSyncError::Internal(format!("failed to sign OAuth state: {e}")))?;
        Ok(format!("{body}.{signature}"))
    }

    /// Verifies the signature and freshness of a state token.
    pub fn decode(&self, token: &str, now: DateTime<Utc>) -> Result<OAuthState> {
        let (body, signature) = token.split_once('.').ok_or_else(|| invalid("missing signature"))?;
        if !verify(&self.key, &[body.as_bytes()], signature, SignatureEncoding::Hex) {
            return Err(invalid("signature mismatch"));
        }
        let json = decode_url_safe(body).ok_or_else(|| invalid("bad encoding"))?;
        let state: OAuthState = serde_json::from_slice(&json).map_err(|_| invalid("bad payload"))?;

        let age = now.timestamp() - state.issued_at;
        if age < -60 || age > self.ttl.num_seconds() {
            return Err(invalid("expired"));
        }
        Ok(state)
    }
}

fn invalid(reason: &str) -> OrgSyncError {
    OrgSyncError::Security(format!("invalid OAuth state: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "oauth-state-test-master-key-0123456789abcdef";

    fn codec() -> OAuthStateCodec {
        OAuthStateCodec::new(MASTER, Duration::minutes(10)).unwrap()
    }

    #[test]
    fn encodes_and_decodes_fresh_state() {
        let now = Utc::now();
        let state = OAuthState::new(Provider::Google, "org-1", "https://app.example.com/settings", now);
        let token = codec().encode(&state).unwrap();
        assert_eq!(codec().decode(&token, now).unwrap(), state);
        assert!(!token.contains("org-1"));
    }

    #[test]
    fn rejects_tampered_payload() {
        let now = Utc::now();
        let token = codec().encode(&OAuthState::new(Provider::Linear, "org-1", "https://a", now)).unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let forged_body = encode_url_safe(
            &serde_json::to_vec(&OAuthState::new(Provider::Linear, "org-2", "https://a", now)).unwrap(),
        );
        let forged = format!("{forged_body}.{sig}");
        assert!(matches!(codec().decode(&forged, now), Err(OrgSyncError::Security(_))));
    }

    #[test]
    fn rejects_expired_state_and_foreign_keys() {
        let now = Utc::now();
        let token = codec().encode(&OAuthState::new(Provider::Gusto, "org-1", "https://a", now)).unwrap();
        assert!(codec().decode(&token, now + Duration::minutes(11)).is_err());

        let other = OAuthStateCodec::new("another-master-key-0123456789abcdef0000", Duration::minutes(10)).unwrap();
        assert!(other.decode(&token, now).is_err());
        assert!(codec().decode("garbage", now).is_err());
    }
}
