//! HMAC-SHA256 signing and verification for webhook senders and signed
//! state blobs.

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("HMAC key rejected")]
pub struct InvalidHmacKey;

/// Text encoding a provider uses for its signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    Hex,
    Base64,
}

/// Computes HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], InvalidHmacKey> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| InvalidHmacKey)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Hex-encoded signature over `parts`.
pub fn sign_hex(key: &[u8], parts: &[&[u8]]) -> Result<String, InvalidHmacKey> {
    hmac_sha256(key, parts).map(hex::encode)
}

/// Base64-encoded signature over `parts`.
pub fn sign_base64(key: &[u8], parts: &[&[u8]]) -> Result<String, InvalidHmacKey> {
    hmac_sha256(key, parts).map(|mac| BASE64.encode(mac))
}

/// Verifies an encoded signature over `parts` in constant time.
///
/// An optional `sha256=` prefix is tolerated. Undecodable signatures fail
/// verification rather than erroring.
pub fn verify(key: &[u8], parts: &[&[u8]], signature: &str, encoding: SignatureEncoding) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let decoded = match encoding {
        SignatureEncoding::Hex => hex::decode(signature.to_ascii_lowercase()).ok(),
        SignatureEncoding::Base64 => BASE64.decode(signature).ok(),
    };
    let Some(expected) = decoded else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(&expected).is_ok()
}

/// Derives a purpose-bound subkey from a master secret.
pub fn derive_subkey(master: &[u8], purpose: &str) -> Result<[u8; 32], InvalidHmacKey> {
    hmac_sha256(master, &[b"orgsync/", purpose.as_bytes()])
}

/// URL-safe unpadded base64, used for signed tokens in query strings.
pub fn encode_url_safe(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_url_safe(value: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(value).ok()
}
