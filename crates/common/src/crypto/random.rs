//! Random identifiers for nonces and per-channel secrets.

use rand::rngs::OsRng;
use rand::RngCore;

use super::signature::encode_url_safe;

/// `len` random bytes, URL-safe base64 encoded.
pub fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    encode_url_safe(&bytes)
}
