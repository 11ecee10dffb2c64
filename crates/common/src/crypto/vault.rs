//! Versioned AES-256-GCM sealing with per-record Argon2id key derivation.
//!
//! Every call to [`KeyRing::seal`] draws a fresh 96-bit nonce and a fresh
//! 256-bit salt, derives a record key from the current master key with
//! Argon2id, and stamps the master key version on the result. There is no API
//! that accepts a caller-supplied nonce.
//!
//! ```rust
//! use orgsync_common::crypto::{KdfParams, KeyRing};
//!
//! let ring = KeyRing::new(1, "0123456789abcdef0123456789abcdef", KdfParams::testing())?;
//! let sealed = ring.seal(b"{\"access_token\":\"tok\"}")?;
//! assert_eq!(ring.open(&sealed)?.as_slice(), b"{\"access_token\":\"tok\"}");
//! # Ok::<(), orgsync_common::crypto::VaultError>(())
//! ```

use std::collections::BTreeMap;
use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::password_hash::rand_core::{OsRng, RngCore};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const SALT_LEN: usize = 32;
/// Shortest master key accepted, in bytes.
pub const MIN_MASTER_KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// Encoding or length problems; the input was never a valid sealed box.
    #[error("Malformed sealed data: {0}")]
    Malformed(String),

    /// The authentication tag did not verify: tampered data or wrong key.
    #[error("Authentication tag verification failed")]
    VerificationFailed,

    #[error("No master key registered for version {0}")]
    UnknownKeyVersion(u32),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid master key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfParams {
    /// Minimal cost for unit tests. Never use in production.
    pub const fn testing() -> Self {
        Self { memory_kib: 64, iterations: 1, parallelism: 1 }
    }

    fn argon2(self) -> Result<Argon2<'static>, VaultError> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, Some(KEY_LEN))
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { memory_kib: 19 * 1024, iterations: 2, parallelism: 1 }
    }
}

/// Sealed record. All byte fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
    pub salt: String,
    pub key_version: u32,
}

/// Versioned set of master keys: one current key for sealing plus retired
/// keys that can still open older records.
pub struct KeyRing {
    current_version: u32,
    keys: BTreeMap<u32, Zeroizing<Vec<u8>>>,
    kdf: KdfParams,
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("current_version", &self.current_version)
            .field("versions", &self.keys.keys().collect::<Vec<_>>())
            .field("kdf", &self.kdf)
            .finish()
    }
}

impl KeyRing {
    pub fn new(current_version: u32, master_key: &str, kdf: KdfParams) -> Result<Self, VaultError> {
        let mut keys = BTreeMap::new();
        keys.insert(current_version, validate_master_key(master_key)?);
        Ok(Self { current_version, keys, kdf })
    }

    /// Registers a retired master key for opening older records.
    pub fn with_previous(mut self, version: u32, master_key: &str) -> Result<Self, VaultError> {
        if version == self.current_version {
            return Err(VaultError::InvalidKey(format!(
                "version {version} is already the current key"
            )));
        }
        self.keys.insert(version, validate_master_key(master_key)?);
        Ok(self)
    }

    pub const fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn knows_version(&self, version: u32) -> bool {
        self.keys.contains_key(&version)
    }

    /// Seals `plaintext` under the current master key.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedBox, VaultError> {
        let master = self
            .keys
            .get(&self.current_version)
            .ok_or(VaultError::UnknownKeyVersion(self.current_version))?;

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let record_key = self.derive(master, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(record_key.as_slice())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        let mut sealed = cipher
            .encrypt(&Nonce::from(nonce), plaintext)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        // aes-gcm appends the tag; store it separately.
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(SealedBox {
            ciphertext: BASE64.encode(&sealed),
            iv: BASE64.encode(nonce),
            auth_tag: BASE64.encode(tag),
            salt: BASE64.encode(salt),
            key_version: self.current_version,
        })
    }

    /// Opens a sealed record with the master key named by its version.
    pub fn open(&self, sealed: &SealedBox) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let nonce: [u8; NONCE_LEN] = decode_fixed("iv", &sealed.iv)?;
        let tag: [u8; TAG_LEN] = decode_fixed("auth_tag", &sealed.auth_tag)?;
        let salt: [u8; SALT_LEN] = decode_fixed("salt", &sealed.salt)?;
        let mut payload = BASE64
            .decode(&sealed.ciphertext)
            .map_err(|e| VaultError::Malformed(format!("ciphertext is not base64: {e}")))?;

        let master =
            self.keys.get(&sealed.key_version).ok_or(VaultError::UnknownKeyVersion(sealed.key_version))?;

        let record_key = self.derive(master, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(record_key.as_slice())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        payload.extend_from_slice(&tag);
        let plaintext = cipher.decrypt(&Nonce::from(nonce), payload.as_slice()).map_err(|_| {
            debug!(key_version = sealed.key_version, "sealed record failed tag verification");
            VaultError::VerificationFailed
        })?;

        Ok(Zeroizing::new(plaintext))
    }

    fn derive(&self, master: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, VaultError> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        self.kdf
            .argon2()?
            .hash_password_into(master, salt, key.as_mut_slice())
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }
}

fn validate_master_key(master_key: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let bytes = master_key.trim().as_bytes();
    if bytes.len() < MIN_MASTER_KEY_LEN {
        return Err(VaultError::InvalidKey(format!(
            "master key must be at least {MIN_MASTER_KEY_LEN} bytes"
        )));
    }
    Ok(Zeroizing::new(bytes.to_vec()))
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N], VaultError> {
    let bytes = BASE64
        .decode(value)
        .map_err(|e| VaultError::Malformed(format!("{field} is not base64: {e}")))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| VaultError::Malformed(format!("{field} must be {N} bytes, got {len}")))
}
