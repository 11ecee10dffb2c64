//! Typed credential vault over the common [`KeyRing`].

use orgsync_common::crypto::{KdfParams, KeyRing, SealedBox, VaultError};
use orgsync_domain::{EncryptedCredentials, OAuthCredentials, OrgSyncError, Result, VaultConfig};

/// Seals and opens [`OAuthCredentials`] documents.
#[derive(Debug)]
pub struct CredentialVault {
    ring: KeyRing,
}

impl CredentialVault {
    pub fn new(ring: KeyRing) -> Self {
        Self { ring }
    }

    /// Builds the key ring from configuration: the current master key plus
    /// any retired keys.
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        let master = config
            .master_key
            .as_deref()
            .ok_or_else(|| OrgSyncError::Config("vault master key is required".into()))?;
        let kdf = KdfParams {
            memory_kib: config.kdf.memory_kib,
            iterations: config.kdf.iterations,
            parallelism: config.kdf.parallelism,
        };
        let mut ring = KeyRing::new(config.key_version, master, kdf).map_err(map_vault_error)?;
        for (version, key) in &config.previous_keys {
            ring = ring.with_previous(*version, key).map_err(map_vault_error)?;
        }
        Ok(Self { ring })
    }

    pub fn current_version(&self) -> u32 {
        self.ring.current_version()
    }

    pub fn seal(&self, credentials: &OAuthCredentials) -> Result<EncryptedCredentials> {
        let plaintext = serde_json::to_vec(credentials)
            .map_err(|e| OrgSyncError::Internal(format!("failed to serialize credentials: {e}")))?;
        let sealed = self.ring.seal(&plaintext).map_err(map_vault_error)?;
        Ok(EncryptedCredentials {
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            auth_tag: sealed.auth_tag,
            salt: sealed.salt,
            key_version: sealed.key_version,
        })
    }

    pub fn open(&self, credentials: &EncryptedCredentials) -> Result<OAuthCredentials> {
        let sealed = SealedBox {
            ciphertext: credentials.ciphertext.clone(),
            iv: credentials.iv.clone(),
            auth_tag: credentials.auth_tag.clone(),
            salt: credentials.salt.clone(),
            key_version: credentials.key_version,
        };
        let plaintext = self.ring.open(&sealed).map_err(map_vault_error)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| OrgSyncError::InvalidInput(format!("decrypted credentials are not valid JSON: {e}")))
    }

    /// Whether a record was sealed under a key other than the current one.
    pub fn needs_reseal(&self, credentials: &EncryptedCredentials) -> bool {
        credentials.key_version != self.ring.current_version()
    }
}

fn map_vault_error(err: VaultError) -> OrgSyncError {
    match err {
        VaultError::VerificationFailed => {
            OrgSyncError::Security("credential verification failed (tampered data or wrong key)".into())
        }
        VaultError::Malformed(msg) => OrgSyncError::InvalidInput(format!("malformed credentials: {msg}")),
        VaultError::UnknownKeyVersion(version) => {
            OrgSyncError::Config(format!("no master key configured for key version {version}"))
        }
        VaultError::InvalidKey(msg) | VaultError::KeyDerivation(msg) => OrgSyncError::Config(msg),
        VaultError::Encryption(msg) => OrgSyncError::Internal(msg),
    }
}
