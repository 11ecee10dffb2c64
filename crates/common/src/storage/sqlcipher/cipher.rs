//! SQLCipher key and cipher pragmas.

use rusqlite::Connection;
use tracing::{debug, error};

use crate::security::SecureString;
use crate::storage::error::{StorageError, StorageResult};

/// SQLCipher configuration
#[derive(Clone)]
pub struct SqlCipherConfig {
    pub key: SecureString,
    /// SQLCipher major version compatibility (4 for SQLCipher 4.x).
    pub cipher_compatibility: i32,
    pub kdf_iter: i32,
    pub cipher_memory_security: bool,
}

impl std::fmt::Debug for SqlCipherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlCipherConfig")
            .field("key", &self.key)
            .field("cipher_compatibility", &self.cipher_compatibility)
            .field("kdf_iter", &self.kdf_iter)
            .field("cipher_memory_security", &self.cipher_memory_security)
            .finish()
    }
}

impl SqlCipherConfig {
    pub fn new(key: String) -> Self {
        Self {
            key: SecureString::new(key),
            cipher_compatibility: 4,
            kdf_iter: 256_000,
            cipher_memory_security: true,
        }
    }
}

/// Applies the key and cipher pragmas. Must run before any other statement
/// on the connection.
pub fn configure_sqlcipher(conn: &Connection, config: &SqlCipherConfig) -> StorageResult<()> {
    conn.pragma_update(None, "key", config.key.expose()).map_err(|e| {
        error!(error = %e, "SQLCipher key setup failed");
        StorageError::classify_open_failure(&e.to_string())
            .unwrap_or_else(|| StorageError::Encryption(format!("Failed to set encryption key: {e}")))
    })?;

    conn.pragma_update(None, "cipher_compatibility", config.cipher_compatibility)
        .map_err(|e| StorageError::Encryption(format!("Failed to set cipher_compatibility: {e}")))?;

    conn.pragma_update(None, "kdf_iter", config.kdf_iter)
        .map_err(|e| StorageError::Encryption(format!("Failed to set kdf_iter: {e}")))?;

    let memory_security = if config.cipher_memory_security { "ON" } else { "OFF" };
    conn.pragma_update(None, "cipher_memory_security", memory_security).map_err(|e| {
        StorageError::Encryption(format!("Failed to set cipher_memory_security: {e}"))
    })?;

    debug!("SQLCipher configuration applied");
    Ok(())
}

/// Forces page decryption so a wrong key surfaces at pool creation rather
/// than on the first real query.
pub fn verify_encryption(conn: &Connection) -> StorageResult<()> {
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(())).map_err(|e| {
        error!(error = %e, "Encryption verification failed");
        StorageError::classify_open_failure(&e.to_string()).unwrap_or(StorageError::Rusqlite(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_key() {
        let config = SqlCipherConfig::new("super-secret-database-key".to_string());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert_eq!(config.cipher_compatibility, 4);
    }
}
