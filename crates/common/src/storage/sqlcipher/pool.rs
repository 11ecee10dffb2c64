//! SQLCipher connection pool

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::cipher::{configure_sqlcipher, verify_encryption, SqlCipherConfig};
use super::config::SqlCipherPoolConfig;
use super::connection::SqlCipherConnection;
use super::pragmas::apply_connection_pragmas;
use crate::storage::error::{StorageError, StorageResult};

/// Pool of encrypted SQLite connections.
///
/// Every connection runs the key and pragma setup on open; the first
/// connection is verified eagerly so a wrong key fails at construction.
#[derive(Debug)]
pub struct SqlCipherPool {
    pool: Pool<SqliteConnectionManager>,
    config: SqlCipherPoolConfig,
    acquired: AtomicU64,
    timeouts: AtomicU64,
}

/// Snapshot returned by [`SqlCipherPool::health_check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolHealth {
    pub healthy: bool,
    pub connections: u32,
    pub idle_connections: u32,
    pub max_connections: u32,
    pub connections_acquired: u64,
    pub connection_timeouts: u64,
    pub message: Option<String>,
}

impl SqlCipherPool {
    #[instrument(skip(encryption_key), fields(db_path = ?path, pool_size = config.max_size))]
    pub fn new(
        path: &Path,
        encryption_key: String,
        config: SqlCipherPoolConfig,
    ) -> StorageResult<Self> {
        info!("Creating SQLCipher connection pool");

        let cipher_config = SqlCipherConfig::new(encryption_key);
        let pool_config = config.clone();

        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            configure_sqlcipher(conn, &cipher_config)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            apply_connection_pragmas(conn, &pool_config)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|e| {
                warn!(error = %e, "Failed to create connection pool");
                StorageError::classify_open_failure(&e.to_string())
                    .unwrap_or_else(|| StorageError::Connection(format!("Failed to create pool: {e}")))
            })?;

        {
            let conn = pool.get().map_err(|e| {
                StorageError::classify_open_failure(&e.to_string()).unwrap_or_else(|| {
                    StorageError::Connection(format!("Failed to get test connection: {e}"))
                })
            })?;
            verify_encryption(&conn)?;
            debug!("Encryption verified successfully");
        }

        info!(max_size = config.max_size, "SQLCipher pool created");

        Ok(Self { pool, config, acquired: AtomicU64::new(0), timeouts: AtomicU64::new(0) })
    }

    #[instrument(skip(self), fields(pool_size = self.config.max_size))]
    pub fn get_sqlcipher_connection(&self) -> StorageResult<SqlCipherConnection> {
        match self.pool.get() {
            Ok(conn) => {
                self.acquired.fetch_add(1, Ordering::Relaxed);
                Ok(SqlCipherConnection::new(conn))
            }
            Err(e) if e.to_string().to_lowercase().contains("timed out") => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(timeout = ?self.config.connection_timeout, "Connection checkout timed out");
                Err(StorageError::Timeout(self.config.connection_timeout.as_secs()))
            }
            Err(e) => {
                warn!(error = %e, "Connection error");
                Err(StorageError::Connection(format!("Failed to get connection: {e}")))
            }
        }
    }

    pub fn health_check(&self) -> PoolHealth {
        let state = self.pool.state();
        let (healthy, message) = match self.pool.get() {
            Ok(conn) => match conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
                Ok(_) => (true, None),
                Err(e) => (false, Some(format!("probe query failed: {e}"))),
            },
            Err(e) => (false, Some(format!("Pool unhealthy: {e}"))),
        };
        PoolHealth {
            healthy,
            connections: state.connections,
            idle_connections: state.idle_connections,
            max_connections: self.config.max_size,
            connections_acquired: self.acquired.load(Ordering::Relaxed),
            connection_timeouts: self.timeouts.load(Ordering::Relaxed),
            message,
        }
    }
}
