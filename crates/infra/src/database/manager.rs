//! Database connection manager backed by the shared SQLCipher pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use orgsync_common::storage::{
    PoolHealth, SqlCipherConnection, SqlCipherPool, SqlCipherPoolConfig, StorageError,
};
use orgsync_domain::{DatabaseConfig, OrgSyncError, Result};
use rusqlite::params;
use tokio::task;
use tracing::info;

use super::rows::map_join_error;
use crate::errors::InfraError;

pub(crate) const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Database manager that wraps an [`SqlCipherPool`].
pub struct DbManager {
    pool: Arc<SqlCipherPool>,
    path: PathBuf,
}

impl DbManager {
    /// Create a new manager with the given pool size and SQLCipher key.
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        pool_size: u32,
        encryption_key: Option<&str>,
    ) -> Result<Self> {
        let key = encryption_key
            .filter(|key| !key.trim().is_empty())
            .map(std::borrow::ToOwned::to_owned)
            .ok_or_else(|| OrgSyncError::Security("database encryption key not provided".into()))?;

        let path = db_path.as_ref().to_path_buf();
        let config = SqlCipherPoolConfig::default().with_max_size(pool_size.max(1));

        let pool = SqlCipherPool::new(&path, key, config).map(Arc::new).map_err(map_storage_error)?;

        info!(db_path = %path.display(), max_connections = pool_size.max(1), "sqlcipher pool initialised");

        Ok(Self { pool, path })
    }

    /// Builds a manager from the `database` config section. The SQLCipher key
    /// falls back to the vault master key when no dedicated key is set.
    pub fn from_config(config: &DatabaseConfig, fallback_key: Option<&str>) -> Result<Self> {
        let key = config.encryption_key.as_deref().or(fallback_key);
        Self::new(&config.path, config.pool_size, key)
    }

    /// Borrow the underlying SQLCipher pool.
    pub fn pool(&self) -> &Arc<SqlCipherPool> {
        &self.pool
    }

    /// Acquire a SQLCipher connection from the pool.
    pub fn get_connection(&self) -> Result<SqlCipherConnection> {
        self.pool.get_sqlcipher_connection().map_err(map_storage_error)
    }

    /// Ensure the full schema exists on the current database.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        create_schema(&conn)?;
        Ok(())
    }

    /// Runs blocking SQLCipher work on the blocking thread pool with a pooled
    /// connection.
    pub async fn with_connection<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqlCipherConnection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(self);
        task::spawn_blocking(move || -> Result<T> {
            let conn = db.get_connection()?;
            f(&conn)
        })
        .await
        .map_err(map_join_error)?
    }

    /// Like [`DbManager::with_connection`] with a mutable connection, for
    /// work that opens a transaction.
    pub async fn with_connection_mut<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqlCipherConnection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(self);
        task::spawn_blocking(move || -> Result<T> {
            let mut conn = db.get_connection()?;
            f(&mut conn)
        })
        .await
        .map_err(map_join_error)?
    }

    /// Return the configured database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires a connection and runs a probe query.
    pub fn health_check(&self) -> PoolHealth {
        self.pool.health_check()
    }
}

fn create_schema(conn: &SqlCipherConnection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL).map_err(map_sql_error)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, CAST(strftime('%s','now') AS INTEGER) * 1000)",
        params![SCHEMA_VERSION],
    )
    .map_err(map_storage_error)?;
    Ok(())
}

pub(crate) fn map_sql_error(err: rusqlite::Error) -> OrgSyncError {
    OrgSyncError::from(InfraError::from(err))
}

pub(crate) fn map_storage_error(err: StorageError) -> OrgSyncError {
    OrgSyncError::from(InfraError::from(err))
}
