//! SQLCipher-backed sync bookkeeping.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_core::SyncStateRepository;
use orgsync_domain::{Result as DomainResult, SyncState};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::manager::{map_storage_error, DbManager};
use super::rows::{millis, opt_millis, opt_time_col, time_col, uuid_col};

pub struct SqlCipherSyncStateRepository {
    db: Arc<DbManager>,
}

impl SqlCipherSyncStateRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncStateRepository for SqlCipherSyncStateRepository {
    async fn get(&self, integration_id: Uuid) -> DomainResult<Option<SyncState>> {
        self.db
            .with_connection(move |conn| {
                let sql = format!("SELECT {SYNC_STATE_COLUMNS} FROM sync_states WHERE integration_id = ?1");
                let mut stmt = conn.prepare(&sql).map_err(map_storage_error)?;
                stmt.query_optional(params![integration_id.to_string()], map_sync_state_row)
                    .map_err(map_storage_error)
            })
            .await
    }

    async fn upsert(&self, state: &SyncState) -> DomainResult<()> {
        let state = state.clone();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    UPSERT_SQL,
                    params![
                        state.integration_id.to_string(),
                        state.sync_token,
                        state.delta_link,
                        opt_millis(state.last_full_sync_at),
                        opt_millis(state.last_incremental_sync_at),
                        state.last_sync_error,
                        opt_millis(state.webhook_expires_at),
                        millis(state.created_at),
                        millis(state.updated_at),
                    ],
                )
                .map_err(map_storage_error)?;
                Ok(())
            })
            .await
    }

    async fn set_webhook_expiry(
        &self,
        integration_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    SET_WEBHOOK_EXPIRY_SQL,
                    params![integration_id.to_string(), opt_millis(expires_at), millis(now)],
                )
                .map_err(map_storage_error)?;
                Ok(())
            })
            .await
    }

    async fn list_webhook_expiring(&self, before: DateTime<Utc>) -> DomainResult<Vec<SyncState>> {
        self.db
            .with_connection(move |conn| {
                let sql = format!(
                    "SELECT {SYNC_STATE_COLUMNS} FROM sync_states
                     WHERE webhook_expires_at IS NOT NULL AND webhook_expires_at <= ?1
                     ORDER BY webhook_expires_at ASC"
                );
                let mut stmt = conn.prepare(&sql).map_err(map_storage_error)?;
                stmt.query_map(params![millis(before)], map_sync_state_row).map_err(map_storage_error)
            })
            .await
    }
}

const SYNC_STATE_COLUMNS: &str = "integration_id, sync_token, delta_link, last_full_sync_at,
    last_incremental_sync_at, last_sync_error, webhook_expires_at, created_at, updated_at";

const UPSERT_SQL: &str = "INSERT INTO sync_states (
        integration_id, sync_token, delta_link, last_full_sync_at, last_incremental_sync_at,
        last_sync_error, webhook_expires_at, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT(integration_id) DO UPDATE SET
        sync_token = excluded.sync_token,
        delta_link = excluded.delta_link,
        last_full_sync_at = excluded.last_full_sync_at,
        last_incremental_sync_at = excluded.last_incremental_sync_at,
        last_sync_error = excluded.last_sync_error,
        updated_at = excluded.updated_at";

const SET_WEBHOOK_EXPIRY_SQL: &str = "INSERT INTO sync_states (
        integration_id, webhook_expires_at, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?3)
    ON CONFLICT(integration_id) DO UPDATE SET
        webhook_expires_at = excluded.webhook_expires_at,
        updated_at = excluded.updated_at";

fn map_sync_state_row(row: &Row<'_>) -> rusqlite::Result<SyncState> {
    Ok(SyncState {
        integration_id: uuid_col(row, 0)?,
        sync_token: row.get(1)?,
        delta_link: row.get(2)?,
        last_full_sync_at: opt_time_col(row, 3)?,
        last_incremental_sync_at: opt_time_col(row, 4)?,
        last_sync_error: row.get(5)?,
        webhook_expires_at: opt_time_col(row, 6)?,
        created_at: time_col(row, 7)?,
        updated_at: time_col(row, 8)?,
    })
}
