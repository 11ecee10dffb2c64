//! SQLCipher-backed webhook inbox and idempotency ledger.
//!
//! Claims are conditional updates so two dispatchers can never process the
//! same row, and ledger writes happen in the same transaction that marks the
//! item completed.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_core::WebhookQueueRepository;
use orgsync_domain::{
    OrgSyncError, ProcessedEvent, QueueStats, Result as DomainResult, WebhookQueueItem,
    WebhookStatus,
};
use rusqlite::{params, Row, ToSql};
use tracing::warn;
use uuid::Uuid;

use super::manager::{map_sql_error, map_storage_error, DbManager};
use super::rows::{
    count_to_u64, enum_col, millis, opt_millis, opt_time_col, time_col, u32_col, usize_to_u64,
    uuid_col,
};

pub struct SqlCipherWebhookQueueRepository {
    db: Arc<DbManager>,
}

impl SqlCipherWebhookQueueRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WebhookQueueRepository for SqlCipherWebhookQueueRepository {
    async fn enqueue(&self, item: &WebhookQueueItem) -> DomainResult<()> {
        let item = item.clone();
        self.db
            .with_connection(move |conn| {
                let headers = serde_json::to_string(&item.headers)
                    .map_err(|e| OrgSyncError::Internal(format!("failed to encode headers: {e}")))?;
                let params: [&dyn ToSql; 13] = [
                    &item.id.to_string(),
                    &item.provider.as_str(),
                    &item.event_id,
                    &item.payload,
                    &headers,
                    &item.organization_id,
                    &item.status.as_str(),
                    &item.retry_count,
                    &item.max_retries,
                    &opt_millis(item.next_retry_at),
                    &item.last_error,
                    &millis(item.created_at),
                    &opt_millis(item.processed_at),
                ];
                conn.execute(INSERT_SQL, params.as_slice()).map_err(map_storage_error)?;
                Ok(())
            })
            .await
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<WebhookQueueItem>> {
        self.db
            .with_connection(move |conn| {
                let sql = format!("SELECT {QUEUE_COLUMNS} FROM webhook_queue WHERE id = ?1");
                let mut stmt = conn.prepare(&sql).map_err(map_storage_error)?;
                stmt.query_optional(params![id.to_string()], map_queue_row)
                    .map_err(map_storage_error)?
                    .map(StoredItem::into_item)
                    .transpose()
                    .map_err(OrgSyncError::from)
            })
            .await
    }

    async fn fetch_ready(&self, now: DateTime<Utc>, limit: usize) -> DomainResult<Vec<WebhookQueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db
            .with_connection(move |conn| {
                let sql = format!(
                    "SELECT {QUEUE_COLUMNS} FROM webhook_queue
                     WHERE status = 'pending'
                        OR (status = 'failed' AND retry_count < max_retries
                            AND next_retry_at IS NOT NULL AND next_retry_at <= ?1)
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?2"
                );
                let mut stmt = conn.prepare(&sql).map_err(map_storage_error)?;
                let rows = stmt.query_map(params![millis(now), limit], map_queue_row).map_err(map_storage_error)?;
                drop(stmt);

                let mut ready = Vec::with_capacity(rows.len());
                for row in rows {
                    match row.into_item() {
                        Ok(item) => ready.push(item),
                        Err(err) => {
                            // unroutable without its headers; park it as dead-lettered
                            warn!(error = %err, "dead-lettering webhook with unreadable stored headers");
                            conn.execute(
                                "UPDATE webhook_queue SET status = 'failed', next_retry_at = NULL,
                                    last_error = ?2, processing_started_at = NULL
                                 WHERE id = ?1",
                                params![err.item_id.to_string(), err.to_string()],
                            )
                            .map_err(map_storage_error)?;
                        }
                    }
                }
                Ok(ready)
            })
            .await
    }

    async fn try_claim(&self, id: Uuid, now: DateTime<Utc>) -> DomainResult<bool> {
        self.db
            .with_connection(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE webhook_queue SET status = 'processing', processing_started_at = ?2
                         WHERE id = ?1
                           AND (status = 'pending' OR (status = 'failed' AND next_retry_at IS NOT NULL))",
                        params![id.to_string(), millis(now)],
                    )
                    .map_err(map_storage_error)?;
                Ok(changed == 1)
            })
            .await
    }

    async fn is_processed(&self, key: &str) -> DomainResult<bool> {
        let key = key.to_string();
        self.db
            .with_connection(move |conn| {
                let found: i64 = conn
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM processed_events WHERE key = ?1)",
                        params![key],
                        |row| row.get(0),
                    )
                    .map_err(map_storage_error)?;
                Ok(found == 1)
            })
            .await
    }

    async fn complete(
        &self,
        id: Uuid,
        ledger: Option<&ProcessedEvent>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let ledger = ledger.cloned();
        self.db
            .with_connection_mut(move |conn| {
                let tx = conn.transaction().map_err(map_sql_error)?;
                if let Some(entry) = &ledger {
                    let inserted = tx
                        .execute(
                            "INSERT OR IGNORE INTO processed_events (key, provider, event_id, integration_id, processed_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            params![
                                entry.key,
                                entry.provider.as_str(),
                                entry.event_id,
                                entry.integration_id.map(|id| id.to_string()),
                                millis(entry.processed_at),
                            ],
                        )
                        .map_err(map_sql_error)?;
                    if inserted == 0 {
                        warn!(key = %entry.key, "ledger entry already present");
                    }
                }
                let changed = tx
                    .execute(
                        "UPDATE webhook_queue SET status = 'completed', processed_at = ?2,
                            next_retry_at = NULL, processing_started_at = NULL
                         WHERE id = ?1",
                        params![id.to_string(), millis(now)],
                    )
                    .map_err(map_sql_error)?;
                if changed == 0 {
                    return Err(OrgSyncError::NotFound(format!("webhook queue item {id}")));
                }
                tx.commit().map_err(map_sql_error)
            })
            .await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        retry_count: u32,
        next_retry_at: Option<DateTime<Utc>>,
        error: &str,
    ) -> DomainResult<()> {
        let error = error.to_string();
        self.db
            .with_connection(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE webhook_queue SET status = 'failed', retry_count = ?2, next_retry_at = ?3,
                            last_error = ?4, processing_started_at = NULL
                         WHERE id = ?1",
                        params![id.to_string(), retry_count, opt_millis(next_retry_at), error],
                    )
                    .map_err(map_storage_error)?;
                if changed == 0 {
                    return Err(OrgSyncError::NotFound(format!("webhook queue item {id}")));
                }
                Ok(())
            })
            .await
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        self.db
            .with_connection(move |conn| {
                let removed = conn
                    .execute(
                        "DELETE FROM webhook_queue WHERE status = 'completed' AND processed_at < ?1",
                        params![millis(cutoff)],
                    )
                    .map_err(map_storage_error)?;
                Ok(usize_to_u64(removed))
            })
            .await
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> DomainResult<u64> {
        self.db
            .with_connection(move |conn| {
                // an abandoned attempt counts as a failure so a crashing item still dead-letters
                let requeued = conn
                    .execute(
                        "UPDATE webhook_queue SET status = 'failed',
                            retry_count = retry_count + 1,
                            next_retry_at = CASE WHEN retry_count + 1 >= max_retries THEN NULL ELSE ?2 END,
                            last_error = 'processing abandoned', processing_started_at = NULL
                         WHERE status = 'processing' AND processing_started_at < ?1",
                        params![millis(cutoff), millis(now)],
                    )
                    .map_err(map_storage_error)?;
                Ok(usize_to_u64(requeued))
            })
            .await
    }

    async fn stats(&self) -> DomainResult<QueueStats> {
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT status, next_retry_at IS NULL, COUNT(*) FROM webhook_queue
                         GROUP BY status, next_retry_at IS NULL",
                    )
                    .map_err(map_storage_error)?;
                let rows = stmt
                    .query_map(&[], |row| {
                        Ok((enum_col::<WebhookStatus>(row, 0)?, row.get::<_, bool>(1)?, row.get::<_, i64>(2)?))
                    })
                    .map_err(map_storage_error)?;
                let mut stats = QueueStats::default();
                for (status, no_retry, count) in rows {
                    let count = count_to_u64(count);
                    match status {
                        WebhookStatus::Pending => stats.pending += count,
                        WebhookStatus::Processing => stats.processing += count,
                        WebhookStatus::Completed => stats.completed += count,
                        WebhookStatus::Failed if no_retry => stats.dead_lettered += count,
                        WebhookStatus::Failed => stats.retrying += count,
                    }
                }
                Ok(stats)
            })
            .await
    }
}

const QUEUE_COLUMNS: &str = "id, provider, event_id, payload, headers, organization_id, status,
    retry_count, max_retries, next_retry_at, last_error, created_at, processed_at";

const INSERT_SQL: &str = "INSERT INTO webhook_queue (
        id, provider, event_id, payload, headers, organization_id, status,
        retry_count, max_retries, next_retry_at, last_error, created_at, processed_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

/// A queue row as read. Headers that fail to decode are kept as an error so
/// the item can be dead-lettered instead of routed without them.
struct StoredItem {
    item: WebhookQueueItem,
    header_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("unreadable stored webhook headers: {reason}")]
struct UnreadableHeaders {
    item_id: Uuid,
    reason: String,
}

impl From<UnreadableHeaders> for OrgSyncError {
    fn from(err: UnreadableHeaders) -> Self {
        OrgSyncError::InvalidInput(format!("webhook queue item {}: {err}", err.item_id))
    }
}

impl StoredItem {
    fn into_item(self) -> Result<WebhookQueueItem, UnreadableHeaders> {
        match self.header_error {
            None => Ok(self.item),
            Some(reason) => Err(UnreadableHeaders { item_id: self.item.id, reason }),
        }
    }
}

fn map_queue_row(row: &Row<'_>) -> rusqlite::Result<StoredItem> {
    let raw_headers: String = row.get(4)?;
    let (headers, header_error) = match serde_json::from_str::<BTreeMap<String, String>>(&raw_headers) {
        Ok(headers) => (headers, None),
        Err(err) => (BTreeMap::new(), Some(err.to_string())),
    };

    let item = WebhookQueueItem {
        id: uuid_col(row, 0)?,
        provider: enum_col(row, 1)?,
        event_id: row.get(2)?,
        payload: row.get(3)?,
        headers,
        organization_id: row.get(5)?,
        status: enum_col(row, 6)?,
        retry_count: u32_col(row, 7)?,
        max_retries: u32_col(row, 8)?,
        next_retry_at: opt_time_col(row, 9)?,
        last_error: row.get(10)?,
        created_at: time_col(row, 11)?,
        processed_at: opt_time_col(row, 12)?,
    };
    Ok(StoredItem { item, header_error })
}
