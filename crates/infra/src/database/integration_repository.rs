//! SQLCipher-backed implementation of the integration repository port.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_common::storage::SqlCipherConnection;
use orgsync_core::IntegrationRepository;
use orgsync_domain::{
    EncryptedCredentials, Integration, IntegrationStats, IntegrationStatus, OrgSyncError,
    Provider, Result as DomainResult, WebhookChannel, WebhookTarget,
};
use rusqlite::{params, Row, ToSql};
use uuid::Uuid;

use super::manager::{map_storage_error, DbManager};
use super::rows::{
    count_to_u64, enum_col, json_col, millis, opt_millis, opt_time_col, time_col, u32_col,
    uuid_col,
};

/// SQLCipher-backed integration store.
pub struct SqlCipherIntegrationRepository {
    db: Arc<DbManager>,
}

impl SqlCipherIntegrationRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    fn write(conn: &SqlCipherConnection, sql: &str, integration: &Integration) -> DomainResult<usize> {
        let scopes = serde_json::to_string(&integration.scopes)
            .map_err(|e| OrgSyncError::Internal(format!("failed to encode scopes: {e}")))?;
        let params: [&dyn ToSql; 23] = [
            &integration.id.to_string(),
            &integration.organization_id,
            &integration.provider.as_str(),
            &integration.account_email,
            &integration.account_id,
            &integration.status.as_str(),
            &scopes,
            &integration.credentials.ciphertext,
            &integration.credentials.iv,
            &integration.credentials.auth_tag,
            &integration.credentials.salt,
            &integration.credentials.key_version,
            &integration.webhook.channel_id,
            &integration.webhook.subscription_id,
            &integration.webhook.resource_id,
            &integration.webhook.secret,
            &opt_millis(integration.expires_at),
            &opt_millis(integration.last_used_at),
            &opt_millis(integration.last_refreshed_at),
            &integration.refresh_count,
            &integration.last_error,
            &millis(integration.created_at),
            &millis(integration.updated_at),
        ];
        conn.execute(sql, params.as_slice()).map_err(map_storage_error)
    }

    fn select(conn: &SqlCipherConnection, clause: &str, params: &[&dyn ToSql]) -> DomainResult<Vec<Integration>> {
        let sql = format!("SELECT {INTEGRATION_COLUMNS} FROM integrations {clause} ORDER BY created_at ASC, id ASC");
        let mut stmt = conn.prepare(&sql).map_err(map_storage_error)?;
        stmt.query_map(params, map_integration_row).map_err(map_storage_error)
    }

    fn select_one(conn: &SqlCipherConnection, clause: &str, params: &[&dyn ToSql]) -> DomainResult<Option<Integration>> {
        Ok(Self::select(conn, clause, params)?.into_iter().next())
    }

    fn expect_row(id: Uuid, changed: usize) -> DomainResult<()> {
        if changed == 0 {
            return Err(OrgSyncError::NotFound(format!("integration {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl IntegrationRepository for SqlCipherIntegrationRepository {
    async fn insert(&self, integration: &Integration) -> DomainResult<()> {
        let row = integration.clone();
        self.db.with_connection(move |conn| Self::write(conn, INSERT_SQL, &row).map(|_| ())).await
    }

    async fn update(&self, integration: &Integration) -> DomainResult<()> {
        let row = integration.clone();
        self.db.with_connection(move |conn| {
            let changed = Self::write(conn, UPDATE_SQL, &row)?;
            Self::expect_row(row.id, changed)
        })
        .await
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Integration>> {
        self.db.with_connection(move |conn| Self::select_one(conn, "WHERE id = ?1", params![id.to_string()])).await
    }

    async fn find_by_account(
        &self,
        organization_id: &str,
        provider: Provider,
        account_email: &str,
    ) -> DomainResult<Option<Integration>> {
        let (org, email) = (organization_id.to_string(), account_email.to_string());
        self.db.with_connection(move |conn| {
            Self::select_one(
                conn,
                "WHERE organization_id = ?1 AND provider = ?2 AND account_email = ?3",
                params![org, provider.as_str(), email],
            )
        })
        .await
    }

    async fn list_by_organization(&self, organization_id: &str) -> DomainResult<Vec<Integration>> {
        let org = organization_id.to_string();
        self.db.with_connection(move |conn| Self::select(conn, "WHERE organization_id = ?1", params![org])).await
    }

    async fn list_by_organization_and_provider(
        &self,
        organization_id: &str,
        provider: Provider,
    ) -> DomainResult<Vec<Integration>> {
        let org = organization_id.to_string();
        self.db.with_connection(move |conn| {
            Self::select(conn, "WHERE organization_id = ?1 AND provider = ?2", params![org, provider.as_str()])
        })
        .await
    }

    async fn list_expiring(&self, before: DateTime<Utc>) -> DomainResult<Vec<Integration>> {
        self.db.with_connection(move |conn| {
            Self::select(
                conn,
                "WHERE status IN ('connected', 'refreshing') AND expires_at IS NOT NULL AND expires_at <= ?1",
                params![millis(before)],
            )
        })
        .await
    }

    async fn list_by_status(&self, status: IntegrationStatus) -> DomainResult<Vec<Integration>> {
        self.db.with_connection(move |conn| Self::select(conn, "WHERE status = ?1", params![status.as_str()])).await
    }

    async fn list_with_stale_key(&self, current_version: u32) -> DomainResult<Vec<Integration>> {
        self.db.with_connection(move |conn| Self::select(conn, "WHERE key_version <> ?1", params![current_version])).await
    }

    async fn find_by_webhook_target(
        &self,
        provider: Provider,
        target: &WebhookTarget,
    ) -> DomainResult<Vec<Integration>> {
        let (column, id) = match target {
            WebhookTarget::Channel(id) => ("webhook_channel_id", id.clone()),
            WebhookTarget::Subscription(id) => ("webhook_subscription_id", id.clone()),
            WebhookTarget::Account(id) => ("account_id", id.clone()),
        };
        self.db.with_connection(move |conn| {
            let clause = format!("WHERE provider = ?1 AND {column} = ?2");
            Self::select(conn, &clause, params![provider.as_str(), id])
        })
        .await
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        last_error: Option<&str>,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let last_error = last_error.map(str::to_string);
        self.db.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE integrations SET status = ?2, last_error = ?3, updated_at = ?4 WHERE id = ?1",
                    params![id.to_string(), status.as_str(), last_error, millis(at)],
                )
                .map_err(map_storage_error)?;
            Self::expect_row(id, changed)
        })
        .await
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        self.db.with_connection(move |conn| {
            let changed = conn
                .execute("UPDATE integrations SET last_used_at = ?2 WHERE id = ?1", params![id.to_string(), millis(at)])
                .map_err(map_storage_error)?;
            Self::expect_row(id, changed)
        })
        .await
    }

    async fn update_webhook_channel(
        &self,
        id: Uuid,
        channel: &WebhookChannel,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let channel = channel.clone();
        self.db.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE integrations SET webhook_channel_id = ?2, webhook_subscription_id = ?3,
                        webhook_resource_id = ?4, webhook_secret = ?5, updated_at = ?6
                     WHERE id = ?1",
                    params![
                        id.to_string(),
                        channel.channel_id,
                        channel.subscription_id,
                        channel.resource_id,
                        channel.secret,
                        millis(at)
                    ],
                )
                .map_err(map_storage_error)?;
            Self::expect_row(id, changed)
        })
        .await
    }

    async fn stats(&self, organization_id: Option<&str>) -> DomainResult<IntegrationStats> {
        let org = organization_id.map(str::to_string);
        self.db.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT status, COUNT(*) FROM integrations
                     WHERE ?1 IS NULL OR organization_id = ?1
                     GROUP BY status",
                )
                .map_err(map_storage_error)?;
            let rows = stmt
                .query_map(params![org], |row| {
                    Ok((enum_col::<IntegrationStatus>(row, 0)?, row.get::<_, i64>(1)?))
                })
                .map_err(map_storage_error)?;
            let mut stats = IntegrationStats::default();
            for (status, count) in rows {
                stats.record(status, count_to_u64(count));
            }
            Ok(stats)
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> DomainResult<bool> {
        self.db.with_connection(move |conn| {
            // Mirrored rows, sync state and leases cascade.
            let changed = conn
                .execute("DELETE FROM integrations WHERE id = ?1", params![id.to_string()])
                .map_err(map_storage_error)?;
            Ok(changed > 0)
        })
        .await
    }
}

const INTEGRATION_COLUMNS: &str = "id, organization_id, provider, account_email, account_id, status, scopes,
    ciphertext, iv, auth_tag, salt, key_version,
    webhook_channel_id, webhook_subscription_id, webhook_resource_id, webhook_secret,
    expires_at, last_used_at, last_refreshed_at, refresh_count, last_error, created_at, updated_at";

const INSERT_SQL: &str = "INSERT INTO integrations (
        id, organization_id, provider, account_email, account_id, status, scopes,
        ciphertext, iv, auth_tag, salt, key_version,
        webhook_channel_id, webhook_subscription_id, webhook_resource_id, webhook_secret,
        expires_at, last_used_at, last_refreshed_at, refresh_count, last_error, created_at, updated_at
    ) VALUES (
        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
        ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
    )";

// created_at (?22) is immutable; the positional layout matches INSERT_SQL.
const UPDATE_SQL: &str = "UPDATE integrations SET
        organization_id = ?2, provider = ?3, account_email = ?4, account_id = ?5, status = ?6,
        scopes = ?7, ciphertext = ?8, iv = ?9, auth_tag = ?10, salt = ?11, key_version = ?12,
        webhook_channel_id = ?13, webhook_subscription_id = ?14, webhook_resource_id = ?15,
        webhook_secret = ?16, expires_at = ?17, last_used_at = ?18, last_refreshed_at = ?19,
        refresh_count = ?20, last_error = ?21, updated_at = ?23
    WHERE id = ?1 AND ?22 IS NOT NULL";

fn map_integration_row(row: &Row<'_>) -> rusqlite::Result<Integration> {
    Ok(Integration {
        id: uuid_col(row, 0)?,
        organization_id: row.get(1)?,
        provider: enum_col(row, 2)?,
        account_email: row.get(3)?,
        account_id: row.get(4)?,
        status: enum_col(row, 5)?,
        scopes: json_col(row, 6)?,
        credentials: EncryptedCredentials {
            ciphertext: row.get(7)?,
            iv: row.get(8)?,
            auth_tag: row.get(9)?,
            salt: row.get(10)?,
            key_version: u32_col(row, 11)?,
        },
        webhook: WebhookChannel {
            channel_id: row.get(12)?,
            subscription_id: row.get(13)?,
            resource_id: row.get(14)?,
            secret: row.get(15)?,
        },
        expires_at: opt_time_col(row, 16)?,
        last_used_at: opt_time_col(row, 17)?,
        last_refreshed_at: opt_time_col(row, 18)?,
        refresh_count: u32_col(row, 19)?,
        last_error: row.get(20)?,
        created_at: time_col(row, 21)?,
        updated_at: time_col(row, 22)?,
    })
}
