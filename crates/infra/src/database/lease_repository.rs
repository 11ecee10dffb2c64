//! Advisory per-integration leases.
//!
//! A lease row is taken with a single conditional upsert: it succeeds when no
//! row exists, the caller already holds it, or the previous holder's
//! `locked_until` has passed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_core::LeaseRepository;
use orgsync_domain::{LeaseScope, Result as DomainResult};
use rusqlite::params;
use tracing::debug;
use uuid::Uuid;

use super::manager::{map_storage_error, DbManager};
use super::rows::millis;

pub struct SqlCipherLeaseRepository {
    db: Arc<DbManager>,
}

impl SqlCipherLeaseRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LeaseRepository for SqlCipherLeaseRepository {
    async fn try_acquire(
        &self,
        integration_id: Uuid,
        scope: LeaseScope,
        holder: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let holder = holder.to_string();
        self.db
            .with_connection(move |conn| {
                let changed = conn
                    .execute(
                        ACQUIRE_SQL,
                        params![integration_id.to_string(), scope.as_str(), holder, millis(until), millis(now)],
                    )
                    .map_err(map_storage_error)?;
                debug!(%integration_id, scope = %scope, acquired = changed > 0, "lease acquisition");
                Ok(changed > 0)
            })
            .await
    }

    async fn release(&self, integration_id: Uuid, scope: LeaseScope, holder: &str) -> DomainResult<()> {
        let holder = holder.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "DELETE FROM integration_leases WHERE integration_id = ?1 AND scope = ?2 AND holder = ?3",
                    params![integration_id.to_string(), scope.as_str(), holder],
                )
                .map_err(map_storage_error)?;
                Ok(())
            })
            .await
    }
}

const ACQUIRE_SQL: &str = "INSERT INTO integration_leases (integration_id, scope, holder, locked_until)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(integration_id, scope) DO UPDATE SET
        holder = excluded.holder,
        locked_until = excluded.locked_until
    WHERE integration_leases.holder = excluded.holder OR integration_leases.locked_until <= ?5";
