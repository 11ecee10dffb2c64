//! Incremental sync of remote records into the local mirror.

mod engine;
pub mod ports;

use async_trait::async_trait;
use orgsync_domain::{Result, SyncReport};
use uuid::Uuid;

pub use engine::SyncEngine;

/// Entry point the webhook dispatcher uses to reconcile one integration.
#[async_trait]
pub trait SyncTrigger: Send + Sync {
    async fn sync(&self, integration_id: Uuid) -> Result<SyncReport>;
}
