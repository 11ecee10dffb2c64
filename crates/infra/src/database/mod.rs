//! Database implementations

pub mod integration_repository;
pub mod lease_repository;
pub mod manager;
pub mod mirror_repository;
mod rows;
pub mod sync_state_repository;
pub mod webhook_queue_repository;

pub use integration_repository::SqlCipherIntegrationRepository;
pub use lease_repository::SqlCipherLeaseRepository;
pub use manager::DbManager;
pub use mirror_repository::SqlCipherMirrorRepository;
pub use sync_state_repository::SqlCipherSyncStateRepository;
pub use webhook_queue_repository::SqlCipherWebhookQueueRepository;
