//! # OrgSync Infrastructure
//!
//! Infrastructure implementations of core domain ports.
//!
//! This crate contains:
//! - Database implementations (SQLite/SQLCipher)
//! - The outbound HTTP client and the per-provider adapters
//! - The public HTTP surface (webhooks, OAuth redirects, health)
//! - Configuration loading and the cron scheduler
//!
//! ## Architecture
//! - Implements traits defined in `orgsync-core`
//! - Contains all "impure" code (I/O, network, clocks)

pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod providers;
pub mod scheduling;
pub mod server;

// Re-export commonly used items
pub use database::{
    DbManager, SqlCipherIntegrationRepository, SqlCipherLeaseRepository, SqlCipherMirrorRepository,
    SqlCipherSyncStateRepository, SqlCipherWebhookQueueRepository,
};
pub use errors::InfraError;
pub use http::HttpClient;
pub use providers::{build_adapter, build_lookup};
pub use scheduling::{CronScheduler, CronSchedulerConfig};
pub use server::{router, serve, AppState};
