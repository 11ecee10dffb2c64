//! Domain types and models

pub mod credentials;
pub mod integration;
pub mod mirror;
pub mod provider;
pub mod sync;
pub mod webhook;

pub use credentials::{EncryptedCredentials, OAuthCredentials, RefreshedTokens, TokenGrant};
pub use integration::{
    ConnectIntegration, Integration, IntegrationStats, IntegrationStatus, LeaseScope,
    WebhookChannel,
};
pub use mirror::{CalendarEventRecord, EmployeeRecord, MirrorKind, MirrorRecord, RemoteChange, TaskRecord};
pub use provider::{DataKind, Provider, RefreshClass};
pub use sync::{SyncBatchReport, SyncMode, SyncReport, SyncState};
pub use webhook::{
    DispatchReport, ProcessedEvent, QueueStats, WebhookNotification, WebhookQueueItem,
    WebhookStatus, WebhookTarget,
};
