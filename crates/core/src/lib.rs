//! # OrgSync Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for storage and provider adapters
//! - The credential vault, integration registry and token refresh
//!   orchestrator
//! - The webhook queue, intake and dispatcher
//! - The incremental sync engine, webhook channel renewal and OAuth flow
//!
//! ## Architecture Principles
//! - Only depends on `orgsync-common` and `orgsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod integrations;
pub mod leases;
pub mod oauth;
pub mod providers;
pub mod renewal;
pub mod sync;
pub mod tokens;
pub mod vault;
pub mod webhooks;

// Re-export specific items to avoid ambiguity
pub use integrations::ports::IntegrationRepository;
pub use integrations::IntegrationRegistry;
pub use leases::ports::LeaseRepository;
pub use leases::LeaseGuard;
pub use oauth::{
    BackgroundOnboarding, CallbackOutcome, CallbackParams, ConnectListener, OAuthFlow, OAuthState,
    OAuthStateCodec,
};
pub use providers::ports::{
    ChangePage, ChangeQuery, Continuation, HandshakeResponse, ProviderAdapter, SecretLocation,
    Subscription, SubscriptionRequest, TimestampCheck, TimestampUnit, WebhookRequest,
    WebhookScheme,
};
pub use providers::ProviderLookup;
pub use renewal::{RenewalReport, WebhookRenewalService};
pub use sync::ports::{MirrorRepository, SyncStateRepository};
pub use sync::{SyncEngine, SyncTrigger};
pub use tokens::{RefreshBatchReport, TokenRefreshOrchestrator};
pub use vault::CredentialVault;
pub use webhooks::ports::WebhookQueueRepository;
pub use webhooks::{IntakeOutcome, RetryPolicy, WebhookDispatcher, WebhookIntake, WebhookQueue};
