//! Shared test helpers for `orgsync-core` integration tests.
//!
//! [`Harness`] wires every core service over in-memory ports, a mock clock
//! and one [`FakeProvider`], so tests can focus on behaviour instead of
//! boilerplate.

#![allow(dead_code)]

pub mod memory;
pub mod provider;

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use orgsync_common::crypto::{KdfParams, KeyRing};
use orgsync_common::time::{Clock, MockClock};
use orgsync_core::{
    CredentialVault, IntegrationRegistry, ProviderLookup, SyncEngine, TokenRefreshOrchestrator,
};
use orgsync_domain::{
    ConnectIntegration, Integration, OAuthCredentials, Provider, SyncConfig, TokenConfig,
};

use self::memory::{MemoryIntegrations, MemoryLeases, MemoryMirror, MemoryQueue, MemorySyncStates};
use self::provider::FakeProvider;

pub const TEST_MASTER_KEY: &str = "core-tests-master-key-0123456789abcdef";
pub const ORG: &str = "org-1";

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn test_vault() -> Arc<CredentialVault> {
    let ring = KeyRing::new(1, TEST_MASTER_KEY, KdfParams::testing()).unwrap();
    Arc::new(CredentialVault::new(ring))
}

pub struct Harness {
    pub clock: MockClock,
    pub integrations: Arc<MemoryIntegrations>,
    pub leases: Arc<MemoryLeases>,
    pub queue: Arc<MemoryQueue>,
    pub states: Arc<MemorySyncStates>,
    pub mirror: Arc<MemoryMirror>,
    pub vault: Arc<CredentialVault>,
    pub provider: Arc<FakeProvider>,
    pub providers: Arc<ProviderLookup>,
    pub registry: Arc<IntegrationRegistry>,
    pub tokens: Arc<TokenRefreshOrchestrator>,
    pub engine: Arc<SyncEngine>,
}

impl Harness {
    pub fn new(provider: FakeProvider) -> Self {
        Self::with_token_config(provider, TokenConfig::default())
    }

    pub fn with_token_config(provider: FakeProvider, token_config: TokenConfig) -> Self {
        let clock = MockClock::at(epoch());
        let dyn_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let integrations = Arc::new(MemoryIntegrations::default());
        let leases = Arc::new(MemoryLeases::default());
        let queue = Arc::new(MemoryQueue::default());
        let states = Arc::new(MemorySyncStates::default());
        let mirror = Arc::new(MemoryMirror::default());
        let vault = test_vault();
        let provider = Arc::new(provider);
        let providers = Arc::new(ProviderLookup::new().with_adapter(provider.clone()));

        let registry = Arc::new(IntegrationRegistry::new(
            integrations.clone(),
            vault.clone(),
            dyn_clock.clone(),
        ));
        let tokens = Arc::new(TokenRefreshOrchestrator::new(
            integrations.clone(),
            leases.clone(),
            vault.clone(),
            providers.clone(),
            dyn_clock.clone(),
            token_config,
        ));
        let engine = Arc::new(SyncEngine::new(
            integrations.clone(),
            states.clone(),
            mirror.clone(),
            leases.clone(),
            tokens.clone(),
            providers.clone(),
            dyn_clock,
            SyncConfig::default(),
        ));

        Self {
            clock,
            integrations,
            leases,
            queue,
            states,
            mirror,
            vault,
            provider,
            providers,
            registry,
            tokens,
            engine,
        }
    }

    pub fn dyn_clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn provider_kind(&self) -> Provider {
        use orgsync_core::ProviderAdapter;
        self.provider.provider()
    }

    /// Connects `email` with an access token expiring after `expires_in`.
    pub async fn connect(&self, email: &str, expires_in: Option<Duration>) -> Integration {
        self.registry
            .connect(ConnectIntegration {
                organization_id: ORG.into(),
                provider: self.provider_kind(),
                account_email: email.into(),
                account_id: format!("acct-{email}"),
                scopes: vec!["read".into()],
                credentials: OAuthCredentials {
                    access_token: format!("access-{email}"),
                    refresh_token: Some(format!("refresh-{email}")),
                    expires_at: expires_in.map(|d| self.clock.now() + d),
                    token_type: Some("Bearer".into()),
                },
            })
            .await
            .expect("connect succeeds")
    }

    pub fn open(&self, integration: &Integration) -> OAuthCredentials {
        self.vault.open(&integration.credentials).expect("credentials open")
    }
}
