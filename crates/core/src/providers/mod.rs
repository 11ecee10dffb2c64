//! Provider adapters and the lookup table keyed by [`Provider`].

pub mod ports;

use std::collections::HashMap;
use std::sync::Arc;

use orgsync_domain::{OrgSyncError, Provider, Result};

use self::ports::ProviderAdapter;

/// Capability table: one adapter per configured provider.
#[derive(Default, Clone)]
pub struct ProviderLookup {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl ProviderLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or_else(|| OrgSyncError::Config(format!("provider {provider} is not configured")))
    }

    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.adapters.keys().copied()
    }
}

impl std::fmt::Debug for ProviderLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderLookup").field("providers", &self.adapters.keys().collect::<Vec<_>>()).finish()
    }
}
