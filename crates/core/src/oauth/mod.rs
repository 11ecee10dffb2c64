//! OAuth authorization-code flow and post-connect onboarding.

mod flow;
mod state;

use std::sync::Arc;

use async_trait::async_trait;
use orgsync_domain::Integration;
use tracing::{info, warn, Instrument};

pub use flow::{CallbackOutcome, CallbackParams, ConnectListener, OAuthFlow};
pub use state::{OAuthState, OAuthStateCodec};

use crate::renewal::WebhookRenewalService;
use crate::sync::SyncEngine;

/// Registers the push channel and runs the first full sync in the
/// background so the callback redirect is not held up.
pub struct BackgroundOnboarding {
    sync: Arc<SyncEngine>,
    renewal: Arc<WebhookRenewalService>,
}

impl BackgroundOnboarding {
    pub fn new(sync: Arc<SyncEngine>, renewal: Arc<WebhookRenewalService>) -> Self {
        Self { sync, renewal }
    }
}

#[async_trait]
impl ConnectListener for BackgroundOnboarding {
    async fn on_connected(&self, integration: &Integration) {
        let sync = Arc::clone(&self.sync);
        let renewal = Arc::clone(&self.renewal);
        let integration_id = integration.id;
        let span = tracing::info_span!("onboarding", %integration_id, provider = %integration.provider);

        tokio::spawn(
            async move {
                // Channel first so changes made during the full sync still
                // produce notifications.
                if let Err(err) = renewal.register(integration_id).await {
                    warn!(error = %err, "webhook registration failed; relying on scheduled sync");
                }
                match sync.sync(integration_id).await {
                    Ok(report) => info!(upserted = report.upserted, "initial sync finished"),
                    Err(err) => warn!(error = %err, "initial sync failed"),
                }
            }
            .instrument(span),
        );
    }
}
