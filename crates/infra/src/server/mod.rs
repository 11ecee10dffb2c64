//! Public HTTP surface: webhook intake, OAuth redirects and health.

mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use orgsync_core::{OAuthFlow, WebhookIntake, WebhookQueue};
use orgsync_domain::{OrgSyncError, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use error::ApiError;

use crate::database::DbManager;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<WebhookIntake>,
    pub oauth: Arc<OAuthFlow>,
    pub queue: Arc<WebhookQueue>,
    pub db: Arc<DbManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/{provider}", post(routes::receive_webhook))
        .route("/oauth/{provider}/authorize", get(routes::authorize))
        .route("/oauth/{provider}/callback", get(routes::callback))
        .route("/healthz", get(routes::health))
        .with_state(state)
}

/// Serves until `shutdown` is cancelled.
pub async fn serve(bind_address: &str, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| OrgSyncError::Config(format!("invalid bind address {bind_address}: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| OrgSyncError::Network(format!("failed to bind {addr}: {e}")))?;
    info!(%addr, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| OrgSyncError::Network(format!("http server error: {e}")))
}
