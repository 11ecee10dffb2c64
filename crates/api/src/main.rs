//! OrgSync - SaaS integration service
//!
//! Main entry point: loads configuration, wires the application context,
//! starts background jobs and serves HTTP until interrupted.

use anyhow::Context;
use orgsync_app::utils::init_tracing;
use orgsync_app::AppContext;
use orgsync_infra::{config, serve};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env must be loaded before the config loader reads ORGSYNC_* variables
    let dotenv = dotenvy::dotenv();

    let config = config::load().context("failed to load configuration")?;
    init_tracing(&config.logging).context("failed to initialise logging")?;
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(err) if err.not_found() => {}
        Err(err) => warn!(error = %err, "could not read .env file"),
    }

    let bind_address = config.server.bind_address.clone();
    let context = AppContext::new(config).await.context("failed to initialise application context")?;
    context.start_scheduler().await.context("failed to start background jobs")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(err) => error!(error = %err, "failed to listen for shutdown signal"),
        }
        signal.cancel();
    });

    let served = serve(&bind_address, context.app_state(), shutdown).await;
    if let Err(err) = context.shutdown().await {
        warn!(error = %err, "background jobs did not stop cleanly");
    }
    served.context("http server failed")?;

    info!("orgsync stopped");
    Ok(())
}
