//! Application context - dependency injection container

use std::sync::Arc;

use chrono::Duration;
use orgsync_common::time::{Clock, SystemClock};
use orgsync_core::{
    BackgroundOnboarding, CredentialVault, IntegrationRegistry, IntegrationRepository, LeaseRepository,
    MirrorRepository, OAuthFlow, OAuthStateCodec, RetryPolicy, SyncEngine, SyncStateRepository, SyncTrigger,
    TokenRefreshOrchestrator, WebhookDispatcher, WebhookIntake, WebhookQueue, WebhookQueueRepository,
    WebhookRenewalService,
};
use orgsync_domain::{Config, OrgSyncError, Result};
use orgsync_infra::database::{
    SqlCipherIntegrationRepository, SqlCipherLeaseRepository, SqlCipherMirrorRepository,
    SqlCipherSyncStateRepository, SqlCipherWebhookQueueRepository,
};
use orgsync_infra::http::HttpClient;
use orgsync_infra::scheduling::{
    SyncSweepJob, TokenRefreshJob, WebhookCleanupJob, WebhookDispatchJob, WebhookRenewalJob,
};
use orgsync_infra::{build_lookup, AppState, CronScheduler, CronSchedulerConfig, DbManager};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Application context - holds all services and dependencies
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub clock: Arc<dyn Clock>,
    pub vault: Arc<CredentialVault>,
    pub registry: Arc<IntegrationRegistry>,
    pub tokens: Arc<TokenRefreshOrchestrator>,
    pub queue: Arc<WebhookQueue>,
    pub intake: Arc<WebhookIntake>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub sync: Arc<SyncEngine>,
    pub renewal: Arc<WebhookRenewalService>,
    pub oauth: Arc<OAuthFlow>,

    scheduler: Mutex<Option<CronScheduler>>,
}

impl AppContext {
    /// Opens the database, applies migrations and wires every service.
    ///
    /// Background jobs are not started; see [`AppContext::start_scheduler`].
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(DbManager::from_config(&config.database, config.vault.master_key.as_deref())?);
        db.run_migrations()?;

        let integrations: Arc<dyn IntegrationRepository> =
            Arc::new(SqlCipherIntegrationRepository::new(Arc::clone(&db)));
        let leases: Arc<dyn LeaseRepository> = Arc::new(SqlCipherLeaseRepository::new(Arc::clone(&db)));
        let states: Arc<dyn SyncStateRepository> = Arc::new(SqlCipherSyncStateRepository::new(Arc::clone(&db)));
        let mirror: Arc<dyn MirrorRepository> = Arc::new(SqlCipherMirrorRepository::new(Arc::clone(&db)));
        let queue_repo: Arc<dyn WebhookQueueRepository> =
            Arc::new(SqlCipherWebhookQueueRepository::new(Arc::clone(&db)));

        let vault = Arc::new(CredentialVault::from_config(&config.vault)?);
        let http = HttpClient::builder().user_agent(concat!("orgsync/", env!("CARGO_PKG_VERSION"))).build()?;
        let providers = Arc::new(build_lookup(&config.providers, &http));
        let configured: Vec<String> = config.providers.configured().map(|p| p.to_string()).collect();
        if configured.is_empty() {
            warn!("no providers configured; OAuth and webhook endpoints will answer 404");
        }

        let registry = Arc::new(IntegrationRegistry::new(Arc::clone(&integrations), Arc::clone(&vault), clock.clone()));
        let tokens = Arc::new(TokenRefreshOrchestrator::new(
            Arc::clone(&integrations),
            Arc::clone(&leases),
            Arc::clone(&vault),
            Arc::clone(&providers),
            clock.clone(),
            config.tokens.clone(),
        ));
        let queue = Arc::new(WebhookQueue::new(Arc::clone(&queue_repo), clock.clone(), config.webhooks.clone()));
        let intake = Arc::new(WebhookIntake::new(
            Arc::clone(&providers),
            Arc::clone(&integrations),
            Arc::clone(&queue),
            &config.providers,
            config.webhooks.replay_window_secs,
            clock.clone(),
        ));
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&integrations),
            Arc::clone(&states),
            mirror,
            leases,
            Arc::clone(&tokens),
            Arc::clone(&providers),
            clock.clone(),
            config.sync.clone(),
        ));
        let trigger: Arc<dyn SyncTrigger> = sync.clone();
        let dispatcher = Arc::new(WebhookDispatcher::new(
            queue_repo,
            Arc::clone(&integrations),
            Arc::clone(&providers),
            trigger,
            RetryPolicy::from_config(&config.webhooks),
            clock.clone(),
        ));
        let renewal = Arc::new(WebhookRenewalService::new(
            integrations,
            states,
            Arc::clone(&tokens),
            Arc::clone(&providers),
            clock.clone(),
            config.server.public_base_url.clone(),
        ));

        let master_key = config
            .vault
            .master_key
            .as_deref()
            .ok_or_else(|| OrgSyncError::Config("vault master key is required".into()))?;
        let codec = OAuthStateCodec::new(master_key, Duration::seconds(config.server.oauth_state_ttl_secs))?;
        let oauth = Arc::new(
            OAuthFlow::new(
                providers,
                Arc::clone(&registry),
                codec,
                clock.clone(),
                config.server.public_base_url.clone(),
                config.server.default_redirect_url.clone(),
            )
            .with_listener(Arc::new(BackgroundOnboarding::new(Arc::clone(&sync), Arc::clone(&renewal)))),
        );

        info!(providers = ?configured, db_path = %db.path().display(), "application context initialised");

        Ok(Self {
            config,
            db,
            clock,
            vault,
            registry,
            tokens,
            queue,
            intake,
            dispatcher,
            sync,
            renewal,
            oauth,
            scheduler: Mutex::new(None),
        })
    }

    /// Handler state for the HTTP router.
    pub fn app_state(&self) -> AppState {
        AppState {
            intake: Arc::clone(&self.intake),
            oauth: Arc::clone(&self.oauth),
            queue: Arc::clone(&self.queue),
            db: Arc::clone(&self.db),
        }
    }

    /// Builds the cron scheduler from the `scheduler` config section and starts
    /// it. Does nothing when scheduling is disabled or already running.
    pub async fn start_scheduler(&self) -> Result<()> {
        let settings = &self.config.scheduler;
        if !settings.enabled {
            info!("background scheduler disabled by configuration");
            return Ok(());
        }

        let mut guard = self.scheduler.lock().await;
        if guard.as_ref().is_some_and(CronScheduler::is_running) {
            return Ok(());
        }

        let renewal_window = Duration::seconds(self.config.webhooks.renewal_window_secs);
        let mut scheduler = CronScheduler::new(CronSchedulerConfig::from(settings))
            .with_job(settings.token_refresh_cron.clone(), Arc::new(TokenRefreshJob::new(Arc::clone(&self.tokens))))
            .with_job(
                settings.webhook_dispatch_cron.clone(),
                Arc::new(WebhookDispatchJob::new(
                    Arc::clone(&self.queue),
                    Arc::clone(&self.dispatcher),
                    self.config.webhooks.dispatch_batch_size,
                )),
            )
            .with_job(settings.webhook_cleanup_cron.clone(), Arc::new(WebhookCleanupJob::new(Arc::clone(&self.queue))))
            .with_job(
                settings.webhook_renewal_cron.clone(),
                Arc::new(WebhookRenewalJob::new(Arc::clone(&self.renewal), renewal_window)),
            );
        if let Some(cron) = settings.sync_sweep_cron.as_deref() {
            scheduler = scheduler.with_job(cron, Arc::new(SyncSweepJob::new(Arc::clone(&self.sync))));
        }

        scheduler.start().await.map_err(|err| {
            tracing::error!(error = %err, "failed to start cron scheduler");
            OrgSyncError::from(err)
        })?;
        *guard = Some(scheduler);
        Ok(())
    }

    pub async fn scheduler_running(&self) -> bool {
        self.scheduler.lock().await.as_ref().is_some_and(CronScheduler::is_running)
    }

    /// Stops background jobs. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(mut scheduler) = self.scheduler.lock().await.take() else {
            return Ok(());
        };
        if scheduler.is_running() {
            scheduler.stop().await?;
        }
        info!("application context shut down");
        Ok(())
    }
}
