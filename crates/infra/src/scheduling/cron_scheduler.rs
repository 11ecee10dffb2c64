//! Cron scheduler for the OrgSync background jobs.
//!
//! Every registered [`ScheduledJob`] gets its own cron entry on a shared
//! `tokio-cron-scheduler` instance. Lifecycle is explicit: `start` and `stop`
//! are awaited, the monitor task's join handle is tracked, and each job run
//! is wrapped in a timeout. A job whose previous run is still in flight is
//! skipped rather than stacked.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use orgsync_infra::scheduling::{CronScheduler, SchedulerResult, WebhookCleanupJob};
//!
//! # async fn example(queue: Arc<orgsync_core::WebhookQueue>) -> SchedulerResult<()> {
//! let mut scheduler = CronScheduler::new(Default::default())
//!     .with_job("0 0 3 * * *", Arc::new(WebhookCleanupJob::new(queue)));
//!
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use orgsync_domain::SchedulerConfig;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::{SchedulerError, SchedulerResult};
use super::jobs::ScheduledJob;

/// Timeouts applied by the scheduler.
#[derive(Debug, Clone)]
pub struct CronSchedulerConfig {
    /// Timeout applied to a single job execution.
    pub job_timeout: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    /// Timeout for awaiting the monitor task join handle.
    pub join_timeout: Duration,
}

impl Default for CronSchedulerConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(300),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&SchedulerConfig> for CronSchedulerConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self { job_timeout: Duration::from_secs(config.job_timeout_secs.max(1)), ..Default::default() }
    }
}

/// Point-in-time counters for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub runs: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// Runs skipped because the previous one was still in flight.
    pub overlaps: u64,
    pub last_duration_ms: u64,
}

#[derive(Debug, Default)]
struct JobCounters {
    runs: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    overlaps: AtomicU64,
    last_duration_ms: AtomicU64,
    in_flight: AtomicBool,
}

impl JobCounters {
    fn snapshot(&self) -> JobStats {
        JobStats {
            runs: self.runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            overlaps: self.overlaps.load(Ordering::Relaxed),
            last_duration_ms: self.last_duration_ms.load(Ordering::Relaxed),
        }
    }

    fn record_duration(&self, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.last_duration_ms.store(millis, Ordering::Relaxed);
    }
}

struct JobEntry {
    cron: String,
    job: Arc<dyn ScheduledJob>,
    counters: Arc<JobCounters>,
}

/// Cron scheduler with explicit lifecycle management.
pub struct CronScheduler {
    scheduler: Arc<RwLock<Option<JobScheduler>>>,
    config: CronSchedulerConfig,
    entries: Vec<JobEntry>,
    monitor_handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
}

impl CronScheduler {
    pub fn new(config: CronSchedulerConfig) -> Self {
        Self {
            scheduler: Arc::new(RwLock::new(None)),
            config,
            entries: Vec::new(),
            monitor_handle: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Registers `job` on `cron` (six-field expression, seconds first).
    #[must_use]
    pub fn with_job(mut self, cron: impl Into<String>, job: Arc<dyn ScheduledJob>) -> Self {
        self.entries.push(JobEntry { cron: cron.into(), job, counters: Arc::new(JobCounters::default()) });
        self
    }

    /// Counters per job name.
    pub fn stats(&self) -> BTreeMap<&'static str, JobStats> {
        self.entries.iter().map(|entry| (entry.job.name(), entry.counters.snapshot())).collect()
    }

    /// Start the scheduler, spawning the monitoring task.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();

        let scheduler_instance = self.build_scheduler().await?;
        let start_timeout = self.config.start_timeout;
        tokio::time::timeout(start_timeout, scheduler_instance.start())
            .await
            .map_err(|source| SchedulerError::Timeout { duration: start_timeout, source })?
            .map_err(|source| SchedulerError::StartFailed { source })?;

        *self.scheduler.write().await = Some(scheduler_instance);

        let cancel = self.cancellation.clone();
        self.monitor_handle = Some(tokio::spawn(async move {
            cancel.cancelled().await;
            debug!("Cron scheduler monitor cancelled");
        }));

        info!(jobs = self.entries.len(), "Cron scheduler started");
        Ok(())
    }

    /// Stop the scheduler and wait for the monitor task to finish.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation.cancel();

        let Some(mut scheduler) = self.scheduler.write().await.take() else {
            return Err(SchedulerError::NotRunning);
        };

        let stop_timeout = self.config.stop_timeout;
        tokio::time::timeout(stop_timeout, async move { scheduler.shutdown().await })
            .await
            .map_err(|source| SchedulerError::Timeout { duration: stop_timeout, source })?
            .map_err(|source| SchedulerError::StopFailed { source })?;

        if let Some(handle) = self.monitor_handle.take() {
            let join_timeout = self.config.join_timeout;
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|source| SchedulerError::Timeout { duration: join_timeout, source })??;
        }

        info!("Cron scheduler stopped");
        Ok(())
    }

    /// Returns true when the monitor task is active.
    pub fn is_running(&self) -> bool {
        self.monitor_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    async fn build_scheduler(&self) -> SchedulerResult<JobScheduler> {
        let scheduler = JobScheduler::new().await.map_err(|source| SchedulerError::CreationFailed { source })?;

        for entry in &self.entries {
            let name = entry.job.name();
            let definition = Self::job_definition(entry, self.config.job_timeout)
                .map_err(|source| SchedulerError::JobRegistrationFailed { job: name, source })?;
            let job_id = definition.guid();
            scheduler
                .add(definition)
                .await
                .map_err(|source| SchedulerError::JobRegistrationFailed { job: name, source })?;
            debug!(job = name, cron = %entry.cron, %job_id, "Registered scheduled job");
        }
        Ok(scheduler)
    }

    fn job_definition(
        entry: &JobEntry,
        job_timeout: Duration,
    ) -> Result<Job, tokio_cron_scheduler::JobSchedulerError> {
        let job = Arc::clone(&entry.job);
        let counters = Arc::clone(&entry.counters);

        Job::new_async(entry.cron.as_str(), move |_id, _lock| {
            let job = Arc::clone(&job);
            let counters = Arc::clone(&counters);

            Box::pin(async move {
                let name = job.name();
                if counters.in_flight.swap(true, Ordering::AcqRel) {
                    counters.overlaps.fetch_add(1, Ordering::Relaxed);
                    debug!(job = name, "Previous run still in flight; skipping");
                    return;
                }

                counters.runs.fetch_add(1, Ordering::Relaxed);
                let started = Instant::now();
                match tokio::time::timeout(job_timeout, job.run()).await {
                    Ok(Ok(())) => {
                        debug!(job = name, elapsed_ms = started.elapsed().as_millis(), "Scheduled job finished");
                    }
                    Ok(Err(err)) => {
                        counters.failures.fetch_add(1, Ordering::Relaxed);
                        error!(job = name, error = %err, "Scheduled job failed");
                    }
                    Err(_) => {
                        counters.timeouts.fetch_add(1, Ordering::Relaxed);
                        warn!(job = name, timeout_secs = job_timeout.as_secs(), "Scheduled job timed out");
                    }
                }
                counters.record_duration(started.elapsed());
                counters.in_flight.store(false, Ordering::Release);
            })
        })
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("CronScheduler dropped while running; cancelling tasks");
            self.cancellation.cancel();
        }
    }
}
